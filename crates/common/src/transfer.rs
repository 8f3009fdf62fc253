//! Per-request responder pipeline
//!
//! ```text
//! AwaitingKey -> Authorized -> KeyDerived -> ResourceResolved -> Streaming -> Done
//!       \____________\_____________\________________\______________\_____-> Failed
//! ```
//!
//! Authorization comes before key derivation: the allow-list only needs the
//! decoded requester key, so a rejected requester never triggers key
//! generation.
//!
//! Every request gets its own [`TransferContext`]; the service itself holds
//! only immutable configuration and can be shared across concurrent
//! requests.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWrite;

use crate::crypto::{KeyExchange, PublicKey, SharedSecret};
use crate::frame::{FrameCodec, FrameError};
use crate::handshake::{self, HandshakeError, PeerKey};

/// Transport-neutral outcome of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    NoContent,
    BadRequest,
    Unauthorized,
    NotFound,
    InternalError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    AwaitingKey,
    Authorized,
    KeyDerived,
    ResourceResolved,
    Streaming,
    Done,
    Failed(TransferStatus),
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("requester key is not authorized")]
    Unauthorized,
    #[error("invalid resource path: {0}")]
    InvalidPath(String),
    #[error("resource not found: {0}")]
    ResourceNotFound(PathBuf),
    #[error("resource IO error: {0}")]
    ResourceIo(#[from] std::io::Error),
    #[error("resource is empty")]
    EmptyResource,
    #[error("transfer used out of order, state {0:?}")]
    InvalidState(TransferState),
    #[error("framing failed: {0}")]
    Frame(#[from] FrameError),
}

impl TransferError {
    pub fn status(&self) -> TransferStatus {
        match self {
            TransferError::Handshake(HandshakeError::KeyGeneration(_)) => {
                TransferStatus::InternalError
            }
            TransferError::Handshake(_) => TransferStatus::BadRequest,
            TransferError::Unauthorized => TransferStatus::Unauthorized,
            TransferError::InvalidPath(_) => TransferStatus::BadRequest,
            TransferError::ResourceNotFound(_) => TransferStatus::NotFound,
            TransferError::EmptyResource => TransferStatus::NoContent,
            TransferError::ResourceIo(_)
            | TransferError::InvalidState(_)
            | TransferError::Frame(_) => TransferStatus::InternalError,
        }
    }
}

/// Immutable responder settings
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Directory served to requesters
    pub root: PathBuf,
    /// If set, only this requester public key is admitted
    pub authorized_key: Option<PublicKey>,
}

/// Content resolved for one request
#[derive(Debug)]
pub enum Resource {
    File { file: tokio::fs::File, size: u64 },
    Listing(Vec<u8>),
}

impl Resource {
    pub fn size(&self) -> u64 {
        match self {
            Resource::File { size, .. } => *size,
            Resource::Listing(listing) => listing.len() as u64,
        }
    }
}

/// Ephemeral state of a single request, threaded through the pipeline.
#[derive(Debug)]
pub struct TransferContext {
    state: TransferState,
    peer: PeerKey,
    key_field: Option<String>,
    secret: Option<SharedSecret>,
}

impl TransferContext {
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Hex public key of the requester
    pub fn peer(&self) -> String {
        self.peer.to_hex()
    }

    /// Value for the responder key field, available once the key is derived.
    pub fn key_field(&self) -> Option<&str> {
        self.key_field.as_deref()
    }

    fn fail(&mut self, err: TransferError) -> TransferError {
        self.state = TransferState::Failed(err.status());
        err
    }
}

#[derive(Debug)]
struct TransferServiceInner {
    root: PathBuf,
    authorized_key: Option<PublicKey>,
    kx: Arc<dyn KeyExchange>,
    codec: FrameCodec,
}

/// Responder side of the protocol, cheap to clone and share
#[derive(Debug, Clone)]
pub struct TransferService {
    inner: Arc<TransferServiceInner>,
}

impl TransferService {
    /// Build the service; the root is canonicalized once up front.
    pub fn new(
        config: TransferConfig,
        kx: Arc<dyn KeyExchange>,
        codec: FrameCodec,
    ) -> Result<Self, TransferError> {
        let root = std::fs::canonicalize(&config.root)?;
        if !root.is_dir() {
            return Err(TransferError::InvalidPath(root.display().to_string()));
        }
        Ok(Self {
            inner: Arc::new(TransferServiceInner {
                root,
                authorized_key: config.authorized_key,
                kx,
                codec,
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn authorized_key(&self) -> Option<&PublicKey> {
        self.inner.authorized_key.as_ref()
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.inner.codec
    }

    /// Decode and authorize the requester key, then run our side of the exchange.
    pub fn handshake(&self, key_field: Option<&str>) -> Result<TransferContext, TransferError> {
        let peer = PeerKey::decode(key_field)?;
        let mut ctx = TransferContext {
            state: TransferState::AwaitingKey,
            peer,
            key_field: None,
            secret: None,
        };

        if let Some(allowed) = &self.inner.authorized_key {
            if !allowed.ct_matches(ctx.peer.as_bytes()) {
                tracing::warn!(key = %ctx.peer.to_hex(), "rejected");
                return Err(ctx.fail(TransferError::Unauthorized));
            }
        }
        ctx.state = TransferState::Authorized;

        let response = match handshake::respond(self.inner.kx.as_ref(), &ctx.peer) {
            Ok(response) => response,
            Err(e) => return Err(ctx.fail(e.into())),
        };
        ctx.key_field = Some(response.key_field);
        ctx.secret = Some(response.secret);
        ctx.state = TransferState::KeyDerived;

        tracing::info!(key = %ctx.peer.to_hex(), "resolved");
        Ok(ctx)
    }

    /// Resolve a request path against the root.
    ///
    /// Directories are rendered as a sorted listing; zero-sized results fail
    /// with [`TransferError::EmptyResource`] so nothing gets framed.
    pub async fn resolve(
        &self,
        ctx: &mut TransferContext,
        request_path: &str,
    ) -> Result<Resource, TransferError> {
        if ctx.state != TransferState::KeyDerived {
            return Err(TransferError::InvalidState(ctx.state));
        }
        match self.resolve_inner(request_path).await {
            Ok(resource) => {
                ctx.state = TransferState::ResourceResolved;
                tracing::debug!(path = request_path, size = resource.size(), "resource resolved");
                Ok(resource)
            }
            Err(e) => Err(ctx.fail(e)),
        }
    }

    async fn resolve_inner(&self, request_path: &str) -> Result<Resource, TransferError> {
        let path = confine(&self.inner.root, request_path)?;
        let canonical = tokio::fs::canonicalize(&path)
            .await
            .map_err(|e| not_found_or_io(e, &path))?;
        // symlinks may not lead out of the root
        if !canonical.starts_with(&self.inner.root) {
            return Err(TransferError::ResourceNotFound(path));
        }

        let metadata = tokio::fs::metadata(&canonical)
            .await
            .map_err(|e| not_found_or_io(e, &canonical))?;

        let resource = if metadata.is_dir() {
            Resource::Listing(read_listing(&canonical).await?)
        } else {
            let file = tokio::fs::File::open(&canonical)
                .await
                .map_err(|e| not_found_or_io(e, &canonical))?;
            let size = file.metadata().await?.len();
            Resource::File { file, size }
        };

        if resource.size() == 0 {
            return Err(TransferError::EmptyResource);
        }
        Ok(resource)
    }

    /// Frame and encrypt a resolved resource into `writer`.
    ///
    /// Consumes the context: the shared secret is dropped with it once the
    /// frame is written, whatever the outcome.
    pub async fn stream<W>(
        &self,
        mut ctx: TransferContext,
        resource: Resource,
        writer: &mut W,
    ) -> Result<u64, TransferError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if ctx.state != TransferState::ResourceResolved {
            return Err(TransferError::InvalidState(ctx.state));
        }
        let secret = match ctx.secret.take() {
            Some(secret) => secret,
            None => return Err(ctx.fail(TransferError::InvalidState(ctx.state))),
        };
        ctx.state = TransferState::Streaming;

        let size = resource.size();
        let result = match resource {
            Resource::File { mut file, size } => {
                self.inner
                    .codec
                    .encode(&mut file, writer, &secret, size)
                    .await
            }
            Resource::Listing(listing) => {
                self.inner
                    .codec
                    .encode(&mut listing.as_slice(), writer, &secret, size)
                    .await
            }
        };

        match result {
            Ok(written) => {
                ctx.state = TransferState::Done;
                tracing::debug!(plaintext = size, written, "transfer complete");
                Ok(written)
            }
            Err(e) => Err(ctx.fail(e.into())),
        }
    }
}

/// Join a request path onto the root, refusing anything that could climb out.
fn confine(root: &Path, request_path: &str) -> Result<PathBuf, TransferError> {
    let mut path = root.to_path_buf();
    for segment in request_path.split('/') {
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (None, _) | (Some(Component::CurDir), None) => {}
            (Some(Component::Normal(name)), None) => path.push(name),
            _ => return Err(TransferError::InvalidPath(request_path.to_string())),
        }
    }
    Ok(path)
}

fn not_found_or_io(err: std::io::Error, path: &Path) -> TransferError {
    if err.kind() == std::io::ErrorKind::NotFound {
        TransferError::ResourceNotFound(path.to_path_buf())
    } else {
        TransferError::ResourceIo(err)
    }
}

async fn read_listing(dir: &Path) -> Result<Vec<u8>, TransferError> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let is_dir = entry.file_type().await?.is_dir();
        entries.push((entry.file_name(), is_dir));
    }
    Ok(render_listing(entries))
}

/// Render directory entries as `name\n` / `name/\n` lines sorted by name.
pub fn render_listing(mut entries: Vec<(OsString, bool)>) -> Vec<u8> {
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    let mut out = Vec::new();
    for (name, is_dir) in entries {
        // names are written as-is, even when they are not UTF-8
        out.extend_from_slice(&name.into_encoded_bytes());
        if is_dir {
            out.push(b'/');
        }
        out.push(b'\n');
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{ChaChaHmac, CipherSuite, X25519};
    use crate::frame::FrameConfig;
    use crate::handshake::Requester;

    fn codec() -> FrameCodec {
        let suite: Arc<dyn CipherSuite> = Arc::new(ChaChaHmac);
        let config = FrameConfig::for_suite(suite.as_ref());
        FrameCodec::new(suite, config)
    }

    fn service(root: &Path, authorized_key: Option<PublicKey>) -> TransferService {
        TransferService::new(
            TransferConfig {
                root: root.to_path_buf(),
                authorized_key,
            },
            Arc::new(X25519),
            codec(),
        )
        .unwrap()
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bee").unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("c.txt"), b"sea").unwrap();
        std::fs::write(dir.path().join("a").join("inner.txt"), b"inside a").unwrap();
        std::fs::write(dir.path().join("empty.txt"), b"").unwrap();
        std::fs::create_dir(dir.path().join("hollow")).unwrap();
        dir
    }

    /// Run the full responder pipeline and decode the frame as a requester would.
    async fn fetch(service: &TransferService, path: &str) -> Result<Vec<u8>, TransferError> {
        let requester = Requester::new(Arc::new(X25519)).unwrap();
        let mut ctx = service.handshake(Some(&requester.key_field()))?;
        let resource = service.resolve(&mut ctx, path).await?;
        let key_field = ctx.key_field().unwrap().to_string();

        let mut frame = Vec::new();
        service.stream(ctx, resource, &mut frame).await?;

        let secret = requester.complete(Some(&key_field)).unwrap();
        let mut plaintext = Vec::new();
        service
            .codec()
            .decode(&mut frame.as_slice(), &mut plaintext, &secret)
            .await?;
        Ok(plaintext)
    }

    #[test]
    fn test_listing_rendering() {
        let listing = render_listing(vec![
            ("b.txt".into(), false),
            ("a".into(), true),
            ("c.txt".into(), false),
        ]);
        assert_eq!(listing, b"a/\nb.txt\nc.txt\n");
    }

    #[test]
    fn test_listing_byte_order() {
        let listing = render_listing(vec![
            ("a".into(), false),
            ("B".into(), false),
            ("_".into(), false),
        ]);
        assert_eq!(listing, b"B\n_\na\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_listing_keeps_raw_names() {
        use std::os::unix::ffi::OsStringExt;

        let listing = render_listing(vec![
            (OsString::from_vec(b"x\xff".to_vec()), false),
            (OsString::from_vec(b"x\xfe".to_vec()), true),
        ]);
        assert_eq!(listing, b"x\xfe/\nx\xff\n");
    }

    #[test]
    fn test_confine() {
        let root = Path::new("/srv");
        assert_eq!(confine(root, "/").unwrap(), PathBuf::from("/srv"));
        assert_eq!(confine(root, "").unwrap(), PathBuf::from("/srv"));
        assert_eq!(
            confine(root, "/a//./b.txt").unwrap(),
            PathBuf::from("/srv/a/b.txt")
        );
        assert!(matches!(
            confine(root, "/../etc/passwd"),
            Err(TransferError::InvalidPath(_))
        ));
        assert!(matches!(
            confine(root, "/a/../../x"),
            Err(TransferError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_serves_file() {
        let dir = fixture();
        let service = service(dir.path(), None);
        assert_eq!(fetch(&service, "/b.txt").await.unwrap(), b"bee");
        assert_eq!(fetch(&service, "/a/inner.txt").await.unwrap(), b"inside a");
    }

    #[tokio::test]
    async fn test_serves_listing() {
        let dir = fixture();
        let service = service(dir.path(), None);
        assert_eq!(
            fetch(&service, "/").await.unwrap(),
            b"a/\nb.txt\nc.txt\nempty.txt\nhollow/\n"
        );
        assert_eq!(fetch(&service, "/a").await.unwrap(), b"inner.txt\n");
    }

    #[tokio::test]
    async fn test_empty_resources() {
        let dir = fixture();
        let service = service(dir.path(), None);

        for path in ["/empty.txt", "/hollow"] {
            let requester = Requester::new(Arc::new(X25519)).unwrap();
            let mut ctx = service.handshake(Some(&requester.key_field())).unwrap();
            let err = service.resolve(&mut ctx, path).await.unwrap_err();
            assert!(matches!(err, TransferError::EmptyResource));
            assert_eq!(err.status(), TransferStatus::NoContent);
            assert_eq!(
                ctx.state(),
                TransferState::Failed(TransferStatus::NoContent)
            );
        }
    }

    #[tokio::test]
    async fn test_not_found_and_invalid_path() {
        let dir = fixture();
        let service = service(dir.path(), None);

        let err = fetch(&service, "/missing.txt").await.unwrap_err();
        assert_eq!(err.status(), TransferStatus::NotFound);

        let err = fetch(&service, "/../secret").await.unwrap_err();
        assert_eq!(err.status(), TransferStatus::BadRequest);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_is_not_found() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), b"nope").unwrap();
        let dir = fixture();
        std::os::unix::fs::symlink(outside.path().join("secret"), dir.path().join("link"))
            .unwrap();

        let service = service(dir.path(), None);
        let err = fetch(&service, "/link").await.unwrap_err();
        assert!(matches!(err, TransferError::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn test_handshake_failures() {
        let dir = fixture();
        let service = service(dir.path(), None);

        let err = service.handshake(None).unwrap_err();
        assert!(matches!(
            err,
            TransferError::Handshake(HandshakeError::MissingKey)
        ));
        assert_eq!(err.status(), TransferStatus::BadRequest);

        let err = service.handshake(Some("zz")).unwrap_err();
        assert!(matches!(
            err,
            TransferError::Handshake(HandshakeError::MalformedKey(_))
        ));

        let err = service.handshake(Some("abcd")).unwrap_err();
        assert!(matches!(
            err,
            TransferError::Handshake(HandshakeError::KeyExchange(_))
        ));
        assert_eq!(err.status(), TransferStatus::BadRequest);
    }

    #[tokio::test]
    async fn test_authorized_key() {
        let dir = fixture();
        let kx = X25519;
        let allowed = kx.generate().unwrap();
        let service = service(dir.path(), Some(allowed.public));

        let requester = Requester::with_secret_key(Arc::new(X25519), allowed.secret.clone());
        let mut ctx = service.handshake(Some(&requester.key_field())).unwrap();
        assert_eq!(ctx.state(), TransferState::KeyDerived);
        service.resolve(&mut ctx, "/b.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_unauthorized_keys() {
        let dir = fixture();
        let allowed = X25519.generate().unwrap();
        let service = service(dir.path(), Some(allowed.public));

        let stranger = X25519.generate().unwrap();
        let allowed_hex = allowed.public.to_hex();
        let truncated = allowed_hex[..62].to_string();
        let extended = format!("{}00", allowed_hex);

        for field in [stranger.public.to_hex(), truncated, extended] {
            let err = service.handshake(Some(&field)).unwrap_err();
            assert!(matches!(err, TransferError::Unauthorized), "{}", field);
            assert_eq!(err.status(), TransferStatus::Unauthorized);
        }
    }

    #[tokio::test]
    async fn test_pipeline_order_is_enforced() {
        let dir = fixture();
        let service = service(dir.path(), None);
        let requester = Requester::new(Arc::new(X25519)).unwrap();

        let mut ctx = service.handshake(Some(&requester.key_field())).unwrap();
        let resource = service.resolve(&mut ctx, "/b.txt").await.unwrap();
        assert_eq!(ctx.state(), TransferState::ResourceResolved);

        let err = service.resolve(&mut ctx, "/c.txt").await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidState(_)));

        let mut sink = Vec::new();
        service.stream(ctx, resource, &mut sink).await.unwrap();
        assert!(!sink.is_empty());
    }
}
