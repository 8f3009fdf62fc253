use std::sync::Arc;

use futures::TryStreamExt;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWrite;
use tokio_util::io::StreamReader;
use url::Url;

use common::crypto::{ChaChaHmac, CipherSuite, KeyExchange, SecretKey, X25519};
use common::frame::{FrameCodec, FrameConfig};
use common::handshake::{Requester, CLIENT_KEY_FIELD, SERVER_KEY_FIELD};
use common::progress::{ProgressMeter, ProgressSink, PROGRESS_INTERVAL};

use super::error::ClientError;

/// What a successful fetch produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The responder had nothing to send
    Empty,
    /// `bytes` of verified plaintext were written
    Received { bytes: u64 },
}

/// Requesting side of a transfer
#[derive(Debug, Clone)]
pub struct TransferClient {
    client: Client,
    kx: Arc<dyn KeyExchange>,
    codec: FrameCodec,
    secret_key: Option<SecretKey>,
}

impl TransferClient {
    pub fn new() -> Result<Self, ClientError> {
        let client = Client::builder().build()?;
        let suite: Arc<dyn CipherSuite> = Arc::new(ChaChaHmac);
        let config = FrameConfig::for_suite(suite.as_ref());

        Ok(Self {
            client,
            kx: Arc::new(X25519),
            codec: FrameCodec::new(suite, config),
            secret_key: None,
        })
    }

    /// Use a fixed private key instead of a fresh one per request.
    pub fn with_secret_key(mut self, secret_key: SecretKey) -> Self {
        self.secret_key = Some(secret_key);
        self
    }

    /// Fetch `url` and write the decrypted plaintext to `writer` as it arrives.
    ///
    /// On [`FrameError::SignatureMismatch`](common::frame::FrameError) the
    /// bytes already written are unauthenticated and must be discarded.
    pub async fn fetch<W>(
        &self,
        url: &Url,
        writer: &mut W,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<FetchOutcome, ClientError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let requester = match &self.secret_key {
            Some(secret_key) => Requester::with_secret_key(self.kx.clone(), secret_key.clone()),
            None => Requester::new(self.kx.clone())?,
        };

        let response = self
            .client
            .post(url.clone())
            .header(CLIENT_KEY_FIELD, requester.key_field())
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NO_CONTENT => {
                tracing::debug!(%url, "responder has no content");
                return Ok(FetchOutcome::Empty);
            }
            status => {
                return Err(ClientError::HttpStatus(status, response.text().await?));
            }
        }

        let server_key = response
            .headers()
            .get(SERVER_KEY_FIELD)
            .and_then(|value| value.to_str().ok());
        let secret = requester.complete(server_key)?;

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let mut reader = StreamReader::new(Box::pin(stream));

        let prefix = self.codec.read_prefix(&mut reader).await?;
        tracing::debug!(
            total_size = prefix.total_size,
            plaintext = prefix.plaintext_size(self.codec.config()),
            "frame announced"
        );

        let bytes = match progress {
            Some(sink) => {
                let total = prefix.remaining(self.codec.config());
                let meter = ProgressMeter::start(total, PROGRESS_INTERVAL, sink);
                let mut counted = meter.wrap(reader);
                let result = self
                    .codec
                    .decode_body(prefix, &mut counted, writer, &secret)
                    .await;
                meter.finish().await;
                result?
            }
            None => {
                self.codec
                    .decode_body(prefix, &mut reader, writer, &secret)
                    .await?
            }
        };

        Ok(FetchOutcome::Received { bytes })
    }
}
