//! Streaming authenticated encryption keyed by a per-transfer shared secret
//!
//! The suite is length preserving: the ciphertext body is exactly as long as
//! the plaintext, and authenticity is carried by a detached signature that
//! the caller appends (or checks) after the body.
//!
//! # Wire Format
//!
//! ```text
//! [ meta: "xg" || version u16 BE ][ header: salt 16 || nonce 12 ][ ciphertext ... ]
//! ```
//!
//! Keys are expanded with HKDF-SHA256 from the shared secret and the header
//! salt into a ChaCha20 key and an HMAC-SHA256 key. The signature is the HMAC
//! over `meta || header || ciphertext` (encrypt-then-MAC).

use std::fmt;

use async_trait::async_trait;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zeroize::Zeroizing;

use super::keys::SharedSecret;

/// Current suite version written into the meta block
pub const SUITE_VERSION: u16 = 1;
/// Size of the meta block (tag + version)
pub const META_SIZE: usize = 4;
/// Size of the HKDF salt in bytes
pub const SALT_SIZE: usize = 16;
/// Size of the ChaCha20 (IETF) nonce in bytes
pub const NONCE_SIZE: usize = 12;
/// Size of the header block (salt + nonce)
pub const HEADER_SIZE: usize = SALT_SIZE + NONCE_SIZE;
/// Size of the HMAC-SHA256 signature in bytes
pub const SIGNATURE_SIZE: usize = 32;
/// Plaintext bytes processed per read
pub const CHUNK_SIZE: usize = 64 * 1024;

const META_TAG: [u8; 2] = *b"xg";
const KEY_SIZE: usize = 32;
const HKDF_INFO: &[u8] = b"xigma-stream-v1";

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur while driving the suite
#[derive(Debug, thiserror::Error)]
pub enum SuiteError {
    #[error("stream ended inside the suite preamble")]
    Truncated,
    #[error("unsupported suite meta: tag {tag:02x?}, version {version}")]
    UnsupportedSuite { tag: [u8; 2], version: u16 },
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("failed to generate random bytes: {0}")]
    Rng(getrandom::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Detached signature produced (or recomputed) by a cipher suite
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Constant-time comparison against a received signature.
    pub fn verify(&self, received: &[u8]) -> bool {
        self.0.as_slice().ct_eq(received).into()
    }
}

impl From<Vec<u8>> for Signature {
    fn from(bytes: Vec<u8>) -> Self {
        Signature(bytes)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0))
    }
}

/// Outcome of one pass of the suite over a stream
#[derive(Debug, Clone)]
pub struct Sealed {
    pub signature: Signature,
    /// Plaintext bytes consumed (encrypt) or produced (decrypt)
    pub processed: u64,
}

/// Streaming encrypt/decrypt capability with a detached signature.
///
/// Readers and writers are taken as trait objects so a suite can sit
/// behind an `Arc<dyn CipherSuite>`.
#[async_trait]
pub trait CipherSuite: Send + Sync + fmt::Debug {
    /// Bytes the suite writes ahead of the ciphertext (meta + header)
    fn preamble_size(&self) -> u64;

    /// Length of the detached signature
    fn signature_size(&self) -> usize;

    /// Encrypt everything `reader` yields into `writer`, returning the signature.
    async fn encrypt(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        writer: &mut (dyn AsyncWrite + Unpin + Send),
        secret: &SharedSecret,
    ) -> Result<Sealed, SuiteError>;

    /// Decrypt everything `reader` yields into `writer`, returning the
    /// recomputed signature for the caller to verify.
    async fn decrypt(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        writer: &mut (dyn AsyncWrite + Unpin + Send),
        secret: &SharedSecret,
    ) -> Result<Sealed, SuiteError>;
}

/// ChaCha20 with an HMAC-SHA256 detached signature
#[derive(Debug, Clone, Copy, Default)]
pub struct ChaChaHmac;

struct StreamKeys {
    cipher: ChaCha20,
    mac: HmacSha256,
}

impl ChaChaHmac {
    fn meta() -> [u8; META_SIZE] {
        let version = SUITE_VERSION.to_be_bytes();
        [META_TAG[0], META_TAG[1], version[0], version[1]]
    }

    fn keys(
        secret: &SharedSecret,
        meta: &[u8; META_SIZE],
        header: &[u8; HEADER_SIZE],
    ) -> Result<StreamKeys, SuiteError> {
        let (salt, nonce) = header.split_at(SALT_SIZE);

        let hk = Hkdf::<Sha256>::new(Some(salt), secret.as_bytes());
        let mut okm = Zeroizing::new([0u8; KEY_SIZE * 2]);
        hk.expand(HKDF_INFO, okm.as_mut_slice())
            .map_err(|_| SuiteError::KeyDerivation)?;
        let (cipher_key, mac_key) = okm.split_at(KEY_SIZE);

        let cipher = ChaCha20::new_from_slices(cipher_key, nonce)
            .map_err(|_| SuiteError::KeyDerivation)?;
        let mut mac =
            HmacSha256::new_from_slice(mac_key).map_err(|_| SuiteError::KeyDerivation)?;
        mac.update(meta);
        mac.update(header);

        Ok(StreamKeys { cipher, mac })
    }
}

#[async_trait]
impl CipherSuite for ChaChaHmac {
    fn preamble_size(&self) -> u64 {
        (META_SIZE + HEADER_SIZE) as u64
    }

    fn signature_size(&self) -> usize {
        SIGNATURE_SIZE
    }

    async fn encrypt(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        writer: &mut (dyn AsyncWrite + Unpin + Send),
        secret: &SharedSecret,
    ) -> Result<Sealed, SuiteError> {
        let meta = Self::meta();
        let mut header = [0u8; HEADER_SIZE];
        getrandom::getrandom(&mut header).map_err(SuiteError::Rng)?;
        let StreamKeys {
            mut cipher,
            mut mac,
        } = Self::keys(secret, &meta, &header)?;

        writer.write_all(&meta).await?;
        writer.write_all(&header).await?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut processed = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let chunk = &mut buf[..n];
            cipher.apply_keystream(chunk);
            mac.update(chunk);
            writer.write_all(chunk).await?;
            processed += n as u64;
        }

        Ok(Sealed {
            signature: Signature(mac.finalize().into_bytes().to_vec()),
            processed,
        })
    }

    async fn decrypt(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        writer: &mut (dyn AsyncWrite + Unpin + Send),
        secret: &SharedSecret,
    ) -> Result<Sealed, SuiteError> {
        let mut meta = [0u8; META_SIZE];
        read_preamble(reader, &mut meta).await?;
        let tag = [meta[0], meta[1]];
        let version = u16::from_be_bytes([meta[2], meta[3]]);
        if tag != META_TAG || version != SUITE_VERSION {
            return Err(SuiteError::UnsupportedSuite { tag, version });
        }

        let mut header = [0u8; HEADER_SIZE];
        read_preamble(reader, &mut header).await?;
        let StreamKeys {
            mut cipher,
            mut mac,
        } = Self::keys(secret, &meta, &header)?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut processed = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let chunk = &mut buf[..n];
            mac.update(chunk);
            cipher.apply_keystream(chunk);
            writer.write_all(chunk).await?;
            processed += n as u64;
        }

        Ok(Sealed {
            signature: Signature(mac.finalize().into_bytes().to_vec()),
            processed,
        })
    }
}

async fn read_preamble(
    reader: &mut (dyn AsyncRead + Unpin + Send),
    buf: &mut [u8],
) -> Result<(), SuiteError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(SuiteError::Truncated),
        Err(e) => Err(e.into()),
    }
}
