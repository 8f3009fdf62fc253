//! Length-prefixed, signed framing around a cipher suite stream
//!
//! # Wire Format
//!
//! ```text
//! [ total_size: u64 BE ][ suite preamble ][ ciphertext ][ signature ]
//!                       |<------ total_size bytes ----->|
//! ```
//!
//! `total_size` counts the suite preamble and the ciphertext. The signature
//! is appended after the sized region and is not counted; its length is
//! fixed by the suite. The prefix is the only self-describing element of a
//! frame, so a reader always knows where the encrypted body ends regardless
//! of how the transport chunks the bytes.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::crypto::{CipherSuite, SharedSecret, SuiteError};

/// Length of the big-endian size prefix
pub const SIZE_PREFIX_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame ended before the sized region was complete")]
    TruncatedFrame,
    #[error("incomplete trailing signature, expected {expected} bytes, got {got}")]
    IncompleteSignature { expected: usize, got: usize },
    #[error("frame signature does not match its contents")]
    SignatureMismatch,
    #[error("source yielded {actual} bytes, expected {expected}")]
    SourceSizeMismatch { expected: u64, actual: u64 },
    #[error("plaintext of {0} bytes does not fit a frame")]
    Oversized(u64),
    #[error("suite error: {0}")]
    Suite(SuiteError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SuiteError> for FrameError {
    fn from(err: SuiteError) -> Self {
        match err {
            SuiteError::Truncated => FrameError::TruncatedFrame,
            SuiteError::Io(e) => FrameError::Io(e),
            other => FrameError::Suite(other),
        }
    }
}

/// Framing constants derived once from the cipher suite in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Bytes counted in the size prefix on top of the plaintext
    pub overhead: u64,
    /// Length of the trailing signature
    pub signature_size: usize,
}

impl FrameConfig {
    pub fn for_suite(suite: &dyn CipherSuite) -> Self {
        Self {
            overhead: suite.preamble_size(),
            signature_size: suite.signature_size(),
        }
    }

    /// Length on the wire of a frame carrying `plaintext_size` bytes,
    /// prefix and signature included.
    pub fn encoded_len(&self, plaintext_size: u64) -> Option<u64> {
        (SIZE_PREFIX_LEN as u64)
            .checked_add(self.overhead)?
            .checked_add(plaintext_size)?
            .checked_add(self.signature_size as u64)
    }
}

/// The decoded size prefix of an incoming frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePrefix {
    pub total_size: u64,
}

impl FramePrefix {
    /// Bytes still expected on the wire after the prefix (sized region + signature)
    pub fn remaining(&self, config: &FrameConfig) -> u64 {
        self.total_size.saturating_add(config.signature_size as u64)
    }

    /// Plaintext length announced by the sender
    pub fn plaintext_size(&self, config: &FrameConfig) -> u64 {
        self.total_size.saturating_sub(config.overhead)
    }
}

#[derive(Debug, Clone)]
pub struct FrameCodec {
    suite: Arc<dyn CipherSuite>,
    config: FrameConfig,
}

impl FrameCodec {
    pub fn new(suite: Arc<dyn CipherSuite>, config: FrameConfig) -> Self {
        Self { suite, config }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Encrypt exactly `plaintext_size` bytes from `reader` into a frame.
    ///
    /// Returns the number of bytes written to `writer`.
    pub async fn encode<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        secret: &SharedSecret,
        plaintext_size: u64,
    ) -> Result<u64, FrameError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let total_size = self
            .config
            .overhead
            .checked_add(plaintext_size)
            .ok_or(FrameError::Oversized(plaintext_size))?;

        writer.write_all(&total_size.to_be_bytes()).await?;

        let mut bounded = (&mut *reader).take(plaintext_size);
        let sealed = self.suite.encrypt(&mut bounded, &mut *writer, secret).await?;
        if sealed.processed != plaintext_size {
            return Err(FrameError::SourceSizeMismatch {
                expected: plaintext_size,
                actual: sealed.processed,
            });
        }

        writer.write_all(sealed.signature.as_bytes()).await?;
        writer.flush().await?;

        tracing::trace!(total_size, plaintext_size, "frame encoded");
        Ok(SIZE_PREFIX_LEN as u64 + total_size + sealed.signature.len() as u64)
    }

    /// Read the size prefix of an incoming frame.
    pub async fn read_prefix<R>(&self, reader: &mut R) -> Result<FramePrefix, FrameError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut buf = [0u8; SIZE_PREFIX_LEN];
        match reader.read_exact(&mut buf).await {
            Ok(_) => Ok(FramePrefix {
                total_size: u64::from_be_bytes(buf),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(FrameError::TruncatedFrame)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Decrypt the rest of a frame whose prefix has already been read.
    ///
    /// Plaintext is written as it is decrypted; a `SignatureMismatch`
    /// returned here means everything written to `writer` must be discarded.
    /// Returns the number of plaintext bytes written.
    pub async fn decode_body<R, W>(
        &self,
        prefix: FramePrefix,
        reader: &mut R,
        writer: &mut W,
        secret: &SharedSecret,
    ) -> Result<u64, FrameError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut bounded = (&mut *reader).take(prefix.total_size);
        let opened = self.suite.decrypt(&mut bounded, &mut *writer, secret).await?;
        if bounded.limit() != 0 {
            return Err(FrameError::TruncatedFrame);
        }
        writer.flush().await?;

        let expected = self.config.signature_size;
        let mut trailing = Vec::with_capacity(expected + 1);
        (&mut *reader)
            .take(expected as u64 + 1)
            .read_to_end(&mut trailing)
            .await?;

        if trailing.len() < expected {
            return Err(FrameError::IncompleteSignature {
                expected,
                got: trailing.len(),
            });
        }
        if !opened.signature.verify(&trailing) {
            return Err(FrameError::SignatureMismatch);
        }

        tracing::trace!(
            total_size = prefix.total_size,
            plaintext = opened.processed,
            "frame decoded"
        );
        Ok(opened.processed)
    }

    /// Read, decrypt and verify one whole frame.
    pub async fn decode<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        secret: &SharedSecret,
    ) -> Result<u64, FrameError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let prefix = self.read_prefix(reader).await?;
        self.decode_body(prefix, reader, writer, secret).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{ChaChaHmac, KeyExchange, X25519};

    fn codec() -> FrameCodec {
        let suite: Arc<dyn CipherSuite> = Arc::new(ChaChaHmac);
        let config = FrameConfig::for_suite(suite.as_ref());
        FrameCodec::new(suite, config)
    }

    fn secret(byte: u8) -> SharedSecret {
        SharedSecret::from([byte; 32])
    }

    async fn encode(codec: &FrameCodec, data: &[u8], secret: &SharedSecret) -> Vec<u8> {
        let mut frame = Vec::new();
        let mut reader = data;
        codec
            .encode(&mut reader, &mut frame, secret, data.len() as u64)
            .await
            .unwrap();
        frame
    }

    async fn decode(
        codec: &FrameCodec,
        frame: &[u8],
        secret: &SharedSecret,
    ) -> (Vec<u8>, Result<u64, FrameError>) {
        let mut out = Vec::new();
        let mut reader = frame;
        let result = codec.decode(&mut reader, &mut out, secret).await;
        (out, result)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let codec = codec();
        let sizes = [1usize, 31, 4096, crate::crypto::CHUNK_SIZE + 3];
        for size in sizes {
            let data: Vec<u8> = (0..size).map(|i| (i * 7 % 256) as u8).collect();
            let frame = encode(&codec, &data, &secret(1)).await;
            let (out, result) = decode(&codec, &frame, &secret(1)).await;
            assert_eq!(result.unwrap(), size as u64);
            assert_eq!(out, data);
        }
    }

    #[tokio::test]
    async fn test_round_trip_with_exchanged_secret() {
        let kx = X25519;
        let requester = kx.generate().unwrap();
        let responder = kx.generate().unwrap();
        let sending = kx
            .derive(&responder.secret, requester.public.as_bytes())
            .unwrap();
        let receiving = kx
            .derive(&requester.secret, responder.public.as_bytes())
            .unwrap();

        let codec = codec();
        let frame = encode(&codec, b"a file served over the wire", &sending).await;
        let (out, result) = decode(&codec, &frame, &receiving).await;
        result.unwrap();
        assert_eq!(out, b"a file served over the wire");
    }

    #[tokio::test]
    async fn test_layout() {
        let codec = codec();
        let data = b"layout check";
        let frame = encode(&codec, data, &secret(2)).await;
        let config = codec.config();

        let total_size = u64::from_be_bytes(frame[..SIZE_PREFIX_LEN].try_into().unwrap());
        assert_eq!(total_size, config.overhead + data.len() as u64);
        assert_eq!(
            frame.len() as u64,
            SIZE_PREFIX_LEN as u64 + total_size + config.signature_size as u64
        );
    }

    #[tokio::test]
    async fn test_every_flipped_byte_is_detected() {
        let codec = codec();
        let data = b"tamper with any byte of me";
        let frame = encode(&codec, data, &secret(3)).await;
        let body_start = SIZE_PREFIX_LEN + codec.config().overhead as usize;

        for i in body_start..frame.len() {
            let mut tampered = frame.clone();
            tampered[i] ^= 0x01;
            let (_, result) = decode(&codec, &tampered, &secret(3)).await;
            assert!(
                matches!(result, Err(FrameError::SignatureMismatch)),
                "byte {} not detected: {:?}",
                i,
                result
            );
        }
    }

    #[tokio::test]
    async fn test_flipped_header_is_detected() {
        let codec = codec();
        let frame = encode(&codec, b"header bound", &secret(4)).await;
        let header_start = SIZE_PREFIX_LEN + crate::crypto::META_SIZE;

        for i in header_start..header_start + crate::crypto::HEADER_SIZE {
            let mut tampered = frame.clone();
            tampered[i] ^= 0x80;
            let (_, result) = decode(&codec, &tampered, &secret(4)).await;
            assert!(matches!(result, Err(FrameError::SignatureMismatch)));
        }
    }

    #[tokio::test]
    async fn test_truncation_never_succeeds() {
        let codec = codec();
        let frame = encode(&codec, b"cut me anywhere", &secret(5)).await;

        for cut in 0..frame.len() {
            let (_, result) = decode(&codec, &frame[..cut], &secret(5)).await;
            match result {
                Err(FrameError::TruncatedFrame) | Err(FrameError::IncompleteSignature { .. }) => {}
                other => panic!("cut at {} gave {:?}", cut, other),
            }
        }
    }

    #[tokio::test]
    async fn test_cut_inside_signature() {
        let codec = codec();
        let frame = encode(&codec, b"short tail", &secret(6)).await;
        let cut = frame.len() - 5;
        let (_, result) = decode(&codec, &frame[..cut], &secret(6)).await;
        assert!(matches!(
            result,
            Err(FrameError::IncompleteSignature {
                expected: 32,
                got: 27
            })
        ));
    }

    #[tokio::test]
    async fn test_trailing_garbage_is_mismatch() {
        let codec = codec();
        let mut frame = encode(&codec, b"extra bytes", &secret(7)).await;
        frame.push(0);
        let (_, result) = decode(&codec, &frame, &secret(7)).await;
        assert!(matches!(result, Err(FrameError::SignatureMismatch)));
    }

    #[tokio::test]
    async fn test_wrong_secret_is_mismatch() {
        let codec = codec();
        let frame = encode(&codec, b"for someone else", &secret(8)).await;
        let (_, result) = decode(&codec, &frame, &secret(9)).await;
        assert!(matches!(result, Err(FrameError::SignatureMismatch)));
    }

    #[tokio::test]
    async fn test_short_source_is_rejected() {
        let codec = codec();
        let mut frame = Vec::new();
        let mut reader: &[u8] = b"only ten b";
        let err = codec
            .encode(&mut reader, &mut frame, &secret(10), 20)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FrameError::SourceSizeMismatch {
                expected: 20,
                actual: 10
            }
        ));
    }

    #[tokio::test]
    async fn test_long_source_is_bounded() {
        let codec = codec();
        let mut frame = Vec::new();
        let mut reader: &[u8] = b"0123456789abcdef";
        codec
            .encode(&mut reader, &mut frame, &secret(11), 10)
            .await
            .unwrap();

        let (out, result) = decode(&codec, &frame, &secret(11)).await;
        result.unwrap();
        assert_eq!(out, b"0123456789");
        assert_eq!(reader, b"abcdef");
    }

    #[test]
    fn test_prefix_accounting() {
        let config = FrameConfig {
            overhead: 32,
            signature_size: 32,
        };
        let prefix = FramePrefix { total_size: 132 };
        assert_eq!(prefix.plaintext_size(&config), 100);
        assert_eq!(prefix.remaining(&config), 164);
        assert_eq!(config.encoded_len(100), Some(172));
        assert_eq!(config.encoded_len(u64::MAX), None);
    }

    #[tokio::test]
    async fn test_encoded_len_matches_output() {
        let codec = codec();
        let data = vec![3u8; 1000];
        let frame = encode(&codec, &data, &secret(4)).await;
        assert_eq!(codec.config().encoded_len(1000), Some(frame.len() as u64));
    }
}
