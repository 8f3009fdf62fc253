//! Binding of the key exchange onto transport metadata
//!
//! The requester carries its public key in [`CLIENT_KEY_FIELD`], the
//! responder answers with its own in [`SERVER_KEY_FIELD`]. Both are
//! lowercase hex. The responder must attach its key before any body byte is
//! written, since transport headers are final once streaming starts.
//!
//! ```text
//! Requester                               Responder
//! ─────────                               ─────────
//! pair_r = generate()
//! x-xigma-client: hex(pub_r)  ──────────►  pair_s = generate()
//!                                          secret = derive(priv_s, pub_r)
//!                             ◄──────────  x-xigma-server: hex(pub_s)
//! secret = derive(priv_r, pub_s)
//! ```

use std::sync::Arc;

use crate::crypto::{KeyError, KeyExchange, KeyPair, PublicKey, SecretKey, SharedSecret};

/// Metadata field carrying the requester's public key
pub const CLIENT_KEY_FIELD: &str = "x-xigma-client";
/// Metadata field carrying the responder's public key
pub const SERVER_KEY_FIELD: &str = "x-xigma-server";

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("missing peer key")]
    MissingKey,
    #[error("malformed peer key: {0}")]
    MalformedKey(hex::FromHexError),
    #[error("key exchange failed: {0}")]
    KeyExchange(KeyError),
    #[error("failed to generate key pair: {0}")]
    KeyGeneration(KeyError),
}

/// Raw public key bytes as received from the peer.
///
/// Only the textual encoding has been checked at this point; the length and
/// curve validity are checked by the key exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerKey(Vec<u8>);

impl PeerKey {
    /// Decode a metadata field value.
    pub fn decode(field: Option<&str>) -> Result<Self, HandshakeError> {
        let value = match field.map(str::trim) {
            Some(value) if !value.is_empty() => value,
            _ => return Err(HandshakeError::MissingKey),
        };
        hex::decode(value)
            .map(PeerKey)
            .map_err(HandshakeError::MalformedKey)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

pub fn encode_public_key(key: &PublicKey) -> String {
    key.to_hex()
}

/// Requesting side of one transfer.
#[derive(Debug)]
pub struct Requester {
    kx: Arc<dyn KeyExchange>,
    pair: KeyPair,
}

impl Requester {
    /// Start a transfer with a fresh ephemeral key pair.
    pub fn new(kx: Arc<dyn KeyExchange>) -> Result<Self, HandshakeError> {
        let pair = kx.generate().map_err(HandshakeError::KeyGeneration)?;
        Ok(Self { kx, pair })
    }

    /// Start a transfer with a fixed private key, as needed when the
    /// responder only admits an allow-listed public key.
    pub fn with_secret_key(kx: Arc<dyn KeyExchange>, secret: SecretKey) -> Self {
        let pair = kx.pair_from_secret(secret);
        Self { kx, pair }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.pair.public
    }

    /// Value for [`CLIENT_KEY_FIELD`] on the outgoing request.
    pub fn key_field(&self) -> String {
        encode_public_key(&self.pair.public)
    }

    /// Finish the exchange with the value of [`SERVER_KEY_FIELD`] from the response.
    pub fn complete(self, field: Option<&str>) -> Result<SharedSecret, HandshakeError> {
        let peer = PeerKey::decode(field)?;
        self.kx
            .derive(&self.pair.secret, peer.as_bytes())
            .map_err(HandshakeError::KeyExchange)
    }
}

/// The responder's half of a completed exchange.
#[derive(Debug)]
pub struct Response {
    /// Value for [`SERVER_KEY_FIELD`] on the outgoing response
    pub key_field: String,
    pub secret: SharedSecret,
}

/// Answer a requester's key with a fresh pair of our own.
pub fn respond(kx: &dyn KeyExchange, peer: &PeerKey) -> Result<Response, HandshakeError> {
    let pair = kx.generate().map_err(HandshakeError::KeyGeneration)?;
    let secret = kx
        .derive(&pair.secret, peer.as_bytes())
        .map_err(HandshakeError::KeyExchange)?;
    Ok(Response {
        key_field: encode_public_key(&pair.public),
        secret,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::X25519;

    fn kx() -> Arc<dyn KeyExchange> {
        Arc::new(X25519)
    }

    #[test]
    fn test_both_sides_agree() {
        let requester = Requester::new(kx()).unwrap();
        let peer = PeerKey::decode(Some(&requester.key_field())).unwrap();

        let response = respond(&X25519, &peer).unwrap();
        let secret = requester.complete(Some(&response.key_field)).unwrap();
        assert_eq!(secret, response.secret);
    }

    #[test]
    fn test_static_requester_key() {
        let secret = SecretKey::from([42u8; 32]);
        let requester = Requester::with_secret_key(kx(), secret.clone());
        assert_eq!(*requester.public_key(), X25519.public_key(&secret));

        let peer = PeerKey::decode(Some(&requester.key_field())).unwrap();
        let response = respond(&X25519, &peer).unwrap();
        assert_eq!(
            requester.complete(Some(&response.key_field)).unwrap(),
            response.secret
        );
    }

    #[test]
    fn test_missing_key() {
        assert!(matches!(
            PeerKey::decode(None),
            Err(HandshakeError::MissingKey)
        ));
        assert!(matches!(
            PeerKey::decode(Some("")),
            Err(HandshakeError::MissingKey)
        ));

        let requester = Requester::new(kx()).unwrap();
        assert!(matches!(
            requester.complete(None),
            Err(HandshakeError::MissingKey)
        ));
    }

    #[test]
    fn test_malformed_key() {
        assert!(matches!(
            PeerKey::decode(Some("not hex at all")),
            Err(HandshakeError::MalformedKey(_))
        ));
        assert!(matches!(
            PeerKey::decode(Some("abc")),
            Err(HandshakeError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_short_key_fails_exchange() {
        let peer = PeerKey::decode(Some("00ff")).unwrap();
        assert!(matches!(
            respond(&X25519, &peer),
            Err(HandshakeError::KeyExchange(KeyError::InvalidSize { .. }))
        ));
    }

    #[test]
    fn test_low_order_key_fails_exchange() {
        let peer = PeerKey::decode(Some(&"00".repeat(32))).unwrap();
        assert!(matches!(
            respond(&X25519, &peer),
            Err(HandshakeError::KeyExchange(KeyError::NonContributory))
        ));
    }
}
