use std::fmt;

use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

/// Size of an X25519 private scalar in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Size of an X25519 public point in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;
/// Size of the shared secret produced by the exchange in bytes
pub const SHARED_SECRET_SIZE: usize = 32;

/// Errors that can occur during key operations
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("invalid key size, expected {expected}, got {got}")]
    InvalidSize { expected: usize, got: usize },
    #[error("key hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("failed to generate random bytes: {0}")]
    Rng(getrandom::Error),
    #[error("key exchange produced a non-contributory shared secret")]
    NonContributory,
}

/// Public half of an ephemeral (or static) key pair
///
/// This is the only key material that ever crosses the wire. It is
/// hex encoded when carried in transport metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl From<[u8; PUBLIC_KEY_SIZE]> for PublicKey {
    fn from(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        PublicKey(bytes)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = KeyError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(KeyError::InvalidSize {
                expected: PUBLIC_KEY_SIZE,
                got: bytes.len(),
            });
        }
        let mut buff = [0; PUBLIC_KEY_SIZE];
        buff.copy_from_slice(bytes);
        Ok(buff.into())
    }
}

impl PublicKey {
    /// Parse a public key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let bytes = hex::decode(hex)?;
        Self::try_from(bytes.as_slice())
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Constant-time comparison against arbitrary bytes.
    ///
    /// Inputs of a different length compare unequal.
    pub fn ct_matches(&self, other: &[u8]) -> bool {
        self.0.as_slice().ct_eq(other).into()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Private half of a key pair. Never transmitted, wiped on drop.
#[derive(Clone)]
pub struct SecretKey([u8; PRIVATE_KEY_SIZE]);

impl From<[u8; PRIVATE_KEY_SIZE]> for SecretKey {
    fn from(bytes: [u8; PRIVATE_KEY_SIZE]) -> Self {
        SecretKey(bytes)
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

impl SecretKey {
    /// Parse a secret key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; PRIVATE_KEY_SIZE];
        if hex.len() != PRIVATE_KEY_SIZE * 2 {
            return Err(KeyError::InvalidSize {
                expected: PRIVATE_KEY_SIZE,
                got: hex.len() / 2,
            });
        }
        hex::decode_to_slice(hex, &mut buff)?;
        Ok(Self::from(buff))
    }

    /// Generate a new random secret key using the OS RNG
    pub fn generate() -> Result<Self, KeyError> {
        let mut bytes = [0u8; PRIVATE_KEY_SIZE];
        getrandom::getrandom(&mut bytes).map_err(KeyError::Rng)?;
        Ok(Self::from(bytes))
    }

    pub fn to_bytes(&self) -> [u8; PRIVATE_KEY_SIZE] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Symmetric key material for exactly one transfer.
///
/// Produced by [`KeyExchange::derive`], handed to the cipher suite and
/// dropped (and wiped) when the transfer ends.
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }
}

impl From<[u8; SHARED_SECRET_SIZE]> for SharedSecret {
    fn from(bytes: [u8; SHARED_SECRET_SIZE]) -> Self {
        SharedSecret(bytes)
    }
}

impl PartialEq for SharedSecret {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_slice().ct_eq(other.0.as_slice()).into()
    }
}

impl Eq for SharedSecret {}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// A private scalar together with its public point.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

/// Ephemeral Diffie-Hellman capability.
///
/// Both sides of a transfer hold one of these; `derive(a, B) == derive(b, A)`
/// for any two independently generated pairs.
pub trait KeyExchange: Send + Sync + fmt::Debug {
    /// Generate a fresh key pair.
    fn generate(&self) -> Result<KeyPair, KeyError>;

    /// Compute the public point for an existing private scalar.
    fn public_key(&self, secret: &SecretKey) -> PublicKey;

    /// Derive the shared secret from our private key and the peer's raw
    /// public key bytes.
    fn derive(&self, ours: &SecretKey, theirs: &[u8]) -> Result<SharedSecret, KeyError>;

    /// Rebuild a key pair around a caller-supplied private key.
    fn pair_from_secret(&self, secret: SecretKey) -> KeyPair {
        let public = self.public_key(&secret);
        KeyPair { secret, public }
    }
}

/// X25519 over Curve25519, as implemented by `x25519-dalek`.
#[derive(Debug, Clone, Copy, Default)]
pub struct X25519;

impl KeyExchange for X25519 {
    fn generate(&self) -> Result<KeyPair, KeyError> {
        let secret = SecretKey::generate()?;
        Ok(self.pair_from_secret(secret))
    }

    fn public_key(&self, secret: &SecretKey) -> PublicKey {
        let scalar = StaticSecret::from(secret.to_bytes());
        PublicKey(X25519PublicKey::from(&scalar).to_bytes())
    }

    fn derive(&self, ours: &SecretKey, theirs: &[u8]) -> Result<SharedSecret, KeyError> {
        let theirs = PublicKey::try_from(theirs)?;
        let scalar = StaticSecret::from(ours.to_bytes());
        let shared = scalar.diffie_hellman(&X25519PublicKey::from(theirs.to_bytes()));
        // low-order peer points collapse the secret to zero
        if !shared.was_contributory() {
            return Err(KeyError::NonContributory);
        }
        Ok(SharedSecret(shared.to_bytes()))
    }
}
