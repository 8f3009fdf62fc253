//! Cryptographic primitives for xigma transfers
//!
//! Two capabilities are consumed by the rest of the crate:
//!
//! - **Key exchange** ([`KeyExchange`]): ephemeral X25519 key pairs and the
//!   Diffie-Hellman derivation that gives both sides the same [`SharedSecret`]
//! - **Cipher suite** ([`CipherSuite`]): streaming encryption keyed by that
//!   secret, emitting (or recomputing) a detached [`Signature`]
//!
//! # Security Model
//!
//! Every transfer runs a fresh exchange. Nothing derived from a shared
//! secret outlives the request that produced it, so compromising one
//! transfer's keys reveals nothing about any other (forward secrecy per
//! transfer). Signatures and allow-listed keys are only ever compared in
//! constant time.

mod keys;
mod suite;

pub use keys::{
    KeyError, KeyExchange, KeyPair, PublicKey, SecretKey, SharedSecret, X25519, PRIVATE_KEY_SIZE,
    PUBLIC_KEY_SIZE, SHARED_SECRET_SIZE,
};
pub use suite::{
    ChaChaHmac, CipherSuite, Sealed, Signature, SuiteError, CHUNK_SIZE, HEADER_SIZE, META_SIZE,
    SIGNATURE_SIZE, SUITE_VERSION,
};
