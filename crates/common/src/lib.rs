/**
 * Cryptographic types and operations.
 *  - X25519 key pairs and key agreement
 *  - Streaming cipher suite with detached signatures
 */
pub mod crypto;
/**
 * Length-prefixed, signed frame wrapped around
 *  the cipher suite's output.
 */
pub mod frame;
/**
 * Binding of the key exchange onto request and
 *  response metadata fields.
 */
pub mod handshake;
/**
 * Periodic byte-count progress reporting.
 */
pub mod progress;
/**
 * Responder pipeline: authorize, derive, resolve
 *  a file or directory listing, then stream it.
 */
pub mod transfer;
