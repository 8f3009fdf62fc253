use clap::Args;

use common::crypto::{KeyError, KeyExchange, X25519};

/// Print a fresh key pair for use with `--key`.
///
/// The private half goes to `client --key`, the public half to `server --key`.
#[derive(Args, Debug, Clone)]
pub struct Keygen;

#[derive(Debug, thiserror::Error)]
pub enum KeygenError {
    #[error("failed to generate key pair: {0}")]
    Generate(#[from] KeyError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Keygen {
    type Error = KeygenError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let pair = X25519.generate()?;
        Ok(format!(
            "private {}\npublic  {}",
            pair.secret.to_hex(),
            pair.public.to_hex()
        ))
    }
}
