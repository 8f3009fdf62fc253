use std::io::IsTerminal;
use std::sync::Arc;

use clap::Args;
use tokio::io::AsyncWriteExt;
use url::Url;

use common::crypto::{KeyError, SecretKey};
use common::progress::{ProgressSink, TracingSink};
use xigma::process::{init_logging, LogTarget};
use xigma::{ClientError, FetchOutcome, TransferClient};

/// Fetch a file or directory listing and write it to stdout
#[derive(Args, Debug, Clone)]
pub struct Client {
    /// URL of the resource, e.g. http://host:8080/notes.txt
    pub url: Url,

    /// Hex private key to use instead of a fresh one
    #[arg(short = 'x', long)]
    pub key: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientOpError {
    #[error("invalid key: {0}")]
    Key(#[from] KeyError),

    #[error(transparent)]
    Transfer(#[from] ClientError),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Client {
    type Error = ClientOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        // stdout carries the payload
        let _guards = init_logging(
            ctx.log_level.unwrap_or(tracing::Level::INFO),
            None,
            LogTarget::Stderr,
        );

        let mut client = TransferClient::new()?;
        if let Some(key) = &self.key {
            client = client.with_secret_key(SecretKey::from_hex(key)?);
        }

        let progress: Option<Arc<dyn ProgressSink>> = if std::io::stdout().is_terminal() {
            None
        } else {
            Some(Arc::new(TracingSink))
        };

        let mut stdout = tokio::io::stdout();
        let result = client.fetch(&self.url, &mut stdout, progress).await;
        stdout.flush().await?;

        match result {
            Ok(FetchOutcome::Empty) => tracing::info!(url = %self.url, "nothing to fetch"),
            Ok(FetchOutcome::Received { bytes }) => {
                tracing::debug!(url = %self.url, bytes, "fetch complete")
            }
            Err(e) => {
                if e.is_authenticity_failure() {
                    tracing::error!("signature mismatch, discard the output");
                }
                return Err(e.into());
            }
        }

        Ok(String::new())
    }
}
