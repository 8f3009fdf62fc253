use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Args;

use xigma::process::ProcessError;
use xigma::service_config::{ConfigError, ConfigFile, Overrides};
use xigma::{spawn_service, ServiceConfig};

/// Serve a directory to requesters
#[derive(Args, Debug, Clone)]
pub struct Server {
    /// Address to listen on, e.g. 0.0.0.0:8080
    pub addr: Option<SocketAddr>,

    /// Directory to serve (defaults to the current directory)
    pub dir: Option<PathBuf>,

    /// Hex public key of the only requester allowed to fetch
    #[arg(short = 'x', long)]
    pub key: Option<String>,

    /// TOML file with defaults for any of the above
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory for log files (logs to stdout only if not set)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("server failed: {0}")]
    Process(#[from] ProcessError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Server {
    type Error = ServerError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let file = match &self.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };

        let config = ServiceConfig::resolve(
            file,
            Overrides {
                listen_addr: self.addr,
                root: self.dir.clone(),
                authorized_key: self.key.clone(),
                log_level: ctx.log_level,
                log_dir: self.log_dir.clone(),
            },
        )?;

        spawn_service(&config).await?;
        Ok("server stopped".to_string())
    }
}
