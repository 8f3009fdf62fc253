use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "xm")]
#[command(about = "Encrypted file transfer over HTTP")]
#[command(version)]
pub struct Args {
    /// Log level (overridden per module by RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<tracing::Level>,

    #[command(subcommand)]
    pub command: crate::Command,
}
