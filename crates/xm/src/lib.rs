// Service modules
pub mod client;
pub mod http_server;
pub mod process;
pub mod service_config;
pub mod version;

// Re-exports for consumers
pub use client::{ClientError, FetchOutcome, TransferClient};
pub use process::{spawn_service, start_service, ShutdownHandle};
pub use service_config::Config as ServiceConfig;
