mod client;
mod error;

pub use client::{FetchOutcome, TransferClient};
pub use error::ClientError;
