pub mod client;
pub mod keygen;
pub mod server;
pub mod version;

pub use client::Client;
pub use keygen::Keygen;
pub use server::Server;
pub use version::Version;
