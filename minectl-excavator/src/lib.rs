//! Excavator miner control
//!
//! Client for the NiceHash excavator JSON-RPC API plus process management
//! for the excavator executable.
//!
//! # Protocol
//!
//! Requests and responses are single JSON objects separated by newlines.
//! Result fields are returned next to `id` and `error`:
//!
//! ```text
//! -> {"id":1,"method":"algorithm.add","params":["daggerhashimoto_pascal"]}
//! <- {"id":1,"algorithm_id":0,"error":null}
//! ```
//!
//! # Example
//!
//! ```no_run
//! use minectl_excavator::{ExcavatorClient, ExcavatorConfig, ExcavatorProcess};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExcavatorConfig::default();
//!     let port = config.port_for(0);
//!     let _process = ExcavatorProcess::spawn(&config, port)?;
//!
//!     let client = ExcavatorClient::new(&config, port);
//!     client.connect().await?;
//!     client.subscribe("nhmp.eu.nicehash.com:3200", "wallet.worker").await?;
//!     client.algorithm_add("equihash").await?;
//!     client.worker_add("equihash", 0).await?;
//!
//!     for worker in client.worker_list().await? {
//!         println!("device {}: {:?}", worker.device_id, worker.speeds());
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod process;
pub mod protocol;

pub use client::ExcavatorClient;
pub use config::ExcavatorConfig;
pub use connection::ExcavatorConnection;
pub use error::{ExcavatorError, Result};
pub use process::ExcavatorProcess;
pub use protocol::{AlgorithmSpeed, ExcavatorRequest, ExcavatorResponse, WorkerStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
