#![deny(unsafe_code)]

//! # Overall Example
//! ```rust,no_run
//! use tokio_util::sync::CancellationToken;
//!
//! use mqadmin::config::BrokerConfig;
//! use mqadmin::engine::inproc::InprocEngineFactory;
//! use mqadmin::manager::BrokerManager;
//!
//! #[tokio::main]
//! async fn main() -> mqadmin::Result<()> {
//!     let manager = BrokerManager::new(
//!         [0, 0, 0, 0].into(),
//!         BrokerConfig::default(),
//!         None,
//!         Box::new(InprocEngineFactory::new()),
//!     );
//!
//!     manager.start(&CancellationToken::new()).await?;
//!     let status = manager.status();
//!     assert!(status.is_running);
//!     manager.stop(&CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod config; // Broker configuration value type
pub mod engine; // Broker engine adapter contract
pub mod error; // Administrative error taxonomy
pub mod manager; // Broker lifecycle management

pub use config::BrokerConfig;
pub use error::{AdminError, Result};
pub use manager::{BrokerManager, BrokerStatus, ConnectedClient};

/// External Crate Re-exports
pub use mqadmin_utils as utils;
