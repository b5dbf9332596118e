#![deny(unsafe_code)]

//! HTTP control API for the broker lifecycle manager.
//!
//! Thin request/response marshalling: HTTP verbs and paths are translated
//! into [`BrokerManager`] calls, and manager outcomes are mapped to response
//! codes with structured JSON bodies (`{message}` on success, `{error,
//! details}` on failure).
//!
//! [`BrokerManager`]: mqadmin::manager::BrokerManager

mod api;

pub use api::{listen_and_serve, ApiOptions};
