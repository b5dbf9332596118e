//! Leaf utilities shared across the mqadmin workspace.
//!
//! ## Core Features:
//! - **Counter Implementation**: Thread-safe gauge with floor-at-zero decrement ([`Counter`])
//! - **Timestamp Utilities**: Second-resolution Unix timestamps and display formatting
//! - **Custom serde helpers**: Socket-address deserialization for configuration files

#![deny(unsafe_code)]

use std::net::SocketAddr;

use serde::de::{self, Deserialize, Deserializer};

mod counter;

pub use counter::Counter;

/// Timestamp representation in seconds since Unix epoch
pub type Timestamp = i64;

/// Get current timestamp in seconds
///
/// # Example:
/// ```
/// let ts = mqadmin_utils::timestamp_secs();
/// assert!(ts > 0);
/// ```
#[inline]
pub fn timestamp_secs() -> Timestamp {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_secs() as i64)
        .unwrap_or_else(|_| chrono::Local::now().timestamp())
}

/// Format timestamp (seconds) to human-readable string
#[inline]
pub fn format_timestamp(t: Timestamp) -> String {
    if t <= 0 {
        "".into()
    } else {
        use chrono::TimeZone;
        if let chrono::LocalResult::Single(t) = chrono::Local.timestamp_opt(t, 0) {
            t.format("%Y-%m-%d %H:%M:%S").to_string()
        } else {
            "".into()
        }
    }
}

/// Deserialize SocketAddr from "host:port" string
#[inline]
pub fn deserialize_addr<'de, D>(deserializer: D) -> std::result::Result<SocketAddr, D::Error>
where
    D: Deserializer<'de>,
{
    let addr = String::deserialize(deserializer)?
        .parse::<SocketAddr>()
        .map_err(de::Error::custom)?;
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_format() {
        assert_eq!(format_timestamp(0), "");
        assert_eq!(format_timestamp(-1), "");
        assert!(!format_timestamp(timestamp_secs()).is_empty());
    }

    #[test]
    fn test_deserialize_addr() {
        #[derive(serde::Deserialize)]
        struct W {
            #[serde(deserialize_with = "deserialize_addr")]
            laddr: SocketAddr,
        }
        let w: W = serde_json::from_str(r#"{"laddr":"127.0.0.1:6060"}"#).unwrap();
        assert_eq!(w.laddr, ([127, 0, 0, 1], 6060).into());

        assert!(serde_json::from_str::<W>(r#"{"laddr":"not-an-addr"}"#).is_err());
    }
}
