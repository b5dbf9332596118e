use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AdminError, Result};

/// Broker settings snapshot.
///
/// Replaced wholesale by [`BrokerManager::update_configuration`], never
/// mutated field by field; callers always receive a copy of the held value.
/// Changes made while the broker is running take effect on the next start.
///
/// [`BrokerManager::update_configuration`]: crate::manager::BrokerManager::update_configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "BrokerConfig::port_default")]
    pub port: u16,

    #[serde(default = "BrokerConfig::max_pending_connections_default")]
    pub max_pending_connections: u32,

    #[serde(default)]
    pub enable_authentication: bool,

    #[serde(default)]
    pub enable_verbose_logging: bool,

    //Communication timeout, in seconds.
    #[serde(default = "BrokerConfig::communication_timeout_default")]
    pub communication_timeout: u64,
}

impl Default for BrokerConfig {
    #[inline]
    fn default() -> Self {
        Self {
            port: Self::port_default(),
            max_pending_connections: Self::max_pending_connections_default(),
            enable_authentication: false,
            enable_verbose_logging: false,
            communication_timeout: Self::communication_timeout_default(),
        }
    }
}

impl BrokerConfig {
    #[inline]
    fn port_default() -> u16 {
        1883
    }

    #[inline]
    fn max_pending_connections_default() -> u32 {
        100
    }

    #[inline]
    fn communication_timeout_default() -> u64 {
        30
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.communication_timeout)
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(AdminError::InvalidConfiguration("port must be between 1 and 65535".into()));
        }
        if self.communication_timeout == 0 {
            return Err(AdminError::InvalidConfiguration("communication_timeout must be greater than 0".into()));
        }
        Ok(())
    }

    #[inline]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "port": self.port,
            "max_pending_connections": self.max_pending_connections,
            "enable_authentication": self.enable_authentication,
            "enable_verbose_logging": self.enable_verbose_logging,
            "communication_timeout": self.communication_timeout,
        })
    }
}

/// Credentials the authenticate hook checks connecting clients against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCredentials {
    pub username: String,
    pub password: String,
}
