#![deny(unsafe_code)]

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::ops::Deref;
use std::sync::Arc;

use config::{Config, File};
use serde::Deserialize;

use mqadmin_utils::deserialize_addr;

use self::logging::Log;

pub use self::options::Options;

pub mod logging;
pub mod options;

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub broker: Broker,
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub log: Log,
    #[serde(default, skip)]
    pub opts: Options,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    pub fn new(opts: Options) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/mqadmin/mqadmin").required(false))
            .add_source(File::with_name("/etc/mqadmin").required(false))
            .add_source(File::with_name("mqadmin").required(false))
            .add_source(config::Environment::with_prefix("mqadmin").try_parsing(true));

        if let Some(cfg) = opts.cfg_name.as_ref() {
            builder = builder.add_source(File::with_name(cfg).required(false));
        }

        let mut inner: Inner = builder.build()?.try_deserialize()?;
        inner.opts = opts;
        Ok(Self(Arc::new(inner)))
    }

    pub fn logs(&self) {
        log::info!("broker.host is {}", self.broker.host);
        log::info!("broker.port is {}", self.broker.port);
        log::info!("broker.tls is {}", self.broker.tls);
        log::info!("broker.allow_anonymous is {}", self.broker.allow_anonymous);
        log::info!("broker.max_pending_messages is {}", self.broker.max_pending_messages);
        log::info!("broker.auto_start is {}", self.broker.auto_start);
        log::info!("http.laddr is {}", self.http.laddr);
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Broker {
    #[serde(default = "Broker::host_default")]
    pub host: IpAddr,

    #[serde(default = "Broker::port_default")]
    pub port: u16,

    #[serde(default)]
    pub tls: bool,

    #[serde(default = "Broker::allow_anonymous_default")]
    pub allow_anonymous: bool,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "Broker::max_pending_messages_default")]
    pub max_pending_messages: u32,

    //Ask the supervisor to start the broker at process startup.
    #[serde(default = "Broker::auto_start_default")]
    pub auto_start: bool,
}

impl Default for Broker {
    #[inline]
    fn default() -> Self {
        Self {
            host: Self::host_default(),
            port: Self::port_default(),
            tls: false,
            allow_anonymous: Self::allow_anonymous_default(),
            username: None,
            password: None,
            max_pending_messages: Self::max_pending_messages_default(),
            auto_start: Self::auto_start_default(),
        }
    }
}

impl Broker {
    fn host_default() -> IpAddr {
        [0, 0, 0, 0].into()
    }
    fn port_default() -> u16 {
        1883
    }
    fn allow_anonymous_default() -> bool {
        true
    }
    fn max_pending_messages_default() -> u32 {
        100
    }
    fn auto_start_default() -> bool {
        true
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Http {
    #[serde(default = "Http::laddr_default", deserialize_with = "deserialize_addr")]
    pub laddr: SocketAddr,

    #[serde(default)]
    pub request_log: bool,
}

impl Default for Http {
    #[inline]
    fn default() -> Self {
        Self { laddr: Self::laddr_default(), request_log: false }
    }
}

impl Http {
    fn laddr_default() -> SocketAddr {
        ([0, 0, 0, 0], 6060).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::new(Options::default()).expect("Settings creation failed");
        assert_eq!(settings.broker.host, IpAddr::from([0, 0, 0, 0]));
        assert_eq!(settings.broker.port, 1883);
        assert!(!settings.broker.tls);
        assert!(settings.broker.allow_anonymous);
        assert!(settings.broker.username.is_none());
        assert_eq!(settings.broker.max_pending_messages, 100);
        assert!(settings.broker.auto_start);
        assert_eq!(settings.http.laddr, SocketAddr::from(([0, 0, 0, 0], 6060)));
        assert!(!settings.http.request_log);
    }

    #[test]
    fn test_cfg_name_override() {
        let opts = Options { cfg_name: Some("does-not-exist".into()) };
        //A missing override file is not an error, sources are optional.
        let settings = Settings::new(opts).expect("Settings creation failed");
        assert_eq!(settings.broker.port, 1883);
    }
}
