//! Server and admission configuration.
//!
//! Configuration is plain data, loaded from TOML or assembled in code, and
//! never changes once a server is running.
//!
//! ```toml
//! bind_address = "0.0.0.0:3000"
//! max_body_bytes = 2097152   # default 2 MiB
//!
//! [admission]
//! max_concurrent = 64        # omitted = unbounded
//! max_waiters = 128          # default 0
//! queue_timeout_ms = 2000    # omitted = wait indefinitely
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::Error;

/// Limits applied by the [`Admission`](crate::Admission) controller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdmissionConfig {
    /// Maximum number of requests computing at once. `None` is unbounded.
    pub max_concurrent: Option<usize>,
    /// Maximum number of requests waiting for a slot. `0` disables queueing,
    /// so a saturated server rejects at once.
    pub max_waiters: usize,
    /// How long a queued request may wait. `None` waits until admitted.
    pub queue_timeout_ms: Option<u64>,
}

impl AdmissionConfig {
    /// No limits at all.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = Some(max);
        self
    }

    pub fn with_max_waiters(mut self, max: usize) -> Self {
        self.max_waiters = max;
        self
    }

    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn queue_timeout(&self) -> Option<Duration> {
        self.queue_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.queue_timeout_ms == Some(0) {
            return Err(Error::InvalidConfig(
                "admission.queue_timeout_ms must be greater than 0".into(),
            ));
        }
        if let Some(max) = self.max_concurrent {
            if max > Semaphore::MAX_PERMITS {
                return Err(Error::InvalidConfig(format!(
                    "admission.max_concurrent must not exceed {}",
                    Semaphore::MAX_PERMITS
                )));
            }
        }
        Ok(())
    }
}

/// Everything a [`Server`](crate::Server) needs to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// `host:port` to listen on.
    pub bind_address: String,
    /// Largest request body read into memory. Longer bodies get `413`.
    pub max_body_bytes: usize,
    pub admission: AdmissionConfig,
}

/// 2 MiB.
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".into(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            admission: AdmissionConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self { bind_address: bind_address.into(), ..Self::default() }
    }

    pub fn with_admission(mut self, admission: AdmissionConfig) -> Self {
        self.admission = admission;
        self
    }

    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::InvalidConfig(format!(
                "bind_address `{}` is not a valid socket address",
                self.bind_address
            )));
        }
        if self.max_body_bytes == 0 {
            return Err(Error::InvalidConfig("max_body_bytes must be greater than 0".into()));
        }
        self.admission.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_document() {
        let config = ServerConfig::from_toml_str(
            r#"
            bind_address = "127.0.0.1:8080"
            max_body_bytes = 1024

            [admission]
            max_concurrent = 64
            max_waiters = 128
            queue_timeout_ms = 2000
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:8080");
        assert_eq!(config.max_body_bytes, 1024);
        assert_eq!(config.admission.max_concurrent, Some(64));
        assert_eq!(config.admission.max_waiters, 128);
        assert_eq!(config.admission.queue_timeout(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn omitted_limits_are_unbounded() {
        let config = ServerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.admission, AdmissionConfig::unbounded());
        assert_eq!(config.admission.queue_timeout(), None);
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = ServerConfig::from_toml_str("[admission]\nqueue_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)), "{err}");
    }

    #[test]
    fn rejects_unknown_keys_and_bad_addresses() {
        let err = ServerConfig::from_toml_str("[admission]\nmax_concurent = 4").unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");

        let err = ServerConfig::from_toml_str("bind_address = \"nowhere\"").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)), "{err}");

        let err = ServerConfig::from_toml_str("max_body_bytes = 0").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)), "{err}");
    }

    #[test]
    fn builders_compose() {
        let admission = AdmissionConfig::unbounded()
            .with_max_concurrent(1)
            .with_max_waiters(2)
            .with_queue_timeout(Duration::from_millis(250));
        assert_eq!(admission.queue_timeout_ms, Some(250));
        assert!(admission.validate().is_ok());

        let config = ServerConfig::new("127.0.0.1:0").with_admission(admission.clone());
        assert_eq!(config.admission, admission);
    }

    #[test]
    fn load_reports_missing_files() {
        let err = ServerConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
