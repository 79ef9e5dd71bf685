//! Public messenger configuration.
//!
//! The core consumes only the client identity, the channel prefix and the
//! default query timeout. Everything under [`TransportOptions`] is handed to
//! the transport factory without interpretation.

use std::time::Duration;

use crate::{Result, RpcError, TransportOptions};

/// Default time a `query` waits for its response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Environment variables read by [`MessengerConfig::from_env`].
pub const ENV_CLIENT_IDENTITY: &str = "MESSENGER_CLIENT_IDENTITY";
pub const ENV_CHANNEL_PREFIX: &str = "MESSENGER_CHANNEL_PREFIX";
pub const ENV_DEFAULT_TIMEOUT_MS: &str = "MESSENGER_DEFAULT_TIMEOUT_MS";
pub const ENV_BROKER_URI: &str = "MESSENGER_BROKER_URI";

/// Messenger configuration.
///
/// # Example
///
/// ```
/// use mom_messenger::MessengerConfig;
/// use std::time::Duration;
///
/// let config = MessengerConfig::with_broker("redis://localhost:6379", "node-client")
///     .with_channel_prefix("test")
///     .with_default_timeout(Duration::from_secs(2));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct MessengerConfig {
    // ---
    /// Stable name of this participant. Selects the private response
    /// channel, so it must be unique among processes sharing a broker.
    pub client_identity: String,

    /// Optional namespace prefix. A non-empty prefix is followed by `_` in
    /// every derived broker channel name.
    pub channel_prefix: Option<String>,

    /// How long `query` waits when no per-call timeout is given.
    ///
    /// Default: 5 seconds
    pub default_timeout: Duration,

    /// Passed through to the transport factory.
    pub transport: TransportOptions,
}

impl MessengerConfig {
    // ---

    /// Config for the in-memory transport (no broker).
    pub fn memory(client_identity: impl Into<String>) -> Self {
        Self {
            client_identity: client_identity.into(),
            channel_prefix: None,
            default_timeout: DEFAULT_TIMEOUT,
            transport: TransportOptions::default(),
        }
    }

    /// Config for a broker-backed transport at `uri`.
    pub fn with_broker(uri: impl Into<String>, client_identity: impl Into<String>) -> Self {
        let mut config = Self::memory(client_identity);
        config.transport.uri = Some(uri.into());
        config
    }

    /// Build a config from `MESSENGER_*` environment variables.
    ///
    /// `MESSENGER_CLIENT_IDENTITY` is required; the others are optional.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::MissingConfig`] when the identity is unset and
    /// [`RpcError::InvalidConfig`] when the timeout is not a positive integer.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // ---
        let identity = lookup(ENV_CLIENT_IDENTITY)
            .ok_or_else(|| RpcError::MissingConfig(ENV_CLIENT_IDENTITY.into()))?;

        let mut config = match lookup(ENV_BROKER_URI) {
            Some(uri) => Self::with_broker(uri, identity),
            None => Self::memory(identity),
        };

        if let Some(prefix) = lookup(ENV_CHANNEL_PREFIX) {
            config = config.with_channel_prefix(prefix);
        }

        if let Some(raw) = lookup(ENV_DEFAULT_TIMEOUT_MS) {
            let ms: u64 = raw.trim().parse().map_err(|_| {
                RpcError::InvalidConfig(format!("{ENV_DEFAULT_TIMEOUT_MS}={raw} is not an integer"))
            })?;
            config = config.with_default_timeout_ms(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the channel namespace prefix.
    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = Some(prefix.into());
        self
    }

    /// Set the default query timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the default query timeout in milliseconds.
    pub fn with_default_timeout_ms(self, ms: u64) -> Self {
        self.with_default_timeout(Duration::from_millis(ms))
    }

    /// Select a transport explicitly (`"memory"`, `"redis"`).
    pub fn with_transport_type(mut self, transport_type: impl Into<String>) -> Self {
        self.transport.transport_type = Some(transport_type.into());
        self
    }

    /// Set the broker keep-alive interval.
    pub fn with_keep_alive_secs(mut self, secs: u16) -> Self {
        self.transport.keep_alive_secs = Some(secs);
        self
    }

    /// Check the values the messaging core depends on.
    ///
    /// # Errors
    ///
    /// - empty client identity
    /// - client identity containing `:`, which would make response channel
    ///   names ambiguous
    /// - zero default timeout
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.client_identity.is_empty() {
            return Err(RpcError::MissingConfig("client_identity".into()));
        }
        if self.client_identity.contains(':') {
            return Err(RpcError::InvalidConfig(format!(
                "client_identity must not contain ':': {}",
                self.client_identity
            )));
        }
        if self.default_timeout.is_zero() {
            return Err(RpcError::InvalidConfig(
                "default_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        // ---
        let config = MessengerConfig::memory("node-client");
        assert_eq!(config.default_timeout, Duration::from_millis(5000));
        assert!(config.channel_prefix.is_none());
        assert!(config.transport.uri.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        // ---
        assert!(matches!(
            MessengerConfig::memory("").validate(),
            Err(RpcError::MissingConfig(_))
        ));
        assert!(matches!(
            MessengerConfig::memory("a:b").validate(),
            Err(RpcError::InvalidConfig(_))
        ));
        assert!(matches!(
            MessengerConfig::memory("a").with_default_timeout_ms(0).validate(),
            Err(RpcError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_from_env_full() {
        // ---
        let config = MessengerConfig::from_lookup(lookup(&[
            (ENV_CLIENT_IDENTITY, "svc"),
            (ENV_CHANNEL_PREFIX, "test"),
            (ENV_DEFAULT_TIMEOUT_MS, "250"),
            (ENV_BROKER_URI, "redis://localhost:6379"),
        ]))
        .unwrap();

        assert_eq!(config.client_identity, "svc");
        assert_eq!(config.channel_prefix.as_deref(), Some("test"));
        assert_eq!(config.default_timeout, Duration::from_millis(250));
        assert_eq!(config.transport.uri.as_deref(), Some("redis://localhost:6379"));
    }

    #[test]
    fn test_from_env_requires_identity() {
        // ---
        assert!(matches!(
            MessengerConfig::from_lookup(lookup(&[])),
            Err(RpcError::MissingConfig(_))
        ));
    }

    #[test]
    fn test_from_env_rejects_bad_timeout() {
        // ---
        let result = MessengerConfig::from_lookup(lookup(&[
            (ENV_CLIENT_IDENTITY, "svc"),
            (ENV_DEFAULT_TIMEOUT_MS, "soon"),
        ]));
        assert!(matches!(result, Err(RpcError::InvalidConfig(_))));
    }
}
