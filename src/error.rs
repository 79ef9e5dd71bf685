use thiserror::Error;

/// Errors that can occur while sending, querying or serving requests.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Publish or subscribe was rejected by the transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// A broker channel already has a registered callback.
    #[error("broker channel already subscribed: {0}")]
    DuplicateSubscription(String),

    /// A handler is already registered for this logical channel.
    #[error("handler already registered for channel: {0}")]
    DuplicateHandler(String),

    /// A client channel with this logical name already exists in the messenger.
    ///
    /// Two such channels would share one response channel and receive each
    /// other's responses.
    #[error("message channel already open: {0}")]
    DuplicateChannel(String),

    /// No response arrived within the query timeout.
    #[error("query timed out")]
    Timeout,

    /// The remote handler failed; carries the error text it reported.
    #[error("remote handler error: {0}")]
    RemoteHandler(String),

    /// Returned by a local handler to report a failure to the caller.
    #[error("{0}")]
    Handler(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A required configuration value was not provided.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// A configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The messenger has been shut down.
    #[error("messenger is shut down")]
    Shutdown,
}

impl RpcError {
    /// Build a handler failure from anything printable.
    ///
    /// ```
    /// use mom_messenger::RpcError;
    ///
    /// let err = RpcError::handler("boom");
    /// assert_eq!(err.to_string(), "boom");
    /// ```
    pub fn handler(msg: impl std::fmt::Display) -> Self {
        RpcError::Handler(msg.to_string())
    }
}

/// Result type alias for messenger operations.
pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_remote_handler_keeps_text() {
        // ---
        let err = RpcError::RemoteHandler("boom".into());
        assert_eq!(err.to_string(), "remote handler error: boom");
    }

    #[test]
    fn test_from_serde_json() {
        // ---
        let json_err = serde_json::from_str::<String>("not json").unwrap_err();
        let err: RpcError = json_err.into();
        assert!(matches!(err, RpcError::Serialization(_)));
    }
}
