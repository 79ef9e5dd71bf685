//! Broker channel name derivation.
//!
//! Names must match byte-for-byte across every implementation sharing a
//! broker:
//!
//! - request channel:  `<namespace><logical>:req`
//! - response channel: `<namespace><logical>:res_<client identity>`
//!
//! where `<namespace>` is the configured prefix followed by `_`, or empty when
//! no prefix is configured.

/// Appended to a non-empty channel prefix to form the namespace.
pub const NAMESPACE_SEPARATOR: &str = "_";

const REQUEST_SUFFIX: &str = ":req";
const RESPONSE_SUFFIX: &str = ":res_";

/// Which half of a request/response pair a broker channel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// Derives broker channel names inside one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNaming {
    namespace: String,
}

impl ChannelNaming {
    // ---

    /// Build the namespace from an optional configured prefix.
    pub fn new(channel_prefix: Option<&str>) -> Self {
        // ---
        let namespace = match channel_prefix {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}{NAMESPACE_SEPARATOR}"),
            _ => String::new(),
        };
        Self { namespace }
    }

    /// The namespace string, including its trailing separator.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Derive a broker channel name for `direction`.
    ///
    /// The client identity only participates in response channel names.
    pub fn channel_name(&self, logical: &str, client_identity: &str, direction: Direction) -> String {
        // ---
        match direction {
            Direction::Request => format!("{}{logical}{REQUEST_SUFFIX}", self.namespace),
            Direction::Response => {
                format!("{}{logical}{RESPONSE_SUFFIX}{client_identity}", self.namespace)
            }
        }
    }

    pub fn request_channel(&self, logical: &str) -> String {
        self.channel_name(logical, "", Direction::Request)
    }

    pub fn response_channel(&self, logical: &str, client_identity: &str) -> String {
        self.channel_name(logical, client_identity, Direction::Response)
    }
}
