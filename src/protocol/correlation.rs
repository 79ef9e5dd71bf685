use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Token pairing a response with the query waiting for it.
///
/// On the wire it is a bare JSON string (`correlationId` in requests,
/// `inReplyTo` in responses). Ids minted here are random UUIDs, but ids
/// arriving from peers are compared byte for byte and never parsed, so any
/// non-empty string a foreign client chooses works.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    // ---

    /// Mint a fresh id for an outgoing query.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    // Envelopes with an empty id are rejected at decode time.
    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
