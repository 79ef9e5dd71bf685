//! Wire protocol: correlation ids, envelopes and broker channel naming.
//!
//! Everything here is pure data; no I/O happens in this module.
mod correlation;
mod envelope;
mod naming;

pub use correlation::CorrelationId;
pub use envelope::{DecodeError, Envelope, RequestEnvelope, ResponseEnvelope};
pub use naming::{ChannelNaming, Direction, NAMESPACE_SEPARATOR};
