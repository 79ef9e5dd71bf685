//! Request/reply query semantics over publish/subscribe brokers.
//!
//! Brokers such as Redis Pub/Sub only offer fire-and-forget broadcast. This
//! library layers a "query" call on top: one call, one typed response, bounded
//! wait. It handles channel naming, correlation id generation,
//! request/response matching, timeouts, and turning handler failures into
//! error responses.
//!
//! The building blocks, leaf first:
//!
//! - [`Transport`]: publish bytes on a channel, subscribe to a channel
//! - [`Multiplexer`]: one delivery loop per transport, routing decoded
//!   envelopes to the callback registered for their channel
//! - [`protocol`]: envelopes and channel name derivation
//! - [`MessageChannel`]: `send` and `query` for one logical channel
//! - handlers registered through [`Messenger::add_handler`], answering every
//!   request exactly once
//!

// Import all sub modules once...
mod client;
mod config;
mod domain;
mod error;
mod macros;
mod messenger;
mod multiplexer;
pub mod protocol;
mod server;
mod transport;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use client::MessageChannel;
pub use config::{
    //
    MessengerConfig,
    DEFAULT_TIMEOUT,
    ENV_BROKER_URI,
    ENV_CHANNEL_PREFIX,
    ENV_CLIENT_IDENTITY,
    ENV_DEFAULT_TIMEOUT_MS,
};
pub use error::{Result, RpcError};
pub use messenger::Messenger;
pub use multiplexer::{Callback, Multiplexer};
pub use protocol::CorrelationId;
pub use server::HandlerMode;

pub use transport::{
    //
    create_memory_transport,
    create_memory_transport_with_hub,
    create_redis_transport,
    create_transport,
    MemoryHub,
};

// --- public re-exports
pub use domain::{
    //
    Inbound,
    Transport,
    TransportBase,
    TransportOptions,
    TransportPtr,
    INBOX_CAPACITY,
};
