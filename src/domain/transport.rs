// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the domain-level interface to a publish/subscribe
//! broker. It intentionally avoids any reference to concrete brokers or client
//! libraries; implementations live under `src/transport/`.
//!
//! The transport layer only moves opaque bytes between named channels.
//! Envelope decoding, correlation and timeouts are handled by higher layers.
//!
//! A transport models two logical broker connections: one used only for
//! publishing and one used only for subscribing. Everything that arrives on
//! the subscribe side is funneled into a single inbound stream, claimed once
//! by the multiplexer that owns the delivery loop.
use crate::Result;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

/// Capacity of the inbound stream between a transport and its delivery loop.
pub const INBOX_CAPACITY: usize = 256;

/// One message received on a subscribed broker channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inbound {
    /// Broker channel the message was published on.
    pub channel: Arc<str>,
    /// Raw message body.
    pub payload: Bytes,
}

/// Shared base state for all transport implementations.
///
/// Each concrete transport embeds this as a field named `base` so that the
/// default `Transport` methods can delegate to it:
///
/// ```ignore
/// struct RedisTransport {
///     base: TransportBase,
///     // ... redis specific fields
/// }
///
/// impl Transport for RedisTransport {
///     fn base(&self) -> &TransportBase { &self.base }
/// }
/// ```
pub struct TransportBase {
    /// Identifier for this transport instance, used for logging.
    pub transport_id: String,
    inbox: Mutex<Option<mpsc::Receiver<Inbound>>>,
}

impl TransportBase {
    /// Create the base state and the sender half of the inbound stream.
    pub fn new(transport_id: impl Into<String>) -> (Self, mpsc::Sender<Inbound>) {
        // ---
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let base = Self {
            transport_id: transport_id.into(),
            inbox: Mutex::new(Some(rx)),
        };
        (base, tx)
    }

    fn take_inbox(&self) -> Option<mpsc::Receiver<Inbound>> {
        // ---
        match self.inbox.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// Transport options handed through to the transport factory untouched by
/// the messaging core.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportOptions {
    /// Broker URI (e.g. `"redis://localhost:6379"`). `None` selects the
    /// in-memory transport.
    pub uri: Option<String>,
    /// Explicit transport selection (`"memory"`, `"redis"`). If `None`, the
    /// URI scheme decides.
    pub transport_type: Option<String>,
    /// Broker keep-alive interval in seconds, where the broker supports it.
    pub keep_alive_secs: Option<u16>,
}

/// Transport abstraction.
///
/// Implementations must ensure that:
/// - Once `subscribe()` returns successfully, messages published *after* that
///   point on that channel are delivered to the inbound stream.
/// - Messages on one channel are delivered in broker order, exactly once per
///   subscription of this transport. Subscribing twice to the same channel
///   does not duplicate delivery.
/// - `publish()` fails with [`RpcError::Transport`](crate::RpcError::Transport)
///   when the broker rejects it or the transport is closed.
///
/// The in-memory transport serves as the reference implementation of these
/// semantics.
///
/// # Notes
///
/// This trait uses `async_trait`; consumers should treat methods as normal
/// `async fn`s.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Returns a reference to the shared base state.
    fn base(&self) -> &TransportBase;

    /// Returns the transport_id of the transport.
    fn transport_id(&self) -> &str {
        &self.base().transport_id
    }

    /// Claim the inbound stream. Returns `None` once it has been claimed.
    fn take_inbox(&self) -> Option<mpsc::Receiver<Inbound>> {
        self.base().take_inbox()
    }

    /// Publish raw bytes on a broker channel.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()>;

    /// Start receiving messages published on `channel`.
    async fn subscribe(&self, channel: &str) -> Result<()>;

    /// Close both broker connections. The inbound stream ends afterwards.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// `.clone()` is cheap and all clones share the same broker connections.
pub type TransportPtr = Arc<dyn Transport>;
