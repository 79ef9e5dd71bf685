//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Transport` trait. It is intended primarily for testing, local execution,
//! and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! - Once `subscribe()` returns successfully, messages published *after* that
//!   point on the same channel name are deliverable.
//! - Channel matching is exact string equality; there are no patterns.
//! - Each transport receives a message at most once per channel, no matter
//!   how often it subscribed to it.
//! - Publishing after `close()` fails with a transport error, the same way a
//!   disconnected broker client would.
//!
//! ## Non-Goals
//!
//! This transport does not attempt to emulate the failure modes, persistence,
//! or delivery guarantees of any specific broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};

use crate::{
    // ---
    log_debug,
    Inbound,
    Result,
    RpcError,
    Transport,
    TransportBase,
    TransportPtr,
};

/// Shared message bus for the in-memory transport.
///
/// Simulates a broker within a single process. All memory transports that
/// share a `MemoryHub` see each other's publishes, exactly as processes
/// connected to one real broker would.
///
/// Integration tests construct a hub per test so that parallel tests do not
/// observe each other's traffic:
///
/// ```
/// # use mom_messenger::MemoryHub;
/// # async fn example() -> mom_messenger::Result<()> {
/// let hub = MemoryHub::new();
///
/// let server = mom_messenger::create_memory_transport_with_hub("server", hub.clone()).await?;
/// let client = mom_messenger::create_memory_transport_with_hub("client", hub.clone()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MemoryHub {
    // ---
    subscriptions: RwLock<HashMap<String, Vec<mpsc::Sender<Inbound>>>>,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        // ---
        Arc::new(Self::default())
    }

    /// Number of distinct channels with at least one subscriber.
    pub async fn channel_count(&self) -> usize {
        // ---
        let subs = self.subscriptions.read().await;
        subs.values().filter(|senders| !senders.is_empty()).count()
    }

    async fn publish(&self, transport_id: &str, channel: &str, payload: Bytes) {
        // ---
        let senders = {
            let subs = self.subscriptions.read().await;
            subs.get(channel).cloned().unwrap_or_default()
        };

        if senders.is_empty() {
            log_debug!("{transport_id}: publish to {channel} with no subscribers");
            return;
        }

        let channel: Arc<str> = Arc::from(channel);

        let mut gone = 0usize;

        for sender in senders {
            let msg = Inbound {
                channel: channel.clone(),
                payload: payload.clone(),
            };
            // A closed receiver means the subscribing transport went away
            // without closing.
            if sender.send(msg).await.is_err() {
                log_debug!("{transport_id}: subscriber on {channel} is gone");
                gone += 1;
            }
        }

        if gone > 0 {
            self.prune(&channel).await;
        }
    }

    /// Drop senders whose receiving transport no longer exists.
    async fn prune(&self, channel: &str) {
        // ---
        let mut subs = self.subscriptions.write().await;
        if let Some(senders) = subs.get_mut(channel) {
            senders.retain(|s| !s.is_closed());
            if senders.is_empty() {
                subs.remove(channel);
            }
        }
    }

    async fn subscribe(&self, transport_id: &str, channel: &str, tx: mpsc::Sender<Inbound>) {
        // ---
        let mut subs = self.subscriptions.write().await;
        let senders = subs.entry(channel.to_string()).or_default();

        if senders.iter().any(|s| s.same_channel(&tx)) {
            log_debug!("{transport_id}: already subscribed to {channel}");
            return;
        }

        log_debug!("{transport_id}: subscribe to {channel}");
        senders.push(tx);
    }

    async fn unsubscribe_all(&self, transport_id: &str, tx: &mpsc::Sender<Inbound>) {
        // ---
        log_debug!("{transport_id}: removing all subscriptions");

        let mut subs = self.subscriptions.write().await;
        for senders in subs.values_mut() {
            senders.retain(|s| !s.same_channel(tx));
        }
        subs.retain(|_, senders| !senders.is_empty());
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport.
///
/// Both logical connections collapse into the shared hub: publishes go to the
/// hub, subscriptions register this transport's inbound sender with it.
struct MemoryTransport {
    // ---
    base: TransportBase,
    hub: Arc<MemoryHub>,
    tx: Mutex<Option<mpsc::Sender<Inbound>>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    // ---

    fn sender(&self) -> Option<mpsc::Sender<Inbound>> {
        // ---
        match self.tx.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn not_connected(&self) -> RpcError {
        RpcError::Transport(format!("{}: not connected", self.transport_id()))
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        // ---
        if self.closed.load(Ordering::Acquire) {
            return Err(self.not_connected());
        }
        self.hub.publish(self.transport_id(), channel, payload).await;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        // ---
        if self.closed.load(Ordering::Acquire) {
            return Err(self.not_connected());
        }
        let tx = self.sender().ok_or_else(|| self.not_connected())?;
        self.hub.subscribe(self.transport_id(), channel, tx).await;
        Ok(())
    }

    /// Close the transport.
    ///
    /// Removes this transport's subscriptions from the hub and drops its
    /// inbound sender, which ends the inbound stream once in-flight deliveries
    /// have drained. Other transports on the same hub are unaffected.
    async fn close(&self) -> Result<()> {
        // ---
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let tx = match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(tx) = tx {
            self.hub.unsubscribe_all(self.transport_id(), &tx).await;
        }

        log_debug!("{}: memory transport closed", self.transport_id());
        Ok(())
    }
}

/// Create a new in-memory transport using the process-global hub.
///
/// All transports created with this function share a single message bus.
/// For isolated parallel testing, use [`create_memory_transport_with_hub`].
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport(transport_id: impl Into<String>) -> Result<TransportPtr> {
    // ---
    create_memory_transport_with_hub(transport_id, global_hub()).await
}

/// Create a new in-memory transport attached to the provided hub.
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport_with_hub(
    transport_id: impl Into<String>,
    hub: Arc<MemoryHub>,
) -> Result<TransportPtr> {
    // ---
    let (base, tx) = TransportBase::new(transport_id);

    log_debug!("{}: create memory transport", base.transport_id);

    Ok(Arc::new(MemoryTransport {
        base,
        hub,
        tx: Mutex::new(Some(tx)),
        closed: AtomicBool::new(false),
    }))
}
