//! Inbound message demultiplexer.
//!
//! A [`Multiplexer`] owns the single inbound stream of one transport and runs
//! the delivery loop for it. Every inbound message is decoded into an
//! [`Envelope`] once, here, and handed to the callback registered for its
//! exact broker channel name.
//!
//! ## Delivery loop rules
//!
//! - Messages are dispatched in the order the transport delivers them.
//! - Undecodable messages and messages on unregistered channels are logged
//!   and dropped; nothing is ever raised into the loop.
//! - Callbacks run on the loop and must return promptly. A slow callback
//!   delays every channel sharing this multiplexer, so callbacks only hand
//!   work off (complete a oneshot, push onto a queue).
//! - A panicking callback is contained and logged; delivery continues.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::Envelope;
use crate::{
    // ---
    log_debug,
    log_error,
    log_warn,
    Inbound,
    Result,
    RpcError,
    TransportPtr,
};

/// Callback invoked on the delivery loop with each decoded envelope.
pub type Callback = Arc<dyn Fn(Envelope) + Send + Sync>;

type Registrations = Arc<Mutex<HashMap<String, Callback>>>;

/// Acquire mutex guard, ignoring poisoning.
///
/// The guarded maps have no invariants spanning multiple entries; the worst
/// outcome of a poisoned lock is a dropped message.
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Maps broker channel names to callbacks and drives the delivery loop.
pub struct Multiplexer {
    // ---
    transport: TransportPtr,
    registrations: Registrations,
    delivery: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Multiplexer {
    // ---

    /// Claim the transport's inbound stream and start the delivery loop.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Transport`] if another multiplexer already owns
    /// the transport's inbound stream.
    pub fn new(transport: TransportPtr) -> Result<Self> {
        // ---
        let inbox = transport.take_inbox().ok_or_else(|| {
            RpcError::Transport(format!(
                "{}: inbound stream already claimed",
                transport.transport_id()
            ))
        })?;

        let registrations: Registrations = Arc::new(Mutex::new(HashMap::new()));
        let delivery = tokio::spawn(Self::run(
            transport.transport_id().to_string(),
            registrations.clone(),
            inbox,
        ));

        Ok(Self {
            transport,
            registrations,
            delivery: Mutex::new(Some(delivery)),
            closed: AtomicBool::new(false),
        })
    }

    async fn run(transport_id: String, registrations: Registrations, mut inbox: mpsc::Receiver<Inbound>) {
        // ---
        log_debug!("{transport_id}: delivery loop started");

        while let Some(msg) = inbox.recv().await {
            Self::deliver(&transport_id, &registrations, msg);
        }

        log_debug!("{transport_id}: delivery loop stopped");
    }

    fn deliver(_transport_id: &str, registrations: &Registrations, msg: Inbound) {
        // ---
        let envelope = match Envelope::decode(&msg.payload) {
            Ok(env) => env,
            Err(_err) => {
                log_warn!(
                    "{_transport_id}: dropping undecodable message on {}: {_err}",
                    msg.channel
                );
                return;
            }
        };

        let callback = {
            let map = lock_ignore_poison(registrations);
            map.get(&*msg.channel).cloned()
        };

        let Some(callback) = callback else {
            log_warn!(
                "{_transport_id}: dropping message {} on unregistered channel {}",
                envelope.correlation_id(),
                msg.channel
            );
            return;
        };

        if catch_unwind(AssertUnwindSafe(|| callback(envelope))).is_err() {
            log_error!(
                "{_transport_id}: callback for {} panicked; message dropped",
                msg.channel
            );
        }
    }

    /// Register `callback` for every future message on `channel`.
    ///
    /// The registration is recorded before the broker subscription is made so
    /// that nothing published right after the broker confirms is lost.
    ///
    /// # Errors
    ///
    /// - [`RpcError::DuplicateSubscription`] if `channel` is already
    ///   registered; the existing registration is left untouched.
    /// - [`RpcError::Transport`] if the broker subscription fails; nothing
    ///   stays registered in that case.
    /// - [`RpcError::Shutdown`] after [`close`](Self::close).
    pub async fn subscribe(&self, channel: &str, callback: Callback) -> Result<()> {
        // ---
        if self.is_closed() {
            return Err(RpcError::Shutdown);
        }

        {
            let mut map = lock_ignore_poison(&self.registrations);
            if map.contains_key(channel) {
                return Err(RpcError::DuplicateSubscription(channel.to_string()));
            }
            map.insert(channel.to_string(), callback);
        }

        if let Err(err) = self.transport.subscribe(channel).await {
            lock_ignore_poison(&self.registrations).remove(channel);
            return Err(err);
        }

        log_debug!("{}: registered {channel}", self.transport.transport_id());
        Ok(())
    }

    /// Encode `envelope` and publish it on `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Transport`] if the transport rejects the publish.
    pub async fn publish(&self, channel: &str, envelope: &Envelope) -> Result<()> {
        // ---
        let bytes = envelope.encode()?;
        self.transport.publish(channel, bytes).await
    }

    /// Whether a callback is registered for `channel`.
    pub fn is_registered(&self, channel: &str) -> bool {
        lock_ignore_poison(&self.registrations).contains_key(channel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the transport and wait for the delivery loop to drain.
    pub async fn close(&self) -> Result<()> {
        // ---
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let result = self.transport.close().await;

        let delivery = lock_ignore_poison(&self.delivery).take();
        if let Some(handle) = delivery {
            let _ = handle.await;
        }

        lock_ignore_poison(&self.registrations).clear();
        result
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        // ---
        if let Some(handle) = lock_ignore_poison(&self.delivery).take() {
            handle.abort();
        }
    }
}
