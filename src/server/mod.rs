//! Callee-facing request dispatcher.
//!
//! One handler per logical channel. Registering subscribes to the channel's
//! request name and starts a worker task fed by the delivery loop; the worker
//! invokes the handler and publishes exactly one response per request to
//! `<namespace><name>:res_<caller identity>`.
//!
//! # Handler Execution
//!
//! - [`HandlerMode::Ordered`]: requests on a channel are handled one at a
//!   time, in arrival order.
//! - [`HandlerMode::Concurrent`]: each request is handled in its own task.
//!   Only for handlers whose requests are independent of each other.
//!
//! The delivery-loop callback only enqueues; a slow handler never delays
//! delivery on other channels. A handler that never finishes leaves its caller
//! to time out.

mod handler;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::multiplexer::{lock_ignore_poison, Callback, Multiplexer};
use crate::protocol::{ChannelNaming, Envelope, RequestEnvelope};
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    Result,
    RpcError,
};

pub(crate) use handler::{wrap_handler, HandlerPtr};

/// How a registered handler is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerMode {
    /// One request at a time, in arrival order.
    Ordered,
    /// Every request in its own task.
    Concurrent,
}

/// Registry of handlers and their worker tasks, keyed by logical channel.
pub(crate) struct Dispatcher {
    // ---
    multiplexer: Arc<Multiplexer>,
    naming: ChannelNaming,
    workers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Dispatcher {
    // ---

    pub fn new(multiplexer: Arc<Multiplexer>, naming: ChannelNaming) -> Self {
        // ---
        Self {
            multiplexer,
            naming,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Register `handler` for the logical channel `name`.
    ///
    /// # Errors
    ///
    /// - [`RpcError::DuplicateHandler`] if `name` already has a handler; the
    ///   existing handler keeps serving.
    /// - [`RpcError::Transport`] if subscribing to the request channel fails.
    pub async fn register(&self, name: &str, handler: HandlerPtr, mode: HandlerMode) -> Result<()> {
        // ---
        let request_channel = self.naming.request_channel(name);
        let (tx, rx) = mpsc::unbounded_channel::<RequestEnvelope>();

        {
            let mut workers = lock_ignore_poison(&self.workers);
            if workers.contains_key(name) {
                return Err(RpcError::DuplicateHandler(name.to_string()));
            }

            let worker = Worker {
                name: name.to_string(),
                naming: self.naming.clone(),
                multiplexer: self.multiplexer.clone(),
                handler,
                mode,
            };
            workers.insert(name.to_string(), tokio::spawn(worker.run(rx)));
        }

        let callback = request_callback(request_channel.clone(), tx);

        if let Err(err) = self.multiplexer.subscribe(&request_channel, callback).await {
            if let Some(worker) = lock_ignore_poison(&self.workers).remove(name) {
                worker.abort();
            }
            return Err(match err {
                RpcError::DuplicateSubscription(_) => RpcError::DuplicateHandler(name.to_string()),
                other => other,
            });
        }

        log_info!("handler registered on {request_channel} ({mode:?})");
        Ok(())
    }

    pub fn has_handler(&self, name: &str) -> bool {
        lock_ignore_poison(&self.workers).contains_key(name)
    }

    /// Stop all workers. Requests still queued are dropped unanswered.
    pub fn stop(&self) {
        // ---
        let mut workers = lock_ignore_poison(&self.workers);
        for (_name, worker) in workers.drain() {
            log_debug!("stopping handler worker for {_name}");
            worker.abort();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Delivery-loop callback queueing requests for the channel's worker.
fn request_callback(_channel: String, tx: mpsc::UnboundedSender<RequestEnvelope>) -> Callback {
    // ---
    Arc::new(move |envelope| match envelope {
        Envelope::Request(request) => {
            if tx.send(request).is_err() {
                log_debug!("{_channel}: worker stopped, request dropped");
            }
        }
        Envelope::Response(_response) => {
            log_warn!(
                "{_channel}: response {} arrived on a request channel, dropped",
                _response.in_reply_to
            );
        }
    })
}

struct Worker {
    // ---
    name: String,
    naming: ChannelNaming,
    multiplexer: Arc<Multiplexer>,
    handler: HandlerPtr,
    mode: HandlerMode,
}

impl Worker {
    // ---

    async fn run(self, mut rx: mpsc::UnboundedReceiver<RequestEnvelope>) {
        // ---
        let this = Arc::new(self);

        while let Some(request) = rx.recv().await {
            match this.mode {
                HandlerMode::Ordered => this.respond(request).await,
                HandlerMode::Concurrent => {
                    let worker = this.clone();
                    tokio::spawn(async move { worker.respond(request).await });
                }
            }
        }

        log_debug!("{}: handler worker finished", this.name);
    }

    async fn respond(&self, request: RequestEnvelope) {
        // ---
        let response_channel = self
            .naming
            .response_channel(&self.name, &request.client_identity);
        let correlation_id = request.correlation_id.clone();

        let response = handler::invoke(self.handler.clone(), request).await;

        if let Some(_error_text) = &response.error_text {
            log_warn!("{}: handler failed for {correlation_id}: {_error_text}", self.name);
        }

        if let Err(_err) = self
            .multiplexer
            .publish(&response_channel, &response.into())
            .await
        {
            log_error!(
                "{}: failed to publish response {correlation_id} to {response_channel}: {_err}",
                self.name
            );
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::protocol::ResponseEnvelope;
    use crate::{create_memory_transport_with_hub, MemoryHub};
    use serde_json::{json, Value};
    use tokio::time::{timeout, Duration};

    async fn multiplexer(hub: &Arc<MemoryHub>, id: &str) -> Arc<Multiplexer> {
        let transport = create_memory_transport_with_hub(id, hub.clone()).await.unwrap();
        Arc::new(Multiplexer::new(transport).unwrap())
    }

    /// Subscribe `mux` to `channel` and collect every response arriving there.
    async fn collect_responses(
        mux: &Multiplexer,
        channel: &str,
    ) -> mpsc::UnboundedReceiver<ResponseEnvelope> {
        // ---
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: Callback = Arc::new(move |envelope| {
            if let Envelope::Response(resp) = envelope {
                let _ = tx.send(resp);
            }
        });
        mux.subscribe(channel, callback).await.unwrap();
        rx
    }

    #[tokio::test]
    async fn test_one_response_per_request() {
        // ---
        let hub = MemoryHub::new();
        let naming = ChannelNaming::new(Some("unit"));

        let dispatcher = Dispatcher::new(multiplexer(&hub, "server").await, naming.clone());
        let echo = wrap_handler(|v: Value| async move { Ok(v) });
        dispatcher.register("echo", echo, HandlerMode::Ordered).await.unwrap();
        assert!(dispatcher.has_handler("echo"));

        let caller = multiplexer(&hub, "caller").await;
        let mut responses =
            collect_responses(&caller, &naming.response_channel("echo", "caller")).await;

        for i in 0..3 {
            let req = RequestEnvelope::new("caller", json!(i));
            caller
                .publish(&naming.request_channel("echo"), &req.into())
                .await
                .unwrap();
        }

        for i in 0..3 {
            let resp = timeout(Duration::from_secs(1), responses.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(resp.into_outcome(), Ok(json!(i)));
        }
        assert!(timeout(Duration::from_millis(50), responses.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        // ---
        let hub = MemoryHub::new();
        let dispatcher =
            Dispatcher::new(multiplexer(&hub, "server").await, ChannelNaming::new(None));

        let first = wrap_handler(|v: Value| async move { Ok(v) });
        let second = wrap_handler(|v: Value| async move { Ok(v) });

        dispatcher.register("dup", first, HandlerMode::Ordered).await.unwrap();
        let err = dispatcher
            .register("dup", second, HandlerMode::Concurrent)
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::DuplicateHandler(ref n) if n == "dup"));
        assert!(dispatcher.has_handler("dup"));
    }

    #[tokio::test]
    async fn test_stop_forgets_handlers() {
        // ---
        let hub = MemoryHub::new();
        let dispatcher =
            Dispatcher::new(multiplexer(&hub, "server").await, ChannelNaming::new(None));

        let h = wrap_handler(|v: Value| async move { Ok(v) });
        dispatcher.register("gone", h, HandlerMode::Ordered).await.unwrap();

        dispatcher.stop();
        assert!(!dispatcher.has_handler("gone"));
    }
}
