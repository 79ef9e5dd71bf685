// src/client/mod.rs
//! Caller-facing request/reply handle.
//!
//! A [`MessageChannel`] publishes requests on `<namespace><name>:req` and,
//! from its first `query` on, listens on its private response channel
//! `<namespace><name>:res_<identity>`.
//!
//! # Architecture
//!
//! Each query generates a unique correlation id and registers a oneshot
//! channel in the pending table before the request is published. The
//! response callback runs on the multiplexer's delivery loop; it only looks
//! up the correlation id and completes the oneshot, so it never blocks
//! delivery for other channels.
//!
//! # Concurrency
//!
//! Multiple queries can be in flight on one channel. Each has its own entry
//! and its own deadline; responses are matched purely by correlation id, in
//! whatever order they arrive. Lock scope is a single map operation.

mod pending;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio::time;

use crate::multiplexer::{Callback, Multiplexer};
use crate::protocol::{ChannelNaming, Envelope, RequestEnvelope};
use crate::{
    // ---
    log_debug,
    log_warn,
    Result,
    RpcError,
};

pub(crate) use pending::PendingRequests;

/// Request/reply handle for one logical channel.
///
/// Cheap to clone (internally `Arc`-backed); clones share the pending table
/// and the response subscription.
#[derive(Clone)]
pub struct MessageChannel {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    name: String,
    client_identity: String,
    request_channel: String,
    response_channel: String,
    default_timeout: Duration,
    multiplexer: Arc<Multiplexer>,
    pending: Arc<PendingRequests>,
    subscribed: OnceCell<()>,
}

impl MessageChannel {
    // ---

    pub(crate) fn new(
        multiplexer: Arc<Multiplexer>,
        naming: &ChannelNaming,
        name: &str,
        client_identity: &str,
        default_timeout: Duration,
        pending: Arc<PendingRequests>,
    ) -> Self {
        // ---
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                client_identity: client_identity.to_string(),
                request_channel: naming.request_channel(name),
                response_channel: naming.response_channel(name, client_identity),
                default_timeout,
                multiplexer,
                pending,
                subscribed: OnceCell::new(),
            }),
        }
    }

    /// Logical channel name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Broker channel requests are published on.
    pub fn request_channel(&self) -> &str {
        &self.inner.request_channel
    }

    /// Broker channel this handle receives its responses on.
    pub fn response_channel(&self) -> &str {
        &self.inner.response_channel
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Number of queries issued through this channel still waiting.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }

    /// Publish a request and return without waiting for any response.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Serialization`] if `payload` cannot be encoded
    /// - [`RpcError::Transport`] if the publish is rejected
    /// - [`RpcError::Shutdown`] after the messenger shut down
    pub async fn send<T>(&self, payload: &T) -> Result<()>
    where
        T: Serialize,
    {
        // ---
        self.ensure_open()?;

        let value = serde_json::to_value(payload)?;
        let request = RequestEnvelope::new(self.inner.client_identity.as_str(), value);

        log_debug!(
            "{}: send {} on {}",
            self.inner.client_identity,
            request.correlation_id,
            self.inner.request_channel
        );

        self.inner
            .multiplexer
            .publish(&self.inner.request_channel, &request.into())
            .await
    }

    /// Send a request and wait up to the default timeout for its response.
    ///
    /// # Errors
    ///
    /// See [`query_with_timeout`](Self::query_with_timeout).
    pub async fn query<TReq, TResp>(&self, payload: &TReq) -> Result<TResp>
    where
        TReq: Serialize,
        TResp: DeserializeOwned,
    {
        // ---
        self.query_with_timeout(payload, self.inner.default_timeout)
            .await
    }

    /// Send a request and wait up to `timeout` for its response.
    ///
    /// Exactly one outcome is produced per call, and the pending entry is
    /// gone when this returns, whatever the outcome. A response arriving
    /// after the deadline is dropped without effect.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Timeout`] if no response arrived in time
    /// - [`RpcError::RemoteHandler`] carrying the remote error text
    /// - [`RpcError::Transport`] if the subscribe or publish failed
    /// - [`RpcError::Serialization`] if the request or response payload does
    ///   not convert
    /// - [`RpcError::Shutdown`] if the messenger shut down
    pub async fn query_with_timeout<TReq, TResp>(
        &self,
        payload: &TReq,
        timeout: Duration,
    ) -> Result<TResp>
    where
        TReq: Serialize,
        TResp: DeserializeOwned,
    {
        // ---
        let value = serde_json::to_value(payload)?;
        let response = self.query_value(value, timeout).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Untyped form of [`query_with_timeout`](Self::query_with_timeout).
    pub async fn query_value(&self, payload: Value, timeout: Duration) -> Result<Value> {
        // ---
        self.ensure_open()?;
        self.ensure_subscribed().await?;

        let (correlation_id, rx, _guard) = self.inner.pending.register()?;

        let request = RequestEnvelope {
            correlation_id: correlation_id.clone(),
            client_identity: self.inner.client_identity.clone(),
            payload,
        };

        log_debug!(
            "{}: query {correlation_id} on {}",
            self.inner.client_identity,
            self.inner.request_channel
        );

        // One deadline covers both the publish and the wait. `timeout`
        // saturates, so `Duration::MAX` never overflows.
        let exchange = async {
            self.inner
                .multiplexer
                .publish(&self.inner.request_channel, &request.into())
                .await?;
            Ok::<_, RpcError>(rx.await)
        };

        // `_guard` drops the pending entry on every return path below.
        match time::timeout(timeout, exchange).await {
            Ok(Ok(Ok(Ok(value)))) => Ok(value),
            Ok(Ok(Ok(Err(error_text)))) => Err(RpcError::RemoteHandler(error_text)),
            Ok(Ok(Err(_closed))) => Err(RpcError::Shutdown),
            Ok(Err(err)) => Err(err),
            Err(_elapsed) => {
                log_debug!(
                    "{}: query {correlation_id} on {} timed out",
                    self.inner.client_identity,
                    self.inner.request_channel
                );
                Err(RpcError::Timeout)
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        // ---
        if self.inner.multiplexer.is_closed() {
            return Err(RpcError::Shutdown);
        }
        Ok(())
    }

    /// Subscribe to the response channel once; concurrent first queries share
    /// the same attempt, and a failed attempt is retried by the next query.
    async fn ensure_subscribed(&self) -> Result<()> {
        // ---
        self.inner
            .subscribed
            .get_or_try_init(|| async {
                let callback = response_callback(
                    self.inner.response_channel.clone(),
                    self.inner.pending.clone(),
                );
                self.inner
                    .multiplexer
                    .subscribe(&self.inner.response_channel, callback)
                    .await
            })
            .await?;
        Ok(())
    }
}

/// Delivery-loop callback matching responses to pending queries.
fn response_callback(_channel: String, pending: Arc<PendingRequests>) -> Callback {
    // ---
    Arc::new(move |envelope| match envelope {
        Envelope::Response(response) => {
            let correlation_id = response.in_reply_to.clone();
            if !pending.complete(&correlation_id, response.into_outcome()) {
                log_debug!("{_channel}: no pending query for {correlation_id}, dropped");
            }
        }
        Envelope::Request(_request) => {
            log_warn!(
                "{_channel}: request {} arrived on a response channel, dropped",
                _request.correlation_id
            );
        }
    })
}
