//! Messenger context.
//!
//! A [`Messenger`] is the explicitly owned context tying one transport to
//! the objects that use it: the multiplexer running the delivery loop, the
//! dispatcher holding the handlers, and the message channels handed out to
//! callers. Nothing is process-global; two messengers never share state
//! unless they share a broker.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::client::PendingRequests;
use crate::multiplexer::{lock_ignore_poison, Multiplexer};
use crate::protocol::ChannelNaming;
use crate::server::{wrap_handler, Dispatcher};
use crate::{
    // ---
    create_transport,
    log_info,
    HandlerMode,
    MessageChannel,
    MessengerConfig,
    Result,
    RpcError,
    TransportPtr,
};

/// Request/reply messenger over a publish/subscribe transport.
///
/// Cheap to clone (internally `Arc`-backed).
///
/// # Example
///
/// ```no_run
/// use mom_messenger::{Messenger, MessengerConfig, RpcError};
/// use serde_json::{json, Value};
///
/// # async fn example() -> mom_messenger::Result<()> {
/// let messenger = Messenger::connect(
///     MessengerConfig::with_broker("redis://localhost:6379", "node-client")
///         .with_channel_prefix("test"),
/// )
/// .await?;
///
/// messenger
///     .add_handler("node-test-channel", |payload: Value| async move {
///         Ok(json!({ "message": format!("got {payload}") }))
///     })
///     .await?;
///
/// let dotnet = messenger.message_channel("dotnet-test-channel")?;
/// let reply: Value = dotnet.query(&json!({ "message": "hello" })).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Messenger {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    config: MessengerConfig,
    naming: ChannelNaming,
    multiplexer: Arc<Multiplexer>,
    dispatcher: Dispatcher,
    channels: Mutex<HashMap<String, Arc<PendingRequests>>>,
    shut_down: AtomicBool,
}

impl Messenger {
    // ---

    /// Validate `config`, create the transport it selects, and start.
    ///
    /// # Errors
    ///
    /// Configuration errors, or [`RpcError::Transport`] if the broker
    /// connections cannot be established.
    pub async fn connect(config: MessengerConfig) -> Result<Self> {
        // ---
        config.validate()?;
        let transport = create_transport(&config).await?;
        Self::with_transport(config, transport)
    }

    /// Start a messenger over an existing transport.
    ///
    /// Takes over the transport's inbound stream. Must be called from within
    /// a tokio runtime.
    ///
    /// # Errors
    ///
    /// Configuration errors, or [`RpcError::Transport`] if the transport's
    /// inbound stream is already owned by another messenger.
    pub fn with_transport(config: MessengerConfig, transport: TransportPtr) -> Result<Self> {
        // ---
        config.validate()?;

        let naming = ChannelNaming::new(config.channel_prefix.as_deref());
        let multiplexer = Arc::new(Multiplexer::new(transport)?);
        let dispatcher = Dispatcher::new(multiplexer.clone(), naming.clone());

        log_info!(
            "{}: messenger started (namespace {:?})",
            config.client_identity,
            naming.namespace()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                naming,
                multiplexer,
                dispatcher,
                channels: Mutex::new(HashMap::new()),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn client_identity(&self) -> &str {
        &self.inner.config.client_identity
    }

    pub fn channel_prefix(&self) -> Option<&str> {
        self.inner.config.channel_prefix.as_deref()
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.config.default_timeout
    }

    /// Channel name derivation used by this messenger.
    pub fn naming(&self) -> &ChannelNaming {
        &self.inner.naming
    }

    /// Open the request/reply handle for logical channel `name`.
    ///
    /// Each logical channel can be opened once per messenger; clone the
    /// returned handle to share it.
    ///
    /// # Errors
    ///
    /// - [`RpcError::DuplicateChannel`] if `name` was already opened, since
    ///   both handles would receive each other's responses
    /// - [`RpcError::InvalidConfig`] for an empty name
    /// - [`RpcError::Shutdown`] after shutdown
    pub fn message_channel(&self, name: &str) -> Result<MessageChannel> {
        // ---
        self.ensure_running()?;
        validate_channel_name(name)?;

        let pending = {
            let mut channels = lock_ignore_poison(&self.inner.channels);
            if channels.contains_key(name) {
                return Err(RpcError::DuplicateChannel(name.to_string()));
            }
            let pending = Arc::new(PendingRequests::default());
            channels.insert(name.to_string(), pending.clone());
            pending
        };

        Ok(MessageChannel::new(
            self.inner.multiplexer.clone(),
            &self.inner.naming,
            name,
            &self.inner.config.client_identity,
            self.inner.config.default_timeout,
            pending,
        ))
    }

    /// Serve requests on logical channel `name`, one at a time in arrival
    /// order.
    ///
    /// The handler's `Ok` value becomes the response payload; an `Err`
    /// becomes an error response carrying the error's text.
    ///
    /// # Errors
    ///
    /// - [`RpcError::DuplicateHandler`] if `name` already has a handler
    /// - [`RpcError::Transport`] if subscribing fails
    /// - [`RpcError::Shutdown`] after shutdown
    pub async fn add_handler<TReq, TResp, F, Fut>(&self, name: &str, handler: F) -> Result<()>
    where
        TReq: DeserializeOwned + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TReq) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        // ---
        self.register(name, HandlerMode::Ordered, handler).await
    }

    /// Like [`add_handler`](Self::add_handler), but requests are handled
    /// concurrently and may complete out of arrival order.
    ///
    /// Use only when requests do not share mutable state.
    pub async fn add_concurrent_handler<TReq, TResp, F, Fut>(
        &self,
        name: &str,
        handler: F,
    ) -> Result<()>
    where
        TReq: DeserializeOwned + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TReq) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        // ---
        self.register(name, HandlerMode::Concurrent, handler).await
    }

    async fn register<TReq, TResp, F, Fut>(
        &self,
        name: &str,
        mode: HandlerMode,
        handler: F,
    ) -> Result<()>
    where
        TReq: DeserializeOwned + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TReq) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        // ---
        self.ensure_running()?;
        validate_channel_name(name)?;

        self.inner
            .dispatcher
            .register(name, wrap_handler(handler), mode)
            .await
    }

    /// Whether a handler is registered for logical channel `name`.
    pub fn has_handler(&self, name: &str) -> bool {
        self.inner.dispatcher.has_handler(name)
    }

    /// Stop serving, fail in-flight queries with [`RpcError::Shutdown`], and
    /// close the transport. Later operations fail with `Shutdown`.
    ///
    /// Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        // ---
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        log_info!("{}: messenger shutting down", self.client_identity());

        self.inner.dispatcher.stop();

        for pending in lock_ignore_poison(&self.inner.channels).values() {
            pending.close();
        }

        self.inner.multiplexer.close().await
    }

    fn ensure_running(&self) -> Result<()> {
        // ---
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(RpcError::Shutdown);
        }
        Ok(())
    }
}

fn validate_channel_name(name: &str) -> Result<()> {
    // ---
    if name.is_empty() {
        return Err(RpcError::InvalidConfig("channel name must not be empty".into()));
    }
    Ok(())
}
