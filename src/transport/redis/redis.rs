//! Redis Pub/Sub transport implementation using `redis`.
//!
//! ## Two connections required
//!
//! Redis mandates a dedicated connection for Pub/Sub: a connection in
//! subscribe mode cannot issue regular commands like `PUBLISH`. Two async
//! connections are therefore maintained:
//!
//! - `publish_conn`: `MultiplexedConnection`, used only for `PUBLISH`
//! - `pubsub_sink` / `pubsub_stream`: split from `aio::PubSub`, used for
//!   `SUBSCRIBE` and for receiving messages respectively
//!
//! ## Concurrency model
//!
//! A single background actor task owns both connections. It publishes
//! outbound messages, registers broker subscriptions and polls the pub/sub
//! stream, forwarding every data message into the transport's inbound stream
//! in broker order. No other task touches the connections directly.
//!
//! `PubSubSink::subscribe()` resolves only after the broker confirms the
//! subscription, so `Transport::subscribe` returning `Ok` means later
//! publishes on that channel will be delivered.
//!
//! ## Non-goals
//!
//! Reconnection is not attempted. When the pub/sub stream ends the actor
//! logs, stops, and the inbound stream closes.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use redis::aio::{MultiplexedConnection, PubSubSink, PubSubStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    Inbound,
    Result,
    RpcError,
    Transport,
    TransportBase,
    TransportOptions,
    TransportPtr,
};

//
// Actor commands
//

enum Cmd {
    //
    Publish {
        channel: String,
        payload: Bytes,
        resp: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        channel: String,
        resp: oneshot::Sender<Result<()>>,
    },
    Close {
        resp: oneshot::Sender<Result<()>>,
    },
}

enum ActorStep {
    //
    Continue,
    Stop,
}

impl Cmd {
    // ---

    /// Dispatches an actor command to the correct handler on the actor.
    async fn handle(self, actor: &mut RedisActor) -> ActorStep {
        // ---

        match self {
            Cmd::Publish {
                channel,
                payload,
                resp,
            } => {
                let result = actor.handle_publish(&channel, payload).await;
                let _ = resp.send(result);
                ActorStep::Continue
            }
            Cmd::Subscribe { channel, resp } => {
                let result = actor.handle_subscribe(channel).await;
                let _ = resp.send(result);
                ActorStep::Continue
            }
            Cmd::Close { resp } => {
                log_debug!("{}: disconnecting redis client", actor.transport_id);
                let _ = resp.send(Ok(()));
                ActorStep::Stop
            }
        }
    }
}

/// Redis Pub/Sub implementation of the `Transport` trait.
struct RedisTransport {
    // ---
    base: TransportBase,
    cmd_tx: mpsc::Sender<Cmd>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

struct RedisActor {
    // ---
    transport_id: String, // for logging only
    publish_conn: MultiplexedConnection,
    pubsub_sink: PubSubSink,
    pubsub_stream: PubSubStream,
    cmd_rx: mpsc::Receiver<Cmd>,
    inbox_tx: mpsc::Sender<Inbound>,
    subscribed: HashSet<String>,
}

impl RedisActor {
    // ---

    async fn run(mut self) {
        // ---

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if matches!(cmd.handle(&mut self).await, ActorStep::Stop) {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                maybe_msg = self.pubsub_stream.next() => {
                    match maybe_msg {
                        Some(msg) => self.handle_incoming(msg).await,
                        None => {
                            log_error!("{}: pubsub stream ended", self.transport_id);
                            break;
                        }
                    }
                }
            }
        }

        log_debug!("{}: redis actor stopped", self.transport_id);
    }

    /// Issues a `PUBLISH` on the dedicated publish connection.
    async fn handle_publish(&mut self, channel: &str, payload: Bytes) -> Result<()> {
        // ---

        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload.as_ref())
            .query_async::<i64>(&mut self.publish_conn)
            .await
            .map(|_receivers| {
                log_debug!(
                    "{}: published on {channel} to {_receivers} receivers",
                    self.transport_id
                );
            })
            .map_err(|err| {
                let msg = format!(
                    "{}: publish failed for channel {channel}: {err}",
                    self.transport_id
                );
                log_error!("{msg}");
                RpcError::Transport(msg)
            })
    }

    /// Registers a broker subscription and waits for its confirmation.
    async fn handle_subscribe(&mut self, channel: String) -> Result<()> {
        // ---

        if self.subscribed.contains(&channel) {
            return Ok(());
        }

        match self.pubsub_sink.subscribe(&channel).await {
            Ok(()) => {
                log_info!("{}: subscribed to channel {channel}", self.transport_id);
                self.subscribed.insert(channel);
                Ok(())
            }
            Err(err) => {
                let msg = format!(
                    "{}: failed to subscribe to channel {channel}: {err}",
                    self.transport_id
                );
                log_error!("{msg}");
                Err(RpcError::Transport(msg))
            }
        }
    }

    /// Forwards one pub/sub data message into the inbound stream.
    async fn handle_incoming(&mut self, msg: redis::Msg) {
        // ---

        let inbound = Inbound {
            channel: Arc::from(msg.get_channel_name()),
            payload: Bytes::copy_from_slice(msg.get_payload_bytes()),
        };

        if self.inbox_tx.send(inbound).await.is_err() {
            log_debug!("{}: inbound stream dropped", self.transport_id);
        }
    }
} // RedisActor

impl RedisTransport {
    // ---

    async fn command<T>(&self, make: impl FnOnce(oneshot::Sender<Result<T>>) -> Cmd) -> Result<T> {
        // ---

        let (tx, rx) = oneshot::channel();

        self.cmd_tx.send(make(tx)).await.map_err(|_| {
            RpcError::Transport(format!("{}: not connected", self.base.transport_id))
        })?;

        rx.await.map_err(|e| {
            RpcError::Transport(format!("actor responder channel read failed: {e}"))
        })?
    }
}

#[async_trait::async_trait]
impl Transport for RedisTransport {
    // ---

    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        // ---
        let channel = channel.to_string();
        self.command(|resp| Cmd::Publish {
            channel,
            payload,
            resp,
        })
        .await
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        // ---
        let channel = channel.to_string();
        self.command(|resp| Cmd::Subscribe { channel, resp }).await
    }

    async fn close(&self) -> Result<()> {
        // ---

        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Cmd::Close { resp: tx }).await;
        let _ = rx.await;

        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = task {
            let _ = handle.await;
        }

        Ok(())
    }
}

/// Creates a Redis Pub/Sub transport.
///
/// # Errors
///
/// Returns an error if:
/// - The broker URI is missing or cannot be parsed
/// - Connection to the Redis broker fails (both connections are eager)
pub async fn create_transport(transport_id: &str, options: &TransportOptions) -> Result<TransportPtr> {
    // ---

    let uri = options
        .uri
        .as_deref()
        .ok_or_else(|| RpcError::MissingConfig("redis transport requires a broker URI".into()))?;

    let client = redis::Client::open(uri).map_err(|err| {
        let msg = format!("redis: failed to open client for URI {uri}: {err}");
        log_error!("{msg}");
        RpcError::Transport(msg)
    })?;

    let publish_conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|err| {
            let msg = format!("redis: failed to connect publish connection to {uri}: {err}");
            log_error!("{msg}");
            RpcError::Transport(msg)
        })?;

    let (pubsub_sink, pubsub_stream) = client
        .get_async_pubsub()
        .await
        .map_err(|err| {
            let msg = format!("redis: failed to connect pubsub connection to {uri}: {err}");
            log_error!("{msg}");
            RpcError::Transport(msg)
        })?
        .split();

    log_info!("{transport_id}: connected to Redis broker at {uri}");

    let (base, inbox_tx) = TransportBase::new(transport_id);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);

    let actor = RedisActor {
        transport_id: transport_id.to_string(),
        publish_conn,
        pubsub_sink,
        pubsub_stream,
        cmd_rx,
        inbox_tx,
        subscribed: HashSet::new(),
    };

    let handle = tokio::spawn(actor.run());

    Ok(Arc::new(RedisTransport {
        base,
        cmd_tx,
        task: std::sync::Mutex::new(Some(handle)),
    }))
}
