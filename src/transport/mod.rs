//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `Transport` trait, exposed only through constructor functions. Broker
//! transports are hidden behind feature flags; when a feature is disabled its
//! constructor still exists and returns an error.
//!
//! Domain code must not depend on transport-specific types.

mod memory;
mod redis;

pub use memory::{create_memory_transport, create_memory_transport_with_hub, MemoryHub};
pub use redis::create_redis_transport;

use crate::{MessengerConfig, Result, RpcError, TransportPtr};

/// Create the transport selected by `config.transport`.
///
/// An explicit `transport_type` wins. Otherwise a `redis://` or `rediss://`
/// URI selects Redis, and no URI selects the process-global in-memory hub.
pub async fn create_transport(config: &MessengerConfig) -> Result<TransportPtr> {
    // ---
    let options = &config.transport;
    let transport_id = config.client_identity.as_str();

    let selected = match (options.transport_type.as_deref(), options.uri.as_deref()) {
        (Some(kind), _) => kind,
        (None, Some(uri)) if uri.starts_with("redis://") || uri.starts_with("rediss://") => "redis",
        (None, Some(uri)) => {
            return Err(RpcError::InvalidConfig(format!(
                "cannot infer transport from URI: {uri}"
            )))
        }
        (None, None) => "memory",
    };

    match selected {
        "memory" => create_memory_transport(transport_id).await,
        "redis" => create_redis_transport(transport_id, options).await,
        other => Err(RpcError::InvalidConfig(format!(
            "unrecognized transport_type: {other}, valid values: memory, redis"
        ))),
    }
}
