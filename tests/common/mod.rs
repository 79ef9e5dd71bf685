#![allow(dead_code)]

use std::sync::Arc;

use mom_messenger::{
    //
    create_memory_transport_with_hub,
    MemoryHub,
    Messenger,
    MessengerConfig,
    TransportPtr,
};

pub const PREFIX: &str = "test";

/// Messenger on `hub` with the shared test prefix.
pub async fn messenger(hub: &Arc<MemoryHub>, identity: &str) -> Messenger {
    // ---
    let transport = create_memory_transport_with_hub(identity, hub.clone())
        .await
        .expect("failed to create memory transport");

    let config = MessengerConfig::memory(identity)
        .with_channel_prefix(PREFIX)
        .with_default_timeout_ms(1000);

    Messenger::with_transport(config, transport).expect("failed to start messenger")
}

/// Bare transport on `hub`, for observing or forging wire traffic.
pub async fn raw_transport(hub: &Arc<MemoryHub>, id: &str) -> TransportPtr {
    // ---
    create_memory_transport_with_hub(id, hub.clone())
        .await
        .expect("failed to create memory transport")
}

#[cfg(feature = "logging")]
mod imp {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = env_logger::builder().is_test(true).try_init();
        });
    }
}

#[cfg(not(feature = "logging"))]
mod imp {
    #[inline]
    pub fn init() {}
}

pub fn init_logging() {
    imp::init();
}
