//! Echo server and client over Redis Pub/Sub.
//!
//! ```text
//! MESSENGER_BROKER_URI=redis://localhost:6379 \
//!     cargo run --example echo_redis --features transport_redis
//! ```

use mom_messenger::{Messenger, MessengerConfig, Result};
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    env_logger::init();

    let base = MessengerConfig::from_env()
        .unwrap_or_else(|_| MessengerConfig::with_broker("redis://localhost:6379", "echo-demo"))
        .with_channel_prefix("demo");

    let mut server_config = base.clone();
    server_config.client_identity = format!("{}-server", base.client_identity);
    let mut client_config = base.clone();
    client_config.client_identity = format!("{}-client", base.client_identity);

    let server = Messenger::connect(server_config).await?;
    let client = Messenger::connect(client_config).await?;

    server
        .add_handler("echo", |v: Value| async move { Ok(v) })
        .await?;

    let echo = client.message_channel("echo")?;
    let reply: Value = echo.query(&json!({"hello": "redis"})).await?;
    println!("echo replied: {reply}");

    client.shutdown().await?;
    server.shutdown().await?;
    Ok(())
}
