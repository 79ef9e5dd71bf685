//! Query, send and error handling between two messengers sharing the
//! in-process broker.

use std::time::Duration;

use mom_messenger::{create_memory_transport, Messenger, MessengerConfig, Result, RpcError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize)]
struct AddRequest {
    a: i32,
    b: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct AddResponse {
    sum: i32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    env_logger::init();

    let server = Messenger::with_transport(
        MessengerConfig::memory("math-server").with_channel_prefix("demo"),
        create_memory_transport("math-server").await?,
    )?;
    let client = Messenger::with_transport(
        MessengerConfig::memory("Roxy")
            .with_channel_prefix("demo")
            .with_default_timeout(Duration::from_secs(2)),
        create_memory_transport("Roxy").await?,
    )?;

    server
        .add_handler("add", |req: AddRequest| async move {
            Ok(AddResponse { sum: req.a + req.b })
        })
        .await?;

    server
        .add_handler("divide", |(a, b): (i32, i32)| async move {
            if b == 0 {
                return Err(RpcError::handler("division by zero"));
            }
            Ok(a / b)
        })
        .await?;

    server
        .add_handler("log", |line: Value| async move {
            println!("server log: {line}");
            Ok(())
        })
        .await?;

    let add = client.message_channel("add")?;
    let resp: AddResponse = add.query(&AddRequest { a: 20, b: 3 }).await?;
    println!("20 + 3 = {}", resp.sum);

    let divide = client.message_channel("divide")?;
    match divide.query::<_, i32>(&(1, 0)).await {
        Ok(q) => println!("1 / 0 = {q}?"),
        Err(err) => println!("1 / 0 failed: {err}"),
    }

    let log = client.message_channel("log")?;
    log.send(&"fire and forget").await?;

    let nobody = client.message_channel("nobody")?;
    let res: Result<Value> = nobody
        .query_with_timeout(&(), Duration::from_millis(250))
        .await;
    println!("query without handler: {res:?}");

    client.shutdown().await?;
    server.shutdown().await?;
    Ok(())
}
