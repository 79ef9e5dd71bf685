use crate::protocol::{RequestEnvelope, ResponseEnvelope};
use crate::{Result, RpcError};
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type-erased async handler: JSON payload in, JSON payload out.
pub(crate) trait HandlerFn: Send + Sync {
    fn call(&self, payload: Value) -> BoxFuture<'static, Result<Value>>;
}

pub(crate) type HandlerPtr = Arc<dyn HandlerFn>;

// Adapts a typed closure to `HandlerFn`.
struct Handler<F, Fut, TReq, TResp>
where
    F: Fn(TReq) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TResp>> + Send,
    TReq: DeserializeOwned,
    TResp: Serialize,
{
    func: F,
    _phantom: PhantomData<fn(TReq, TResp, Fut)>,
}

impl<F, Fut, TReq, TResp> HandlerFn for Handler<F, Fut, TReq, TResp>
where
    F: Fn(TReq) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TResp>> + Send + 'static,
    TReq: DeserializeOwned + Send + 'static,
    TResp: Serialize + Send + 'static,
{
    fn call(&self, payload: Value) -> BoxFuture<'static, Result<Value>> {
        // A payload that does not fit the handler's input type is answered
        // with an error response like any other handler failure.
        let req: TReq = match serde_json::from_value(payload) {
            Ok(r) => r,
            Err(e) => {
                return Box::pin(async move {
                    Err(RpcError::Handler(format!("invalid request payload: {e}")))
                })
            }
        };

        let fut = (self.func)(req);

        Box::pin(async move {
            let resp = fut.await?;
            Ok(serde_json::to_value(resp)?)
        })
    }
}

/// Wrap a typed handler closure into a shareable type-erased handler.
pub(crate) fn wrap_handler<F, Fut, TReq, TResp>(func: F) -> HandlerPtr
where
    F: Fn(TReq) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TResp>> + Send + 'static,
    TReq: DeserializeOwned + Send + 'static,
    TResp: Serialize + Send + 'static,
{
    Arc::new(Handler {
        func,
        _phantom: PhantomData,
    })
}

/// Run `handler` for one request and build its single response.
///
/// Errors and panics both become failure responses carrying their text;
/// the error value itself never leaves this process.
pub(crate) async fn invoke(handler: HandlerPtr, request: RequestEnvelope) -> ResponseEnvelope {
    // ---
    let RequestEnvelope {
        correlation_id,
        payload,
        ..
    } = request;

    let outcome = AssertUnwindSafe(async move { handler.call(payload).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(value)) => ResponseEnvelope::success(correlation_id, value),
        Ok(Err(err)) => ResponseEnvelope::failure(correlation_id, err.to_string()),
        Err(panic) => ResponseEnvelope::failure(
            correlation_id,
            format!("handler panicked: {}", panic_message(panic.as_ref())),
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    // ---
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::protocol::CorrelationId;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Add {
        a: i32,
        b: i32,
    }

    fn request(payload: Value) -> RequestEnvelope {
        RequestEnvelope {
            correlation_id: CorrelationId::from("c-1"),
            client_identity: "tester".into(),
            payload,
        }
    }

    #[tokio::test]
    async fn test_success_response() {
        // ---
        let handler = wrap_handler(|req: Add| async move { Ok(req.a + req.b) });
        let resp = invoke(handler, request(json!({"a": 2, "b": 3}))).await;

        assert_eq!(resp, ResponseEnvelope::success(CorrelationId::from("c-1"), json!(5)));
    }

    #[tokio::test]
    async fn test_error_becomes_text() {
        // ---
        let handler = wrap_handler(|_: Value| async move {
            Err::<Value, _>(RpcError::handler("boom"))
        });
        let resp = invoke(handler, request(json!(null))).await;

        assert!(!resp.success);
        assert_eq!(resp.error_text.as_deref(), Some("boom"));
        assert!(resp.payload.is_none());
    }

    #[tokio::test]
    async fn test_bad_payload_gets_error_response() {
        // ---
        let handler = wrap_handler(|req: Add| async move { Ok(req.a) });
        let resp = invoke(handler, request(json!("not an object"))).await;

        assert!(!resp.success);
        assert!(resp
            .error_text
            .unwrap()
            .starts_with("invalid request payload"));
    }

    #[tokio::test]
    async fn test_panic_becomes_error_response() {
        // ---
        let handler = wrap_handler(|_: Value| async move {
            if true {
                panic!("kaboom");
            }
            Ok(Value::Null)
        });
        let resp = invoke(handler, request(json!(null))).await;

        assert_eq!(resp.error_text.as_deref(), Some("handler panicked: kaboom"));
    }
}
