//! Wire envelopes.
//!
//! Requests and responses travel as JSON objects with camelCase field names.
//! Decoding is the single validation step: the delivery loop turns raw bytes
//! into an [`Envelope`] or drops them, so nothing downstream re-checks field
//! presence.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::CorrelationId;

/// Request envelope, created fresh for every `send` and `query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    /// Token the response will echo back in `inReplyTo`.
    #[serde(alias = "requestId")]
    pub correlation_id: CorrelationId,

    /// Identity of the caller; selects the response channel.
    #[serde(alias = "clientName")]
    pub client_identity: String,

    /// Application payload.
    #[serde(default)]
    pub payload: Value,
}

impl RequestEnvelope {
    /// Build a request with a freshly generated correlation id.
    pub fn new(client_identity: impl Into<String>, payload: Value) -> Self {
        // ---
        Self {
            correlation_id: CorrelationId::generate(),
            client_identity: client_identity.into(),
            payload,
        }
    }
}

/// Response envelope, published exactly once per valid request.
///
/// `error_text` is present iff `success` is false, and `payload` is only
/// meaningful when `success` is true. The constructors keep both invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    /// Correlation id of the request being answered.
    #[serde(alias = "replyTo")]
    pub in_reply_to: CorrelationId,

    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "errorString")]
    pub error_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ResponseEnvelope {
    // ---

    /// Successful response carrying the handler's return value.
    pub fn success(in_reply_to: CorrelationId, payload: Value) -> Self {
        // ---
        Self {
            in_reply_to,
            success: true,
            error_text: None,
            payload: Some(payload),
        }
    }

    /// Failed response carrying the textual form of the handler error.
    pub fn failure(in_reply_to: CorrelationId, error_text: impl Into<String>) -> Self {
        // ---
        Self {
            in_reply_to,
            success: false,
            error_text: Some(error_text.into()),
            payload: None,
        }
    }

    /// Collapse the envelope into the value or the remote error text.
    pub fn into_outcome(self) -> std::result::Result<Value, String> {
        // ---
        if self.success {
            Ok(self.payload.unwrap_or(Value::Null))
        } else {
            Err(self.error_text.unwrap_or_default())
        }
    }
}

/// A decoded, well-formed envelope of either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
}

/// Why a raw inbound message was not accepted as an envelope.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("not a request or response envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("empty correlation id")]
    EmptyCorrelationId,

    #[error("empty client identity")]
    EmptyClientIdentity,
}

// Requests are tried first; a response never carries `correlationId` and
// `clientIdentity`, so the two shapes cannot be confused.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireEnvelope {
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
}

impl Envelope {
    // ---

    /// Decode raw bytes from the transport.
    ///
    /// Unknown fields are ignored. Envelopes with a missing or empty
    /// correlation id or client identity are rejected.
    pub fn decode(raw: &[u8]) -> std::result::Result<Self, DecodeError> {
        // ---
        match serde_json::from_slice::<WireEnvelope>(raw)? {
            WireEnvelope::Request(req) => {
                if req.correlation_id.is_empty() {
                    return Err(DecodeError::EmptyCorrelationId);
                }
                if req.client_identity.is_empty() {
                    return Err(DecodeError::EmptyClientIdentity);
                }
                Ok(Envelope::Request(req))
            }
            WireEnvelope::Response(resp) => {
                if resp.in_reply_to.is_empty() {
                    return Err(DecodeError::EmptyCorrelationId);
                }
                Ok(Envelope::Response(resp))
            }
        }
    }

    /// Serialize to JSON text.
    pub fn encode(&self) -> crate::Result<Bytes> {
        // ---
        let bytes = match self {
            Envelope::Request(req) => serde_json::to_vec(req)?,
            Envelope::Response(resp) => serde_json::to_vec(resp)?,
        };
        Ok(Bytes::from(bytes))
    }

    /// Correlation id carried by the envelope, whichever direction it is.
    pub fn correlation_id(&self) -> &CorrelationId {
        // ---
        match self {
            Envelope::Request(req) => &req.correlation_id,
            Envelope::Response(resp) => &resp.in_reply_to,
        }
    }
}

impl From<RequestEnvelope> for Envelope {
    fn from(req: RequestEnvelope) -> Self {
        Envelope::Request(req)
    }
}

impl From<ResponseEnvelope> for Envelope {
    fn from(resp: ResponseEnvelope) -> Self {
        Envelope::Response(resp)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_fields() {
        // ---
        let req = RequestEnvelope {
            correlation_id: CorrelationId::from("c-1"),
            client_identity: "node-client".into(),
            payload: json!({"message": "hi"}),
        };
        let bytes = Envelope::from(req).encode().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(
            value,
            json!({
                "correlationId": "c-1",
                "clientIdentity": "node-client",
                "payload": {"message": "hi"}
            })
        );
    }

    #[test]
    fn test_failure_omits_payload() {
        // ---
        let resp = ResponseEnvelope::failure(CorrelationId::from("c-2"), "boom");
        let bytes = Envelope::from(resp).encode().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(
            value,
            json!({"inReplyTo": "c-2", "success": false, "errorText": "boom"})
        );
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        // ---
        let raw = br#"{"correlationId":"c-3","clientIdentity":"a","payload":1,"extra":true}"#;
        match Envelope::decode(raw).unwrap() {
            Envelope::Request(req) => {
                assert_eq!(req.correlation_id.as_str(), "c-3");
                assert_eq!(req.payload, json!(1));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_legacy_field_names() {
        // ---
        let raw = br#"{"replyTo":"c-4","success":false,"errorString":"nope","payload":null}"#;
        match Envelope::decode(raw).unwrap() {
            Envelope::Response(resp) => {
                assert_eq!(resp.in_reply_to.as_str(), "c-4");
                assert_eq!(resp.into_outcome(), Err("nope".to_string()));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_missing_identity() {
        // ---
        let raw = br#"{"correlationId":"c-5","payload":{}}"#;
        assert!(matches!(
            Envelope::decode(raw),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_empty_correlation_id() {
        // ---
        let raw = br#"{"correlationId":"","clientIdentity":"a"}"#;
        assert!(matches!(
            Envelope::decode(raw),
            Err(DecodeError::EmptyCorrelationId)
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        // ---
        assert!(Envelope::decode(b"not json").is_err());
        assert!(Envelope::decode(b"[1,2,3]").is_err());
    }

    #[test]
    fn test_success_with_null_payload() {
        // ---
        let raw = br#"{"inReplyTo":"c-6","success":true,"payload":null}"#;
        match Envelope::decode(raw).unwrap() {
            Envelope::Response(resp) => assert_eq!(resp.into_outcome(), Ok(Value::Null)),
            other => panic!("expected response, got {other:?}"),
        }
    }
}
