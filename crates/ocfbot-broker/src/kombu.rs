//! The kombu message envelope and Redis key layout.
//!
//! Every message on a Redis-backed kombu transport is a JSON envelope whose
//! `body` carries the serialized payload, base64-encoded when
//! `properties.body_encoding` says so. Exchanges are emulated with a set of
//! bindings per exchange; publishers push onto every bound queue (a list).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BrokerError;

/// Separator between the fields of a binding entry.
pub const BINDING_SEPARATOR: &str = "\x06\x16";

/// Exchange the task queue publishes events on.
pub const EVENT_EXCHANGE: &str = "celeryev";

/// Redis set holding the bindings of an exchange.
pub fn binding_key(exchange: &str) -> String {
    format!("_kombu.binding.{exchange}")
}

/// One member of the binding set: routing key, pattern, queue.
pub fn binding_member(routing_key: &str, queue: &str) -> String {
    [routing_key, "", queue].join(BINDING_SEPARATOR)
}

/// Message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub body: String,
    #[serde(rename = "content-encoding", default = "utf8")]
    pub content_encoding: String,
    #[serde(rename = "content-type", default = "json")]
    pub content_type: String,
    #[serde(default)]
    pub headers: Value,
    #[serde(default)]
    pub properties: Properties,
}

/// Envelope properties. Unknown properties are dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_mode: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_info: Option<DeliveryInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_tag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryInfo {
    pub exchange: String,
    pub routing_key: String,
}

fn utf8() -> String {
    "utf-8".to_string()
}

fn json() -> String {
    "application/json".to_string()
}

impl Envelope {
    /// Wrap a JSON payload, base64-encoding it as the Redis transport does.
    pub fn json(payload: &Value, headers: Value, properties: Properties) -> Result<Self, BrokerError> {
        let body = STANDARD.encode(serde_json::to_vec(payload)?);
        Ok(Self {
            body,
            content_encoding: utf8(),
            content_type: json(),
            headers,
            properties: Properties {
                body_encoding: Some("base64".to_string()),
                ..properties
            },
        })
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, BrokerError> {
        Ok(serde_json::from_slice(raw)?)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, BrokerError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// The raw payload bytes.
    pub fn decode_body(&self) -> Result<Vec<u8>, BrokerError> {
        if self.content_type != "application/json" {
            return Err(BrokerError::Protocol(format!(
                "unsupported content type {:?}",
                self.content_type
            )));
        }
        match self.properties.body_encoding.as_deref() {
            Some("base64") => STANDARD
                .decode(self.body.as_bytes())
                .map_err(|e| BrokerError::Protocol(format!("invalid base64 body: {e}"))),
            None | Some("utf-8") => Ok(self.body.as_bytes().to_vec()),
            Some(other) => Err(BrokerError::Protocol(format!(
                "unsupported body encoding {other:?}"
            ))),
        }
    }
}
