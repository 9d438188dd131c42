//! Account request events published on the task-queue broker.
//!
//! Workers emit one event per state change of an account request. The event
//! body is the JSON object the task queue dispatches: a `type` naming the
//! event and a `request` object describing the account. Unknown fields are
//! ignored and unknown event types decode to [`EventKind::Unknown`].

use std::fmt;

use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

/// Kind of account request event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub enum EventKind {
    #[serde(rename = "ocflib.account_submitted")]
    AccountSubmitted,
    #[serde(rename = "ocflib.account_approved")]
    AccountApproved,
    #[serde(rename = "ocflib.account_rejected")]
    AccountRejected,
    #[serde(rename = "ocflib.account_created")]
    AccountCreated,
    /// Any event type outside the account lifecycle.
    #[serde(other)]
    Unknown,
}

impl EventKind {
    /// Every kind the relay subscribes to.
    pub const ACCOUNT_EVENTS: [Self; 4] = [
        Self::AccountSubmitted,
        Self::AccountApproved,
        Self::AccountRejected,
        Self::AccountCreated,
    ];

    /// Event type name on the wire, also used as the broker routing key.
    pub const fn wire_name(self) -> Option<&'static str> {
        match self {
            Self::AccountSubmitted => Some("ocflib.account_submitted"),
            Self::AccountApproved => Some("ocflib.account_approved"),
            Self::AccountRejected => Some("ocflib.account_rejected"),
            Self::AccountCreated => Some("ocflib.account_created"),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name().unwrap_or("unknown"))
    }
}

/// The account request carried by every account event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AccountRequest {
    pub user_name: String,
    pub real_name: String,
    /// Why the request needs manual approval, in the order the checks ran.
    pub reasons: Vec<String>,
    #[serde(deserialize_with = "optional_id")]
    pub calnet_uid: Option<i64>,
    #[serde(deserialize_with = "optional_id")]
    pub callink_oid: Option<i64>,
}

/// A single event received from the broker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(rename = "request", default)]
    pub payload: AccountRequest,
}

impl Event {
    pub const fn new(kind: EventKind, payload: AccountRequest) -> Self {
        Self { kind, payload }
    }

    /// Decode an event from its JSON body.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::EventDecode(e.to_string()))
    }
}

/// Identifiers arrive as integers, numeric strings, or null. Zero and the
/// empty string both mean "not set".
fn optional_id<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Int(i64),
        Text(String),
    }

    let raw = Option::<RawId>::deserialize(deserializer)?;
    let id = match raw {
        None => None,
        Some(RawId::Int(n)) => Some(n),
        Some(RawId::Text(s)) if s.trim().is_empty() => None,
        Some(RawId::Text(s)) => Some(s.trim().parse().map_err(serde::de::Error::custom)?),
    };
    Ok(id.filter(|n| *n != 0))
}
