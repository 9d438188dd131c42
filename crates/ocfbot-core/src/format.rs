//! Turns account events into chat announcements.
//!
//! Formatting is pure: no I/O, no clock, no state. Each event maps to at most
//! one [`OutboundMessage`].

use std::collections::BTreeSet;

use crate::event::{Event, EventKind};

/// Channel announcing new accounts and request outcomes.
pub const ANNOUNCE_CHANNEL: &str = "#administrivia";
/// Operator-only channel for requests that need a human decision.
pub const OPERATOR_CHANNEL: &str = "#root";

/// Where each class of announcement goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destinations {
    pub announce: String,
    pub operator: String,
}

impl Default for Destinations {
    fn default() -> Self {
        Self {
            announce: ANNOUNCE_CHANNEL.to_string(),
            operator: OPERATOR_CHANNEL.to_string(),
        }
    }
}

/// A message to deliver once to every destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub destinations: BTreeSet<String>,
    pub text: String,
}

impl OutboundMessage {
    pub fn to_channel(channel: &str, text: String) -> Self {
        Self {
            destinations: BTreeSet::from([channel.to_string()]),
            text,
        }
    }
}

/// Maps events to outbound messages.
#[derive(Debug, Clone, Default)]
pub struct Formatter {
    destinations: Destinations,
}

impl Formatter {
    pub const fn new(destinations: Destinations) -> Self {
        Self { destinations }
    }

    pub const fn destinations(&self) -> &Destinations {
        &self.destinations
    }

    /// Format an event, or `None` for kinds that are not announced.
    pub fn format(&self, event: &Event) -> Option<OutboundMessage> {
        let request = &event.payload;
        let user = &request.user_name;

        match event.kind {
            EventKind::AccountSubmitted => Some(OutboundMessage::to_channel(
                &self.destinations.operator,
                format!(
                    "{user} ({}) needs approval: {}",
                    request.real_name,
                    request.reasons.join(", ")
                ),
            )),
            EventKind::AccountApproved => Some(OutboundMessage::to_channel(
                &self.destinations.announce,
                format!("{user} was approved, now pending creation."),
            )),
            EventKind::AccountRejected => Some(OutboundMessage::to_channel(
                &self.destinations.announce,
                format!("{user} was rejected."),
            )),
            EventKind::AccountCreated => {
                let identifier = match (request.calnet_uid, request.callink_oid) {
                    (Some(uid), _) => format!("Calnet UID: {uid}"),
                    (None, Some(oid)) => format!("Callink OID: {oid}"),
                    (None, None) => "No Calnet UID or OID set".to_string(),
                };
                Some(OutboundMessage::to_channel(
                    &self.destinations.announce,
                    format!("{user} created ({}, {identifier})", request.real_name),
                ))
            }
            EventKind::Unknown => None,
        }
    }
}
