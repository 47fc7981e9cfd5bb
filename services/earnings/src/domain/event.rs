//! Processor webhook events.
//!
//! The envelope is parsed first; the inner object is decoded according to the
//! event type. Types this service does not act on decode to
//! [`EventKind::Unknown`].

use std::collections::HashMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;

/// A field the processor sends either as an id or, when expanded, as the object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(Box<T>),
}

impl<T> Expandable<T> {
    pub fn as_object(&self) -> Option<&T> {
        match self {
            Self::Object(object) => Some(object),
            Self::Id(_) => None,
        }
    }
}

pub type Metadata = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PayoutObject {
    pub id: String,
    #[serde(default)]
    pub failure_code: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub balance_transaction: Option<Expandable<BalanceTransaction>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BalanceTransaction {
    pub id: String,
    #[serde(default)]
    pub source: Option<Expandable<TransferObject>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransferObject {
    pub id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccountObject {
    pub id: String,
    #[serde(default)]
    pub payouts_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CapabilityObject {
    /// Capability name, e.g. `transfers`.
    pub id: String,
    pub account: Expandable<AccountObject>,
    pub status: String,
}

impl CapabilityObject {
    pub fn account_id(&self) -> &str {
        match &self.account {
            Expandable::Id(id) => id,
            Expandable::Object(account) => &account.id,
        }
    }

    pub fn is_transfers(&self) -> bool {
        self.id == "transfers"
    }

    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    PayoutPaid(PayoutObject),
    PayoutFailed(PayoutObject),
    AccountUpdated(AccountObject),
    CapabilityUpdated(CapabilityObject),
    TransferReversed(TransferObject),
    BalanceAvailable,
    PaymentIntentCreated(PaymentIntentObject),
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub id: String,
    pub kind: EventKind,
}

#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    /// Not an event envelope at all.
    #[error("malformed event envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    /// A known event type whose object does not have the expected shape.
    #[error("malformed {event_type} object: {source}")]
    Object {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawData,
}

#[derive(Deserialize)]
struct RawData {
    object: serde_json::Value,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, EventParseError> {
        let raw: RawEvent = serde_json::from_slice(payload).map_err(EventParseError::Envelope)?;
        let object = raw.data.object;
        let event_type = raw.event_type.as_str();
        let kind = match event_type {
            "payout.paid" => EventKind::PayoutPaid(decode(event_type, object)?),
            "payout.failed" => EventKind::PayoutFailed(decode(event_type, object)?),
            "account.updated" => EventKind::AccountUpdated(decode(event_type, object)?),
            "capability.updated" => EventKind::CapabilityUpdated(decode(event_type, object)?),
            "transfer.reversed" => EventKind::TransferReversed(decode(event_type, object)?),
            "balance.available" => EventKind::BalanceAvailable,
            "payment_intent.created" => {
                EventKind::PaymentIntentCreated(decode(event_type, object)?)
            }
            other => EventKind::Unknown(other.to_owned()),
        };
        Ok(Self { id: raw.id, kind })
    }
}

fn decode<T: DeserializeOwned>(
    event_type: &str,
    object: serde_json::Value,
) -> Result<T, EventParseError> {
    serde_json::from_value(object).map_err(|source| EventParseError::Object {
        event_type: event_type.to_owned(),
        source,
    })
}
