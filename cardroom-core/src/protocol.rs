//! JSON mutation protocol shared by the room authority and its clients.
//!
//! Every frame is a JSON object with a `type` discriminator:
//! ```text
//! {"type":"card-reorder","cardId":"c1","newIndex":2}
//! {"type":"card-extra-data-add","cardId":"c1","extraDataItem":"https://example.com"}
//! ```
//!
//! Decoding separates three cases: a known message, an unknown `type`
//! (ignored by both ends), and a malformed frame (an error).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::{Activity, Card};

/// Wire names of every message kind, in protocol order.
pub const MESSAGE_KINDS: [&str; 10] = [
    "activity",
    "name",
    "dates",
    "card-create",
    "card-update",
    "card-delete",
    "card-reorder",
    "card-extra-data-add",
    "card-extra-data-update",
    "card-extra-data-delete",
];

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    /// Full snapshot, sent by the authority on attach and on resync.
    Activity { activity: Activity },
    Name { name: String },
    #[serde(rename_all = "camelCase")]
    Dates {
        start_date: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_date: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_time: Option<String>,
    },
    CardCreate { card: Card },
    CardUpdate { card: Card },
    #[serde(rename_all = "camelCase")]
    CardDelete { card_id: String },
    #[serde(rename_all = "camelCase")]
    CardReorder { card_id: String, new_index: i64 },
    #[serde(rename_all = "camelCase")]
    CardExtraDataAdd {
        card_id: String,
        #[serde(alias = "item")]
        extra_data_item: String,
    },
    #[serde(rename_all = "camelCase")]
    CardExtraDataUpdate {
        card_id: String,
        #[serde(alias = "index")]
        extra_data_index: i64,
        updated_item: String,
    },
    #[serde(rename_all = "camelCase")]
    CardExtraDataDelete {
        card_id: String,
        #[serde(alias = "index")]
        extra_data_index: i64,
    },
}

impl Message {
    pub fn snapshot(activity: &Activity) -> Self {
        Message::Activity {
            activity: activity.clone(),
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        Message::Name { name: name.into() }
    }

    pub fn dates(
        start_date: impl Into<String>,
        end_date: Option<String>,
        start_time: Option<String>,
    ) -> Self {
        Message::Dates {
            start_date: start_date.into(),
            end_date,
            start_time,
        }
    }

    pub fn card_create(card: Card) -> Self {
        Message::CardCreate { card }
    }

    pub fn card_update(card: Card) -> Self {
        Message::CardUpdate { card }
    }

    pub fn card_delete(card_id: impl Into<String>) -> Self {
        Message::CardDelete {
            card_id: card_id.into(),
        }
    }

    pub fn card_reorder(card_id: impl Into<String>, new_index: i64) -> Self {
        Message::CardReorder {
            card_id: card_id.into(),
            new_index,
        }
    }

    pub fn extra_data_add(card_id: impl Into<String>, item: impl Into<String>) -> Self {
        Message::CardExtraDataAdd {
            card_id: card_id.into(),
            extra_data_item: item.into(),
        }
    }

    pub fn extra_data_update(
        card_id: impl Into<String>,
        index: i64,
        item: impl Into<String>,
    ) -> Self {
        Message::CardExtraDataUpdate {
            card_id: card_id.into(),
            extra_data_index: index,
            updated_item: item.into(),
        }
    }

    pub fn extra_data_delete(card_id: impl Into<String>, index: i64) -> Self {
        Message::CardExtraDataDelete {
            card_id: card_id.into(),
            extra_data_index: index,
        }
    }

    /// Wire discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Activity { .. } => "activity",
            Message::Name { .. } => "name",
            Message::Dates { .. } => "dates",
            Message::CardCreate { .. } => "card-create",
            Message::CardUpdate { .. } => "card-update",
            Message::CardDelete { .. } => "card-delete",
            Message::CardReorder { .. } => "card-reorder",
            Message::CardExtraDataAdd { .. } => "card-extra-data-add",
            Message::CardExtraDataUpdate { .. } => "card-extra-data-update",
            Message::CardExtraDataDelete { .. } => "card-extra-data-delete",
        }
    }

    /// Card targeted by this message, if any.
    pub fn card_id(&self) -> Option<&str> {
        match self {
            Message::CardCreate { card } | Message::CardUpdate { card } => Some(&card.id),
            Message::CardDelete { card_id }
            | Message::CardReorder { card_id, .. }
            | Message::CardExtraDataAdd { card_id, .. }
            | Message::CardExtraDataUpdate { card_id, .. }
            | Message::CardExtraDataDelete { card_id, .. } => Some(card_id),
            _ => None,
        }
    }

    /// Whether a client is allowed to send this message. Snapshots only
    /// flow from the authority to clients.
    pub fn is_client_mutation(&self) -> bool {
        !matches!(self, Message::Activity { .. })
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse a JSON text frame.
    ///
    /// Returns `Ok(None)` for a well-formed frame whose `type` is not one of
    /// [`MESSAGE_KINDS`].
    pub fn decode(text: &str) -> Result<Option<Self>, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        let kind = match value.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) | None => return Err(ProtocolError::MissingType),
        };
        if !MESSAGE_KINDS.contains(&kind.as_str()) {
            log::debug!("Ignoring message with unknown type {kind:?}");
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| ProtocolError::Malformed {
                kind,
                reason: e.to_string(),
            })
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("message has no string `type` field")]
    MissingType,
    #[error("malformed `{kind}` message: {reason}")]
    Malformed { kind: String, reason: String },
    #[error("serialization error: {0}")]
    Serialization(String),
}
