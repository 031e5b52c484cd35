//! Activity state store: the activity value owned by one room.
//!
//! ```text
//! Activity
//! ├── name / startDate / endDate / startTime   (whole-value LWW)
//! └── cards: [Card]                             (display order)
//!      └── Card { id, createdAt, updatedAt, body }
//!           ├── Note  { title, extraData: [String] }
//!           ├── Link  { url, title, description, imageUrl }
//!           ├── Poll  { question, options, votes }
//!           └── Unknown { kind, fields }        (forward compatible)
//! ```
//!
//! The primitives here never fail on a stale reference: targeting a card id
//! or an index that no longer exists leaves the activity untouched and
//! reports `false`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by card-level helpers (poll voting).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("card {0} is not a poll")]
    NotAPoll(String),
    #[error("option {option} out of range for poll with {len} options")]
    OptionOutOfRange { option: usize, len: usize },
}

// ───────────────────────────────────────────────────────────────────
// Activity
// ───────────────────────────────────────────────────────────────────

/// One room's shared state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default)]
    pub cards: Vec<Card>,
}

impl Activity {
    /// Empty activity, as created on first attach to a room.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn card(&self, card_id: &str) -> Option<&Card> {
        self.cards.iter().find(|c| c.id == card_id)
    }

    pub fn card_mut(&mut self, card_id: &str) -> Option<&mut Card> {
        self.cards.iter_mut().find(|c| c.id == card_id)
    }

    /// Position of a card in display order.
    pub fn card_index(&self, card_id: &str) -> Option<usize> {
        self.cards.iter().position(|c| c.id == card_id)
    }

    pub fn contains_card(&self, card_id: &str) -> bool {
        self.card_index(card_id).is_some()
    }

    /// Card ids in display order.
    pub fn card_ids(&self) -> Vec<&str> {
        self.cards.iter().map(|c| c.id.as_str()).collect()
    }

    /// Set the name. Returns whether the value changed.
    pub fn set_name(&mut self, name: &str) -> bool {
        if self.name.as_deref() == Some(name) {
            return false;
        }
        self.name = Some(name.to_string());
        true
    }

    /// Set all three date fields as one update.
    pub fn set_dates(
        &mut self,
        start_date: &str,
        end_date: Option<&str>,
        start_time: Option<&str>,
    ) -> bool {
        let unchanged = self.start_date.as_deref() == Some(start_date)
            && self.end_date.as_deref() == end_date
            && self.start_time.as_deref() == start_time;
        if unchanged {
            return false;
        }
        self.start_date = Some(start_date.to_string());
        self.end_date = end_date.map(str::to_string);
        self.start_time = start_time.map(str::to_string);
        true
    }

    /// Append a card unless one with the same id already exists.
    pub fn insert_card(&mut self, card: Card) -> bool {
        if self.contains_card(&card.id) {
            return false;
        }
        self.cards.push(card);
        true
    }

    /// Replace the card with the same id. Unknown ids are ignored, so an
    /// update racing a delete never resurrects the card.
    pub fn replace_card(&mut self, card: Card) -> bool {
        match self.card_mut(&card.id) {
            Some(slot) if *slot != card => {
                *slot = card;
                true
            }
            _ => false,
        }
    }

    pub fn remove_card(&mut self, card_id: &str) -> Option<Card> {
        let index = self.card_index(card_id)?;
        Some(self.cards.remove(index))
    }

    /// Move a card to `new_index`, clamped to `[0, len - 1]`.
    ///
    /// Remove-then-insert: the length and the set of ids never change.
    pub fn move_card(&mut self, card_id: &str, new_index: i64) -> bool {
        let Some(current) = self.card_index(card_id) else {
            return false;
        };
        let last = self.cards.len() - 1;
        let target = new_index.clamp(0, last as i64) as usize;
        if target == current {
            return false;
        }
        let card = self.cards.remove(current);
        self.cards.insert(target, card);
        true
    }

    pub fn push_extra_data(&mut self, card_id: &str, item: &str) -> bool {
        match self.card_mut(card_id).and_then(Card::extra_data_mut) {
            Some(list) => {
                list.push(item.to_string());
                true
            }
            None => false,
        }
    }

    pub fn set_extra_data(&mut self, card_id: &str, index: i64, item: &str) -> bool {
        let Some(list) = self.card_mut(card_id).and_then(Card::extra_data_mut) else {
            return false;
        };
        match checked_index(index, list.len()).and_then(|i| list.get_mut(i)) {
            Some(slot) if slot != item => {
                *slot = item.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn remove_extra_data(&mut self, card_id: &str, index: i64) -> bool {
        let Some(list) = self.card_mut(card_id).and_then(Card::extra_data_mut) else {
            return false;
        };
        match checked_index(index, list.len()) {
            Some(i) => {
                list.remove(i);
                true
            }
            None => false,
        }
    }
}

fn checked_index(index: i64, len: usize) -> Option<usize> {
    usize::try_from(index).ok().filter(|i| *i < len)
}

// ───────────────────────────────────────────────────────────────────
// Cards
// ───────────────────────────────────────────────────────────────────

/// A card in an activity.
///
/// On the wire the variant payload is flattened next to the common fields
/// and discriminated by an optional `type` field. Cards without `type`
/// decode as notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCard", into = "RawCard")]
pub struct Card {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub body: CardBody,
}

/// Variant payload of a card.
#[derive(Debug, Clone, PartialEq)]
pub enum CardBody {
    Note(NoteCard),
    Link(LinkCard),
    Poll(PollCard),
    /// A variant this build does not know. Fields are kept verbatim so
    /// the card survives a round trip through an older peer.
    Unknown {
        kind: String,
        fields: Map<String, Value>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub extra_data: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkCard {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub options: Vec<String>,
    #[serde(default)]
    pub votes: Vec<Vote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub user_id: String,
    pub option: usize,
}

impl PollCard {
    /// Record a vote, replacing any earlier vote by the same user.
    pub fn cast_vote(&mut self, user_id: &str, option: usize) -> Result<(), ModelError> {
        if option >= self.options.len() {
            return Err(ModelError::OptionOutOfRange {
                option,
                len: self.options.len(),
            });
        }
        self.retract_vote(user_id);
        self.votes.push(Vote {
            user_id: user_id.to_string(),
            option,
        });
        Ok(())
    }

    pub fn retract_vote(&mut self, user_id: &str) -> bool {
        let before = self.votes.len();
        self.votes.retain(|v| v.user_id != user_id);
        self.votes.len() != before
    }

    /// Vote count per option, indexed like `options`.
    pub fn tally(&self) -> Vec<usize> {
        let mut counts = vec![0; self.options.len()];
        for vote in &self.votes {
            if let Some(count) = counts.get_mut(vote.option) {
                *count += 1;
            }
        }
        counts
    }
}

impl Card {
    /// Fresh client-side card id.
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn new(id: impl Into<String>, body: CardBody) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            body,
        }
    }

    pub fn note(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(
            id,
            CardBody::Note(NoteCard {
                title: Some(title.into()),
                extra_data: Vec::new(),
            }),
        )
    }

    pub fn link(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            id,
            CardBody::Link(LinkCard {
                url: url.into(),
                ..LinkCard::default()
            }),
        )
    }

    pub fn poll(id: impl Into<String>, options: Vec<String>) -> Self {
        Self::new(
            id,
            CardBody::Poll(PollCard {
                question: None,
                options,
                votes: Vec::new(),
            }),
        )
    }

    /// Refresh `updated_at` after a local edit.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Wire discriminator of the variant.
    pub fn kind(&self) -> &str {
        match &self.body {
            CardBody::Note(_) => "note",
            CardBody::Link(_) => "link",
            CardBody::Poll(_) => "poll",
            CardBody::Unknown { kind, .. } => kind,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match &self.body {
            CardBody::Note(note) => note.title.as_deref(),
            CardBody::Link(link) => link.title.as_deref(),
            CardBody::Poll(poll) => poll.question.as_deref(),
            CardBody::Unknown { fields, .. } => fields.get("title").and_then(Value::as_str),
        }
    }

    /// Append-only sub-list of the card. Only notes carry one.
    pub fn extra_data(&self) -> Option<&[String]> {
        match &self.body {
            CardBody::Note(note) => Some(&note.extra_data),
            _ => None,
        }
    }

    pub fn extra_data_mut(&mut self) -> Option<&mut Vec<String>> {
        match &mut self.body {
            CardBody::Note(note) => Some(&mut note.extra_data),
            _ => None,
        }
    }

    pub fn cast_vote(&mut self, user_id: &str, option: usize) -> Result<(), ModelError> {
        match &mut self.body {
            CardBody::Poll(poll) => poll.cast_vote(user_id, option),
            _ => Err(ModelError::NotAPoll(self.id.clone())),
        }
    }
}

/// Flat wire shape shared by every variant.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCard {
    id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl TryFrom<RawCard> for Card {
    type Error = serde_json::Error;

    fn try_from(raw: RawCard) -> Result<Self, Self::Error> {
        let fields = Value::Object(raw.fields);
        let body = match raw.kind.as_deref() {
            None | Some("note") => CardBody::Note(serde_json::from_value(fields)?),
            Some("link") => CardBody::Link(serde_json::from_value(fields)?),
            Some("poll") => CardBody::Poll(serde_json::from_value(fields)?),
            Some(other) => CardBody::Unknown {
                kind: other.to_string(),
                fields: match fields {
                    Value::Object(map) => map,
                    _ => Map::new(),
                },
            },
        };
        Ok(Card {
            id: raw.id,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            body,
        })
    }
}

impl From<Card> for RawCard {
    fn from(card: Card) -> Self {
        let (kind, fields) = match card.body {
            CardBody::Note(note) => ("note".to_string(), object_fields(&note)),
            CardBody::Link(link) => ("link".to_string(), object_fields(&link)),
            CardBody::Poll(poll) => ("poll".to_string(), object_fields(&poll)),
            CardBody::Unknown { kind, fields } => (kind, fields),
        };
        RawCard {
            id: card.id,
            created_at: card.created_at,
            updated_at: card.updated_at,
            kind: Some(kind),
            fields,
        }
    }
}

fn object_fields<T: Serialize>(payload: &T) -> Map<String, Value> {
    match serde_json::to_value(payload) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
