//! The single apply routine.
//!
//! The room authority and the client reducer both mutate an [`Activity`]
//! exclusively through [`Activity::apply`], so the server copy and every
//! client mirror run the same semantics for every message kind.

use crate::model::Activity;
use crate::protocol::Message;

/// Result of applying one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The activity changed.
    Changed,
    /// The message was valid but had no effect (duplicate create, stale
    /// card id, out-of-range index, value already set).
    Unchanged,
}

impl ApplyOutcome {
    fn from_changed(changed: bool) -> Self {
        if changed {
            ApplyOutcome::Changed
        } else {
            ApplyOutcome::Unchanged
        }
    }

    pub fn is_changed(self) -> bool {
        self == ApplyOutcome::Changed
    }
}

impl Activity {
    /// Apply one message in place.
    pub fn apply(&mut self, message: &Message) -> ApplyOutcome {
        let changed = match message {
            Message::Activity { activity } => {
                let changed = self != activity;
                *self = activity.clone();
                changed
            }
            Message::Name { name } => self.set_name(name),
            Message::Dates {
                start_date,
                end_date,
                start_time,
            } => self.set_dates(start_date, end_date.as_deref(), start_time.as_deref()),
            Message::CardCreate { card } => self.insert_card(card.clone()),
            Message::CardUpdate { card } => self.replace_card(card.clone()),
            Message::CardDelete { card_id } => self.remove_card(card_id).is_some(),
            Message::CardReorder { card_id, new_index } => self.move_card(card_id, *new_index),
            Message::CardExtraDataAdd {
                card_id,
                extra_data_item,
            } => self.push_extra_data(card_id, extra_data_item),
            Message::CardExtraDataUpdate {
                card_id,
                extra_data_index,
                updated_item,
            } => self.set_extra_data(card_id, *extra_data_index, updated_item),
            Message::CardExtraDataDelete {
                card_id,
                extra_data_index,
            } => self.remove_extra_data(card_id, *extra_data_index),
        };
        ApplyOutcome::from_changed(changed)
    }

    /// Apply a sequence of messages in order.
    pub fn apply_all<'a>(&mut self, messages: impl IntoIterator<Item = &'a Message>) -> usize {
        messages
            .into_iter()
            .filter(|m| self.apply(m).is_changed())
            .count()
    }
}
