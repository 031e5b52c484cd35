//! Client-side mirror of a room's activity.
//!
//! The mirror is updated by two entry points that share
//! [`Activity::apply`]:
//!
//! - [`ClientReducer::apply_authoritative`] for every frame received from
//!   the authority, in receipt order;
//! - [`ClientReducer::apply_local`] for optimistic edits (card reorder during
//!   a drag), applied before the message is sent.
//!
//! The authority echoes the optimistic reorder back. Re-applying it moves a
//! card that already sits at the target index, which is a no-op. Frames from
//! other clients that land before the echo are applied as they arrive, so
//! the mirror can briefly disagree with the optimistic order until the echo
//! settles it.

use crate::apply::ApplyOutcome;
use crate::model::Activity;
use crate::protocol::Message;

#[derive(Debug, Clone)]
pub struct ClientReducer {
    activity: Activity,
    connected: bool,
    loading: bool,
    pending_reorders: Vec<Message>,
}

impl Default for ClientReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientReducer {
    pub fn new() -> Self {
        Self {
            activity: Activity::new(),
            connected: false,
            loading: true,
            pending_reorders: Vec::new(),
        }
    }

    /// Apply a frame received from the authority.
    pub fn apply_authoritative(&mut self, message: &Message) -> ApplyOutcome {
        match message {
            Message::Activity { .. } => {
                self.loading = false;
                self.pending_reorders.clear();
            }
            Message::CardReorder { .. } => {
                if let Some(pos) = self.pending_reorders.iter().position(|m| m == message) {
                    self.pending_reorders.remove(pos);
                }
            }
            _ => {}
        }
        self.activity.apply(message)
    }

    /// Apply an optimistic local edit ahead of the authority's echo.
    pub fn apply_local(&mut self, message: &Message) -> ApplyOutcome {
        if matches!(message, Message::CardReorder { .. }) {
            self.pending_reorders.push(message.clone());
        }
        self.activity.apply(message)
    }

    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    /// Connection signal for the presentation layer.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// True until the first snapshot has arrived.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Optimistic reorders whose echo has not been seen yet. While non-zero
    /// the local order may differ from the authority's.
    pub fn pending_reorders(&self) -> usize {
        self.pending_reorders.len()
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
        if !connected {
            self.pending_reorders.clear();
        }
    }

    /// Mutation affordances are enabled only with a live, synced view.
    pub fn can_mutate(&self) -> bool {
        self.connected && !self.loading
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Card;

    fn synced_reducer(ids: &[&str]) -> ClientReducer {
        let mut activity = Activity::new();
        for id in ids {
            activity.insert_card(Card::note(*id, *id));
        }
        let mut reducer = ClientReducer::new();
        reducer.set_connected(true);
        reducer.apply_authoritative(&Message::snapshot(&activity));
        reducer
    }

    #[test]
    fn test_initial_state() {
        let reducer = ClientReducer::new();
        assert!(reducer.is_loading());
        assert!(!reducer.is_connected());
        assert!(!reducer.can_mutate());
        assert!(reducer.activity().cards.is_empty());
    }

    #[test]
    fn test_snapshot_ends_loading() {
        let reducer = synced_reducer(&["a"]);
        assert!(!reducer.is_loading());
        assert!(reducer.can_mutate());
        assert_eq!(reducer.activity().card_ids(), vec!["a"]);
    }

    #[test]
    fn test_optimistic_reorder_then_echo() {
        let mut reducer = synced_reducer(&["a", "b", "c"]);
        let reorder = Message::card_reorder("a", 2);

        assert_eq!(reducer.apply_local(&reorder), ApplyOutcome::Changed);
        assert_eq!(reducer.activity().card_ids(), vec!["b", "c", "a"]);
        assert_eq!(reducer.pending_reorders(), 1);

        assert_eq!(reducer.apply_authoritative(&reorder), ApplyOutcome::Unchanged);
        assert_eq!(reducer.activity().card_ids(), vec!["b", "c", "a"]);
        assert_eq!(reducer.pending_reorders(), 0);
    }

    #[test]
    fn test_interleaved_remote_reorder_converges() {
        // Authority order: remote move of c to 0 lands before our echo.
        let mut authority = Activity::new();
        for id in ["a", "b", "c"] {
            authority.insert_card(Card::note(id, id));
        }
        let mut reducer = synced_reducer(&["a", "b", "c"]);

        let ours = Message::card_reorder("a", 2);
        let theirs = Message::card_reorder("c", 0);
        reducer.apply_local(&ours);

        authority.apply(&theirs);
        authority.apply(&ours);

        reducer.apply_authoritative(&theirs);
        assert_eq!(reducer.pending_reorders(), 1);
        reducer.apply_authoritative(&ours);
        assert_eq!(reducer.activity().card_ids(), authority.card_ids());
        assert_eq!(reducer.activity().card_ids(), vec!["c", "b", "a"]);
        assert_eq!(reducer.pending_reorders(), 0);
    }

    #[test]
    fn test_disconnect_disables_mutation() {
        let mut reducer = synced_reducer(&[]);
        reducer.set_connected(false);
        assert!(!reducer.can_mutate());
        assert!(!reducer.is_loading());
    }
}
