//! Fan-out of applied mutations to every session attached to a room.
//!
//! Uses a tokio broadcast channel: one send reaches all subscribers, and
//! each subscriber owns an independent buffer of `capacity` frames. A slow
//! or broken session only lags its own receiver; the sender never waits.
//!
//! Frames are encoded once per mutation and shared as `Arc<str>`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cardroom_core::{Message, ProtocolError};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::auth::UserId;

/// An encoded JSON text frame shared across receivers.
pub type Frame = Arc<str>;

/// Identity of one attached connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub user_id: UserId,
}

impl SessionInfo {
    pub fn new(user_id: UserId) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id,
        }
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub frames_sent: u64,
    pub frames_without_receivers: u64,
    pub active_sessions: usize,
}

#[derive(Default)]
struct AtomicBroadcastStats {
    frames_sent: AtomicU64,
    frames_without_receivers: AtomicU64,
}

/// Broadcast group for a single room.
///
/// Owned by the room authority, which is the only writer; no interior
/// locking is needed.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Frame>,
    sessions: HashMap<Uuid, SessionInfo>,
    capacity: usize,
    stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    /// `capacity` is the number of frames buffered per receiver before a
    /// lagging receiver starts losing frames.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sessions: HashMap::new(),
            capacity,
            stats: AtomicBroadcastStats::default(),
        }
    }

    /// Register a session and return its receiver.
    pub fn add_session(&mut self, info: SessionInfo) -> broadcast::Receiver<Frame> {
        self.sessions.insert(info.session_id, info);
        self.sender.subscribe()
    }

    pub fn remove_session(&mut self, session_id: &Uuid) -> Option<SessionInfo> {
        self.sessions.remove(session_id)
    }

    /// Encode and send a message to every receiver, sender included.
    /// Returns the number of receivers reached.
    pub fn broadcast(&self, msg: &Message) -> Result<usize, ProtocolError> {
        let frame: Frame = Arc::from(msg.encode()?);
        Ok(self.broadcast_frame(frame))
    }

    /// Send a pre-encoded frame.
    pub fn broadcast_frame(&self, frame: Frame) -> usize {
        self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        match self.sender.send(frame) {
            Ok(count) => count,
            Err(_) => {
                self.stats
                    .frames_without_receivers
                    .fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    /// Fresh receiver for an already registered session (resync).
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.sender.subscribe()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn has_session(&self, session_id: &Uuid) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn session(&self, session_id: &Uuid) -> Option<&SessionInfo> {
        self.sessions.get(session_id)
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.values().cloned().collect()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            frames_sent: self.stats.frames_sent.load(Ordering::Relaxed),
            frames_without_receivers: self.stats.frames_without_receivers.load(Ordering::Relaxed),
            active_sessions: self.sessions.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    fn session(name: &str) -> SessionInfo {
        SessionInfo::new(UserId::new(name))
    }

    #[tokio::test]
    async fn test_add_remove_session() {
        let mut group = BroadcastGroup::new(16);
        let alice = session("alice");
        let id = alice.session_id;

        let _rx = group.add_session(alice);
        assert_eq!(group.session_count(), 1);
        assert!(group.has_session(&id));
        assert_eq!(group.session(&id).unwrap().user_id, UserId::new("alice"));

        group.remove_session(&id);
        assert_eq!(group.session_count(), 0);
        assert!(!group.has_session(&id));
    }

    #[tokio::test]
    async fn test_fan_out_includes_sender() {
        let mut group = BroadcastGroup::new(16);
        let mut rx1 = group.add_session(session("alice"));
        let mut rx2 = group.add_session(session("bob"));
        let mut rx3 = group.add_session(session("carol"));

        let count = group.broadcast(&Message::name("Trip")).unwrap();
        assert_eq!(count, 3);

        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            let frame = rx.recv().await.unwrap();
            assert_eq!(&*frame, r#"{"type":"name","name":"Trip"}"#);
        }
    }

    #[tokio::test]
    async fn test_broadcast_without_receivers() {
        let group = BroadcastGroup::new(4);
        assert_eq!(group.broadcast_frame(Arc::from("{}")), 0);
        let stats = group.stats();
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.frames_without_receivers, 1);
    }

    #[tokio::test]
    async fn test_lagging_receiver_is_isolated() {
        let mut group = BroadcastGroup::new(2);
        let mut slow = group.add_session(session("slow"));
        let mut fast = group.add_session(session("fast"));

        for i in 0..4 {
            group.broadcast_frame(Arc::from(format!("{i}")));
            assert_eq!(&*fast.recv().await.unwrap(), i.to_string());
        }

        assert!(matches!(slow.recv().await, Err(RecvError::Lagged(2))));
    }

    #[tokio::test]
    async fn test_stats_and_capacity() {
        let mut group = BroadcastGroup::new(32);
        let _rx = group.add_session(session("alice"));
        group.broadcast(&Message::card_delete("a")).unwrap();
        group.broadcast(&Message::card_delete("b")).unwrap();

        let stats = group.stats();
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.active_sessions, 1);
        assert_eq!(group.capacity(), 32);
        assert_eq!(group.sessions().len(), 1);
    }
}
