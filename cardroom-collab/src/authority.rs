//! Room authority: the single writer for one room's activity.
//!
//! ```text
//! Session A ──┐                       ┌──► Session A
//!             ├─► mpsc (bounded) ─► RoomAuthority ─► BroadcastGroup ─┼──► Session B
//! Session B ──┘    arrival order       │ apply           one send     └──► Session C
//!                                      ▼
//!                                   Activity
//! ```
//!
//! One actor task per room consumes [`RoomCommand`]s one at a time. A
//! mutation is validated, applied, and broadcast before the next command is
//! read, so every attached session observes the same total order. Attach
//! and resync take the snapshot and subscribe in the same step, so no
//! mutation falls between them.
//!
//! Lifecycle: `Uninitialized → Active → Draining → Closed`, published on a
//! watch channel.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use cardroom_core::{Activity, ApplyOutcome, Message};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use uuid::Uuid;

use crate::auth::UserId;
use crate::broadcast::{BroadcastGroup, Frame, SessionInfo};

/// Per-room sizing.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Frames buffered per session before it lags
    pub broadcast_capacity: usize,
    /// Commands buffered in the inbound queue
    pub inbound_queue_capacity: usize,
    /// Maximum attached sessions per room
    pub max_sessions_per_room: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
            inbound_queue_capacity: 1024,
            max_sessions_per_room: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Uninitialized,
    Active,
    Draining,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("room {0} is closed")]
    Closed(String),
    #[error("room {0} is full")]
    Full(String),
    #[error("session {0} is not attached")]
    NotAttached(Uuid),
    #[error("sender has no verified user id")]
    Unauthorized,
    #[error("clients may not send `{0}` messages")]
    Forbidden(&'static str),
    #[error("failed to encode broadcast: {0}")]
    Encode(String),
}

/// What a session receives when it attaches or resyncs.
#[derive(Debug)]
pub struct Attachment {
    /// `activity` snapshot frame, to be sent before any broadcast frame.
    pub snapshot: Frame,
    /// Broadcast frames applied after the snapshot.
    pub frames: broadcast::Receiver<Frame>,
}

/// Room statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomStats {
    pub mutations_applied: u64,
    pub mutations_unchanged: u64,
    pub mutations_rejected: u64,
    pub attached_sessions: usize,
}

#[derive(Default)]
struct AtomicRoomStats {
    mutations_applied: AtomicU64,
    mutations_unchanged: AtomicU64,
    mutations_rejected: AtomicU64,
    attached_sessions: AtomicUsize,
}

impl AtomicRoomStats {
    fn snapshot(&self) -> RoomStats {
        RoomStats {
            mutations_applied: self.mutations_applied.load(Ordering::Relaxed),
            mutations_unchanged: self.mutations_unchanged.load(Ordering::Relaxed),
            mutations_rejected: self.mutations_rejected.load(Ordering::Relaxed),
            attached_sessions: self.attached_sessions.load(Ordering::Relaxed),
        }
    }
}

/// Commands accepted by the authority, processed in arrival order.
pub enum RoomCommand {
    Attach {
        session: SessionInfo,
        reply: oneshot::Sender<Result<Attachment, RoomError>>,
    },
    Resync {
        session_id: Uuid,
        reply: oneshot::Sender<Result<Attachment, RoomError>>,
    },
    Mutate {
        session_id: Uuid,
        user_id: UserId,
        message: Message,
    },
    Detach {
        session_id: Uuid,
    },
    /// Sent by the registry after the last detach.
    Close,
}

/// Cloneable handle to a running authority.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: Arc<str>,
    commands: mpsc::Sender<RoomCommand>,
    phase: watch::Receiver<RoomPhase>,
    stats: Arc<AtomicRoomStats>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn phase(&self) -> RoomPhase {
        *self.phase.borrow()
    }

    /// Wait until the authority has discarded its state.
    pub async fn closed(&self) {
        let mut phase = self.phase.clone();
        let _ = phase.wait_for(|p| *p == RoomPhase::Closed).await;
    }

    pub fn stats(&self) -> RoomStats {
        self.stats.snapshot()
    }

    pub async fn attach(&self, session: SessionInfo) -> Result<Attachment, RoomError> {
        let (reply, response) = oneshot::channel();
        self.send(RoomCommand::Attach { session, reply }).await?;
        response.await.map_err(|_| self.closed_error())?
    }

    pub async fn resync(&self, session_id: Uuid) -> Result<Attachment, RoomError> {
        let (reply, response) = oneshot::channel();
        self.send(RoomCommand::Resync { session_id, reply }).await?;
        response.await.map_err(|_| self.closed_error())?
    }

    /// Queue a mutation. Validation happens in the authority; rejected
    /// messages are dropped there without a reply.
    pub async fn submit(
        &self,
        session_id: Uuid,
        user_id: UserId,
        message: Message,
    ) -> Result<(), RoomError> {
        self.send(RoomCommand::Mutate {
            session_id,
            user_id,
            message,
        })
        .await
    }

    pub async fn detach(&self, session_id: Uuid) -> Result<(), RoomError> {
        self.send(RoomCommand::Detach { session_id }).await
    }

    pub(crate) async fn close(&self) -> Result<(), RoomError> {
        self.send(RoomCommand::Close).await
    }

    async fn send(&self, command: RoomCommand) -> Result<(), RoomError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| self.closed_error())
    }

    fn closed_error(&self) -> RoomError {
        RoomError::Closed(self.room_id.to_string())
    }
}

#[cfg(test)]
impl RoomHandle {
    /// A handle whose inbox nobody reads.
    pub(crate) fn unserved(
        room_id: &str,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<RoomCommand>) {
        let (commands, inbox) = mpsc::channel(capacity);
        let (_, phase) = watch::channel(RoomPhase::Active);
        let handle = Self {
            room_id: Arc::from(room_id),
            commands,
            phase,
            stats: Arc::new(AtomicRoomStats::default()),
        };
        (handle, inbox)
    }
}

/// The actor owning one room's activity.
pub struct RoomAuthority {
    room_id: Arc<str>,
    activity: Activity,
    group: BroadcastGroup,
    phase: watch::Sender<RoomPhase>,
    stats: Arc<AtomicRoomStats>,
}

impl RoomAuthority {
    /// Create an authority with an empty activity, not yet running.
    pub fn new(room_id: &str, config: &RoomConfig) -> Self {
        let (phase, _) = watch::channel(RoomPhase::Uninitialized);
        Self {
            room_id: Arc::from(room_id),
            activity: Activity::new(),
            group: BroadcastGroup::new(config.broadcast_capacity),
            phase,
            stats: Arc::new(AtomicRoomStats::default()),
        }
    }

    /// Spawn the actor task and return its handle.
    pub fn spawn(room_id: &str, config: &RoomConfig) -> RoomHandle {
        let authority = Self::new(room_id, config);
        let (commands, inbox) = mpsc::channel(config.inbound_queue_capacity.max(1));
        let handle = RoomHandle {
            room_id: authority.room_id.clone(),
            commands,
            phase: authority.phase.subscribe(),
            stats: authority.stats.clone(),
        };
        tokio::spawn(authority.run(inbox));
        handle
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<RoomCommand>) {
        log::debug!("Room {} authority started", self.room_id);
        while let Some(command) = inbox.recv().await {
            if !self.handle_command(command) {
                break;
            }
        }
        self.shut_down();
    }

    /// Process one command. Returns `false` once the room should stop.
    pub fn handle_command(&mut self, command: RoomCommand) -> bool {
        match command {
            RoomCommand::Attach { session, reply } => {
                let _ = reply.send(Ok(self.attach(session)));
            }
            RoomCommand::Resync { session_id, reply } => {
                let _ = reply.send(self.resync(session_id));
            }
            RoomCommand::Mutate {
                session_id,
                user_id,
                message,
            } => {
                let kind = message.kind();
                if let Err(e) = self.mutate(session_id, &user_id, message) {
                    self.stats.mutations_rejected.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "Room {}: dropped `{kind}` from session {session_id}: {e}",
                        self.room_id
                    );
                }
            }
            RoomCommand::Detach { session_id } => self.detach(session_id),
            RoomCommand::Close => return false,
        }
        true
    }

    /// Register a session and hand it a snapshot plus a receiver positioned
    /// right after that snapshot.
    pub fn attach(&mut self, session: SessionInfo) -> Attachment {
        if self.phase() == RoomPhase::Uninitialized {
            self.set_phase(RoomPhase::Active);
            log::info!("Room {} is active", self.room_id);
        }
        log::info!(
            "Session {} ({}) attached to room {}",
            session.session_id,
            session.user_id,
            self.room_id
        );
        let frames = self.group.add_session(session);
        self.sync_session_count();
        Attachment {
            snapshot: self.snapshot_frame(),
            frames,
        }
    }

    pub fn resync(&mut self, session_id: Uuid) -> Result<Attachment, RoomError> {
        if !self.group.has_session(&session_id) {
            return Err(RoomError::NotAttached(session_id));
        }
        log::info!("Resyncing session {session_id} in room {}", self.room_id);
        Ok(Attachment {
            snapshot: self.snapshot_frame(),
            frames: self.group.subscribe(),
        })
    }

    /// Validate, apply, and broadcast one mutation.
    pub fn mutate(
        &mut self,
        session_id: Uuid,
        user_id: &UserId,
        message: Message,
    ) -> Result<ApplyOutcome, RoomError> {
        if self.phase() != RoomPhase::Active {
            return Err(RoomError::Closed(self.room_id.to_string()));
        }
        if user_id.is_empty() {
            return Err(RoomError::Unauthorized);
        }
        if !self.group.has_session(&session_id) {
            return Err(RoomError::NotAttached(session_id));
        }
        if !message.is_client_mutation() {
            return Err(RoomError::Forbidden(message.kind()));
        }
        let frame = message
            .encode()
            .map_err(|e| RoomError::Encode(e.to_string()))?;

        let outcome = self.activity.apply(&message);
        let counter = match outcome {
            ApplyOutcome::Changed => &self.stats.mutations_applied,
            ApplyOutcome::Unchanged => &self.stats.mutations_unchanged,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let receivers = self.group.broadcast_frame(Arc::from(frame));
        log::debug!(
            "Room {}: applied `{}` from {user_id} ({outcome:?}), sent to {receivers} sessions",
            self.room_id,
            message.kind()
        );
        Ok(outcome)
    }

    pub fn detach(&mut self, session_id: Uuid) {
        if let Some(info) = self.group.remove_session(&session_id) {
            log::info!(
                "Session {session_id} ({}) detached from room {}",
                info.user_id,
                self.room_id
            );
        }
        self.sync_session_count();
    }

    /// Discard the room's state. Nothing is persisted.
    fn shut_down(&mut self) {
        self.set_phase(RoomPhase::Draining);
        let cards = self.activity.cards.len();
        self.activity = Activity::new();
        self.group = BroadcastGroup::new(self.group.capacity());
        self.sync_session_count();
        self.set_phase(RoomPhase::Closed);
        log::info!("Room {} closed, discarded {cards} cards", self.room_id);
    }

    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    pub fn phase(&self) -> RoomPhase {
        *self.phase.borrow()
    }

    pub fn session_count(&self) -> usize {
        self.group.session_count()
    }

    pub fn stats(&self) -> RoomStats {
        self.stats.snapshot()
    }

    fn snapshot_frame(&self) -> Frame {
        match Message::snapshot(&self.activity).encode() {
            Ok(text) => Arc::from(text),
            Err(e) => {
                log::error!("Room {}: failed to encode snapshot: {e}", self.room_id);
                Arc::from(r#"{"type":"activity","activity":{"cards":[]}}"#)
            }
        }
    }

    fn set_phase(&self, phase: RoomPhase) {
        self.phase.send_replace(phase);
    }

    fn sync_session_count(&self) {
        self.stats
            .attached_sessions
            .store(self.group.session_count(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardroom_core::Card;

    fn authority() -> RoomAuthority {
        RoomAuthority::new("room-1", &RoomConfig::default())
    }

    fn alice() -> SessionInfo {
        SessionInfo::new(UserId::new("alice"))
    }

    fn decode(frame: &Frame) -> Message {
        Message::decode(frame).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_first_attach_activates() {
        let mut room = authority();
        assert_eq!(room.phase(), RoomPhase::Uninitialized);

        let attachment = room.attach(alice());
        assert_eq!(room.phase(), RoomPhase::Active);
        assert_eq!(decode(&attachment.snapshot), Message::snapshot(&Activity::new()));
    }

    #[tokio::test]
    async fn test_mutation_is_broadcast_to_sender() {
        let mut room = authority();
        let session = alice();
        let mut attachment = room.attach(session.clone());

        let outcome = room
            .mutate(session.session_id, &session.user_id, Message::name("Lisbon"))
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Changed);
        assert_eq!(room.activity().name.as_deref(), Some("Lisbon"));

        let frame = attachment.frames.recv().await.unwrap();
        assert_eq!(decode(&frame), Message::name("Lisbon"));
    }

    #[tokio::test]
    async fn test_no_op_mutations_are_still_broadcast() {
        let mut room = authority();
        let session = alice();
        let mut attachment = room.attach(session.clone());

        let outcome = room
            .mutate(session.session_id, &session.user_id, Message::card_delete("ghost"))
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);
        assert_eq!(decode(&attachment.frames.recv().await.unwrap()), Message::card_delete("ghost"));
        assert_eq!(room.stats().mutations_unchanged, 1);
    }

    #[tokio::test]
    async fn test_rejections() {
        let mut room = authority();
        let session = alice();
        let _attachment = room.attach(session.clone());

        let snapshot = Message::snapshot(&Activity::new());
        assert_eq!(
            room.mutate(session.session_id, &session.user_id, snapshot),
            Err(RoomError::Forbidden("activity"))
        );
        assert_eq!(
            room.mutate(session.session_id, &UserId::new(""), Message::name("x")),
            Err(RoomError::Unauthorized)
        );
        let stranger = Uuid::new_v4();
        assert_eq!(
            room.mutate(stranger, &session.user_id, Message::name("x")),
            Err(RoomError::NotAttached(stranger))
        );
        assert!(room.activity().name.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_then_frames_have_no_gap() {
        let mut room = authority();
        let a = alice();
        let _a_rx = room.attach(a.clone());
        room.mutate(a.session_id, &a.user_id, Message::card_create(Card::note("1", "First")))
            .unwrap();

        let b = SessionInfo::new(UserId::new("bob"));
        let mut b_rx = room.attach(b);
        room.mutate(a.session_id, &a.user_id, Message::card_create(Card::note("2", "Second")))
            .unwrap();

        let Message::Activity { activity } = decode(&b_rx.snapshot) else {
            panic!("expected snapshot");
        };
        assert_eq!(activity.card_ids(), vec!["1"]);
        let next = decode(&b_rx.frames.recv().await.unwrap());
        assert_eq!(next.card_id(), Some("2"));
    }

    #[tokio::test]
    async fn test_resync_requires_attachment() {
        let mut room = authority();
        let a = alice();
        let _rx = room.attach(a.clone());
        assert!(room.resync(a.session_id).is_ok());

        room.detach(a.session_id);
        assert_eq!(room.session_count(), 0);
        assert!(matches!(room.resync(a.session_id), Err(RoomError::NotAttached(_))));
    }

    #[tokio::test]
    async fn test_spawned_room_lifecycle() {
        let handle = RoomAuthority::spawn("room-2", &RoomConfig::default());
        assert_eq!(handle.phase(), RoomPhase::Uninitialized);

        let session = alice();
        let mut attachment = handle.attach(session.clone()).await.unwrap();
        assert_eq!(handle.phase(), RoomPhase::Active);

        handle
            .submit(session.session_id, session.user_id.clone(), Message::name("Porto"))
            .await
            .unwrap();
        let frame = attachment.frames.recv().await.unwrap();
        assert_eq!(decode(&frame), Message::name("Porto"));
        assert_eq!(handle.stats().mutations_applied, 1);
        assert_eq!(handle.stats().attached_sessions, 1);

        handle.detach(session.session_id).await.unwrap();
        handle.close().await.unwrap();
        handle.closed().await;
        assert_eq!(handle.phase(), RoomPhase::Closed);
        assert!(matches!(
            handle.attach(alice()).await,
            Err(RoomError::Closed(_))
        ));
    }
}

