//! Room id → running authority.
//!
//! A room exists while at least one session is attached to it. The first
//! attach spawns its authority with an empty activity; the last detach
//! removes it from the registry and closes it, discarding all state. A
//! later attach to the same id starts over from an empty activity.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::authority::{Attachment, RoomAuthority, RoomConfig, RoomError, RoomHandle};
use crate::broadcast::SessionInfo;

struct RoomEntry {
    handle: RoomHandle,
    /// Sessions counted against this room, including ones still attaching
    sessions: usize,
}

pub struct RoomRegistry {
    config: RoomConfig,
    rooms: Mutex<HashMap<String, RoomEntry>>,
}

impl RoomRegistry {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            config,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Attach a session, creating the room if needed.
    ///
    /// The session is counted before the authority is asked for a snapshot,
    /// so a concurrent last-detach cannot close the room underneath it.
    pub async fn attach(
        &self,
        room_id: &str,
        session: SessionInfo,
    ) -> Result<(RoomHandle, Attachment), RoomError> {
        let session_id = session.session_id;
        let handle = {
            let mut rooms = self.rooms.lock().await;
            let entry = match rooms.entry(room_id.to_string()) {
                Entry::Occupied(occupied) => {
                    let entry = occupied.into_mut();
                    if entry.sessions >= self.config.max_sessions_per_room {
                        log::warn!(
                            "Room {room_id} is full ({} sessions), refusing {session_id}",
                            entry.sessions
                        );
                        return Err(RoomError::Full(room_id.to_string()));
                    }
                    entry
                }
                Entry::Vacant(vacant) => {
                    log::info!("Creating room {room_id}");
                    vacant.insert(RoomEntry {
                        handle: RoomAuthority::spawn(room_id, &self.config),
                        sessions: 0,
                    })
                }
            };
            entry.sessions += 1;
            entry.handle.clone()
        };

        match handle.attach(session).await {
            Ok(attachment) => Ok((handle, attachment)),
            Err(e) => {
                self.detach(room_id, session_id).await;
                Err(e)
            }
        }
    }

    /// Detach a session. The last detach removes the room under the
    /// registry lock, so a new attach to the same id always spawns a fresh
    /// authority. The commands go out after the lock is released.
    pub async fn detach(&self, room_id: &str, session_id: Uuid) {
        let (handle, last) = {
            let mut rooms = self.rooms.lock().await;
            let Some(entry) = rooms.get_mut(room_id) else {
                return;
            };
            entry.sessions = entry.sessions.saturating_sub(1);
            let handle = entry.handle.clone();
            let last = entry.sessions == 0;
            if last {
                rooms.remove(room_id);
            }
            (handle, last)
        };

        // Detach and close share one queue and are processed in that order.
        if let Err(e) = handle.detach(session_id).await {
            log::debug!("Detach of {session_id} from {room_id} after close: {e}");
        }
        if last {
            log::info!("Last session left room {room_id}, closing");
            let _ = handle.close().await;
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    /// Ids of rooms with at least one session, sorted.
    pub async fn active_rooms(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rooms.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn session_count(&self, room_id: &str) -> usize {
        self.rooms
            .lock()
            .await
            .get(room_id)
            .map_or(0, |entry| entry.sessions)
    }

    pub async fn handle(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms
            .lock()
            .await
            .get(room_id)
            .map(|entry| entry.handle.clone())
    }
}
