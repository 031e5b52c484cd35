//! # cardroom-collab — real-time room synchronization for cardroom
//!
//! Serves shared activities over WebSocket. Every room has one authority
//! task that applies mutations in arrival order and fans them out to every
//! attached session.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────┐
//! │ RoomClient  │ ◄────────────────► │ SyncServer   │
//! │ (per user)  │    JSON frames     │ + sessions   │
//! └──────┬──────┘                    └──────┬───────┘
//!        │                                  │
//!        ▼                                  ▼
//! ┌─────────────┐                    ┌──────────────┐
//! │ClientReducer│                    │ RoomRegistry │
//! │ (mirror)    │                    └──────┬───────┘
//! └─────────────┘                           │
//!                                   ┌───────┴───────┐
//!                                   │ RoomAuthority │──► BroadcastGroup
//!                                   │ (one per room)│     (fan-out)
//!                                   └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`auth`] — bearer credential → user id
//! - [`directory`] — user profile lookup
//! - [`broadcast`] — per-room fan-out with isolated lag
//! - [`authority`] — the single writer for one room
//! - [`registry`] — room lifecycle keyed by room id
//! - [`session`] — handshake and per-connection loop
//! - [`server`] — WebSocket sync server
//! - [`client`] — WebSocket room client
//! - [`http`] — profile query API
//! - [`config`] — server configuration

pub mod auth;
pub mod authority;
pub mod broadcast;
pub mod client;
pub mod config;
pub mod directory;
pub mod http;
pub mod registry;
pub mod server;
pub mod session;

// Re-exports for convenience
pub use auth::{AuthError, Authenticator, StaticTokenAuthenticator, UserId};
pub use authority::{
    Attachment, RoomAuthority, RoomConfig, RoomError, RoomHandle, RoomPhase, RoomStats,
};
pub use broadcast::{BroadcastGroup, BroadcastStats, Frame, SessionInfo};
pub use client::{ClientError, ConnectionState, RoomClient, RoomEvent};
pub use config::{ConfigError, ServerConfig};
pub use directory::{DirectoryError, InMemoryUserDirectory, UserDirectory, UserProfile};
pub use http::{ApiError, ApiState};
pub use registry::RoomRegistry;
pub use server::{ServerStats, SyncServer};
pub use session::{AttachRequest, HandshakeRejection};
