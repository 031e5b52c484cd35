//! # cardroom-core — shared activity model and mutation protocol
//!
//! Pure data and logic used on both sides of a room connection:
//!
//! ```text
//! ┌──────────────┐   Message (JSON)   ┌──────────────┐
//! │ ClientReducer│ ◄────────────────► │ Room         │
//! │ (mirror)     │                    │ Authority    │
//! └──────┬───────┘                    └──────┬───────┘
//!        │ Activity::apply                   │ Activity::apply
//!        ▼                                   ▼
//! ┌──────────────┐                    ┌──────────────┐
//! │ Activity     │                    │ Activity     │
//! │ (local)      │                    │ (authority)  │
//! └──────────────┘                    └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`model`] — activity state store and card variants
//! - [`protocol`] — JSON message envelope
//! - [`apply`] — the one apply routine used by every component
//! - [`reducer`] — client-side mirror with optimistic reorder

pub mod model;
pub mod protocol;
pub mod apply;
pub mod reducer;

pub use apply::ApplyOutcome;
pub use model::{Activity, Card, CardBody, LinkCard, ModelError, NoteCard, PollCard, Vote};
pub use protocol::{Message, ProtocolError, MESSAGE_KINDS};
pub use reducer::ClientReducer;
