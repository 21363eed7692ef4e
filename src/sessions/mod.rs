//! Voice session tracking
//!
//! Tracks whether a voice session is ongoing for each guild and member, and
//! keeps longest/average/count statistics of completed sessions.

mod error;
mod service;
mod state;
pub mod store;
mod tracker;

pub use error::{SessionError, SessionResult};
pub use service::{SessionOutcome, SessionService, TransitionOutcome, VoiceUpdate};
pub use state::{Scope, SessionState};
pub use store::{MemoryStore, SessionStore, SqliteStore};
pub use tracker::{SessionEdge, TrackerDecision, VoiceRoster, VoiceTransition, decide};
