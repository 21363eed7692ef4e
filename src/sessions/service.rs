//! Session service
//!
//! Applies tracker decisions to stored state. Every read-modify-write on a
//! scope runs under that scope's lock, so events dispatched on parallel tasks
//! cannot interleave their updates.

use crate::SESSION_TARGET;
use crate::sessions::{
    MemoryStore, Scope, SessionEdge, SessionResult, SessionState, SessionStore, VoiceRoster,
    VoiceTransition, decide,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of applying one edge to a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// A new session was opened
    Started,
    /// The running session was closed and recorded
    Ended { elapsed: Duration },
    /// The edge did not match the stored state and was dropped
    Ignored,
}

/// Outcomes for both scopes of one voice update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub member: Option<SessionOutcome>,
    pub guild: Option<SessionOutcome>,
}

/// A member's voice channel change within one guild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceUpdate {
    pub guild_id: u64,
    pub user_id: u64,
    pub previous_channel: Option<u64>,
    pub current_channel: Option<u64>,
}

impl VoiceUpdate {
    #[must_use]
    pub fn transition(&self) -> VoiceTransition {
        VoiceTransition::classify(self.previous_channel, self.current_channel)
    }
}

/// Service for voice session tracking
#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn SessionStore>,
    locks: Arc<DashMap<Scope, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("locked_scopes", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl Default for SessionService {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl SessionService {
    /// Create a service on top of `store`
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Create a service that keeps state in memory only
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    fn lock_for(&self, scope: Scope) -> Arc<Mutex<()>> {
        Arc::clone(&self.locks.entry(scope).or_default())
    }

    /// Drop the caller's handle and forget the lock once nobody else holds
    /// or waits on it
    fn release(&self, scope: Scope, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks
            .remove_if(&scope, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Current stored state of `scope`
    ///
    /// # Errors
    ///
    /// Returns the store's error if the state cannot be loaded.
    pub async fn state(&self, scope: Scope) -> SessionResult<SessionState> {
        self.store.load(scope).await
    }

    /// Open a session for `scope` unless one is already running
    ///
    /// # Errors
    ///
    /// Returns the store's error if loading or saving fails. The stored state
    /// is left as it was.
    pub async fn start_session(
        &self,
        scope: Scope,
        now: DateTime<Utc>,
    ) -> SessionResult<SessionOutcome> {
        let lock = self.lock_for(scope);
        let outcome = {
            let _guard = lock.lock().await;
            self.start_locked(scope, now).await
        };
        self.release(scope, lock);
        outcome
    }

    async fn start_locked(&self, scope: Scope, now: DateTime<Utc>) -> SessionResult<SessionOutcome> {
        let mut state = self.store.load(scope).await?;
        if !state.start(now) {
            debug!(target: SESSION_TARGET, %scope, "Session already running, keeping start time");
            return Ok(SessionOutcome::Ignored);
        }
        self.store.save(scope, state).await?;

        info!(
            target: SESSION_TARGET,
            %scope,
            started_at = %now.to_rfc3339(),
            event = "session_start",
            "Voice session started"
        );
        Ok(SessionOutcome::Started)
    }

    /// Close the running session for `scope` and record its length
    ///
    /// # Errors
    ///
    /// Returns the store's error if loading or saving fails. The stored state
    /// is left as it was.
    pub async fn end_session(
        &self,
        scope: Scope,
        now: DateTime<Utc>,
    ) -> SessionResult<SessionOutcome> {
        let lock = self.lock_for(scope);
        let outcome = {
            let _guard = lock.lock().await;
            self.end_locked(scope, now).await
        };
        self.release(scope, lock);
        outcome
    }

    async fn end_locked(&self, scope: Scope, now: DateTime<Utc>) -> SessionResult<SessionOutcome> {
        let mut state = self.store.load(scope).await?;
        let Some(elapsed) = state.end(now) else {
            debug!(target: SESSION_TARGET, %scope, "No running session to end");
            return Ok(SessionOutcome::Ignored);
        };
        let total_sessions = state.total_sessions;
        self.store.save(scope, state).await?;

        info!(
            target: SESSION_TARGET,
            %scope,
            elapsed_secs = elapsed.as_secs(),
            total_sessions,
            event = "session_end",
            "Voice session ended"
        );
        Ok(SessionOutcome::Ended { elapsed })
    }

    /// Apply one edge to `scope`
    ///
    /// # Errors
    ///
    /// Returns the store's error if loading or saving fails.
    pub async fn apply(
        &self,
        scope: Scope,
        edge: SessionEdge,
        now: DateTime<Utc>,
    ) -> SessionResult<SessionOutcome> {
        match edge {
            SessionEdge::Start => self.start_session(scope, now).await,
            SessionEdge::End => self.end_session(scope, now).await,
        }
    }

    /// Track one voice state change.
    ///
    /// `roster` must describe the guild after the change. Both scopes are
    /// attempted even if the first one fails; the first error is returned.
    ///
    /// # Errors
    ///
    /// Returns the store's error if either scope could not be updated.
    pub async fn handle_voice_update(
        &self,
        update: &VoiceUpdate,
        roster: &VoiceRoster,
        now: DateTime<Utc>,
    ) -> SessionResult<TransitionOutcome> {
        let transition = update.transition();
        let decision = decide(transition, roster);
        if decision.is_empty() {
            return Ok(TransitionOutcome::default());
        }
        debug!(
            target: SESSION_TARGET,
            guild_id = update.guild_id,
            user_id = update.user_id,
            ?transition,
            ?decision,
            "Voice transition"
        );

        let guild = match decision.guild {
            Some(edge) => Some(self.apply(Scope::Guild(update.guild_id), edge, now).await),
            None => None,
        };
        let member = match decision.member {
            Some(edge) => Some(self.apply(Scope::Member(update.user_id), edge, now).await),
            None => None,
        };

        if let (Some(Err(guild_err)), Some(Err(member_err))) = (&guild, &member) {
            warn!(
                target: SESSION_TARGET,
                guild_id = update.guild_id,
                user_id = update.user_id,
                %guild_err,
                %member_err,
                "Both session scopes failed to update"
            );
        }

        Ok(TransitionOutcome {
            guild: guild.transpose()?,
            member: member.transpose()?,
        })
    }
}
