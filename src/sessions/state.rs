//! Session state and aggregation
//!
//! A [`SessionState`] is kept per [`Scope`]. It flips between running and idle
//! on start/end edges and folds each completed session into its aggregates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// The unit a session is tracked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Any voice activity anywhere in the guild
    Guild(u64),
    /// One member, keyed by user id
    Member(u64),
}

impl Scope {
    /// Raw Discord id of the scope
    #[must_use]
    pub const fn id(self) -> u64 {
        match self {
            Self::Guild(id) | Self::Member(id) => id,
        }
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Guild(id) => write!(f, "guild {id}"),
            Self::Member(id) => write!(f, "member {id}"),
        }
    }
}

/// Voice session state for one scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    /// Whether a session is ongoing
    pub currently_running: bool,
    /// Start of the ongoing session, stale while idle
    pub last_started: DateTime<Utc>,
    /// Longest completed session
    pub longest_session: Duration,
    /// Number of completed sessions
    pub total_sessions: u64,
    /// Running mean of completed sessions, in seconds
    pub average_duration_raw: f64,
}

impl SessionState {
    /// Mark a session as started at `now`.
    ///
    /// Returns `false` without touching the state if a session is already
    /// running, so the original start time is kept.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.currently_running {
            return false;
        }
        self.currently_running = true;
        self.last_started = now;
        true
    }

    /// Close the running session at `now` and fold it into the aggregates.
    ///
    /// Returns the elapsed time, or `None` if no session was running.
    pub fn end(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.currently_running {
            return None;
        }
        // Clock skew can put `now` before the start; count that as zero.
        let elapsed = (now - self.last_started)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.record(elapsed);
        self.currently_running = false;
        Some(elapsed)
    }

    /// Fold one completed session into longest, average and count
    pub fn record(&mut self, elapsed: Duration) {
        let count = self.total_sessions as f64;
        self.average_duration_raw =
            self.average_duration_raw.mul_add(count, elapsed.as_secs_f64()) / (count + 1.0);
        self.longest_session = self.longest_session.max(elapsed);
        self.total_sessions += 1;
    }

    /// Average session length
    #[must_use]
    pub fn average_duration(&self) -> Duration {
        if self.average_duration_raw.is_finite() && self.average_duration_raw > 0.0 {
            Duration::from_secs_f64(self.average_duration_raw)
        } else {
            Duration::ZERO
        }
    }

    /// Length of the ongoing session, if any
    #[must_use]
    pub fn current_length(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.currently_running
            .then(|| (now - self.last_started).to_std().unwrap_or(Duration::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_default_state_is_idle_and_zeroed() {
        let state = SessionState::default();
        assert!(!state.currently_running);
        assert_eq!(state.total_sessions, 0);
        assert_eq!(state.longest_session, Duration::ZERO);
        assert_eq!(state.average_duration(), Duration::ZERO);
    }

    #[test]
    fn test_start_then_end() {
        let mut state = SessionState::default();
        assert!(state.start(at(0)));
        assert_eq!(state.end(at(120)), Some(Duration::from_secs(120)));

        assert!(!state.currently_running);
        assert_eq!(state.total_sessions, 1);
        assert_eq!(state.longest_session, Duration::from_secs(120));
        assert_eq!(state.average_duration(), Duration::from_secs(120));
    }

    #[test]
    fn test_second_start_keeps_original_start_time() {
        let mut state = SessionState::default();
        assert!(state.start(at(0)));
        assert!(!state.start(at(50)));
        assert_eq!(state.last_started, at(0));
        assert_eq!(state.end(at(100)), Some(Duration::from_secs(100)));
    }

    #[test]
    fn test_end_without_start_is_noop() {
        let mut state = SessionState::default();
        state.start(at(0));
        state.end(at(30));
        let before = state.clone();

        assert_eq!(state.end(at(90)), None);
        assert_eq!(state, before);
    }

    #[test]
    fn test_aggregates_over_many_sessions() {
        let mut state = SessionState::default();
        let lengths = [30_i64, 300, 45, 120];
        let mut t = 0;
        for len in lengths {
            state.start(at(t));
            t += len;
            state.end(at(t));
            t += 10;
        }

        assert_eq!(state.total_sessions, 4);
        assert_eq!(state.longest_session, Duration::from_secs(300));
        let expected = lengths.iter().sum::<i64>() as f64 / 4.0;
        assert!((state.average_duration_raw - expected).abs() < 1e-9);
    }

    #[test]
    fn test_end_before_start_counts_as_zero() {
        let mut state = SessionState::default();
        state.start(at(100));
        assert_eq!(state.end(at(40)), Some(Duration::ZERO));
        assert_eq!(state.total_sessions, 1);
    }

    #[test]
    fn test_current_length() {
        let mut state = SessionState::default();
        assert_eq!(state.current_length(at(10)), None);
        state.start(at(10));
        assert_eq!(state.current_length(at(70)), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_serialization_keeps_fields() {
        let mut state = SessionState::default();
        state.start(at(0));
        state.end(at(61));

        let json = serde_json::to_string(&state).expect("Failed to serialize");
        assert!(json.contains("\"total_sessions\":1"));

        let back: SessionState = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(back, state);

        // Rows written before a field existed still load
        let partial: SessionState =
            serde_json::from_str(r#"{"total_sessions":3}"#).expect("Failed to deserialize");
        assert_eq!(partial.total_sessions, 3);
        assert!(!partial.currently_running);
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(Scope::Guild(5).to_string(), "guild 5");
        assert_eq!(Scope::Member(7).to_string(), "member 7");
        assert_eq!(Scope::Member(7).id(), 7);
    }
}
