//! Session start/end detection
//!
//! Turns one voice state change into start/end edges for the member and guild
//! scopes. Everything here is pure: the caller supplies a [`VoiceRoster`]
//! snapshot taken after the change was applied.

use std::collections::HashMap;

/// Non-automated occupants per voice channel of one guild
#[derive(Debug, Clone, Default)]
pub struct VoiceRoster {
    humans: HashMap<u64, usize>,
}

impl VoiceRoster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one human occupant in `channel_id`
    pub fn add_occupant(&mut self, channel_id: u64) {
        *self.humans.entry(channel_id).or_default() += 1;
    }

    /// Number of humans currently in `channel_id`
    #[must_use]
    pub fn humans_in(&self, channel_id: u64) -> usize {
        self.humans.get(&channel_id).copied().unwrap_or_default()
    }

    /// Whether any voice channel in the guild has a human in it
    #[must_use]
    pub fn any_occupied(&self) -> bool {
        self.humans.values().any(|&count| count > 0)
    }
}

impl VoiceRoster {
    /// Build a roster from `(channel_id, is_automated)` per voice state,
    /// leaving automated accounts out of the headcount
    #[must_use]
    pub fn from_occupants(occupants: impl IntoIterator<Item = (u64, bool)>) -> Self {
        occupants
            .into_iter()
            .filter(|&(_, automated)| !automated)
            .map(|(channel_id, _)| channel_id)
            .collect()
    }
}

impl FromIterator<u64> for VoiceRoster {
    /// Build a roster from one channel id per human occupant
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut roster = Self::new();
        for channel_id in iter {
            roster.add_occupant(channel_id);
        }
        roster
    }
}

/// What a voice state change means for session tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceTransition {
    /// Not in voice before, in `channel` now
    Joined(u64),
    /// In `channel` before, not in voice now
    Left(u64),
    /// Channel-to-channel move; the session continues
    Moved { from: u64, to: u64 },
    /// Same channel (mute, deafen, stream toggles) or no voice at all
    Unchanged,
}

impl VoiceTransition {
    #[must_use]
    pub fn classify(previous: Option<u64>, current: Option<u64>) -> Self {
        match (previous, current) {
            (None, Some(channel)) => Self::Joined(channel),
            (Some(channel), None) => Self::Left(channel),
            (Some(from), Some(to)) if from != to => Self::Moved { from, to },
            _ => Self::Unchanged,
        }
    }
}

/// Edge of a session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEdge {
    Start,
    End,
}

/// Edges to apply for one voice state change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerDecision {
    pub member: Option<SessionEdge>,
    pub guild: Option<SessionEdge>,
}

impl TrackerDecision {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.member.is_none() && self.guild.is_none()
    }
}

/// Decide which sessions start or end for `transition`.
///
/// `roster` must reflect the guild after the transition. A join asks for a
/// guild start whenever a human is in voice, not only for the first one:
/// two joins handled in parallel can both see the other's join in the
/// roster. Starting an already running session is a no-op, so the original
/// start time survives.
#[must_use]
pub fn decide(transition: VoiceTransition, roster: &VoiceRoster) -> TrackerDecision {
    match transition {
        VoiceTransition::Joined(_) => TrackerDecision {
            member: Some(SessionEdge::Start),
            guild: roster.any_occupied().then_some(SessionEdge::Start),
        },
        VoiceTransition::Left(channel) => {
            let last_in_guild = roster.humans_in(channel) == 0 && !roster.any_occupied();
            TrackerDecision {
                member: Some(SessionEdge::End),
                guild: last_in_guild.then_some(SessionEdge::End),
            }
        }
        VoiceTransition::Moved { .. } | VoiceTransition::Unchanged => TrackerDecision::default(),
    }
}
