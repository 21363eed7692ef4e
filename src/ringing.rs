//! Ringing a member into a voice call
//!
//! A ring posts a mention in a text channel every few seconds until the target
//! joins voice, the attempts run out, or the caller cancels it.

use crate::{Error, EVENT_TARGET};
use async_trait::async_trait;
use dashmap::DashMap;
use poise::serenity_prelude::{
    self as serenity, Cache, ChannelId, CreateAllowedMentions, CreateMessage, GuildId, Http,
    OnlineStatus, UserId,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// How often and how many extra times to ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingRate {
    /// Repeats after the first ring
    pub times: u32,
    /// Seconds between rings
    pub interval_secs: u64,
}

impl Default for RingRate {
    fn default() -> Self {
        Self {
            times: 3,
            interval_secs: 5,
        }
    }
}

impl RingRate {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Ring rate per presence of the target, read from `ring_rates.yaml`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingRates {
    pub online: RingRate,
    pub idle: RingRate,
    pub do_not_disturb: RingRate,
    /// Offline, invisible, or no presence known
    pub offline: RingRate,
}

impl Default for RingRates {
    fn default() -> Self {
        Self {
            online: RingRate::default(),
            idle: RingRate {
                times: 5,
                interval_secs: 10,
            },
            do_not_disturb: RingRate {
                times: 1,
                interval_secs: 30,
            },
            offline: RingRate {
                times: 1,
                interval_secs: 60,
            },
        }
    }
}

impl RingRates {
    /// Ring rate for a target with the given presence
    #[must_use]
    pub fn for_status(&self, status: OnlineStatus) -> RingRate {
        match status {
            OnlineStatus::Online => self.online,
            OnlineStatus::Idle => self.idle,
            OnlineStatus::DoNotDisturb => self.do_not_disturb,
            _ => self.offline,
        }
    }
}

/// Where a ring is delivered and how its target is observed
#[async_trait]
pub trait RingTarget: Send + Sync {
    /// Whether the target is in a voice channel now
    async fn in_voice(&self) -> bool;

    /// Post one ring
    async fn ring(&self) -> Result<(), Error>;
}

/// How a ring finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingEnd {
    /// Target joined voice after `rings` rings
    Joined { rings: u32 },
    /// All rings were sent
    Exhausted { rings: u32 },
}

/// Ring `target` until it joins voice or `rate` is used up
///
/// # Errors
///
/// Returns the first error from posting a ring; no further rings are sent.
pub async fn ring_loop(target: &dyn RingTarget, rate: RingRate) -> Result<RingEnd, Error> {
    let mut rings = 0;
    while rings <= rate.times {
        if target.in_voice().await {
            return Ok(RingEnd::Joined { rings });
        }
        target.ring().await?;
        rings += 1;
        tokio::time::sleep(rate.interval()).await;
    }
    Ok(RingEnd::Exhausted { rings })
}

/// Ring delivered as a mention in a guild text channel
pub struct ChannelRing {
    pub http: Arc<Http>,
    pub cache: Arc<Cache>,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub target: UserId,
    pub message: String,
}

#[async_trait]
impl RingTarget for ChannelRing {
    async fn in_voice(&self) -> bool {
        self.cache.guild(self.guild_id).is_some_and(|guild| {
            guild
                .voice_states
                .get(&self.target)
                .is_some_and(|state| state.channel_id.is_some())
        })
    }

    async fn ring(&self) -> Result<(), Error> {
        let message = CreateMessage::new()
            .content(&self.message)
            .allowed_mentions(CreateAllowedMentions::new().users([self.target]));
        self.channel_id
            .send_message(self.http.as_ref(), message)
            .await?;
        Ok(())
    }
}

/// Active rings, at most one per caller
#[derive(Debug, Default)]
pub struct RingRegistry {
    active: Arc<DashMap<u64, (u64, AbortHandle)>>,
    generation: AtomicU64,
}

impl RingRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `ring` in the background for `caller`, replacing any ring they
    /// already have going
    pub fn start<F>(&self, caller: u64, ring: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let active = Arc::clone(&self.active);
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            // Wait until the handle is registered so the cleanup below finds it
            if registered_rx.await.is_err() {
                return;
            }
            ring.await;
            active.remove_if(&caller, |_, (current, _)| *current == generation);
        });

        if let Some((_, previous)) = self
            .active
            .insert(caller, (generation, handle.abort_handle()))
        {
            debug!(target: EVENT_TARGET, caller, "Replacing active ring");
            previous.abort();
        }
        let _ = registered_tx.send(());
    }

    /// Stop `caller`'s ring, returning whether one was running
    pub fn cancel(&self, caller: u64) -> bool {
        if let Some((_, (_, handle))) = self.active.remove(&caller) {
            handle.abort();
            true
        } else {
            false
        }
    }

    /// Whether `caller` has a ring running
    #[must_use]
    pub fn is_ringing(&self, caller: u64) -> bool {
        self.active.contains_key(&caller)
    }

    /// Number of rings running
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Log how a ring ended
pub fn log_ring_result(caller: UserId, target: UserId, result: &Result<RingEnd, Error>) {
    match result {
        Ok(RingEnd::Joined { rings }) => info!(
            target: EVENT_TARGET,
            caller = %caller,
            target_user = %target,
            rings,
            event = "ring_answered",
            "Ring answered"
        ),
        Ok(RingEnd::Exhausted { rings }) => info!(
            target: EVENT_TARGET,
            caller = %caller,
            target_user = %target,
            rings,
            event = "ring_unanswered",
            "Ring went unanswered"
        ),
        Err(e) => warn!(
            target: EVENT_TARGET,
            caller = %caller,
            target_user = %target,
            error = %e,
            "Ring stopped after an error"
        ),
    }
}

/// Message posted for each ring
#[must_use]
pub fn ring_message(target: UserId, caller_name: &str, channel: ChannelId) -> String {
    use serenity::Mentionable;
    format!(
        "HELLO, {}! {} WANTS YOU TO JOIN {}!",
        target.mention(),
        caller_name.to_uppercase(),
        channel.mention()
    )
}
