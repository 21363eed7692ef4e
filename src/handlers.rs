use crate::sessions::{VoiceRoster, VoiceUpdate};
use crate::{Data, ERROR_TARGET, EVENT_TARGET};
use poise::serenity_prelude::{
    self as serenity, ChannelId, Context, EventHandler, Guild, GuildId, Ready, VoiceState,
};
use tracing::{debug, error, info, warn};

/// Snapshot of the humans in each voice channel of `guild`
#[must_use]
pub fn roster_from_guild(guild: &Guild) -> VoiceRoster {
    VoiceRoster::from_occupants(guild.voice_states.values().filter_map(|state| {
        let channel_id = state.channel_id?.get();
        let automated = is_automated(
            state.member.as_ref().map(|member| member.user.bot),
            guild.members.get(&state.user_id).map(|member| member.user.bot),
        );
        Some((channel_id, automated))
    }))
}

/// Bot flag of a voice occupant, from the member sent with the voice state or
/// else from the guild's member cache. Unknown occupants count as human.
fn is_automated(from_voice_state: Option<bool>, from_member_cache: Option<bool>) -> bool {
    from_voice_state.or(from_member_cache).unwrap_or(false)
}

pub struct Handler;

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!("Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!("Cache ready! The bot is in {guild_count} guild(s)");
    }

    /// Called after the cache has applied a voice state change.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let update = VoiceUpdate {
            guild_id: guild_id.get(),
            user_id: new.user_id.get(),
            previous_channel: old.and_then(|state| state.channel_id).map(ChannelId::get),
            current_channel: new.channel_id.map(ChannelId::get),
        };

        let Some(data) = ctx.data.read().await.get::<Data>().cloned() else {
            warn!(target: EVENT_TARGET, "Bot data missing from client data, dropping voice event");
            return;
        };
        if !data.collects_voice_data(guild_id) {
            debug!(target: EVENT_TARGET, guild_id = %guild_id, "Voice tracking disabled");
            return;
        }

        let Some(roster) = ctx.cache.guild(guild_id).map(|guild| roster_from_guild(&guild)) else {
            warn!(target: EVENT_TARGET, guild_id = %guild_id, "Guild not cached, dropping voice event");
            return;
        };

        match data
            .sessions
            .handle_voice_update(&update, &roster, chrono::Utc::now())
            .await
        {
            Ok(outcome) => debug!(
                target: EVENT_TARGET,
                guild_id = %guild_id,
                user_id = %new.user_id,
                ?outcome,
                "Voice state handled"
            ),
            Err(e) => error!(
                target: ERROR_TARGET,
                guild_id = %guild_id,
                user_id = %new.user_id,
                error = %e,
                "Failed to record voice session"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // This test verifies at compile time that Handler implements EventHandler
    #[test]
    fn test_handler_implements_event_handler() {
        fn assert_impl<T: EventHandler>() {}
        assert_impl::<Handler>();
    }

    #[test]
    fn test_is_automated_prefers_voice_state_member() {
        assert!(is_automated(Some(true), Some(false)));
        assert!(!is_automated(Some(false), Some(true)));
    }

    #[test]
    fn test_is_automated_falls_back_to_member_cache() {
        assert!(is_automated(None, Some(true)));
        assert!(!is_automated(None, Some(false)));
        assert!(!is_automated(None, None));
    }
}
