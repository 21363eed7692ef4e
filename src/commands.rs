use crate::handlers::roster_from_guild;
use crate::report::{StatsReport, create_stats_embed};
use crate::ringing::{ChannelRing, log_ring_result, ring_loop, ring_message};
use crate::roles::{ButtonRole, RoleGroup, format_role_menu, plan_toggle, toggle_reply};
use crate::sessions::Scope;
use crate::{Context, Error};
use poise::serenity_prelude::{self as serenity, OnlineStatus};
use poise::{CreateReply, command};

async fn reply_ephemeral(ctx: Context<'_>, content: impl Into<String>) -> Result<(), Error> {
    ctx.send(CreateReply::default().content(content).ephemeral(true))
        .await?;
    Ok(())
}

/// Parse a server id given as a command argument
fn parse_server_id(raw: &str) -> Result<serenity::GuildId, Error> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|&id| id != 0)
        .map(serenity::GuildId::new)
        .ok_or_else(|| format!("`{raw}` is not a server id").into())
}

/// Show how long your average, longest, and current voice sessions are
///
/// Without arguments, shows your own stats and this server's. With a server
/// id, shows that server's stats instead.
#[command(slash_command, prefix_command, guild_only, rename = "voicestats")]
pub async fn voice_stats(
    ctx: Context<'_>,
    #[description = "Member to look up"] member: Option<serenity::Member>,
    #[description = "Server id to look up"] server: Option<String>,
) -> Result<(), Error> {
    let guild_id = match server.as_deref() {
        Some(raw) => parse_server_id(raw)?,
        None => ctx.guild_id().ok_or("This command only works in a server")?,
    };
    let now = chrono::Utc::now();

    let (guild_name, guild_live) = ctx.serenity_context().cache.guild(guild_id).map_or_else(
        || (format!("server {guild_id}"), false),
        |guild| (guild.name.clone(), roster_from_guild(&guild).any_occupied()),
    );

    let include_guild = member.is_none() || server.is_some();
    let members = match (member, server) {
        (Some(member), _) => vec![(member.display_name().to_string(), member.user.id)],
        (None, Some(_)) => Vec::new(),
        (None, None) => vec![(
            ctx.author_member()
                .await
                .map_or_else(|| ctx.author().name.clone(), |m| m.display_name().to_string()),
            ctx.author().id,
        )],
    };

    let sessions = &ctx.data().sessions;
    let mut reports = Vec::with_capacity(2);
    for (name, user_id) in members {
        let state = sessions.state(Scope::Member(user_id.get())).await?;
        let live = state.currently_running;
        reports.push(StatsReport::from_state(name, &state, live, now));
    }
    if include_guild {
        let state = sessions.state(Scope::Guild(guild_id.get())).await?;
        reports.push(StatsReport::from_state(guild_name, &state, guild_live, now));
    }

    ctx.send(CreateReply::default().embed(create_stats_embed(&reports)))
        .await?;
    Ok(())
}

/// Turn voice session tracking on or off for this server
#[command(
    slash_command,
    prefix_command,
    guild_only,
    rename = "voicetracking",
    default_member_permissions = "MANAGE_GUILD",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn voice_tracking(
    ctx: Context<'_>,
    #[description = "Whether to track voice sessions"] enabled: bool,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let data = ctx.data();
    data.set_collect_voice_data(guild_id, enabled);
    data.save().await?;

    let state = if enabled { "enabled" } else { "disabled" };
    ctx.say(format!("Voice tracking is now {state} for this server."))
        .await?;
    Ok(())
}

/// Alert another member that you want someone to talk to
///
/// Requires that you are in a voice channel.
#[command(slash_command, guild_only)]
pub async fn ring(
    ctx: Context<'_>,
    #[description = "Member to ring"] target: serenity::Member,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let target_id = target.user.id;

    let (caller_channel, target_in_voice, status) = {
        let guild = ctx.guild().ok_or("Server is not cached yet")?;
        let caller_channel = guild
            .voice_states
            .get(&ctx.author().id)
            .and_then(|state| state.channel_id);
        let target_in_voice = guild
            .voice_states
            .get(&target_id)
            .is_some_and(|state| state.channel_id.is_some());
        let status = guild
            .presences
            .get(&target_id)
            .map_or(OnlineStatus::Offline, |presence| presence.status);
        (caller_channel, target_in_voice, status)
    };

    let Some(caller_channel) = caller_channel else {
        return reply_ephemeral(ctx, "cannot ring: you are not in a voice channel").await;
    };
    if target_in_voice {
        return reply_ephemeral(ctx, "cannot ring: they are already in voice").await;
    }
    if !ctx.data().is_ringable(target_id) {
        return reply_ephemeral(ctx, "cannot ring: they do not want to be rung").await;
    }

    let serenity_ctx = ctx.serenity_context();
    let caller_id = ctx.author().id;
    let ring = ChannelRing {
        http: serenity_ctx.http.clone(),
        cache: serenity_ctx.cache.clone(),
        guild_id,
        channel_id: ctx.channel_id(),
        target: target_id,
        message: ring_message(target_id, &ctx.author().name, caller_channel),
    };
    let rate = ctx.data().ring_rates.for_status(status);

    ctx.data().rings.start(caller_id.get(), async move {
        let result = ring_loop(&ring, rate).await;
        log_ring_result(caller_id, target_id, &result);
    });

    reply_ephemeral(ctx, "ringing... use /ringcancel to stop").await
}

/// Stop ringing the member you last rang
#[command(slash_command, guild_only, rename = "ringcancel")]
pub async fn ring_cancel(ctx: Context<'_>) -> Result<(), Error> {
    if ctx.data().rings.cancel(ctx.author().id.get()) {
        reply_ephemeral(ctx, "canceled ringing").await
    } else {
        reply_ephemeral(ctx, "you are not ringing anyone").await
    }
}

/// Choose whether other members can ring you
#[command(slash_command, prefix_command)]
pub async fn ringable(
    ctx: Context<'_>,
    #[description = "Whether others may ring you"] enabled: bool,
) -> Result<(), Error> {
    let data = ctx.data();
    data.set_ringable(ctx.author().id, enabled);
    data.save().await?;

    let reply = if enabled {
        "Other members can ring you now."
    } else {
        "Other members can no longer ring you."
    };
    reply_ephemeral(ctx, reply).await
}

/// Take or drop a self-assignable role
///
/// Without a role, lists the roles on offer. Taking a location or color role
/// drops any other role you hold from the same group.
#[command(slash_command, guild_only)]
pub async fn role(
    ctx: Context<'_>,
    #[description = "Role to take or drop"] role: Option<serenity::Role>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let data = ctx.data();

    let Some(role) = role else {
        let menu = format_role_menu(&data.button_roles_in(guild_id, None));
        return reply_ephemeral(ctx, menu).await;
    };
    let Some(record) = data.button_role(guild_id, role.id) else {
        return reply_ephemeral(ctx, format!("{} is not a self-assignable role", role.name)).await;
    };

    let member = ctx
        .author_member()
        .await
        .ok_or("Could not load your server membership")?;
    let held: Vec<u64> = member.roles.iter().map(|id| id.get()).collect();
    let plan = plan_toggle(
        &record,
        &data.button_roles_in(guild_id, Some(record.group)),
        &held,
    );

    if !plan.remove.is_empty() {
        let remove: Vec<serenity::RoleId> =
            plan.remove.iter().copied().map(serenity::RoleId::new).collect();
        member.remove_roles(ctx.http(), &remove).await?;
    }
    if let Some(add) = plan.add {
        member.add_role(ctx.http(), serenity::RoleId::new(add)).await?;
    }

    reply_ephemeral(ctx, toggle_reply(&record, &plan)).await
}

/// Manage the self-assignable roles
#[command(
    slash_command,
    guild_only,
    subcommands("roles_add", "roles_remove", "roles_reload"),
    subcommand_required,
    default_member_permissions = "MANAGE_ROLES"
)]
pub async fn roles(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Offer a role for self-assignment, creating it if needed
#[command(
    slash_command,
    guild_only,
    rename = "add",
    required_permissions = "MANAGE_ROLES"
)]
pub async fn roles_add(
    ctx: Context<'_>,
    #[description = "Group the role belongs to"] group: RoleGroup,
    #[description = "Existing role to offer"] role: Option<serenity::Role>,
    #[description = "Name of a new role to create instead"] name: Option<String>,
    #[description = "Label shown in the role list"] label: Option<String>,
    #[description = "Emoji shown next to the label"] emoji: Option<String>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;

    let role = match (role, name) {
        (Some(role), _) => role,
        (None, Some(name)) => {
            let reason = format!("self-assignable role requested by {}", ctx.author().name);
            let builder = serenity::EditRole::new()
                .name(name)
                .permissions(serenity::Permissions::empty())
                .mentionable(true)
                .audit_log_reason(&reason);
            guild_id.create_role(ctx.serenity_context(), builder).await?
        }
        (None, None) => {
            return reply_ephemeral(ctx, "give either an existing role or a name for a new one")
                .await;
        }
    };

    let record = ButtonRole {
        role_id: role.id.get(),
        guild_id: guild_id.get(),
        group,
        label: label.unwrap_or_else(|| role.name.clone()),
        emoji,
    };
    let data = ctx.data();
    let replaced = data.add_button_role(record);
    data.save().await?;

    let verb = if replaced.is_some() { "moved" } else { "added" };
    reply_ephemeral(ctx, format!("{verb} {} to the {group} roles", role.name)).await
}

/// Stop offering a role for self-assignment
#[command(
    slash_command,
    guild_only,
    rename = "remove",
    required_permissions = "MANAGE_ROLES"
)]
pub async fn roles_remove(
    ctx: Context<'_>,
    #[description = "Role to stop offering"] role: serenity::Role,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let data = ctx.data();
    if data.remove_button_role(guild_id, role.id).is_none() {
        return reply_ephemeral(ctx, format!("{} is not a self-assignable role", role.name)).await;
    }
    data.save().await?;
    reply_ephemeral(ctx, format!("removed {} from the role list", role.name)).await
}

/// Re-read the self-assignable roles from disk
#[command(
    slash_command,
    guild_only,
    rename = "reload",
    required_permissions = "MANAGE_ROLES"
)]
pub async fn roles_reload(ctx: Context<'_>) -> Result<(), Error> {
    let count = ctx.data().reload_button_roles().await;
    reply_ephemeral(ctx, format!("reloaded {count} self-assignable roles")).await
}

/// All commands the bot registers
#[must_use]
pub fn all() -> Vec<poise::Command<crate::Data, Error>> {
    vec![
        voice_stats(),
        voice_tracking(),
        ring(),
        ring_cancel(),
        ringable(),
        role(),
        roles(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_stats_command_definition() {
        let cmd = voice_stats();
        assert_eq!(cmd.name, "voicestats");
        assert!(cmd.guild_only);
        assert!(cmd
            .description
            .as_deref()
            .unwrap_or_default()
            .contains("average, longest, and current voice sessions"));
        assert!(cmd.create_as_slash_command().is_some());
    }

    #[test]
    fn test_voice_tracking_requires_manage_guild() {
        let cmd = voice_tracking();
        assert_eq!(cmd.name, "voicetracking");
        assert!(cmd
            .required_permissions
            .contains(serenity::Permissions::MANAGE_GUILD));
    }

    #[test]
    fn test_ring_commands_are_slash_commands() {
        for cmd in [ring(), ring_cancel()] {
            assert!(cmd.guild_only);
            assert!(cmd.create_as_slash_command().is_some());
        }
        assert_eq!(ring_cancel().name, "ringcancel");
    }

    #[test]
    fn test_parse_server_id() {
        assert_eq!(
            parse_server_id(" 791528974442299412 ").unwrap(),
            serenity::GuildId::new(791_528_974_442_299_412)
        );
        assert!(parse_server_id("0").is_err());
        assert!(parse_server_id("nerds").is_err());
    }

    #[test]
    fn test_voice_stats_accepts_server() {
        let cmd = voice_stats();
        let names: Vec<_> = cmd.parameters.iter().map(|param| param.name.as_str()).collect();
        assert_eq!(names, vec!["member", "server"]);
    }

    #[test]
    fn test_roles_admin_commands() {
        let cmd = roles();
        assert!(cmd
            .default_member_permissions
            .contains(serenity::Permissions::MANAGE_ROLES));
        let mut names: Vec<_> = cmd.subcommands.iter().map(|sub| sub.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["add", "reload", "remove"]);
        for sub in &cmd.subcommands {
            assert!(sub
                .required_permissions
                .contains(serenity::Permissions::MANAGE_ROLES));
        }
        assert!(role().create_as_slash_command().is_some());
    }

    #[test]
    fn test_all_commands_have_unique_names() {
        let commands = all();
        let mut names: Vec<_> = commands.iter().map(|cmd| cmd.name.clone()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), commands.len());
    }
}
