use crate::{COMMAND_TARGET, CONSOLE_TARGET, Data, ERROR_TARGET, Error, SESSION_TARGET};
use dashmap::DashMap;
use poise::{Context, FrameworkError};
use std::path::Path;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::filter_fn,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log directory name
pub const LOG_DIR: &str = "logs";
/// Command log file name
pub const COMMAND_LOG_FILE: &str = "commands";
/// Session start/end log file name
pub const SESSION_LOG_FILE: &str = "sessions";

/// Initialize the logging system with console and file outputs
pub fn init() -> Result<(), Error> {
    // Create log directory if it doesn't exist
    if !Path::new(LOG_DIR).exists() {
        std::fs::create_dir_all(LOG_DIR)?;
    }

    // Set up file appenders with daily rotation
    let command_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, COMMAND_LOG_FILE);
    let session_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, SESSION_LOG_FILE);

    // Create a layer for console output (human-readable format)
    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    // Create a layer for command logs (JSON format)
    let command_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(command_file);

    // Session transitions only, one JSON object per start/end
    let session_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(session_file)
        .with_filter(filter_fn(|metadata| metadata.target() == SESSION_TARGET));

    // Set up the subscriber with all layers
    // Use env filter to allow runtime configuration of log levels
    // Default to INFO level if not specified, but filter out serenity heartbeat logs
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        // Filter out serenity logs
        Err(_) => EnvFilter::new("info").add_directive("serenity=error".parse()?),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(command_layer)
        .with(session_layer)
        .init();

    info!("Logging system initialized");
    Ok(())
}

/// Guild id as a log field, or `DM` outside a guild
fn guild_label(ctx: Context<'_, Data, Error>) -> String {
    ctx.guild_id()
        .map_or_else(|| "DM".to_string(), |id| id.get().to_string())
}

/// Start times of running commands, keyed by invocation id. Hooks of one
/// invocation may run on different worker threads.
static COMMAND_START_TIMES: LazyLock<DashMap<u64, Instant>> = LazyLock::new(DashMap::new);

fn mark_command_start(invocation_id: u64) {
    COMMAND_START_TIMES.insert(invocation_id, Instant::now());
}

fn take_command_elapsed(invocation_id: u64) -> Option<Duration> {
    COMMAND_START_TIMES
        .remove(&invocation_id)
        .map(|(_, start)| start.elapsed())
}

/// Log the start of a command execution (pre-command hook)
pub fn log_command_start(ctx: Context<'_, Data, Error>) {
    mark_command_start(ctx.id());

    let command_name = ctx.command().qualified_name.clone();
    let guild_id = guild_label(ctx);
    let user_id = ctx.author().id.get().to_string();

    let args = if ctx.command().parameters.is_empty() {
        String::new()
    } else {
        ctx.invocation_string()
    };

    info!(
        target: COMMAND_TARGET,
        command = %command_name,
        guild_id = %guild_id,
        user_id = %user_id,
        arguments = %args,
        event = "start",
        "Command execution started"
    );
}

/// Log the end of a command execution (post-command hook)
pub fn log_command_end(ctx: Context<'_, Data, Error>) {
    let duration = take_command_elapsed(ctx.id());

    let command_name = ctx.command().qualified_name.clone();
    let guild_id = guild_label(ctx);
    let user_id = ctx.author().id.get().to_string();

    let duration_ms = u64::try_from(duration.map_or(0, |d| d.as_millis())).unwrap_or_default();
    info!(
        target: COMMAND_TARGET,
        command = %command_name,
        guild_id = %guild_id,
        user_id = %user_id,
        duration_ms = duration_ms,
        event = "end",
        "Command execution completed"
    );
}

/// Log errors that occur during command execution
pub fn log_command_error(error: &FrameworkError<'_, Data, Error>) {
    match error {
        FrameworkError::Command { error, ctx, .. } => {
            // post_command does not run for failed commands
            take_command_elapsed(ctx.id());
            let command_name = ctx.command().qualified_name.clone();
            let guild_id = guild_label(*ctx);
            let user_id = ctx.author().id.get().to_string();

            error!(
                target: ERROR_TARGET,
                command = %command_name,
                guild_id = %guild_id,
                user_id = %user_id,
                error = %error,
                "Command error"
            );
        }
        FrameworkError::CommandCheckFailed { error, ctx, .. } => {
            let command_name = ctx.command().qualified_name.clone();
            let guild_id = guild_label(*ctx);
            let user_id = ctx.author().id.get().to_string();

            let error_msg = error
                .as_ref()
                .map_or_else(|| "Check failed".to_string(), ToString::to_string);

            error!(
                target: ERROR_TARGET,
                command = %command_name,
                guild_id = %guild_id,
                user_id = %user_id,
                error = %error_msg,
                "Command check failed"
            );
        }
        err => {
            error!(
                target: ERROR_TARGET,
                error_type = %std::any::type_name::<FrameworkError<'_, Data, Error>>(),
                error = ?err,
                "Other framework error"
            );
        }
    }
}

/// Log a plain message to the console target
pub fn log_console(message: String) {
    info!(
        target: CONSOLE_TARGET,
        message = %message,
        event = "console",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_files_are_distinct() {
        assert_ne!(COMMAND_LOG_FILE, SESSION_LOG_FILE);
    }

    #[test]
    fn test_command_timing_is_per_invocation() {
        mark_command_start(1);
        mark_command_start(2);

        assert!(take_command_elapsed(2).is_some());
        assert!(take_command_elapsed(2).is_none());
        assert!(take_command_elapsed(1).is_some());
        assert!(take_command_elapsed(3).is_none());
    }

    #[test]
    fn test_default_directive_parses() {
        let directive: Result<tracing_subscriber::filter::Directive, _> = "serenity=error".parse();
        assert!(directive.is_ok());
    }
}
