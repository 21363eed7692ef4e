pub mod commands;
pub mod config;
pub mod data;
pub mod handlers;
pub mod logging;
pub mod report;
pub mod ringing;
pub mod roles;
pub mod sessions;

pub const BOT_NAME: &str = "callstats";
pub const COMMAND_TARGET: &str = "callstats::command";
pub const ERROR_TARGET: &str = "callstats::error";
pub const EVENT_TARGET: &str = "callstats::handlers";
pub const SESSION_TARGET: &str = "callstats::sessions";
pub const CONSOLE_TARGET: &str = "callstats";

pub use config::Config;
pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
