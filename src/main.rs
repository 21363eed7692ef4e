use std::sync::Arc;

use callstats::sessions::{SessionService, SqliteStore};
use callstats::{Config, Data, Error, commands, handlers, logging};
use poise::serenity_prelude::{self as serenity};
use serenity::GatewayIntents;
use tracing::{error, info};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    logging::init()?;

    let config = Config::from_env()?;

    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let store = SqliteStore::open(&config.database_path)?;
    let sessions = SessionService::new(Arc::new(store));
    let data = Data::load(sessions, config.data_dir.clone()).await;

    let framework_data = data.clone();
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console(format!(
                    "Registering {} commands globally",
                    framework.options().commands.len()
                ));
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(framework_data)
            })
        })
        .build();

    // Voice states and presences need the privileged member intents
    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_PRESENCES
        | GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::ClientBuilder::new(&config.discord_token, intents)
        .event_handler(handlers::Handler)
        .framework(framework)
        .await?;

    // The event handler reads the same data through serenity's type map
    client.data.write().await.insert::<Data>(data.clone());

    info!("Starting {}...", callstats::BOT_NAME);
    let result = client.start().await;

    // Keep settings changed since the last command
    if let Err(e) = data.save().await {
        error!("Failed to save data on shutdown: {e}");
    }
    result?;

    Ok(())
}

fn main() {
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::from)
        .and_then(|runtime| runtime.block_on(async_main()));

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
