use ::serenity::all::ClientBuilder;
use dotenv::dotenv;
use poise::serenity_prelude as serenity;
use songbird::{SerenityInit, Songbird};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ensemble::commands::music::utils::{
    audio_session::SongbirdVoice,
    chat::SerenityChat,
    eligibility::CacheDirectory,
    event_handlers,
    lavalink::LavalinkNode,
    music_manager::{MusicManager, MusicServices},
};
use ensemble::config::Config;
use ensemble::utils::{database::SqliteStore, settings::SettingsStore, statistics::StatsBuffer};
use ensemble::{Data, Error};

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize logging with debug level for our crate
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ensemble=debug,warn")),
        )
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_target(true)
        .with_ansi(true)
        .pretty()
        .init();

    dotenv().ok();

    let config = Config::from_env()?;

    // Initialize the SQLite database
    let store = Arc::new(SqliteStore::open(&config.database_path)?);
    let settings = Arc::new(SettingsStore::new(store.clone(), config.settings_ttl));
    let stats = Arc::new(StatsBuffer::new(store, config.stats));

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_VOICE_STATES;

    let songbird = Songbird::serenity();
    let music_slot: Arc<OnceLock<Arc<MusicManager>>> = Arc::new(OnceLock::new());

    let framework = {
        let songbird = songbird.clone();
        let music_slot = music_slot.clone();
        let config = config.clone();

        poise::Framework::builder()
            .options(poise::FrameworkOptions {
                commands: ensemble::all_commands(),
                prefix_options: poise::PrefixFrameworkOptions {
                    prefix: Some("!".into()),
                    ..Default::default()
                },
                event_handler: |ctx, event, _framework, data| {
                    Box::pin(event_handlers::handle_event(ctx, event, data))
                },
                ..Default::default()
            })
            .setup(move |ctx, ready, framework| {
                Box::pin(async move {
                    let node = Arc::new(LavalinkNode::new(
                        config.lavalink.rest_url()?,
                        config.lavalink.password.clone(),
                        ready.user.id,
                    ));
                    let (events_tx, events_rx) = mpsc::unbounded_channel();
                    node.spawn_event_socket(events_tx);

                    let music = Arc::new(MusicManager::new(
                        MusicServices {
                            node,
                            voice: Arc::new(SongbirdVoice::new(songbird)),
                            chat: Arc::new(SerenityChat::new(ctx.http.clone())),
                            directory: Arc::new(CacheDirectory::new(ctx.cache.clone())),
                            settings,
                            stats,
                        },
                        config.limits.clone(),
                    ));
                    event_handlers::spawn_node_event_pump(music.clone(), events_rx);
                    let _ = music_slot.set(music.clone());

                    #[cfg(feature = "command_bus")]
                    if let Some(redis_url) = &config.redis_url {
                        use ensemble::commands::music::utils::command_bus::{CommandBus, RedisPublisher};

                        let client = redis::Client::open(redis_url.as_str())?;
                        let bus = Arc::new(CommandBus::new(
                            music.clone(),
                            Arc::new(RedisPublisher::new(client.clone())),
                        ));
                        tokio::spawn(bus.run(client));
                    }

                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                    info!("Logged in as {}", ready.user.name);
                    Ok(Data { music })
                })
            })
    };

    let mut client = ClientBuilder::new(&config.discord_token, intents)
        .framework(framework.build())
        .register_songbird_with(songbird)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        info!("Shutting down");
        if let Some(music) = music_slot.get() {
            music.shutdown().await;
        }
        shard_manager.shutdown_all().await;
    });

    match config.shards {
        Some(shards) => client.start_shard(shards.id, shards.count).await?,
        None => client.start().await?,
    }
    Ok(())
}
