use poise::serenity_prelude::{self as serenity, FullEvent, Interaction, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::component_handlers;
use super::lavalink::NodeEvent;
use super::music_manager::{Caller, MusicManager, Origin};
use crate::{Data, Error};

/// How long the bot's answer stays in a request channel.
const REQUEST_REPLY_LIFETIME: Duration = Duration::from_secs(10);

/// Feed audio node events to the orchestrator one at a time, in arrival order.
///
/// Each event runs on its own task so a panicking handler is logged and the
/// pump keeps going.
pub fn spawn_node_event_pump(music: Arc<MusicManager>, mut events: UnboundedReceiver<NodeEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let manager = Arc::clone(&music);
            let task = tokio::spawn(async move { manager.handle_node_event(event).await });
            if let Err(e) = task.await {
                error!("Audio node event handler panicked: {}", e);
            }
        }
        info!("Audio node event stream ended");
    })
}

/// Gateway events the music side cares about.
pub async fn handle_event(ctx: &serenity::Context, event: &FullEvent, data: &Data) -> Result<(), Error> {
    match event {
        FullEvent::InteractionCreate {
            interaction: Interaction::Component(component),
        } => {
            if let Err(e) = component_handlers::handle_interaction(ctx, &data.music, component).await {
                error!("Error handling component interaction: {}", e);
            }
        }
        FullEvent::VoiceStateUpdate { new, .. } => {
            if let Some(guild_id) = new.guild_id {
                data.music
                    .on_voice_state_update(guild_id, new.user_id, new.channel_id)
                    .await;
            }
        }
        FullEvent::Message { new_message } => handle_request_message(ctx, &data.music, new_message).await,
        _ => {}
    }
    Ok(())
}

/// Treat a plain message in the guild's request channel as a `play` query.
/// The request is deleted and the answer removes itself after a short delay.
async fn handle_request_message(ctx: &serenity::Context, music: &MusicManager, message: &Message) {
    if message.author.bot || message.content.trim().is_empty() {
        return;
    }
    let Some(guild_id) = message.guild_id else {
        return;
    };

    let settings = music.settings().get_guild_settings(guild_id).await;
    if !settings.auto_delete || settings.auto_delete_channel != Some(message.channel_id) {
        return;
    }

    let caller = Caller {
        guild_id,
        user_id: message.author.id,
        user_name: message.author.name.clone(),
        text_channel_id: Some(message.channel_id),
        origin: Origin::Message,
    };
    debug!("Request channel query in guild {}: {}", guild_id, message.content);

    let locale = music.locale_for(Some(guild_id), Some(caller.user_id)).await;
    let answer = match music.play(&caller, message.content.trim()).await {
        Ok(outcome) => outcome.localized(locale),
        Err(e) => e.localized(locale),
    };

    if let Err(e) = message.channel_id.delete_message(&ctx.http, message.id).await {
        debug!("Could not delete request message in guild {}: {}", guild_id, e);
    }

    match message.channel_id.say(&ctx.http, answer).await {
        Ok(reply) => {
            let http = Arc::clone(&ctx.http);
            tokio::spawn(async move {
                sleep(REQUEST_REPLY_LIFETIME).await;
                if let Err(e) = reply.channel_id.delete_message(&http, reply.id).await {
                    debug!("Request reply {} already gone: {}", reply.id, e);
                }
            });
        }
        Err(e) => warn!("Failed to answer request in guild {}: {}", guild_id, e),
    }
}
