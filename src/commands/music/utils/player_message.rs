//! Lifecycle of the single now-playing message per guild.
//!
//! The slot is the only place a message handle is stored. Every create,
//! retire and refresh takes the slot lock for its whole duration, so a
//! retire-then-create sequence can never interleave with another one and at
//! most one message is live at any time.

use poise::serenity_prelude::{ChannelId, MessageId};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::audio_session::AudioSession;
use super::chat::{ChatGateway, TransportError};
use super::embedded_messages::PlayerView;
use crate::utils::locale::Locale;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerMessage {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

#[derive(Default)]
pub struct PlayerMessageSlot {
    live: Mutex<Option<PlayerMessage>>,
}

impl PlayerMessageSlot {
    pub async fn current(&self) -> Option<PlayerMessage> {
        *self.live.lock().await
    }

    /// Retire any live message and post a fresh one rendered from the
    /// session's state at send time.
    pub async fn recreate(
        &self,
        chat: &dyn ChatGateway,
        channel_id: ChannelId,
        session: &AudioSession,
        locale: Locale,
    ) -> Result<PlayerMessage, TransportError> {
        let mut live = self.live.lock().await;
        if let Some(previous) = live.take() {
            delete_quietly(chat, previous).await;
        }

        let view = PlayerView {
            state: session.snapshot().await,
            locale,
        };
        let message_id = chat.send_player(channel_id, &view).await?;
        let message = PlayerMessage {
            channel_id,
            message_id,
        };
        *live = Some(message);
        debug!("Posted now-playing message {} in {}", message_id, channel_id);
        Ok(message)
    }

    /// Edit the live message in place. Does nothing when no message is live.
    pub async fn refresh(&self, chat: &dyn ChatGateway, session: &AudioSession, locale: Locale) {
        let mut live = self.live.lock().await;
        let Some(message) = *live else {
            return;
        };

        let view = PlayerView {
            state: session.snapshot().await,
            locale,
        };
        if let Err(e) = chat
            .edit_player(message.channel_id, message.message_id, &view)
            .await
        {
            if e.is_stale() {
                debug!("Now-playing message {} is gone, forgetting it", message.message_id);
                *live = None;
            } else {
                warn!("Failed to refresh now-playing message {}: {}", message.message_id, e);
            }
        }
    }

    /// Delete the live message, if any.
    pub async fn retire(&self, chat: &dyn ChatGateway) {
        let mut live = self.live.lock().await;
        if let Some(message) = live.take() {
            delete_quietly(chat, message).await;
        }
    }
}

async fn delete_quietly(chat: &dyn ChatGateway, message: PlayerMessage) {
    match chat.delete_message(message.channel_id, message.message_id).await {
        Ok(()) => {}
        Err(e) if e.is_stale() => {
            debug!("Now-playing message {} already gone: {}", message.message_id, e)
        }
        Err(e) => warn!("Failed to delete now-playing message {}: {}", message.message_id, e),
    }
}
