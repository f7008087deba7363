//! Chat-side message transport.

use ::serenity::http::HttpError;
use async_trait::async_trait;
use poise::serenity_prelude::{
    self as serenity, ChannelId, CreateMessage, EditMessage, Http, MessageId, UserId,
};
use std::sync::Arc;
use thiserror::Error;

use super::button_controls;
use super::embedded_messages::{self, PlayerView};

/// Failures sending, editing or deleting chat messages
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Message or channel not found")]
    NotFound,

    #[error("Missing access")]
    Forbidden,

    #[error("Rate limited")]
    RateLimited,

    #[error("Chat transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// The referenced message can no longer be used and should be forgotten.
    pub fn is_stale(&self) -> bool {
        matches!(self, TransportError::NotFound | TransportError::Forbidden)
    }
}

impl From<serenity::Error> for TransportError {
    fn from(err: serenity::Error) -> Self {
        if let serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) = &err {
            return match response.status_code.as_u16() {
                404 => TransportError::NotFound,
                403 => TransportError::Forbidden,
                429 => TransportError::RateLimited,
                _ => TransportError::Other(err.to_string()),
            };
        }
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn send_player(&self, channel_id: ChannelId, view: &PlayerView) -> Result<MessageId, TransportError>;

    async fn edit_player(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        view: &PlayerView,
    ) -> Result<(), TransportError>;

    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId) -> Result<(), TransportError>;

    async fn send_notice(&self, channel_id: ChannelId, text: &str) -> Result<(), TransportError>;

    async fn notify_user(&self, user_id: UserId, text: &str) -> Result<(), TransportError>;
}

/// [`ChatGateway`] over the Discord REST API.
pub struct SerenityChat {
    http: Arc<Http>,
}

impl SerenityChat {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChatGateway for SerenityChat {
    async fn send_player(&self, channel_id: ChannelId, view: &PlayerView) -> Result<MessageId, TransportError> {
        let message = CreateMessage::new()
            .embed(embedded_messages::now_playing(view))
            .components(button_controls::player_controls(&view.state));
        let sent = channel_id.send_message(&self.http, message).await?;
        Ok(sent.id)
    }

    async fn edit_player(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        view: &PlayerView,
    ) -> Result<(), TransportError> {
        let message = EditMessage::new()
            .embed(embedded_messages::now_playing(view))
            .components(button_controls::player_controls(&view.state));
        channel_id.edit_message(&self.http, message_id, message).await?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId) -> Result<(), TransportError> {
        channel_id.delete_message(&self.http, message_id).await?;
        Ok(())
    }

    async fn send_notice(&self, channel_id: ChannelId, text: &str) -> Result<(), TransportError> {
        channel_id
            .send_message(&self.http, CreateMessage::new().content(text))
            .await?;
        Ok(())
    }

    async fn notify_user(&self, user_id: UserId, text: &str) -> Result<(), TransportError> {
        user_id
            .direct_message(&self.http, CreateMessage::new().content(text))
            .await?;
        Ok(())
    }
}
