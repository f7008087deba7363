//! Remote control of the player over redis pub/sub.
//!
//! Requests arrive on [`COMMAND_TOPIC`]. Every shard subscribes, but only the
//! shard that can see the guild answers; the others drop the message without
//! a reply. Each request gets a [`BusResponse`] on its own response topic,
//! and every successful mutation is followed by a full [`PlayerState`] push on
//! the guild's update topic.

use async_trait::async_trait;
use futures::StreamExt;
use poise::serenity_prelude::{GuildId, UserId};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::music_manager::{
    Caller, MusicError, MusicManager, MusicResult, Origin, PlayerState, SeekTarget, TrackSummary,
};

pub const COMMAND_TOPIC: &str = "bot:command";

const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub fn response_topic(request_id: &str) -> String {
    format!("bot:response:{request_id}")
}

pub fn player_update_topic(guild_id: GuildId) -> String {
    format!("bot:player_update:{guild_id}")
}

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BusRequest {
    pub guild_id: String,
    pub request_id: String,
    pub command: String,
    pub user_id: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BusResponse {
    pub fn ok(data: Option<Value>) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Outbound side of the bus.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError>;
}

/// Publishes over a shared multiplexed connection, reconnecting after a failure.
pub struct RedisPublisher {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisPublisher {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            connection: Mutex::new(None),
        }
    }

    async fn connection(&self) -> Result<MultiplexedConnection, BusError> {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.as_ref() {
            return Ok(connection.clone());
        }
        let connection = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(connection.clone());
        Ok(connection)
    }
}

#[async_trait]
impl BusPublisher for RedisPublisher {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        let mut connection = self.connection().await?;
        let published: redis::RedisResult<i64> = connection.publish(topic, payload).await;
        if let Err(e) = published {
            *self.connection.lock().await = None;
            return Err(e.into());
        }
        Ok(())
    }
}

/// A request decoded against the operation table.
#[derive(Debug, Clone, PartialEq)]
pub enum BusCommand {
    GetState,
    Play { query: String },
    Pause,
    Skip,
    Stop,
    Volume(i64),
    Repeat,
    Shuffle,
    Search { query: String },
    Remove(usize),
    Move { from: usize, to: usize },
    Seek(SeekTarget),
}

impl BusCommand {
    pub fn parse(command: &str, params: &Value) -> Result<Self, String> {
        let parsed = match command {
            "get_state" => BusCommand::GetState,
            "play" => BusCommand::Play {
                query: string_param(params, "query")?,
            },
            "pause" => BusCommand::Pause,
            "skip" => BusCommand::Skip,
            "stop" => BusCommand::Stop,
            "volume" => BusCommand::Volume(int_param(params, "volume")?),
            "repeat" => BusCommand::Repeat,
            "shuffle" => BusCommand::Shuffle,
            "search" => BusCommand::Search {
                query: string_param(params, "query")?,
            },
            "remove" => BusCommand::Remove(index_param(params, "index")?),
            "move" => BusCommand::Move {
                from: index_param(params, "from")?,
                to: index_param(params, "to")?,
            },
            "seek" => BusCommand::Seek(seek_param(params)?),
            other => return Err(format!("Unknown command: {other}")),
        };
        Ok(parsed)
    }

    /// Read-only commands don't trigger a state push.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, BusCommand::GetState | BusCommand::Search { .. })
    }
}

fn string_param(params: &Value, key: &str) -> Result<String, String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| format!("Missing parameter: {key}"))
}

fn int_param(params: &Value, key: &str) -> Result<i64, String> {
    match params.get(key) {
        Some(Value::Number(number)) => number
            .as_i64()
            .ok_or_else(|| format!("Invalid parameter: {key}")),
        Some(Value::String(text)) => text
            .trim()
            .parse()
            .map_err(|_| format!("Invalid parameter: {key}")),
        _ => Err(format!("Missing parameter: {key}")),
    }
}

/// 1-based positions; zero and negatives are left for the orchestrator to reject.
fn index_param(params: &Value, key: &str) -> Result<usize, String> {
    let value = int_param(params, key)?;
    Ok(usize::try_from(value).unwrap_or(0))
}

/// `position` is either milliseconds or a time string like `1:30` / `+10`.
fn seek_param(params: &Value) -> Result<SeekTarget, String> {
    match params.get("position") {
        Some(Value::Number(number)) => number
            .as_u64()
            .map(SeekTarget::Absolute)
            .ok_or_else(|| "Invalid parameter: position".to_string()),
        Some(Value::String(text)) => text.parse().map_err(|e: MusicError| e.to_string()),
        _ => Err("Missing parameter: position".to_string()),
    }
}

pub struct CommandBus {
    music: Arc<MusicManager>,
    publisher: Arc<dyn BusPublisher>,
}

impl CommandBus {
    pub fn new(music: Arc<MusicManager>, publisher: Arc<dyn BusPublisher>) -> Self {
        Self { music, publisher }
    }

    /// Handle one raw message from the command topic.
    pub async fn handle_payload(&self, payload: &str) {
        let request: BusRequest = match serde_json::from_str(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("Dropping malformed bus message: {}", e);
                return;
            }
        };

        let Some(guild_id) = request.guild_id.parse::<u64>().ok().filter(|id| *id != 0).map(GuildId::new)
        else {
            warn!("Dropping bus request {} with invalid guild id '{}'", request.request_id, request.guild_id);
            return;
        };
        if !self.music.directory().manages_guild(guild_id) {
            debug!("Guild {} is not on this shard, ignoring request {}", guild_id, request.request_id);
            return;
        }

        let response = match self.dispatch(guild_id, &request).await {
            Ok((response, mutated)) => {
                if mutated {
                    self.push_state(guild_id).await;
                }
                response
            }
            Err(response) => response,
        };
        self.send(&response_topic(&request.request_id), &response).await;
    }

    async fn dispatch(&self, guild_id: GuildId, request: &BusRequest) -> Result<(BusResponse, bool), BusResponse> {
        let command = BusCommand::parse(&request.command, &request.params).map_err(|e| {
            warn!("Rejecting bus request {}: {}", request.request_id, e);
            BusResponse::failed(e)
        })?;
        let user_id = request
            .user_id
            .parse::<u64>()
            .ok()
            .filter(|id| *id != 0)
            .map(UserId::new)
            .ok_or_else(|| BusResponse::failed("Invalid user_id"))?;

        let caller = Caller {
            guild_id,
            user_id,
            user_name: request.user_id.clone(),
            text_channel_id: None,
            origin: Origin::Bus,
        };
        debug!("Bus command {:?} for guild {} from {}", command, guild_id, user_id);

        match self.execute(&caller, &command).await {
            Ok(data) => Ok((BusResponse::ok(data), command.is_mutation())),
            Err(e) => {
                debug!("Bus command {} failed in guild {}: {}", request.command, guild_id, e);
                Err(BusResponse::failed(e.to_string()))
            }
        }
    }

    async fn execute(&self, caller: &Caller, command: &BusCommand) -> MusicResult<Option<Value>> {
        let music = &self.music;
        let data = match command {
            BusCommand::GetState => Some(state_json(&music.get_state(caller.guild_id).await)),
            BusCommand::Play { query } => {
                let outcome = music.play(caller, query).await?;
                let locale = music
                    .locale_for(Some(caller.guild_id), Some(caller.user_id))
                    .await;
                Some(json!({ "message": outcome.localized(locale) }))
            }
            BusCommand::Pause => Some(json!({ "paused": music.pause_resume(caller).await? })),
            BusCommand::Skip => {
                music.skip(caller).await?;
                None
            }
            BusCommand::Stop => {
                music.stop(caller).await?;
                None
            }
            BusCommand::Volume(volume) => Some(json!({ "volume": music.volume(caller, *volume).await? })),
            BusCommand::Repeat => Some(json!({ "loop": music.repeat(caller).await? })),
            BusCommand::Shuffle => Some(json!({ "shuffle": music.shuffle(caller).await? })),
            BusCommand::Search { query } => {
                let tracks: Vec<TrackSummary> = music
                    .search(caller, query)
                    .await?
                    .iter()
                    .map(|track| TrackSummary::new(track, None))
                    .collect();
                Some(json!({ "tracks": tracks }))
            }
            BusCommand::Remove(index) => {
                let removed = music.remove(caller, *index).await?;
                Some(json!({ "removed": removed.title }))
            }
            BusCommand::Move { from, to } => {
                let moved = music.move_track(caller, *from, *to).await?;
                Some(json!({ "moved": moved.title, "to": to }))
            }
            BusCommand::Seek(target) => Some(json!({ "position": music.seek(caller, *target).await? })),
        };
        Ok(data)
    }

    async fn push_state(&self, guild_id: GuildId) {
        let state = self.music.get_state(guild_id).await;
        self.send(&player_update_topic(guild_id), &state).await;
    }

    async fn send<T: Serialize>(&self, topic: &str, body: &T) {
        let payload = match serde_json::to_string(body) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode bus payload for {}: {}", topic, e);
                return;
            }
        };
        if let Err(e) = self.publisher.publish(topic, payload).await {
            warn!("Failed to publish to {}: {}", topic, e);
        }
    }

    /// Subscribe and serve requests until the process exits.
    pub async fn run(self: Arc<Self>, client: redis::Client) {
        let mut backoff = Duration::from_secs(1);
        loop {
            match self.listen(&client, &mut backoff).await {
                Ok(()) => warn!("Command bus subscription closed, resubscribing"),
                Err(e) => error!("Command bus connection failed: {}", e),
            }
            sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn listen(self: &Arc<Self>, client: &redis::Client, backoff: &mut Duration) -> Result<(), BusError> {
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(COMMAND_TOPIC).await?;
        info!("Listening for bus commands on {}", COMMAND_TOPIC);
        *backoff = Duration::from_secs(1);

        let mut messages = pubsub.on_message();
        while let Some(message) = messages.next().await {
            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Dropping unreadable bus message: {}", e);
                    continue;
                }
            };

            let bus = Arc::clone(self);
            let task = tokio::spawn(async move { bus.handle_payload(&payload).await });
            tokio::spawn(async move {
                if let Err(e) = task.await {
                    error!("Bus command handler panicked: {}", e);
                }
            });
        }
        Ok(())
    }
}

fn state_json(state: &PlayerState) -> Value {
    serde_json::to_value(state).unwrap_or(Value::Null)
}
