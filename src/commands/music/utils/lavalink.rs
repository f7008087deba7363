//! Client for the audio node (Lavalink v4).
//!
//! Track resolution and player updates go over REST; lifecycle events arrive
//! on a websocket and are forwarded as [`NodeEvent`]s.

use async_trait::async_trait;
use futures::StreamExt;
use poise::serenity_prelude::{GuildId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{
    self, Message, client::IntoClientRequest, http::HeaderValue,
};
use tracing::{debug, error, info, warn};
use url::Url;

use super::audio_session::Track;

const CLIENT_NAME: &str = concat!("ensemble/", env!("CARGO_PKG_VERSION"));
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Errors that can occur while talking to the audio node
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Audio node request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Audio node returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Audio node session is not ready")]
    NotReady,

    #[error("Invalid audio node address: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadType {
    Track,
    Playlist,
    Search,
    Empty,
    Error,
}

/// Outcome of resolving a query on the audio node.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadResult {
    pub load_type: LoadType,
    pub tracks: Vec<Track>,
    pub playlist_name: Option<String>,
    pub error: Option<String>,
}

impl LoadResult {
    pub fn empty() -> Self {
        Self {
            load_type: LoadType::Empty,
            tracks: Vec::new(),
            playlist_name: None,
            error: None,
        }
    }
}

/// Voice server credentials handed to the node after the gateway handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceServerInfo {
    pub token: String,
    pub endpoint: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// `null` stops the current track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackUpdate {
    pub encoded: Option<String>,
}

/// Body of a player PATCH request. Unset fields are left unchanged by the node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlayerUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<TrackUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceServerInfo>,
}

impl PlayerUpdate {
    pub fn play(encoded: &str) -> Self {
        Self {
            track: Some(TrackUpdate {
                encoded: Some(encoded.to_string()),
            }),
            position: Some(0),
            paused: Some(false),
            ..Default::default()
        }
    }

    pub fn stop() -> Self {
        Self {
            track: Some(TrackUpdate { encoded: None }),
            ..Default::default()
        }
    }

    pub fn paused(paused: bool) -> Self {
        Self {
            paused: Some(paused),
            ..Default::default()
        }
    }

    pub fn volume(volume: u16) -> Self {
        Self {
            volume: Some(volume),
            ..Default::default()
        }
    }

    pub fn seek(position_ms: u64) -> Self {
        Self {
            position: Some(position_ms),
            ..Default::default()
        }
    }

    pub fn voice(voice: VoiceServerInfo, volume: u16) -> Self {
        Self {
            voice: Some(voice),
            volume: Some(volume),
            ..Default::default()
        }
    }
}

/// The operations the bot needs from an audio node.
#[async_trait]
pub trait AudioNode: Send + Sync {
    async fn resolve(&self, query: &str) -> Result<LoadResult, NodeError>;

    async fn update_player(&self, guild_id: GuildId, update: PlayerUpdate) -> Result<(), NodeError>;

    async fn destroy_player(&self, guild_id: GuildId) -> Result<(), NodeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// Whether the next queued track should start after this end.
    pub fn may_start_next(self) -> bool {
        matches!(self, TrackEndReason::Finished | TrackEndReason::LoadFailed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Ready {
        session_id: String,
        resumed: bool,
    },
    PlayerUpdate {
        guild_id: GuildId,
        position_ms: u64,
        connected: bool,
    },
    TrackStart {
        guild_id: GuildId,
        encoded: String,
    },
    TrackEnd {
        guild_id: GuildId,
        encoded: String,
        reason: TrackEndReason,
    },
    TrackException {
        guild_id: GuildId,
        encoded: String,
        message: String,
        severity: String,
    },
    TrackStuck {
        guild_id: GuildId,
        threshold_ms: u64,
    },
    WebSocketClosed {
        guild_id: GuildId,
        code: u16,
        reason: String,
        by_remote: bool,
    },
}

// Wire formats

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTrackInfo {
    identifier: String,
    is_seekable: bool,
    author: String,
    length: u64,
    is_stream: bool,
    title: String,
    uri: Option<String>,
    artwork_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireTrack {
    encoded: String,
    info: WireTrackInfo,
}

impl From<WireTrack> for Track {
    fn from(track: WireTrack) -> Self {
        let info = track.info;
        Track {
            encoded: track.encoded,
            identifier: info.identifier,
            title: info.title,
            author: info.author,
            uri: info.uri,
            artwork_url: info.artwork_url,
            duration_ms: info.length,
            is_stream: info.is_stream,
            is_seekable: info.is_seekable,
            requester: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WirePlaylistInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WirePlaylist {
    info: WirePlaylistInfo,
    tracks: Vec<WireTrack>,
}

#[derive(Debug, Deserialize)]
struct WireException {
    message: Option<String>,
    severity: String,
    cause: Option<String>,
}

impl WireException {
    fn describe(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.cause.clone())
            .unwrap_or_else(|| format!("{} failure", self.severity))
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
enum WireLoadResult {
    Track(WireTrack),
    Playlist(WirePlaylist),
    Search(Vec<WireTrack>),
    Empty(serde::de::IgnoredAny),
    Error(WireException),
}

impl From<WireLoadResult> for LoadResult {
    fn from(result: WireLoadResult) -> Self {
        match result {
            WireLoadResult::Track(track) => LoadResult {
                load_type: LoadType::Track,
                tracks: vec![track.into()],
                playlist_name: None,
                error: None,
            },
            WireLoadResult::Playlist(playlist) => LoadResult {
                load_type: LoadType::Playlist,
                tracks: playlist.tracks.into_iter().map(Track::from).collect(),
                playlist_name: Some(playlist.info.name),
                error: None,
            },
            WireLoadResult::Search(tracks) => LoadResult {
                load_type: LoadType::Search,
                tracks: tracks.into_iter().map(Track::from).collect(),
                playlist_name: None,
                error: None,
            },
            WireLoadResult::Empty(_) => LoadResult::empty(),
            WireLoadResult::Error(exception) => LoadResult {
                load_type: LoadType::Error,
                tracks: Vec::new(),
                playlist_name: None,
                error: Some(exception.describe()),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePlayerState {
    #[serde(default)]
    position: u64,
    #[serde(default)]
    connected: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
enum WireEvent {
    TrackStartEvent {
        guild_id: String,
        track: WireTrack,
    },
    TrackEndEvent {
        guild_id: String,
        track: WireTrack,
        reason: TrackEndReason,
    },
    TrackExceptionEvent {
        guild_id: String,
        track: WireTrack,
        exception: WireException,
    },
    TrackStuckEvent {
        guild_id: String,
        threshold_ms: u64,
    },
    WebSocketClosedEvent {
        guild_id: String,
        code: u16,
        reason: String,
        by_remote: bool,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum WireMessage {
    Ready { session_id: String, resumed: bool },
    PlayerUpdate { guild_id: String, state: WirePlayerState },
    Stats {},
    Event(WireEvent),
}

fn parse_guild(raw: &str) -> Option<GuildId> {
    raw.parse::<u64>().ok().filter(|id| *id != 0).map(GuildId::new)
}

/// Decode one websocket frame. Frames the bot has no use for decode to `None`.
pub fn decode_message(text: &str) -> Result<Option<NodeEvent>, serde_json::Error> {
    let message: WireMessage = serde_json::from_str(text)?;
    let event = match message {
        WireMessage::Ready {
            session_id,
            resumed,
        } => Some(NodeEvent::Ready {
            session_id,
            resumed,
        }),
        WireMessage::PlayerUpdate { guild_id, state } => {
            parse_guild(&guild_id).map(|guild_id| NodeEvent::PlayerUpdate {
                guild_id,
                position_ms: state.position,
                connected: state.connected,
            })
        }
        WireMessage::Stats {} => None,
        WireMessage::Event(event) => match event {
            WireEvent::TrackStartEvent { guild_id, track } => {
                parse_guild(&guild_id).map(|guild_id| NodeEvent::TrackStart {
                    guild_id,
                    encoded: track.encoded,
                })
            }
            WireEvent::TrackEndEvent {
                guild_id,
                track,
                reason,
            } => parse_guild(&guild_id).map(|guild_id| NodeEvent::TrackEnd {
                guild_id,
                encoded: track.encoded,
                reason,
            }),
            WireEvent::TrackExceptionEvent {
                guild_id,
                track,
                exception,
            } => parse_guild(&guild_id).map(|guild_id| NodeEvent::TrackException {
                guild_id,
                encoded: track.encoded,
                message: exception.describe(),
                severity: exception.severity,
            }),
            WireEvent::TrackStuckEvent {
                guild_id,
                threshold_ms,
            } => parse_guild(&guild_id).map(|guild_id| NodeEvent::TrackStuck {
                guild_id,
                threshold_ms,
            }),
            WireEvent::WebSocketClosedEvent {
                guild_id,
                code,
                reason,
                by_remote,
            } => parse_guild(&guild_id).map(|guild_id| NodeEvent::WebSocketClosed {
                guild_id,
                code,
                reason,
                by_remote,
            }),
        },
    };
    Ok(event)
}

/// A single Lavalink node.
pub struct LavalinkNode {
    http: reqwest::Client,
    rest_base: Url,
    password: String,
    user_id: UserId,
    session_id: RwLock<Option<String>>,
}

impl LavalinkNode {
    pub fn new(rest_base: Url, password: impl Into<String>, user_id: UserId) -> Self {
        Self {
            http: reqwest::Client::new(),
            rest_base,
            password: password.into(),
            user_id,
            session_id: RwLock::new(None),
        }
    }

    pub fn set_session_id(&self, session_id: Option<String>) {
        if let Ok(mut current) = self.session_id.write() {
            *current = session_id;
        }
    }

    fn session_id(&self) -> Result<String, NodeError> {
        self.session_id
            .read()
            .ok()
            .and_then(|id| id.clone())
            .ok_or(NodeError::NotReady)
    }

    fn player_url(&self, guild_id: GuildId) -> Result<Url, NodeError> {
        let session_id = self.session_id()?;
        Ok(self
            .rest_base
            .join(&format!("/v4/sessions/{session_id}/players/{guild_id}"))?)
    }

    fn websocket_url(&self) -> Result<Url, NodeError> {
        let mut url = self.rest_base.join("/v4/websocket")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) -> ws(s) is always a valid scheme change
        let _ = url.set_scheme(scheme);
        Ok(url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, NodeError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(NodeError::Status {
            status: status.as_u16(),
            message,
        })
    }

    /// Keep a websocket to the node open, reconnecting with backoff, and
    /// forward decoded events until the receiver is dropped.
    pub fn spawn_event_socket(self: &Arc<Self>, events: mpsc::UnboundedSender<NodeEvent>) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let mut failures: u32 = 0;
            loop {
                match node.run_socket(&events).await {
                    Ok(()) => {
                        warn!("Audio node websocket closed, reconnecting");
                        failures = 0;
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        error!("Audio node websocket failed (attempt {}): {}", failures, e);
                    }
                }
                node.set_session_id(None);

                if events.is_closed() {
                    info!("Audio node event receiver dropped, stopping websocket task");
                    break;
                }

                let delay = Duration::from_secs(1u64 << failures.min(5)).min(MAX_RECONNECT_DELAY);
                tokio::time::sleep(delay).await;
            }
        })
    }

    async fn run_socket(&self, events: &mpsc::UnboundedSender<NodeEvent>) -> Result<(), tungstenite::Error> {
        let url = self
            .websocket_url()
            .map_err(|e| tungstenite::Error::Url(tungstenite::error::UrlError::UnableToConnect(e.to_string())))?;
        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&self.password).map_err(tungstenite::http::Error::from)?,
        );
        headers.insert("User-Id", HeaderValue::from(self.user_id.get()));
        headers.insert("Client-Name", HeaderValue::from_static(CLIENT_NAME));

        let (mut socket, _) = tokio_tungstenite::connect_async(request).await?;
        info!("Connected to audio node websocket at {}", url);

        while let Some(message) = socket.next().await {
            match message? {
                Message::Text(text) => match decode_message(&text) {
                    Ok(Some(event)) => {
                        if let NodeEvent::Ready { session_id, resumed } = &event {
                            info!("Audio node session {} ready (resumed: {})", session_id, resumed);
                            self.set_session_id(Some(session_id.clone()));
                        }
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Ignoring undecodable audio node frame: {}", e),
                },
                Message::Close(frame) => {
                    info!("Audio node closed the websocket: {:?}", frame);
                    break;
                }
                _ => {}
            }
        }

        Ok(())
    }
}

#[async_trait]
impl AudioNode for LavalinkNode {
    async fn resolve(&self, query: &str) -> Result<LoadResult, NodeError> {
        let url = self.rest_base.join("/v4/loadtracks")?;
        let response = self
            .http
            .get(url)
            .query(&[("identifier", query)])
            .header("Authorization", &self.password)
            .send()
            .await?;
        let result: WireLoadResult = Self::check(response).await?.json().await?;
        Ok(result.into())
    }

    async fn update_player(&self, guild_id: GuildId, update: PlayerUpdate) -> Result<(), NodeError> {
        let url = self.player_url(guild_id)?;
        debug!("Updating player for guild {}: {:?}", guild_id, update);
        let response = self
            .http
            .patch(url)
            .query(&[("noReplace", "false")])
            .header("Authorization", &self.password)
            .json(&update)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn destroy_player(&self, guild_id: GuildId) -> Result<(), NodeError> {
        let url = self.player_url(guild_id)?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", &self.password)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    const TRACK: &str = r#"{
        "encoded": "QAAA",
        "info": {
            "identifier": "dQw4w9WgXcQ",
            "isSeekable": true,
            "author": "Rick Astley",
            "length": 212000,
            "isStream": false,
            "position": 0,
            "title": "Never Gonna Give You Up",
            "uri": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "artworkUrl": null,
            "isrc": null,
            "sourceName": "youtube"
        },
        "pluginInfo": {},
        "userData": {}
    }"#;

    #[test]
    fn decodes_track_start() {
        let frame = format!(
            r#"{{"op":"event","type":"TrackStartEvent","guildId":"42","track":{TRACK}}}"#
        );
        assert_eq!(
            decode_message(&frame).unwrap(),
            Some(NodeEvent::TrackStart {
                guild_id: GuildId::new(42),
                encoded: "QAAA".into(),
            })
        );
    }

    #[test]
    fn decodes_track_end_reason() {
        let frame = format!(
            r#"{{"op":"event","type":"TrackEndEvent","guildId":"42","track":{TRACK},"reason":"loadFailed"}}"#
        );
        assert_matches!(
            decode_message(&frame).unwrap(),
            Some(NodeEvent::TrackEnd { reason: TrackEndReason::LoadFailed, .. })
        );
        assert!(TrackEndReason::LoadFailed.may_start_next());
        assert!(!TrackEndReason::Replaced.may_start_next());
    }

    #[test]
    fn decodes_exception_message() {
        let frame = format!(
            r#"{{"op":"event","type":"TrackExceptionEvent","guildId":"42","track":{TRACK},
                "exception":{{"message":"This video is unavailable","severity":"common","cause":"x"}}}}"#
        );
        assert_matches!(
            decode_message(&frame).unwrap(),
            Some(NodeEvent::TrackException { message, severity, .. })
                if message == "This video is unavailable" && severity == "common"
        );
    }

    #[test]
    fn ready_and_stats_frames() {
        assert_eq!(
            decode_message(r#"{"op":"ready","resumed":false,"sessionId":"abc"}"#).unwrap(),
            Some(NodeEvent::Ready {
                session_id: "abc".into(),
                resumed: false
            })
        );
        assert_eq!(
            decode_message(r#"{"op":"stats","players":1,"playingPlayers":1,"uptime":5}"#).unwrap(),
            None
        );
    }

    #[test]
    fn player_update_serializes_only_set_fields() {
        assert_eq!(
            serde_json::to_value(PlayerUpdate::stop()).unwrap(),
            serde_json::json!({ "track": { "encoded": null } })
        );
        assert_eq!(
            serde_json::to_value(PlayerUpdate::volume(35)).unwrap(),
            serde_json::json!({ "volume": 35 })
        );
    }

    #[test]
    fn load_results_map_to_tracks() {
        let playlist = format!(
            r#"{{"loadType":"playlist","data":{{"info":{{"name":"Mix","selectedTrack":-1}},"pluginInfo":{{}},"tracks":[{TRACK},{TRACK}]}}}}"#
        );
        let result: LoadResult = serde_json::from_str::<WireLoadResult>(&playlist).unwrap().into();
        assert_eq!(result.load_type, LoadType::Playlist);
        assert_eq!(result.tracks.len(), 2);
        assert_eq!(result.playlist_name.as_deref(), Some("Mix"));

        let empty: LoadResult = serde_json::from_str::<WireLoadResult>(r#"{"loadType":"empty","data":{}}"#)
            .unwrap()
            .into();
        assert_eq!(empty, LoadResult::empty());
    }
}
