//! Per-guild playback state and the operations that mutate it.
//!
//! An [`AudioSession`] is the only owner of a guild's [`GuildPlaybackState`].
//! Every mutation takes the session lock, updates local state and forwards the
//! change to the audio node, so local state never runs ahead of a failed
//! node request.

use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, GuildId, UserId};
use serde::{Deserialize, Serialize};
use songbird::Songbird;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::lavalink::{AudioNode, NodeError, PlayerUpdate, TrackEndReason, VoiceServerInfo};
use crate::utils::settings::GuildSettings;

/// A playable track as resolved by the audio node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub encoded: String,
    pub identifier: String,
    pub title: String,
    pub author: String,
    pub uri: Option<String>,
    pub artwork_url: Option<String>,
    pub duration_ms: u64,
    pub is_stream: bool,
    pub is_seekable: bool,
    pub requester: Option<UserId>,
}

impl Track {
    pub fn requested_by(mut self, user_id: UserId) -> Self {
        self.requester = Some(user_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl LoopMode {
    /// OFF -> TRACK -> QUEUE -> OFF
    pub fn next(self) -> Self {
        match self {
            LoopMode::Off => LoopMode::Track,
            LoopMode::Track => LoopMode::Queue,
            LoopMode::Queue => LoopMode::Off,
        }
    }

    /// Stored representation (0, 1, 2). Unknown values read back as `Off`.
    pub fn from_index(index: i64) -> Self {
        match index {
            1 => LoopMode::Track,
            2 => LoopMode::Queue,
            _ => LoopMode::Off,
        }
    }

    pub fn index(self) -> i64 {
        match self {
            LoopMode::Off => 0,
            LoopMode::Track => 1,
            LoopMode::Queue => 2,
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopMode::Off => "off",
            LoopMode::Track => "track",
            LoopMode::Queue => "queue",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuildPlaybackState {
    pub guild_id: GuildId,
    pub queue: VecDeque<Arc<Track>>,
    pub current: Option<Arc<Track>>,
    pub position_ms: u64,
    pub is_playing: bool,
    pub is_paused: bool,
    pub is_connected: bool,
    pub volume: u16,
    pub loop_mode: LoopMode,
    pub shuffle: bool,
    pub voice_channel_id: Option<ChannelId>,
    pub bound_text_channel_id: Option<ChannelId>,
}

impl GuildPlaybackState {
    /// A disconnected, empty state seeded from stored settings.
    pub fn idle(guild_id: GuildId, settings: &GuildSettings) -> Self {
        Self {
            guild_id,
            queue: VecDeque::new(),
            current: None,
            position_ms: 0,
            is_playing: false,
            is_paused: false,
            is_connected: false,
            volume: settings.volume,
            loop_mode: settings.loop_mode,
            shuffle: settings.shuffle,
            voice_channel_id: None,
            bound_text_channel_id: None,
        }
    }

    fn pick_next(&mut self) -> Option<Arc<Track>> {
        if self.shuffle && self.queue.len() > 1 {
            let index = rand::random_range(0..self.queue.len());
            self.queue.remove(index)
        } else {
            self.queue.pop_front()
        }
    }
}

#[derive(Debug, Error)]
#[error("Voice gateway error: {0}")]
pub struct VoiceError(pub String);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error(transparent)]
    Node(#[from] NodeError),
}

/// The voice-gateway half of joining a channel. The audio itself is handled by
/// the node; this only obtains the credentials it needs.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<VoiceServerInfo, VoiceError>;

    async fn leave(&self, guild_id: GuildId) -> Result<(), VoiceError>;
}

pub struct SongbirdVoice {
    manager: Arc<Songbird>,
}

impl SongbirdVoice {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdVoice {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<VoiceServerInfo, VoiceError> {
        let (info, _call) = self
            .manager
            .join_gateway(guild_id, channel_id)
            .await
            .map_err(|e| VoiceError(e.to_string()))?;
        Ok(VoiceServerInfo {
            token: info.token,
            endpoint: info.endpoint,
            session_id: info.session_id,
        })
    }

    async fn leave(&self, guild_id: GuildId) -> Result<(), VoiceError> {
        self.manager
            .remove(guild_id)
            .await
            .map_err(|e| VoiceError(e.to_string()))
    }
}

/// Why playback is leaving the current track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceCause {
    /// Played to the end. Loop modes apply.
    Finished,
    /// Skipped by a user or stuck on the node. Single-track repeat is suppressed.
    Skipped,
    /// The node could not play it. It is neither repeated nor requeued.
    Failed,
}

impl From<TrackEndReason> for AdvanceCause {
    fn from(reason: TrackEndReason) -> Self {
        match reason {
            TrackEndReason::LoadFailed => AdvanceCause::Failed,
            _ => AdvanceCause::Finished,
        }
    }
}

/// Result of moving to the next track.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    Started(Arc<Track>),
    Exhausted,
}

/// Where newly queued tracks ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    /// 1-based queue position of the first added track, 0 if it started immediately.
    pub position: usize,
    pub count: usize,
    pub started: bool,
}

pub struct AudioSession {
    guild_id: GuildId,
    node: Arc<dyn AudioNode>,
    voice: Arc<dyn VoiceGateway>,
    state: Mutex<GuildPlaybackState>,
}

impl AudioSession {
    pub fn new(
        guild_id: GuildId,
        node: Arc<dyn AudioNode>,
        voice: Arc<dyn VoiceGateway>,
        settings: &GuildSettings,
    ) -> Self {
        Self {
            guild_id,
            node,
            voice,
            state: Mutex::new(GuildPlaybackState::idle(guild_id, settings)),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub async fn snapshot(&self) -> GuildPlaybackState {
        self.state.lock().await.clone()
    }

    /// Join `voice_channel` unless already connected. Returns `true` when a
    /// new connection was made.
    pub async fn connect(
        &self,
        voice_channel: ChannelId,
        text_channel: Option<ChannelId>,
    ) -> Result<bool, SessionError> {
        let mut state = self.state.lock().await;
        if state.is_connected {
            return Ok(false);
        }

        let voice = self.voice.join(self.guild_id, voice_channel).await?;
        if let Err(e) = self
            .node
            .update_player(self.guild_id, PlayerUpdate::voice(voice, state.volume))
            .await
        {
            if let Err(leave_err) = self.voice.leave(self.guild_id).await {
                warn!("Failed to leave voice after node error in guild {}: {}", self.guild_id, leave_err);
            }
            return Err(e.into());
        }

        state.is_connected = true;
        state.voice_channel_id = Some(voice_channel);
        if state.bound_text_channel_id.is_none() {
            state.bound_text_channel_id = text_channel;
        }
        info!("Connected to voice channel {} in guild {}", voice_channel, self.guild_id);
        Ok(true)
    }

    /// Append tracks and start playback if nothing is playing.
    pub async fn enqueue(&self, tracks: Vec<Arc<Track>>) -> Result<Enqueued, NodeError> {
        let mut state = self.state.lock().await;
        let count = tracks.len();
        let position = state.queue.len() + 1;
        let previous = state.queue.clone();
        state.queue.extend(tracks);

        if state.current.is_some() || count == 0 {
            return Ok(Enqueued {
                position,
                count,
                started: false,
            });
        }

        match state.pick_next() {
            Some(track) => {
                if let Err(e) = self.start(&mut state, track).await {
                    state.queue = previous;
                    return Err(e);
                }
                Ok(Enqueued {
                    position: 0,
                    count,
                    started: true,
                })
            }
            None => Ok(Enqueued {
                position,
                count,
                started: false,
            }),
        }
    }

    /// Move to the next track honoring loop mode and shuffle.
    pub async fn advance(&self, cause: AdvanceCause) -> Result<Advance, NodeError> {
        let mut state = self.state.lock().await;
        self.advance_locked(&mut state, cause).await
    }

    /// Handle a track ending on the node. Ends for anything other than the
    /// current track are stale and ignored.
    pub async fn track_ended(&self, encoded: &str, reason: TrackEndReason) -> Result<Option<Advance>, NodeError> {
        let mut state = self.state.lock().await;
        match &state.current {
            Some(current) if current.encoded == encoded => {}
            _ => {
                debug!("Ignoring stale track end in guild {}", self.guild_id);
                return Ok(None);
            }
        }
        self.advance_locked(&mut state, reason.into()).await.map(Some)
    }

    /// Record that the node started `encoded`; returns the matching current track.
    pub async fn track_started(&self, encoded: &str) -> Option<Arc<Track>> {
        let mut state = self.state.lock().await;
        let current = state.current.clone().filter(|t| t.encoded == encoded)?;
        state.is_playing = true;
        state.is_paused = false;
        state.position_ms = 0;
        Some(current)
    }

    /// The bot was moved to another voice channel by someone else.
    pub async fn set_voice_channel(&self, channel_id: ChannelId) {
        self.state.lock().await.voice_channel_id = Some(channel_id);
    }

    pub async fn sync_position(&self, position_ms: u64) {
        let mut state = self.state.lock().await;
        if state.current.is_some() {
            state.position_ms = position_ms;
        }
    }

    pub async fn set_paused(&self, paused: bool) -> Result<(), NodeError> {
        let mut state = self.state.lock().await;
        self.node
            .update_player(self.guild_id, PlayerUpdate::paused(paused))
            .await?;
        state.is_paused = paused;
        Ok(())
    }

    pub async fn set_volume(&self, volume: u16) -> Result<(), NodeError> {
        let mut state = self.state.lock().await;
        if state.is_connected {
            self.node
                .update_player(self.guild_id, PlayerUpdate::volume(volume))
                .await?;
        }
        state.volume = volume;
        Ok(())
    }

    pub async fn set_loop(&self, mode: LoopMode) {
        self.state.lock().await.loop_mode = mode;
    }

    pub async fn set_shuffle(&self, shuffle: bool) {
        self.state.lock().await.shuffle = shuffle;
    }

    /// Seek the current track. Returns the position actually applied.
    pub async fn seek(&self, position_ms: u64) -> Result<u64, NodeError> {
        let mut state = self.state.lock().await;
        let duration = state.current.as_ref().map(|t| t.duration_ms).unwrap_or(0);
        let position = position_ms.min(duration);
        self.node
            .update_player(self.guild_id, PlayerUpdate::seek(position))
            .await?;
        state.position_ms = position;
        Ok(position)
    }

    /// Remove the queued track at a 0-based index.
    pub async fn remove(&self, index: usize) -> Option<Arc<Track>> {
        self.state.lock().await.queue.remove(index)
    }

    /// Move a queued track between 0-based positions.
    pub async fn move_track(&self, from: usize, to: usize) -> Option<Arc<Track>> {
        let mut state = self.state.lock().await;
        if from >= state.queue.len() || to >= state.queue.len() {
            return None;
        }
        let track = state.queue.remove(from)?;
        state.queue.insert(to, Arc::clone(&track));
        Some(track)
    }

    /// Stop playback and release every resource held for the guild. Node and
    /// voice failures are logged since the session is gone either way.
    pub async fn teardown(&self, leave_voice: bool) {
        let mut state = self.state.lock().await;
        state.queue.clear();
        state.current = None;
        state.is_playing = false;
        state.is_paused = false;
        state.position_ms = 0;

        if let Err(e) = self.node.destroy_player(self.guild_id).await {
            warn!("Failed to destroy player for guild {}: {}", self.guild_id, e);
        }
        if leave_voice && state.is_connected {
            if let Err(e) = self.voice.leave(self.guild_id).await {
                warn!("Failed to leave voice in guild {}: {}", self.guild_id, e);
            }
        }
        state.is_connected = false;
        state.voice_channel_id = None;
        info!("Tore down audio session for guild {}", self.guild_id);
    }

    async fn advance_locked(&self, state: &mut GuildPlaybackState, cause: AdvanceCause) -> Result<Advance, NodeError> {
        let previous = state.current.take();
        let next = match (state.loop_mode, previous) {
            (LoopMode::Track, Some(track)) if cause == AdvanceCause::Finished => Some(track),
            (LoopMode::Queue, Some(track)) if cause != AdvanceCause::Failed => {
                state.queue.push_back(track);
                state.pick_next()
            }
            _ => state.pick_next(),
        };

        match next {
            Some(track) => {
                self.start(state, Arc::clone(&track)).await?;
                Ok(Advance::Started(track))
            }
            None => {
                state.is_playing = false;
                state.is_paused = false;
                state.position_ms = 0;
                if cause == AdvanceCause::Skipped {
                    self.node.update_player(self.guild_id, PlayerUpdate::stop()).await?;
                }
                Ok(Advance::Exhausted)
            }
        }
    }

    async fn start(&self, state: &mut GuildPlaybackState, track: Arc<Track>) -> Result<(), NodeError> {
        if let Err(e) = self
            .node
            .update_player(self.guild_id, PlayerUpdate::play(&track.encoded))
            .await
        {
            state.current = None;
            state.is_playing = false;
            return Err(e);
        }
        debug!("Playing '{}' in guild {}", track.title, self.guild_id);
        state.current = Some(track);
        state.is_playing = true;
        state.is_paused = false;
        state.position_ms = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::music::utils::lavalink::LoadResult;
    use assert_matches::assert_matches;
    use rstest::rstest;

    #[derive(Default)]
    struct RecordingNode {
        updates: std::sync::Mutex<Vec<PlayerUpdate>>,
    }

    #[async_trait]
    impl AudioNode for RecordingNode {
        async fn resolve(&self, _query: &str) -> Result<LoadResult, NodeError> {
            Ok(LoadResult::empty())
        }

        async fn update_player(&self, _guild_id: GuildId, update: PlayerUpdate) -> Result<(), NodeError> {
            self.updates.lock().unwrap().push(update);
            Ok(())
        }

        async fn destroy_player(&self, _guild_id: GuildId) -> Result<(), NodeError> {
            Ok(())
        }
    }

    struct NoVoice;

    #[async_trait]
    impl VoiceGateway for NoVoice {
        async fn join(&self, _guild_id: GuildId, _channel_id: ChannelId) -> Result<VoiceServerInfo, VoiceError> {
            Ok(VoiceServerInfo {
                token: "t".into(),
                endpoint: "e".into(),
                session_id: "s".into(),
            })
        }

        async fn leave(&self, _guild_id: GuildId) -> Result<(), VoiceError> {
            Ok(())
        }
    }

    fn track(name: &str) -> Arc<Track> {
        Arc::new(Track {
            encoded: name.into(),
            identifier: name.into(),
            title: name.into(),
            author: "artist".into(),
            uri: None,
            artwork_url: None,
            duration_ms: 180_000,
            is_stream: false,
            is_seekable: true,
            requester: None,
        })
    }

    fn session(settings: GuildSettings) -> AudioSession {
        AudioSession::new(
            GuildId::new(1),
            Arc::new(RecordingNode::default()),
            Arc::new(NoVoice),
            &settings,
        )
    }

    #[rstest]
    #[case(LoopMode::Off)]
    #[case(LoopMode::Track)]
    #[case(LoopMode::Queue)]
    fn loop_cycle_has_length_three(#[case] start: LoopMode) {
        assert_eq!(start.next().next().next(), start);
        assert_ne!(start.next(), start);
        assert_eq!(LoopMode::from_index(start.index()), start);
    }

    #[tokio::test]
    async fn first_enqueue_starts_playback() {
        let session = session(GuildSettings::default());
        let result = session.enqueue(vec![track("a"), track("b")]).await.unwrap();
        assert!(result.started);

        let state = session.snapshot().await;
        assert_eq!(state.current.unwrap().title, "a");
        assert_eq!(state.queue.len(), 1);
        assert!(state.is_playing);

        let later = session.enqueue(vec![track("c")]).await.unwrap();
        assert_eq!(later, Enqueued { position: 2, count: 1, started: false });
    }

    #[tokio::test]
    async fn track_loop_replays_unless_skipping() {
        let session = session(GuildSettings {
            loop_mode: LoopMode::Track,
            ..Default::default()
        });
        session.enqueue(vec![track("a"), track("b")]).await.unwrap();

        assert_matches!(session.advance(AdvanceCause::Finished).await.unwrap(), Advance::Started(t) if t.title == "a");
        assert_matches!(session.advance(AdvanceCause::Skipped).await.unwrap(), Advance::Started(t) if t.title == "b");
    }

    #[tokio::test]
    async fn queue_loop_rotates_and_plain_queue_exhausts() {
        let looping = session(GuildSettings {
            loop_mode: LoopMode::Queue,
            ..Default::default()
        });
        looping.enqueue(vec![track("a")]).await.unwrap();
        assert_matches!(looping.advance(AdvanceCause::Finished).await.unwrap(), Advance::Started(t) if t.title == "a");

        let plain = session(GuildSettings::default());
        plain.enqueue(vec![track("a")]).await.unwrap();
        assert_eq!(plain.advance(AdvanceCause::Finished).await.unwrap(), Advance::Exhausted);
        assert!(!plain.snapshot().await.is_playing);
    }

    #[tokio::test]
    async fn stale_track_end_is_ignored() {
        let session = session(GuildSettings::default());
        session.enqueue(vec![track("a"), track("b")]).await.unwrap();
        assert_eq!(session.track_ended("zzz", TrackEndReason::Finished).await.unwrap(), None);
        assert_matches!(
            session.track_ended("a", TrackEndReason::Finished).await.unwrap(),
            Some(Advance::Started(t)) if t.title == "b"
        );
    }

    #[rstest]
    #[case(LoopMode::Track)]
    #[case(LoopMode::Queue)]
    #[tokio::test]
    async fn failed_track_is_dropped_under_any_loop(#[case] mode: LoopMode) {
        let session = session(GuildSettings {
            loop_mode: mode,
            ..Default::default()
        });
        session.enqueue(vec![track("broken")]).await.unwrap();

        assert_eq!(
            session.track_ended("broken", TrackEndReason::LoadFailed).await.unwrap(),
            Some(Advance::Exhausted)
        );
        assert!(session.snapshot().await.queue.is_empty());
    }

    #[tokio::test]
    async fn shuffle_plays_every_queued_track_once() {
        let session = session(GuildSettings {
            shuffle: true,
            ..Default::default()
        });
        let names = ["a", "b", "c", "d", "e"];
        session.enqueue(names.iter().map(|n| track(n)).collect()).await.unwrap();

        let mut played = vec![session.snapshot().await.current.unwrap().title.clone()];
        while let Advance::Started(t) = session.advance(AdvanceCause::Finished).await.unwrap() {
            played.push(t.title.clone());
        }
        played.sort();
        assert_eq!(played, names);
    }

    #[tokio::test]
    async fn seek_is_clamped_to_duration() {
        let session = session(GuildSettings::default());
        session.enqueue(vec![track("a")]).await.unwrap();
        assert_eq!(session.seek(999_999_999).await.unwrap(), 180_000);
    }

    #[tokio::test]
    async fn move_track_checks_both_bounds() {
        let session = session(GuildSettings::default());
        session.enqueue(vec![track("now"), track("a"), track("b"), track("c")]).await.unwrap();

        assert_eq!(session.move_track(0, 3).await, None);
        assert_eq!(session.move_track(2, 0).await.unwrap().title, "c");
        let titles: Vec<_> = session.snapshot().await.queue.iter().map(|t| t.title.clone()).collect();
        assert_eq!(titles, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let session = session(GuildSettings::default());
        assert!(session.connect(ChannelId::new(5), Some(ChannelId::new(6))).await.unwrap());
        assert!(!session.connect(ChannelId::new(5), Some(ChannelId::new(7))).await.unwrap());
        assert_eq!(session.snapshot().await.bound_text_channel_id, Some(ChannelId::new(6)));
    }
}
