use chrono::Utc;
use dashmap::DashMap;
use poise::serenity_prelude::{ChannelId, GuildId, UserId};
use regex::Regex;
use serde::Serialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use super::audio_session::{
    Advance, AdvanceCause, AudioSession, GuildPlaybackState, LoopMode, SessionError, Track, VoiceGateway,
};
use super::chat::ChatGateway;
use super::eligibility::{self, Requirement, VoiceDirectory};
use super::embedded_messages;
use super::lavalink::{AudioNode, LoadResult, LoadType, NodeError, NodeEvent, TrackEndReason};
use super::player_message::PlayerMessageSlot;
use crate::utils::database::StoreError;
use crate::utils::locale::{Locale, Text, fill};
use crate::utils::settings::{GuildSettingsPatch, SettingsStore};
use crate::utils::statistics::{PlayEvent, StatsBuffer};

/// Voice-gateway close code sent when the bot was disconnected from the channel.
const VOICE_CLOSE_DISCONNECTED: u16 = 4014;

/// Query prefixes the audio node understands as searches.
const SEARCH_PREFIXES: [&str; 3] = ["ytsearch:", "ytmsearch:", "scsearch:"];

static SEEK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-])?(\d{1,6})(?::(\d{1,2}))?(?::(\d{1,2}))?$").expect("seek pattern is valid")
});

/// Errors that can occur during music operations
#[derive(Error, Debug)]
pub enum MusicError {
    #[error("Not in a guild")]
    NotInGuild,

    #[error("No active playback session")]
    NoSession,

    #[error("User is not in a voice channel")]
    UserNotInVoice,

    #[error("User is in a different voice channel than the bot")]
    WrongChannel,

    #[error("Missing permission to connect or speak")]
    MissingPermissions,

    #[error("Voice channel is full")]
    ChannelFull,

    #[error("Nothing is playing")]
    NothingPlaying,

    #[error("No tracks found")]
    NothingFound,

    #[error("Volume must be between {min} and {max}")]
    VolumeOutOfRange { min: u16, max: u16 },

    #[error("Position must be between 1 and {len}")]
    IndexOutOfRange { len: usize },

    #[error("Track is not seekable")]
    NotSeekable,

    #[error("Invalid seek position")]
    InvalidSeek,

    #[error("Failed to join voice channel: {0}")]
    JoinError(String),

    #[error("Audio node error: {0}")]
    Node(#[from] NodeError),

    #[error("Settings store error: {0}")]
    Store(#[from] StoreError),
}

impl From<SessionError> for MusicError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Voice(e) => MusicError::JoinError(e.0),
            SessionError::Node(e) => MusicError::Node(e),
        }
    }
}

impl MusicError {
    /// The single message shown to the user who issued the command.
    pub fn localized(&self, locale: Locale) -> String {
        match self {
            MusicError::NotInGuild => Text::NotInGuild.get(locale).to_string(),
            MusicError::NoSession => Text::NoSession.get(locale).to_string(),
            MusicError::UserNotInVoice => Text::UserNotInVoice.get(locale).to_string(),
            MusicError::WrongChannel => Text::WrongChannel.get(locale).to_string(),
            MusicError::MissingPermissions => Text::MissingPermissions.get(locale).to_string(),
            MusicError::ChannelFull => Text::ChannelFull.get(locale).to_string(),
            MusicError::NothingPlaying => Text::NothingPlaying.get(locale).to_string(),
            MusicError::NothingFound => Text::NothingFound.get(locale).to_string(),
            MusicError::VolumeOutOfRange { min, max } => fill(
                Text::VolumeOutOfRange.get(locale),
                &[("min", min), ("max", max)],
            ),
            MusicError::IndexOutOfRange { len: 0 } => Text::QueueEmpty.get(locale).to_string(),
            MusicError::IndexOutOfRange { len } => {
                fill(Text::IndexOutOfRange.get(locale), &[("len", len)])
            }
            MusicError::NotSeekable => Text::NotSeekable.get(locale).to_string(),
            MusicError::InvalidSeek => Text::InvalidSeek.get(locale).to_string(),
            MusicError::JoinError(_) => Text::JoinFailed.get(locale).to_string(),
            MusicError::Node(_) => Text::NodeUnavailable.get(locale).to_string(),
            MusicError::Store(_) => Text::SettingsUnavailable.get(locale).to_string(),
        }
    }
}

/// Result type for music operations
pub type MusicResult<T> = Result<T, MusicError>;

/// Which entry point a command arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Slash,
    Component,
    /// A plain message in a guild's request channel.
    Message,
    Bus,
}

/// The user on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub user_name: String,
    /// Where the command was issued. Absent for the command bus.
    pub text_channel_id: Option<ChannelId>,
    pub origin: Origin,
}

#[derive(Debug, Clone)]
pub struct MusicLimits {
    pub max_volume: u16,
    pub search_results: usize,
    pub resolve_attempts: u32,
    pub vote_url: Option<String>,
}

impl Default for MusicLimits {
    fn default() -> Self {
        Self {
            max_volume: 100,
            search_results: 5,
            resolve_attempts: 3,
            vote_url: None,
        }
    }
}

/// Collaborators the orchestrator drives.
pub struct MusicServices {
    pub node: Arc<dyn AudioNode>,
    pub voice: Arc<dyn VoiceGateway>,
    pub chat: Arc<dyn ChatGateway>,
    pub directory: Arc<dyn VoiceDirectory>,
    pub settings: Arc<SettingsStore>,
    pub stats: Arc<StatsBuffer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOutcome {
    pub channel_id: ChannelId,
    pub joined: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    Track { title: String, position: usize },
    Playlist { name: String, count: usize },
}

impl PlayOutcome {
    pub fn localized(&self, locale: Locale) -> String {
        match self {
            PlayOutcome::Track { title, position } => fill(
                Text::AddedTrack.get(locale),
                &[("title", title), ("position", position)],
            ),
            PlayOutcome::Playlist { name, count } => fill(
                Text::AddedPlaylist.get(locale),
                &[("name", name), ("count", count)],
            ),
        }
    }
}

/// A seek request in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekTarget {
    Absolute(u64),
    Forward(u64),
    Backward(u64),
}

impl FromStr for SeekTarget {
    type Err = MusicError;

    /// Accepts `90`, `1:30`, `1:02:03`, and relative forms like `+10` or `-1:00`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let captures = SEEK_PATTERN
            .captures(input.trim())
            .ok_or(MusicError::InvalidSeek)?;
        let number = |index: usize| -> Option<u64> {
            captures.get(index).and_then(|m| m.as_str().parse().ok())
        };

        let (hours, minutes, seconds) = match (number(2), number(3), number(4)) {
            (Some(h), Some(m), Some(s)) => (h, m, s),
            (Some(m), Some(s), None) => (0, m, s),
            (Some(s), None, None) => (0, 0, s),
            _ => return Err(MusicError::InvalidSeek),
        };
        let has_parts = captures.get(3).is_some();
        if has_parts && (seconds >= 60 || (captures.get(4).is_some() && minutes >= 60)) {
            return Err(MusicError::InvalidSeek);
        }

        let millis = ((hours * 60 + minutes) * 60 + seconds) * 1000;
        Ok(match captures.get(1).map(|m| m.as_str()) {
            Some("+") => SeekTarget::Forward(millis),
            Some("-") => SeekTarget::Backward(millis),
            _ => SeekTarget::Absolute(millis),
        })
    }
}

impl SeekTarget {
    /// Absolute position, clamped to `[0, duration_ms]`.
    pub fn resolve(self, position_ms: u64, duration_ms: u64) -> u64 {
        let target = match self {
            SeekTarget::Absolute(ms) => ms,
            SeekTarget::Forward(ms) => position_ms.saturating_add(ms),
            SeekTarget::Backward(ms) => position_ms.saturating_sub(ms),
        };
        target.min(duration_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackSummary {
    pub title: String,
    pub author: String,
    pub uri: Option<String>,
    pub duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    pub thumbnail: Option<String>,
}

impl TrackSummary {
    pub fn new(track: &Track, position: Option<u64>) -> Self {
        Self {
            title: track.title.clone(),
            author: track.author.clone(),
            uri: track.uri.clone(),
            duration: track.duration_ms,
            position,
            thumbnail: track.artwork_url.clone(),
        }
    }
}

/// Full player snapshot as published to external control surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerState {
    pub guild_id: String,
    pub is_connected: bool,
    pub is_playing: bool,
    pub is_paused: bool,
    pub current_track: Option<TrackSummary>,
    pub queue: Vec<TrackSummary>,
    pub queue_length: usize,
    pub volume: u16,
    #[serde(rename = "loop")]
    pub loop_mode: LoopMode,
    pub shuffle: bool,
    pub channel_name: Option<String>,
}

impl PlayerState {
    pub fn from_state(state: &GuildPlaybackState, channel_name: Option<String>) -> Self {
        Self {
            guild_id: state.guild_id.to_string(),
            is_connected: state.is_connected,
            is_playing: state.is_playing,
            is_paused: state.is_paused,
            current_track: state
                .current
                .as_ref()
                .map(|track| TrackSummary::new(track, Some(state.position_ms))),
            queue: state.queue.iter().map(|track| TrackSummary::new(track, None)).collect(),
            queue_length: state.queue.len(),
            volume: state.volume,
            loop_mode: state.loop_mode,
            shuffle: state.shuffle,
            channel_name,
        }
    }
}

/// Everything the bot holds for one guild while a session is alive.
pub struct GuildContext {
    pub session: AudioSession,
    pub player_message: PlayerMessageSlot,
    last_requester: AtomicU64,
}

impl GuildContext {
    fn new(session: AudioSession) -> Self {
        Self {
            session,
            player_message: PlayerMessageSlot::default(),
            last_requester: AtomicU64::new(0),
        }
    }

    pub fn last_requester(&self) -> Option<UserId> {
        let id = self.last_requester.load(Ordering::Relaxed);
        (id != 0).then(|| UserId::new(id))
    }

    fn set_last_requester(&self, user_id: UserId) {
        self.last_requester.store(user_id.get(), Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    Stopped,
    QueueEnded,
    /// The last listener left the channel.
    Abandoned,
    /// The bot was disconnected by someone else.
    Removed,
    /// The audio node restarted and lost its players.
    NodeReset,
}

/// Translates commands and node events into session mutations and keeps the
/// now-playing message in step with playback state.
pub struct MusicManager {
    guilds: DashMap<GuildId, Arc<GuildContext>>,
    node: Arc<dyn AudioNode>,
    voice: Arc<dyn VoiceGateway>,
    chat: Arc<dyn ChatGateway>,
    directory: Arc<dyn VoiceDirectory>,
    settings: Arc<SettingsStore>,
    stats: Arc<StatsBuffer>,
    limits: MusicLimits,
}

impl MusicManager {
    pub fn new(services: MusicServices, limits: MusicLimits) -> Self {
        Self {
            guilds: DashMap::new(),
            node: services.node,
            voice: services.voice,
            chat: services.chat,
            directory: services.directory,
            settings: services.settings,
            stats: services.stats,
            limits,
        }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn directory(&self) -> &dyn VoiceDirectory {
        self.directory.as_ref()
    }

    pub fn limits(&self) -> &MusicLimits {
        &self.limits
    }

    pub fn context(&self, guild_id: GuildId) -> Option<Arc<GuildContext>> {
        self.guilds.get(&guild_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn active_sessions(&self) -> usize {
        self.guilds.len()
    }

    /// Language for a reply: the user's choice, then the guild's, then the default.
    pub async fn locale_for(&self, guild_id: Option<GuildId>, user_id: Option<UserId>) -> Locale {
        self.settings.locale_context(guild_id, user_id).await.locale
    }

    async fn guild_locale(&self, guild_id: GuildId) -> Locale {
        self.settings.get_guild_settings(guild_id).await.language
    }

    async fn get_or_create(&self, guild_id: GuildId) -> Arc<GuildContext> {
        if let Some(context) = self.context(guild_id) {
            return context;
        }

        let settings = self.settings.get_guild_settings(guild_id).await;
        let entry = self.guilds.entry(guild_id).or_insert_with(|| {
            debug!("Creating playback session for guild {}", guild_id);
            Arc::new(GuildContext::new(AudioSession::new(
                guild_id,
                Arc::clone(&self.node),
                Arc::clone(&self.voice),
                &settings,
            )))
        });
        Arc::clone(entry.value())
    }

    async fn snapshot_of(&self, guild_id: GuildId) -> Option<GuildPlaybackState> {
        match self.context(guild_id) {
            Some(context) => Some(context.session.snapshot().await),
            None => None,
        }
    }

    async fn require_session(&self, caller: &Caller) -> MusicResult<(Arc<GuildContext>, GuildPlaybackState)> {
        let context = self.context(caller.guild_id).ok_or(MusicError::NoSession)?;
        let state = context.session.snapshot().await;
        eligibility::check(
            self.directory.as_ref(),
            caller,
            Some(&state),
            Requirement::ExistingSession,
        )?;
        Ok((context, state))
    }

    async fn check_may_join(&self, caller: &Caller) -> MusicResult<ChannelId> {
        let existing = self.snapshot_of(caller.guild_id).await;
        eligibility::check(
            self.directory.as_ref(),
            caller,
            existing.as_ref(),
            Requirement::MayJoin,
        )
    }

    async fn join(&self, context: &Arc<GuildContext>, channel_id: ChannelId, caller: &Caller) -> MusicResult<bool> {
        match context.session.connect(channel_id, caller.text_channel_id).await {
            Ok(joined) => Ok(joined),
            Err(e) => {
                error!("Failed to join {} in guild {}: {}", channel_id, caller.guild_id, e);
                if !context.session.snapshot().await.is_connected {
                    self.guilds
                        .remove_if(&caller.guild_id, |_, stored| Arc::ptr_eq(stored, context));
                }
                Err(e.into())
            }
        }
    }

    async fn persist(&self, guild_id: GuildId, patch: GuildSettingsPatch) {
        if let Err(e) = self.settings.upsert_guild_settings(guild_id, patch).await {
            warn!("Failed to persist settings for guild {}: {}", guild_id, e);
        }
    }

    async fn refresh_player(&self, context: &GuildContext) {
        let locale = self.guild_locale(context.session.guild_id()).await;
        context
            .player_message
            .refresh(self.chat.as_ref(), &context.session, locale)
            .await;
    }

    async fn record_play(&self, caller: &Caller, voice_channel: ChannelId, track: Option<&Track>, success: bool) {
        let channel_id = caller.text_channel_id.unwrap_or(voice_channel);
        let event = PlayEvent {
            guild_id: caller.guild_id,
            guild_name: self.directory.guild_name(caller.guild_id).unwrap_or_default(),
            channel_id,
            channel_name: self
                .directory
                .channel_name(caller.guild_id, channel_id)
                .unwrap_or_default(),
            user_id: caller.user_id,
            user_name: caller.user_name.clone(),
            track_title: track.map(|t| t.title.clone()),
            track_uri: track.and_then(|t| t.uri.clone()),
            track_identifier: track.map(|t| t.identifier.clone()),
            success,
            created_at: Utc::now(),
        };
        self.stats.record_play(event).await;
    }

    /// Join the caller's voice channel, creating the session if needed.
    pub async fn connect(&self, caller: &Caller) -> MusicResult<ConnectOutcome> {
        let channel_id = self.check_may_join(caller).await?;
        let context = self.get_or_create(caller.guild_id).await;
        let joined = self.join(&context, channel_id, caller).await?;
        Ok(ConnectOutcome { channel_id, joined })
    }

    /// Resolve a query on the audio node, retrying empty or failed lookups.
    pub async fn resolve(&self, query: &str) -> MusicResult<LoadResult> {
        let identifier = to_identifier(query);
        let mut last_error = None;

        for attempt in 1..=self.limits.resolve_attempts.max(1) {
            match self.node.resolve(&identifier).await {
                Ok(result) if !result.tracks.is_empty() => return Ok(result),
                Ok(result) => {
                    debug!(
                        "Resolve attempt {} for '{}' returned {:?} {}",
                        attempt,
                        identifier,
                        result.load_type,
                        result.error.unwrap_or_default()
                    );
                    last_error = None;
                }
                Err(e) => {
                    warn!("Resolve attempt {} for '{}' failed: {}", attempt, identifier, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.map_or(MusicError::NothingFound, MusicError::Node))
    }

    pub async fn play(&self, caller: &Caller, query: &str) -> MusicResult<PlayOutcome> {
        let channel_id = self.check_may_join(caller).await?;

        let result = match self.resolve(query).await {
            Ok(result) => result,
            Err(e) => {
                self.record_play(caller, channel_id, None, false).await;
                return Err(e);
            }
        };

        let (tracks, playlist) = match result.load_type {
            LoadType::Playlist => (result.tracks, result.playlist_name),
            _ => (result.tracks.into_iter().take(1).collect(), None),
        };
        self.enqueue_tracks(caller, channel_id, tracks, playlist).await
    }

    /// Candidates for interactive selection. Nothing is queued.
    pub async fn search(&self, caller: &Caller, query: &str) -> MusicResult<Vec<Track>> {
        self.check_may_join(caller).await?;
        let result = self.resolve(query).await?;
        Ok(result
            .tracks
            .into_iter()
            .take(self.limits.search_results)
            .collect())
    }

    /// Queue a track picked from [`search`](Self::search) results.
    pub async fn play_selected(&self, caller: &Caller, track: Track) -> MusicResult<PlayOutcome> {
        let channel_id = self.check_may_join(caller).await?;
        self.enqueue_tracks(caller, channel_id, vec![track], None).await
    }

    async fn enqueue_tracks(
        &self,
        caller: &Caller,
        voice_channel: ChannelId,
        tracks: Vec<Track>,
        playlist: Option<String>,
    ) -> MusicResult<PlayOutcome> {
        let first = tracks.first().cloned().ok_or(MusicError::NothingFound)?;

        let context = self.get_or_create(caller.guild_id).await;
        self.join(&context, voice_channel, caller).await?;
        context.set_last_requester(caller.user_id);

        let tracks = tracks
            .into_iter()
            .map(|track| Arc::new(track.requested_by(caller.user_id)))
            .collect();
        let enqueued = match context.session.enqueue(tracks).await {
            Ok(enqueued) => enqueued,
            Err(e) => {
                self.record_play(caller, voice_channel, Some(&first), false).await;
                return Err(e.into());
            }
        };
        self.record_play(caller, voice_channel, Some(&first), true).await;

        info!(
            "Queued {} track(s) in guild {} for {}",
            enqueued.count, caller.guild_id, caller.user_name
        );
        if !enqueued.started {
            self.refresh_player(&context).await;
        }

        Ok(match playlist {
            Some(name) => PlayOutcome::Playlist {
                name,
                count: enqueued.count,
            },
            None => PlayOutcome::Track {
                title: first.title,
                position: enqueued.position.max(1),
            },
        })
    }

    pub async fn skip(&self, caller: &Caller) -> MusicResult<()> {
        let (context, state) = self.require_session(caller).await?;
        if state.current.is_none() {
            return Err(MusicError::NothingPlaying);
        }

        if state.loop_mode == LoopMode::Track {
            context.session.set_loop(LoopMode::Queue).await;
            self.persist(
                caller.guild_id,
                GuildSettingsPatch {
                    loop_mode: Some(LoopMode::Queue),
                    ..Default::default()
                },
            )
            .await;
        }

        match context.session.advance(AdvanceCause::Skipped).await? {
            Advance::Started(track) => debug!("Skipped to '{}' in guild {}", track.title, caller.guild_id),
            Advance::Exhausted => {
                self.end_session(caller.guild_id, &context, Teardown::QueueEnded)
                    .await
            }
        }
        Ok(())
    }

    /// Toggle pause. Returns whether playback is now paused.
    pub async fn pause_resume(&self, caller: &Caller) -> MusicResult<bool> {
        let (context, state) = self.require_session(caller).await?;
        if state.current.is_none() {
            return Err(MusicError::NothingPlaying);
        }

        let paused = !state.is_paused;
        context.session.set_paused(paused).await?;
        self.refresh_player(&context).await;
        Ok(paused)
    }

    pub async fn stop(&self, caller: &Caller) -> MusicResult<()> {
        let (context, _) = self.require_session(caller).await?;
        self.end_session(caller.guild_id, &context, Teardown::Stopped)
            .await;
        Ok(())
    }

    /// Advance the loop mode one step. Returns the new mode.
    pub async fn repeat(&self, caller: &Caller) -> MusicResult<LoopMode> {
        let (context, state) = self.require_session(caller).await?;
        let mode = state.loop_mode.next();
        context.session.set_loop(mode).await;
        self.persist(
            caller.guild_id,
            GuildSettingsPatch {
                loop_mode: Some(mode),
                ..Default::default()
            },
        )
        .await;
        self.refresh_player(&context).await;
        Ok(mode)
    }

    /// Toggle shuffle. Returns the new value.
    pub async fn shuffle(&self, caller: &Caller) -> MusicResult<bool> {
        let (context, state) = self.require_session(caller).await?;
        let shuffle = !state.shuffle;
        context.session.set_shuffle(shuffle).await;
        self.persist(
            caller.guild_id,
            GuildSettingsPatch {
                shuffle: Some(shuffle),
                ..Default::default()
            },
        )
        .await;
        self.refresh_player(&context).await;
        Ok(shuffle)
    }

    pub async fn volume(&self, caller: &Caller, volume: i64) -> MusicResult<u16> {
        let max = self.limits.max_volume;
        let volume = u16::try_from(volume)
            .ok()
            .filter(|v| (1..=max).contains(v))
            .ok_or(MusicError::VolumeOutOfRange { min: 1, max })?;

        let (context, _) = self.require_session(caller).await?;
        context.session.set_volume(volume).await?;
        self.persist(
            caller.guild_id,
            GuildSettingsPatch {
                volume: Some(volume),
                ..Default::default()
            },
        )
        .await;
        self.refresh_player(&context).await;
        Ok(volume)
    }

    /// Seek within the current track. Returns the applied position in milliseconds.
    pub async fn seek(&self, caller: &Caller, target: SeekTarget) -> MusicResult<u64> {
        let (context, state) = self.require_session(caller).await?;
        let track = state.current.as_ref().ok_or(MusicError::NothingPlaying)?;
        if track.is_stream || !track.is_seekable {
            return Err(MusicError::NotSeekable);
        }

        let position = target.resolve(state.position_ms, track.duration_ms);
        let applied = context.session.seek(position).await?;
        self.refresh_player(&context).await;
        Ok(applied)
    }

    /// Remove the queued track at a 1-based position.
    pub async fn remove(&self, caller: &Caller, index: usize) -> MusicResult<Arc<Track>> {
        let (context, state) = self.require_session(caller).await?;
        let len = state.queue.len();
        if index == 0 || index > len {
            return Err(MusicError::IndexOutOfRange { len });
        }

        let removed = context
            .session
            .remove(index - 1)
            .await
            .ok_or(MusicError::IndexOutOfRange { len })?;
        self.refresh_player(&context).await;
        Ok(removed)
    }

    /// Move a queued track between 1-based positions.
    pub async fn move_track(&self, caller: &Caller, from: usize, to: usize) -> MusicResult<Arc<Track>> {
        let (context, state) = self.require_session(caller).await?;
        let len = state.queue.len();
        if from == 0 || from > len || to == 0 || to > len {
            return Err(MusicError::IndexOutOfRange { len });
        }

        let moved = context
            .session
            .move_track(from - 1, to - 1)
            .await
            .ok_or(MusicError::IndexOutOfRange { len })?;
        self.refresh_player(&context).await;
        Ok(moved)
    }

    /// Read-only view of the queue.
    pub async fn queue(&self, guild_id: GuildId) -> MusicResult<GuildPlaybackState> {
        let context = self.context(guild_id).ok_or(MusicError::NoSession)?;
        Ok(context.session.snapshot().await)
    }

    /// Replace the now-playing message with a fresh one.
    pub async fn now_playing(&self, caller: &Caller) -> MusicResult<()> {
        let context = self.context(caller.guild_id).ok_or(MusicError::NoSession)?;
        let state = context.session.snapshot().await;
        if state.current.is_none() {
            return Err(MusicError::NothingPlaying);
        }
        let channel_id = caller
            .text_channel_id
            .or(state.bound_text_channel_id)
            .ok_or(MusicError::NoSession)?;

        let locale = self.guild_locale(caller.guild_id).await;
        if let Err(e) = context
            .player_message
            .recreate(self.chat.as_ref(), channel_id, &context.session, locale)
            .await
        {
            warn!("Failed to post now-playing message in guild {}: {}", caller.guild_id, e);
        }
        Ok(())
    }

    /// Snapshot for external surfaces. Guilds without a session report an idle player.
    pub async fn get_state(&self, guild_id: GuildId) -> PlayerState {
        let state = match self.snapshot_of(guild_id).await {
            Some(state) => state,
            None => {
                let settings = self.settings.get_guild_settings(guild_id).await;
                GuildPlaybackState::idle(guild_id, &settings)
            }
        };
        let channel_name = state
            .voice_channel_id
            .and_then(|channel_id| self.directory.channel_name(guild_id, channel_id));
        PlayerState::from_state(&state, channel_name)
    }

    async fn end_session(&self, guild_id: GuildId, context: &Arc<GuildContext>, reason: Teardown) {
        self.guilds
            .remove_if(&guild_id, |_, stored| Arc::ptr_eq(stored, context));
        context.player_message.retire(self.chat.as_ref()).await;
        context.session.teardown(reason != Teardown::Removed).await;
        info!("Playback session for guild {} ended ({:?})", guild_id, reason);

        if matches!(reason, Teardown::Removed | Teardown::NodeReset) {
            return;
        }
        let Some(channel_id) = context.session.snapshot().await.bound_text_channel_id else {
            return;
        };
        let Some(url) = &self.limits.vote_url else {
            return;
        };

        let locale = self
            .locale_for(Some(guild_id), context.last_requester())
            .await;
        let mut notice = fill(Text::VotePrompt.get(locale), &[("url", url)]);
        if reason == Teardown::QueueEnded {
            notice = format!("{}\n{}", Text::QueueFinished.get(locale), notice);
        }
        if let Err(e) = self.chat.send_notice(channel_id, &notice).await {
            debug!("Skipping vote notice in guild {}: {}", guild_id, e);
        }
    }

    pub async fn handle_node_event(&self, event: NodeEvent) {
        match event {
            NodeEvent::Ready {
                session_id,
                resumed,
            } => {
                info!("Audio node ready (session {}, resumed: {})", session_id, resumed);
                if !resumed {
                    self.reset_sessions().await;
                }
            }
            NodeEvent::PlayerUpdate {
                guild_id,
                position_ms,
                ..
            } => {
                if let Some(context) = self.context(guild_id) {
                    context.session.sync_position(position_ms).await;
                }
            }
            NodeEvent::TrackStart { guild_id, encoded } => self.on_track_start(guild_id, &encoded).await,
            NodeEvent::TrackEnd {
                guild_id,
                encoded,
                reason,
            } => self.on_track_end(guild_id, &encoded, reason).await,
            NodeEvent::TrackException {
                guild_id,
                encoded,
                message,
                severity,
            } => {
                warn!("Track exception in guild {} ({}): {}", guild_id, severity, message);
                self.on_track_exception(guild_id, &encoded, &message).await
            }
            NodeEvent::TrackStuck {
                guild_id,
                threshold_ms,
            } => {
                warn!("Track stuck for {}ms in guild {}, skipping", threshold_ms, guild_id);
                self.on_track_stuck(guild_id).await
            }
            NodeEvent::WebSocketClosed {
                guild_id,
                code,
                reason,
                by_remote,
            } => {
                warn!(
                    "Voice websocket closed in guild {}: {} {} (remote: {})",
                    guild_id, code, reason, by_remote
                );
                if code == VOICE_CLOSE_DISCONNECTED {
                    if let Some(context) = self.context(guild_id) {
                        self.end_session(guild_id, &context, Teardown::Removed).await;
                    }
                }
            }
        }
    }

    pub async fn on_track_start(&self, guild_id: GuildId, encoded: &str) {
        let Some(context) = self.context(guild_id) else {
            return;
        };
        let Some(track) = context.session.track_started(encoded).await else {
            debug!("Track start for a track that is no longer current in guild {}", guild_id);
            return;
        };
        let Some(channel_id) = context.session.snapshot().await.bound_text_channel_id else {
            return;
        };

        if !self.directory.can_post(guild_id, channel_id) {
            context.player_message.retire(self.chat.as_ref()).await;
            if let Some(requester) = track.requester {
                let locale = self.locale_for(Some(guild_id), Some(requester)).await;
                let channel = format!("<#{}>", channel_id);
                let text = fill(Text::CannotPostHere.get(locale), &[("channel", &channel)]);
                if let Err(e) = self.chat.notify_user(requester, &text).await {
                    debug!("Could not notify {} about missing permissions: {}", requester, e);
                }
            }
            return;
        }

        let locale = self.guild_locale(guild_id).await;
        if let Err(e) = context
            .player_message
            .recreate(self.chat.as_ref(), channel_id, &context.session, locale)
            .await
        {
            warn!("Failed to post now-playing message in guild {}: {}", guild_id, e);
        }
    }

    async fn on_track_end(&self, guild_id: GuildId, encoded: &str, reason: TrackEndReason) {
        if !reason.may_start_next() {
            debug!("Track ended in guild {} ({:?}), not advancing", guild_id, reason);
            return;
        }
        let Some(context) = self.context(guild_id) else {
            return;
        };

        match context.session.track_ended(encoded, reason).await {
            Ok(Some(Advance::Exhausted)) => {
                self.end_session(guild_id, &context, Teardown::QueueEnded)
                    .await
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to start the next track in guild {}: {}", guild_id, e);
                self.end_session(guild_id, &context, Teardown::QueueEnded)
                    .await;
            }
        }
    }

    async fn on_track_exception(&self, guild_id: GuildId, encoded: &str, message: &str) {
        let Some(context) = self.context(guild_id) else {
            return;
        };
        let state = context.session.snapshot().await;
        let Some(channel_id) = state.bound_text_channel_id else {
            return;
        };
        let title = state
            .current
            .as_ref()
            .filter(|track| track.encoded == encoded)
            .map(|track| track.title.clone())
            .unwrap_or_default();

        let locale = self.guild_locale(guild_id).await;
        let notice = embedded_messages::playback_failed(locale, &title, message);
        if let Err(e) = self.chat.send_notice(channel_id, &notice).await {
            debug!("Dropping playback failure notice in guild {}: {}", guild_id, e);
        }
    }

    async fn on_track_stuck(&self, guild_id: GuildId) {
        let Some(context) = self.context(guild_id) else {
            return;
        };
        match context.session.advance(AdvanceCause::Skipped).await {
            Ok(Advance::Started(_)) => {}
            Ok(Advance::Exhausted) => {
                self.end_session(guild_id, &context, Teardown::QueueEnded)
                    .await
            }
            Err(e) => {
                error!("Failed to skip stuck track in guild {}: {}", guild_id, e);
                self.end_session(guild_id, &context, Teardown::QueueEnded)
                    .await;
            }
        }
    }

    /// React to a member joining, leaving or moving between voice channels.
    pub async fn on_voice_state_update(&self, guild_id: GuildId, user_id: UserId, channel_id: Option<ChannelId>) {
        let Some(context) = self.context(guild_id) else {
            return;
        };
        let Some(bot_channel) = context.session.snapshot().await.voice_channel_id else {
            return;
        };

        if user_id == self.directory.bot_user_id() {
            match channel_id {
                None => {
                    info!("Bot was disconnected from voice in guild {}", guild_id);
                    self.end_session(guild_id, &context, Teardown::Removed).await;
                }
                Some(moved_to) if moved_to != bot_channel => {
                    info!("Bot was moved to {} in guild {}", moved_to, guild_id);
                    context.session.set_voice_channel(moved_to).await;
                }
                Some(_) => {}
            }
            return;
        }

        if self
            .directory
            .humans_in_channel(guild_id, bot_channel)
            .is_empty()
        {
            info!("Last listener left {} in guild {}", bot_channel, guild_id);
            self.end_session(guild_id, &context, Teardown::Abandoned)
                .await;
        }
    }

    /// Release every session and write out buffered statistics.
    /// Ends every session after the node came back without its players.
    async fn reset_sessions(&self) {
        let contexts: Vec<(GuildId, Arc<GuildContext>)> = self
            .guilds
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        if contexts.is_empty() {
            return;
        }
        warn!("Audio node lost its players, ending {} sessions", contexts.len());
        for (guild_id, context) in contexts {
            self.end_session(guild_id, &context, Teardown::NodeReset).await;
        }
    }

    pub async fn shutdown(&self) {
        let contexts: Vec<Arc<GuildContext>> = self
            .guilds
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.guilds.clear();

        for context in contexts {
            context.player_message.retire(self.chat.as_ref()).await;
            context.session.teardown(true).await;
        }

        let written = self.stats.flush().await;
        info!("Shutdown complete, flushed {} play events", written);
    }
}

/// URLs and explicit search prefixes pass through; anything else becomes a search.
fn to_identifier(query: &str) -> String {
    let query = query.trim();
    let is_url = Url::parse(query)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false);
    if is_url || SEARCH_PREFIXES.iter().any(|prefix| query.starts_with(prefix)) {
        query.to_string()
    } else {
        format!("ytsearch:{query}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use test_case::test_case;

    #[test_case("90" => SeekTarget::Absolute(90_000) ; "plain seconds")]
    #[test_case("1:30" => SeekTarget::Absolute(90_000) ; "minutes and seconds")]
    #[test_case("1:02:03" => SeekTarget::Absolute(3_723_000) ; "hours")]
    #[test_case("+10" => SeekTarget::Forward(10_000) ; "forward")]
    #[test_case("-1:00" => SeekTarget::Backward(60_000) ; "backward")]
    fn parses_seek_targets(input: &str) -> SeekTarget {
        input.parse().unwrap()
    }

    #[test_case("" ; "empty")]
    #[test_case("1:75" ; "seconds overflow")]
    #[test_case("abc" ; "not a number")]
    #[test_case("1::2" ; "double colon")]
    fn rejects_bad_seek_targets(input: &str) {
        assert_matches!(input.parse::<SeekTarget>(), Err(MusicError::InvalidSeek));
    }

    #[test]
    fn seek_is_clamped() {
        assert_eq!(SeekTarget::Backward(60_000).resolve(10_000, 200_000), 0);
        assert_eq!(SeekTarget::Forward(60_000).resolve(190_000, 200_000), 200_000);
        assert_eq!(SeekTarget::Absolute(5_000).resolve(0, 200_000), 5_000);
    }

    #[test_case("never gonna give you up" => "ytsearch:never gonna give you up" ; "plain query")]
    #[test_case("https://youtu.be/dQw4w9WgXcQ" => "https://youtu.be/dQw4w9WgXcQ" ; "url")]
    #[test_case("scsearch:lofi" => "scsearch:lofi" ; "explicit prefix")]
    #[test_case("  spaced  " => "ytsearch:spaced" ; "trimmed")]
    fn builds_identifiers(query: &str) -> String {
        to_identifier(query)
    }

    #[test]
    fn errors_render_in_the_callers_language() {
        let error = MusicError::VolumeOutOfRange { min: 1, max: 100 };
        assert_eq!(error.localized(Locale::En), "Volume must be between 1 and 100.");
        assert_eq!(
            MusicError::IndexOutOfRange { len: 0 }.localized(Locale::En),
            "The queue is empty."
        );
    }
}
