//! User-facing strings for the two supported languages.

use poise::serenity_prelude::{GuildId, UserId};
use serde::{Deserialize, Serialize};

/// Language used when neither the user nor the guild picked one.
pub const DEFAULT_LANGUAGE: &str = "ko";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Ko,
    En,
}

impl Locale {
    /// Parse a stored language tag or a Discord locale such as `en-US`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let primary = tag.split(['-', '_']).next()?.to_ascii_lowercase();
        match primary.as_str() {
            "ko" => Some(Locale::Ko),
            "en" => Some(Locale::En),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Locale::Ko => "ko",
            Locale::En => "en",
        }
    }
}

/// Who a message is for and which language to write it in.
///
/// Built wherever a reply or notice is produced, independent of the
/// interaction type that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocaleContext {
    pub user_id: Option<UserId>,
    pub guild_id: Option<GuildId>,
    pub locale: Locale,
}

impl LocaleContext {
    pub fn new(user_id: Option<UserId>, guild_id: Option<GuildId>, locale: Locale) -> Self {
        Self {
            user_id,
            guild_id,
            locale,
        }
    }

    pub fn text(&self, key: Text) -> &'static str {
        key.get(self.locale)
    }
}

/// Message catalogue. Placeholders are written as `{name}` and filled with [`fill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Text {
    ErrorTitle,
    NotInGuild,
    NoSession,
    UserNotInVoice,
    WrongChannel,
    MissingPermissions,
    ChannelFull,
    NothingPlaying,
    NothingFound,
    VolumeOutOfRange,
    IndexOutOfRange,
    NotSeekable,
    InvalidSeek,
    JoinFailed,
    NodeUnavailable,
    SettingsUnavailable,
    Connected,
    AlreadyConnected,
    AddedTrack,
    AddedPlaylist,
    Skipped,
    Paused,
    Resumed,
    Stopped,
    LoopChanged,
    ShuffleOn,
    ShuffleOff,
    VolumeSet,
    Seeked,
    Removed,
    Moved,
    LanguageSet,
    AutoDeleteOn,
    AutoDeleteOff,
    NowPlaying,
    Requester,
    Duration,
    Volume,
    Loop,
    Shuffle,
    UpNext,
    QueueTitle,
    QueueEmpty,
    Live,
    LoopOff,
    LoopTrack,
    LoopQueue,
    On,
    Off,
    PlaybackFailed,
    CannotPostHere,
    QueueFinished,
    VotePrompt,
    SearchPrompt,
    SearchPlaceholder,
    SearchExpired,
}

impl Text {
    pub fn get(self, locale: Locale) -> &'static str {
        match locale {
            Locale::Ko => self.ko(),
            Locale::En => self.en(),
        }
    }

    fn ko(self) -> &'static str {
        match self {
            Text::ErrorTitle => "❌ 오류",
            Text::NotInGuild => "서버에서만 사용할 수 있는 명령어입니다.",
            Text::NoSession => "현재 재생 중인 플레이어가 없습니다.",
            Text::UserNotInVoice => "먼저 음성 채널에 접속해 주세요.",
            Text::WrongChannel => "봇과 같은 음성 채널에 있어야 합니다.",
            Text::MissingPermissions => "해당 음성 채널에 접속하거나 말할 권한이 없습니다.",
            Text::ChannelFull => "음성 채널이 가득 찼습니다.",
            Text::NothingPlaying => "재생 중인 곡이 없습니다.",
            Text::NothingFound => "검색 결과가 없습니다.",
            Text::VolumeOutOfRange => "볼륨은 {min}에서 {max} 사이여야 합니다.",
            Text::IndexOutOfRange => "1에서 {len} 사이의 번호를 입력해 주세요.",
            Text::NotSeekable => "이 곡은 탐색할 수 없습니다.",
            Text::InvalidSeek => "시간 형식이 올바르지 않습니다. 예: `1:30`, `+10`, `-15`",
            Text::JoinFailed => "음성 채널에 접속하지 못했습니다.",
            Text::NodeUnavailable => "오디오 서버와 통신하지 못했습니다. 잠시 후 다시 시도해 주세요.",
            Text::SettingsUnavailable => "설정을 저장하지 못했습니다.",
            Text::Connected => "🔊 {channel} 채널에 접속했습니다.",
            Text::AlreadyConnected => "이미 음성 채널에 접속해 있습니다.",
            Text::AddedTrack => "🎵 **{title}** 곡을 대기열에 추가했습니다. (#{position})",
            Text::AddedPlaylist => "🎶 **{name}** 재생목록에서 {count}곡을 추가했습니다.",
            Text::Skipped => "⏭️ 곡을 건너뛰었습니다.",
            Text::Paused => "⏸️ 일시정지했습니다.",
            Text::Resumed => "▶️ 다시 재생합니다.",
            Text::Stopped => "⏹️ 재생을 멈추고 채널에서 나갔습니다.",
            Text::LoopChanged => "🔁 반복 모드: {mode}",
            Text::ShuffleOn => "🔀 셔플을 켰습니다.",
            Text::ShuffleOff => "➡️ 셔플을 껐습니다.",
            Text::VolumeSet => "🔊 볼륨을 {volume}(으)로 설정했습니다.",
            Text::Seeked => "⏩ {position} 위치로 이동했습니다.",
            Text::Removed => "🗑️ **{title}** 곡을 대기열에서 삭제했습니다.",
            Text::Moved => "↕️ **{title}** 곡을 {to}번으로 옮겼습니다.",
            Text::LanguageSet => "언어를 한국어로 설정했습니다.",
            Text::AutoDeleteOn => "{channel} 채널에 입력한 메시지를 곡 요청으로 처리합니다.",
            Text::AutoDeleteOff => "요청 채널 기능을 껐습니다.",
            Text::NowPlaying => "🎵 지금 재생 중",
            Text::Requester => "신청자",
            Text::Duration => "길이",
            Text::Volume => "볼륨",
            Text::Loop => "반복",
            Text::Shuffle => "셔플",
            Text::UpNext => "다음 곡",
            Text::QueueTitle => "📜 대기열",
            Text::QueueEmpty => "대기열이 비어 있습니다.",
            Text::Live => "🔴 라이브",
            Text::LoopOff => "끄기",
            Text::LoopTrack => "한 곡",
            Text::LoopQueue => "전체",
            Text::On => "켜짐",
            Text::Off => "꺼짐",
            Text::PlaybackFailed => "⚠️ **{title}** 곡을 재생하지 못했습니다: {reason}",
            Text::CannotPostHere => "{channel} 채널에 메시지를 보낼 권한이 없어 재생 정보를 표시하지 못했습니다.",
            Text::QueueFinished => "대기열의 모든 곡을 재생했습니다.",
            Text::VotePrompt => "봇이 마음에 드셨다면 추천해 주세요! {url}",
            Text::SearchPrompt => "재생할 곡을 선택해 주세요.",
            Text::SearchPlaceholder => "곡 선택",
            Text::SearchExpired => "선택 시간이 지났습니다.",
        }
    }

    fn en(self) -> &'static str {
        match self {
            Text::ErrorTitle => "❌ Error",
            Text::NotInGuild => "This command only works in a server.",
            Text::NoSession => "There is no active player.",
            Text::UserNotInVoice => "Join a voice channel first.",
            Text::WrongChannel => "You need to be in the same voice channel as the bot.",
            Text::MissingPermissions => "I can't connect or speak in that voice channel.",
            Text::ChannelFull => "That voice channel is full.",
            Text::NothingPlaying => "Nothing is playing right now.",
            Text::NothingFound => "Nothing found.",
            Text::VolumeOutOfRange => "Volume must be between {min} and {max}.",
            Text::IndexOutOfRange => "Pick a position between 1 and {len}.",
            Text::NotSeekable => "This track can't be seeked.",
            Text::InvalidSeek => "Invalid time. Examples: `1:30`, `+10`, `-15`",
            Text::JoinFailed => "Couldn't join the voice channel.",
            Text::NodeUnavailable => "The audio server didn't respond. Try again in a moment.",
            Text::SettingsUnavailable => "Couldn't save the setting.",
            Text::Connected => "🔊 Joined {channel}.",
            Text::AlreadyConnected => "Already connected to a voice channel.",
            Text::AddedTrack => "🎵 Added **{title}** to the queue. (#{position})",
            Text::AddedPlaylist => "🎶 Added {count} tracks from **{name}**.",
            Text::Skipped => "⏭️ Skipped.",
            Text::Paused => "⏸️ Paused.",
            Text::Resumed => "▶️ Resumed.",
            Text::Stopped => "⏹️ Stopped and left the channel.",
            Text::LoopChanged => "🔁 Loop mode: {mode}",
            Text::ShuffleOn => "🔀 Shuffle enabled.",
            Text::ShuffleOff => "➡️ Shuffle disabled.",
            Text::VolumeSet => "🔊 Volume set to {volume}.",
            Text::Seeked => "⏩ Moved to {position}.",
            Text::Removed => "🗑️ Removed **{title}** from the queue.",
            Text::Moved => "↕️ Moved **{title}** to position {to}.",
            Text::LanguageSet => "Language set to English.",
            Text::AutoDeleteOn => "Messages in {channel} will now be treated as song requests.",
            Text::AutoDeleteOff => "Request channel disabled.",
            Text::NowPlaying => "🎵 Now Playing",
            Text::Requester => "Requested by",
            Text::Duration => "Duration",
            Text::Volume => "Volume",
            Text::Loop => "Loop",
            Text::Shuffle => "Shuffle",
            Text::UpNext => "Up next",
            Text::QueueTitle => "📜 Queue",
            Text::QueueEmpty => "The queue is empty.",
            Text::Live => "🔴 Live",
            Text::LoopOff => "Off",
            Text::LoopTrack => "Track",
            Text::LoopQueue => "Queue",
            Text::On => "On",
            Text::Off => "Off",
            Text::PlaybackFailed => "⚠️ Couldn't play **{title}**: {reason}",
            Text::CannotPostHere => "I can't post in {channel}, so the player couldn't be shown there.",
            Text::QueueFinished => "Finished playing the queue.",
            Text::VotePrompt => "Enjoying the music? Give us a vote! {url}",
            Text::SearchPrompt => "Pick a track to play.",
            Text::SearchPlaceholder => "Choose a track",
            Text::SearchExpired => "The selection timed out.",
        }
    }
}

/// Replace `{name}` placeholders in a catalogue template.
pub fn fill(template: &str, args: &[(&str, &dyn std::fmt::Display)]) -> String {
    args.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{name}}}"), &value.to_string())
    })
}
