use poise::{CreateReply, serenity_prelude as serenity};
use serenity::all::CreateEmbed;
use std::time::Duration;

use super::audio_session::{GuildPlaybackState, LoopMode, Track};
use super::format_duration;
use crate::utils::locale::{Locale, Text, fill};

const COLOR_PLAYING: u32 = 0x00ff00;
const COLOR_PAUSED: u32 = 0xffa500;
const COLOR_ERROR: u32 = 0xff0000;

/// Number of upcoming tracks listed under the now-playing embed.
const UP_NEXT_PREVIEW: usize = 3;

/// Entries per page of the queue view.
pub const QUEUE_PAGE_SIZE: usize = 10;

/// Everything needed to draw the now-playing message.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerView {
    pub state: GuildPlaybackState,
    pub locale: Locale,
}

/// Create a progress bar for the current track
fn format_progress_bar(position: Duration, total: Duration) -> String {
    const BAR_LENGTH: usize = 15;
    let progress = if total.as_secs() == 0 {
        0.0
    } else {
        (position.as_secs_f64() / total.as_secs_f64()).min(1.0)
    };

    let filled = (progress * BAR_LENGTH as f64).round() as usize;
    let empty = BAR_LENGTH - filled;

    format!("▬{}🔘{}▬", "▬".repeat(filled), "▬".repeat(empty))
}

pub fn track_length(track: &Track, locale: Locale) -> String {
    if track.is_stream {
        Text::Live.get(locale).to_string()
    } else {
        format_duration(Duration::from_millis(track.duration_ms))
    }
}

fn track_link(track: &Track) -> String {
    match &track.uri {
        Some(uri) => format!("[{}]({})", track.title, uri),
        None => track.title.clone(),
    }
}

pub fn loop_label(mode: LoopMode, locale: Locale) -> &'static str {
    match mode {
        LoopMode::Off => Text::LoopOff.get(locale),
        LoopMode::Track => Text::LoopTrack.get(locale),
        LoopMode::Queue => Text::LoopQueue.get(locale),
    }
}

fn on_off(enabled: bool, locale: Locale) -> &'static str {
    if enabled {
        Text::On.get(locale)
    } else {
        Text::Off.get(locale)
    }
}

/// The now-playing embed, rendered entirely from the given state.
pub fn now_playing(view: &PlayerView) -> CreateEmbed {
    let locale = view.locale;
    let state = &view.state;

    let mut embed = CreateEmbed::new()
        .title(Text::NowPlaying.get(locale))
        .color(if state.is_paused { COLOR_PAUSED } else { COLOR_PLAYING });

    if let Some(track) = &state.current {
        let mut description = format!("**{}**\n{}", track_link(track), track.author);
        if !track.is_stream && track.duration_ms > 0 {
            let position = Duration::from_millis(state.position_ms);
            let total = Duration::from_millis(track.duration_ms);
            description.push_str(&format!(
                "\n\n{} `{}/{}`",
                format_progress_bar(position, total),
                format_duration(position),
                format_duration(total)
            ));
        }
        embed = embed
            .description(description)
            .field(Text::Duration.get(locale), format!("`{}`", track_length(track, locale)), true);

        if let Some(requester) = track.requester {
            embed = embed.field(Text::Requester.get(locale), format!("<@{}>", requester), true);
        }
        if let Some(artwork) = &track.artwork_url {
            embed = embed.thumbnail(artwork);
        }
    } else {
        embed = embed.description(Text::NothingPlaying.get(locale));
    }

    embed = embed
        .field(Text::Volume.get(locale), format!("`{}`", state.volume), true)
        .field(Text::Loop.get(locale), format!("`{}`", loop_label(state.loop_mode, locale)), true)
        .field(Text::Shuffle.get(locale), format!("`{}`", on_off(state.shuffle, locale)), true);

    if !state.queue.is_empty() {
        let mut upcoming: Vec<String> = state
            .queue
            .iter()
            .take(UP_NEXT_PREVIEW)
            .enumerate()
            .map(|(index, track)| format!("`{}.` {}", index + 1, track.title))
            .collect();
        if state.queue.len() > UP_NEXT_PREVIEW {
            upcoming.push(format!("… +{}", state.queue.len() - UP_NEXT_PREVIEW));
        }
        embed = embed.field(Text::UpNext.get(locale), upcoming.join("\n"), false);
    }

    embed
}

/// One page of the queue view. `page` is 0-based.
pub fn queue_page(state: &GuildPlaybackState, locale: Locale, page: usize) -> String {
    let mut description = String::new();

    if let Some(track) = &state.current {
        description.push_str(&format!(
            "**{}**\n{} `{}`\n\n",
            Text::NowPlaying.get(locale),
            track_link(track),
            track_length(track, locale)
        ));
    }

    if state.queue.is_empty() {
        description.push_str(Text::QueueEmpty.get(locale));
        return description;
    }

    for (index, track) in state
        .queue
        .iter()
        .enumerate()
        .skip(page * QUEUE_PAGE_SIZE)
        .take(QUEUE_PAGE_SIZE)
    {
        description.push_str(&format!(
            "`{}.` {} `{}`\n",
            index + 1,
            track_link(track),
            track_length(track, locale)
        ));
    }

    let total: u64 = state
        .queue
        .iter()
        .filter(|track| !track.is_stream)
        .map(|track| track.duration_ms)
        .sum();
    if total > 0 {
        description.push_str(&format!(
            "\n**⏱️** `{}` · {}",
            format_duration(Duration::from_millis(total)),
            state.queue.len()
        ));
    }

    description
}

/// Split the queue into rendered pages for the paginator.
pub fn queue_pages(state: &GuildPlaybackState, locale: Locale) -> Vec<String> {
    let pages = state.queue.len().div_ceil(QUEUE_PAGE_SIZE).max(1);
    (0..pages)
        .map(|page| format!("## {}\n{}", Text::QueueTitle.get(locale), queue_page(state, locale, page)))
        .collect()
}

/// Ephemeral error reply with a single explanatory line
pub fn error_reply(locale: Locale, message: &str) -> CreateReply {
    CreateReply::default()
        .embed(
            CreateEmbed::new()
                .title(Text::ErrorTitle.get(locale))
                .description(message)
                .color(COLOR_ERROR),
        )
        .ephemeral(true)
}

/// Ephemeral confirmation reply
pub fn success_reply(message: &str) -> CreateReply {
    CreateReply::default()
        .embed(CreateEmbed::new().description(message).color(COLOR_PLAYING))
        .ephemeral(true)
}

/// Notice posted when a queued track fails during playback.
pub fn playback_failed(locale: Locale, title: &str, reason: &str) -> String {
    fill(
        Text::PlaybackFailed.get(locale),
        &[("title", &title), ("reason", &reason)],
    )
}
