use serenity::all::{
    ButtonStyle, CreateActionRow, CreateButton, CreateSelectMenu, CreateSelectMenuKind,
    CreateSelectMenuOption, ReactionType,
};

use super::audio_session::{GuildPlaybackState, LoopMode, Track};
use super::embedded_messages::track_length;
use crate::utils::locale::{Locale, Text};

/// Volume change applied by the volume buttons.
pub const VOLUME_STEP: u16 = 10;

const PREFIX: &str = "player:";

/// A button on the now-playing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerControl {
    PauseResume,
    Skip,
    Stop,
    Loop,
    Shuffle,
    VolumeDown,
    VolumeUp,
}

impl PlayerControl {
    pub fn custom_id(self) -> &'static str {
        match self {
            PlayerControl::PauseResume => "player:pause",
            PlayerControl::Skip => "player:skip",
            PlayerControl::Stop => "player:stop",
            PlayerControl::Loop => "player:loop",
            PlayerControl::Shuffle => "player:shuffle",
            PlayerControl::VolumeDown => "player:volume_down",
            PlayerControl::VolumeUp => "player:volume_up",
        }
    }

    pub fn from_custom_id(id: &str) -> Option<Self> {
        let control = match id.strip_prefix(PREFIX)? {
            "pause" => PlayerControl::PauseResume,
            "skip" => PlayerControl::Skip,
            "stop" => PlayerControl::Stop,
            "loop" => PlayerControl::Loop,
            "shuffle" => PlayerControl::Shuffle,
            "volume_down" => PlayerControl::VolumeDown,
            "volume_up" => PlayerControl::VolumeUp,
            _ => return None,
        };
        Some(control)
    }
}

fn button(control: PlayerControl, emoji: &str, style: ButtonStyle) -> CreateButton {
    CreateButton::new(control.custom_id())
        .emoji(ReactionType::Unicode(emoji.to_string()))
        .style(style)
}

/// Creates the control rows for the now-playing message based on player state
pub fn player_controls(state: &GuildPlaybackState) -> Vec<CreateActionRow> {
    let idle = state.current.is_none();

    let play_pause = button(
        PlayerControl::PauseResume,
        if state.is_paused { "▶️" } else { "⏸️" },
        ButtonStyle::Primary,
    )
    .disabled(idle);

    let skip = button(PlayerControl::Skip, "⏭️", ButtonStyle::Secondary).disabled(idle);
    let stop = button(PlayerControl::Stop, "⏹️", ButtonStyle::Danger);

    let loop_emoji = match state.loop_mode {
        LoopMode::Off | LoopMode::Queue => "🔁",
        LoopMode::Track => "🔂",
    };
    let repeat = button(
        PlayerControl::Loop,
        loop_emoji,
        if state.loop_mode == LoopMode::Off {
            ButtonStyle::Secondary
        } else {
            ButtonStyle::Success
        },
    );

    let shuffle = button(
        PlayerControl::Shuffle,
        "🔀",
        if state.shuffle {
            ButtonStyle::Success
        } else {
            ButtonStyle::Secondary
        },
    );

    let volume_down = button(PlayerControl::VolumeDown, "🔉", ButtonStyle::Secondary);
    let volume_up = button(PlayerControl::VolumeUp, "🔊", ButtonStyle::Secondary);

    vec![
        CreateActionRow::Buttons(vec![play_pause, skip, stop]),
        CreateActionRow::Buttons(vec![repeat, shuffle, volume_down, volume_up]),
    ]
}

/// Select menu listing search results. Option values are indices into `tracks`.
pub fn search_menu(custom_id: &str, tracks: &[Track], locale: Locale) -> Vec<CreateActionRow> {
    let options = tracks
        .iter()
        .enumerate()
        .map(|(index, track)| {
            let mut label: String = track.title.chars().take(95).collect();
            if label.is_empty() {
                label = format!("#{}", index + 1);
            }
            let description: String = format!("{} · {}", track.author, track_length(track, locale))
                .chars()
                .take(100)
                .collect();
            CreateSelectMenuOption::new(label, index.to_string()).description(description)
        })
        .collect();

    let menu = CreateSelectMenu::new(custom_id, CreateSelectMenuKind::String { options })
        .placeholder(Text::SearchPlaceholder.get(locale))
        .min_values(1)
        .max_values(1);

    vec![CreateActionRow::SelectMenu(menu)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(PlayerControl::PauseResume)]
    #[test_case(PlayerControl::Skip)]
    #[test_case(PlayerControl::Stop)]
    #[test_case(PlayerControl::Loop)]
    #[test_case(PlayerControl::Shuffle)]
    #[test_case(PlayerControl::VolumeDown)]
    #[test_case(PlayerControl::VolumeUp)]
    fn custom_ids_parse_back(control: PlayerControl) {
        assert_eq!(PlayerControl::from_custom_id(control.custom_id()), Some(control));
    }

    #[test]
    fn foreign_ids_are_ignored() {
        assert_eq!(PlayerControl::from_custom_id("music_play_pause"), None);
        assert_eq!(PlayerControl::from_custom_id("player:rewind"), None);
    }
}
