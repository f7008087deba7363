use std::sync::Arc;

pub mod commands;
pub mod config;
pub mod utils;

use commands::music::utils::music_manager::MusicManager;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
pub type CommandResult = Result<(), Error>;

// User data, which is stored and accessible in all command invocations
pub struct Data {
    pub music: Arc<MusicManager>,
}

/// Every slash command the bot registers.
pub fn all_commands() -> Vec<poise::Command<Data, Error>> {
    use commands::general::language::*;
    use commands::music::{
        autodelete::*, connect::*, modes::*, nowplaying::*, pause::*, play::*, queue::*, remove::*,
        seek::*, skip::*,
    };

    vec![
        help(),
        register(),
        language(),
        connect(),
        play(),
        search(),
        pause(),
        skip(),
        stop(),
        repeat(),
        shuffle(),
        volume(),
        seek(),
        remove(),
        move_track(),
        queue(),
        nowplaying(),
        autodelete(),
    ]
}

#[poise::command(slash_command, category = "General")]
async fn help(
    ctx: Context<'_>,
    #[description = "Specific command to show help about"]
    #[autocomplete = "poise::builtins::autocomplete_command"]
    command: Option<String>,
) -> CommandResult {
    poise::builtins::help(
        ctx,
        command.as_deref(),
        poise::builtins::HelpConfiguration {
            show_context_menu_commands: true,
            ..Default::default()
        },
    )
    .await
    .map_err(|e| e.into())
}

#[poise::command(prefix_command, hide_in_help)]
async fn register(ctx: Context<'_>) -> Result<(), Error> {
    poise::builtins::register_application_commands_buttons(ctx)
        .await
        .map_err(|e| e.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn command_names_are_unique() {
        let commands = all_commands();
        let mut names: Vec<&str> = commands.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        let count = names.len();
        names.dedup();
        assert_eq!(names.len(), count);
    }

    #[test]
    fn nowplaying_is_a_music_command() {
        let commands = all_commands();
        let nowplaying = commands
            .iter()
            .find(|c| c.name == "nowplaying")
            .expect("registered");
        assert_eq!(nowplaying.category.as_deref(), Some("Music"));
        assert!(nowplaying.guild_only);
    }
}
