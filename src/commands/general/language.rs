use poise::ChoiceParameter;
use tracing::{info, warn};

use crate::commands::music::utils::embedded_messages;
use crate::utils::locale::{Locale, Text};
use crate::{CommandResult, Context};

#[derive(Debug, Clone, Copy, ChoiceParameter)]
pub enum LanguageChoice {
    #[name = "한국어"]
    Korean,
    #[name = "English"]
    English,
}

impl From<LanguageChoice> for Locale {
    fn from(choice: LanguageChoice) -> Self {
        match choice {
            LanguageChoice::Korean => Locale::Ko,
            LanguageChoice::English => Locale::En,
        }
    }
}

/// Choose the language the bot answers you in
#[poise::command(slash_command, category = "General")]
pub async fn language(
    ctx: Context<'_>,
    #[description = "Language"] language: LanguageChoice,
) -> CommandResult {
    let locale = Locale::from(language);
    let settings = ctx.data().music.settings();

    let reply = match settings.set_user_language(ctx.author().id, locale).await {
        Ok(()) => {
            info!("{} switched language to {}", ctx.author().name, locale.tag());
            embedded_messages::success_reply(Text::LanguageSet.get(locale))
        }
        Err(e) => {
            warn!("Failed to store language for {}: {}", ctx.author().name, e);
            let current = ctx
                .data()
                .music
                .locale_for(ctx.guild_id(), Some(ctx.author().id))
                .await;
            embedded_messages::error_reply(current, Text::SettingsUnavailable.get(current))
        }
    };
    ctx.send(reply).await?;
    Ok(())
}
