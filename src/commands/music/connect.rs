use super::*;
use crate::utils::locale::{Text, fill};

/// Join your voice channel
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn connect(ctx: Context<'_>) -> CommandResult {
    let locale = locale(ctx).await;
    let result = match caller(ctx) {
        Ok(caller) => ctx.data().music.connect(&caller).await,
        Err(e) => Err(e),
    };

    let message = result.map(|outcome| {
        if outcome.joined {
            let channel = format!("<#{}>", outcome.channel_id);
            fill(Text::Connected.get(locale), &[("channel", &channel)])
        } else {
            Text::AlreadyConnected.get(locale).to_string()
        }
    });
    respond(ctx, locale, message).await
}
