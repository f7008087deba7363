use super::*;
use crate::utils::locale::Text;

/// Pause or resume the current track
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn pause(ctx: Context<'_>) -> CommandResult {
    let locale = locale(ctx).await;
    let result = match caller(ctx) {
        Ok(caller) => ctx.data().music.pause_resume(&caller).await,
        Err(e) => Err(e),
    };

    let message = result.map(|paused| {
        if paused {
            Text::Paused.get(locale).to_string()
        } else {
            Text::Resumed.get(locale).to_string()
        }
    });
    respond(ctx, locale, message).await
}
