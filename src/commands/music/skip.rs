use super::*;
use crate::utils::locale::Text;

/// Skip the currently playing song
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn skip(ctx: Context<'_>) -> CommandResult {
    let locale = locale(ctx).await;
    let result = match caller(ctx) {
        Ok(caller) => ctx.data().music.skip(&caller).await,
        Err(e) => Err(e),
    };
    respond(ctx, locale, result.map(|()| Text::Skipped.get(locale).to_string())).await
}

/// Stop the music, clear the queue and leave the voice channel
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn stop(ctx: Context<'_>) -> CommandResult {
    let locale = locale(ctx).await;
    let result = match caller(ctx) {
        Ok(caller) => ctx.data().music.stop(&caller).await,
        Err(e) => Err(e),
    };
    respond(ctx, locale, result.map(|()| Text::Stopped.get(locale).to_string())).await
}
