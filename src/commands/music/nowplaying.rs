use super::*;
use crate::utils::locale::Text;

/// Post the player again at the bottom of this channel
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn nowplaying(ctx: Context<'_>) -> CommandResult {
    let locale = locale(ctx).await;
    let result = match caller(ctx) {
        Ok(caller) => ctx.data().music.now_playing(&caller).await,
        Err(e) => Err(e),
    };
    respond(ctx, locale, result.map(|()| Text::NowPlaying.get(locale).to_string())).await
}
