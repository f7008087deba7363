use super::*;
use crate::utils::locale::{Text, fill};

/// Remove a track from the queue by its position
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Position of the track to remove (1-based)"] position: usize,
) -> CommandResult {
    let locale = locale(ctx).await;
    let result = match caller(ctx) {
        Ok(caller) => ctx.data().music.remove(&caller, position).await,
        Err(e) => Err(e),
    };

    let message = result.map(|track| fill(Text::Removed.get(locale), &[("title", &track.title)]));
    respond(ctx, locale, message).await
}

/// Move a queued track to another position
#[poise::command(slash_command, guild_only, rename = "move", category = "Music")]
pub async fn move_track(
    ctx: Context<'_>,
    #[description = "Current position (1-based)"] from: usize,
    #[description = "New position (1-based)"] to: usize,
) -> CommandResult {
    let locale = locale(ctx).await;
    let result = match caller(ctx) {
        Ok(caller) => ctx.data().music.move_track(&caller, from, to).await,
        Err(e) => Err(e),
    };

    let message = result.map(|track| fill(Text::Moved.get(locale), &[("title", &track.title), ("to", &to)]));
    respond(ctx, locale, message).await
}
