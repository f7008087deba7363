use super::*;
use crate::commands::music::utils::format_duration;
use crate::commands::music::utils::music_manager::SeekTarget;
use crate::utils::locale::{Text, fill};
use std::time::Duration;

/// Jump to a position in the current track
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn seek(
    ctx: Context<'_>,
    #[description = "Time like 1:30, or +10 / -15 to move relative"] position: String,
) -> CommandResult {
    let locale = locale(ctx).await;
    let result = match (caller(ctx), position.parse::<SeekTarget>()) {
        (Ok(caller), Ok(target)) => ctx.data().music.seek(&caller, target).await,
        (Err(e), _) | (_, Err(e)) => Err(e),
    };

    let message = result.map(|applied| {
        let position = format_duration(Duration::from_millis(applied));
        fill(Text::Seeked.get(locale), &[("position", &position)])
    });
    respond(ctx, locale, message).await
}
