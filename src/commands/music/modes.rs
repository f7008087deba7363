use super::*;
use crate::commands::music::utils::embedded_messages::loop_label;
use crate::utils::locale::{Text, fill};

/// Cycle the loop mode: off, track, queue
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn repeat(ctx: Context<'_>) -> CommandResult {
    let locale = locale(ctx).await;
    let result = match caller(ctx) {
        Ok(caller) => ctx.data().music.repeat(&caller).await,
        Err(e) => Err(e),
    };

    let message = result.map(|mode| fill(Text::LoopChanged.get(locale), &[("mode", &loop_label(mode, locale))]));
    respond(ctx, locale, message).await
}

/// Toggle shuffle
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn shuffle(ctx: Context<'_>) -> CommandResult {
    let locale = locale(ctx).await;
    let result = match caller(ctx) {
        Ok(caller) => ctx.data().music.shuffle(&caller).await,
        Err(e) => Err(e),
    };

    let message = result.map(|enabled| {
        if enabled {
            Text::ShuffleOn.get(locale).to_string()
        } else {
            Text::ShuffleOff.get(locale).to_string()
        }
    });
    respond(ctx, locale, message).await
}

/// Set the playback volume
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn volume(
    ctx: Context<'_>,
    #[description = "New volume"] volume: i64,
) -> CommandResult {
    let locale = locale(ctx).await;
    let result = match caller(ctx) {
        Ok(caller) => ctx.data().music.volume(&caller, volume).await,
        Err(e) => Err(e),
    };

    let message = result.map(|volume| fill(Text::VolumeSet.get(locale), &[("volume", &volume)]));
    respond(ctx, locale, message).await
}
