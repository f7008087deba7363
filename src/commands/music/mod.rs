pub mod autodelete;
pub mod connect;
pub mod modes;
pub mod nowplaying;
pub mod pause;
pub mod play;
pub mod queue;
pub mod remove;
pub mod seek;
pub mod skip;

pub mod utils;

use crate::{CommandResult, Context};
use poise::CreateReply;
use tracing::error;

use crate::utils::locale::Locale;
use utils::embedded_messages;
use utils::music_manager::{Caller, MusicError, MusicResult, Origin};

/// The invoking user, or `NotInGuild` outside a server.
fn caller(ctx: Context<'_>) -> MusicResult<Caller> {
    let guild_id = ctx.guild_id().ok_or(MusicError::NotInGuild)?;
    Ok(Caller {
        guild_id,
        user_id: ctx.author().id,
        user_name: ctx.author().name.clone(),
        text_channel_id: Some(ctx.channel_id()),
        origin: Origin::Slash,
    })
}

async fn locale(ctx: Context<'_>) -> Locale {
    ctx.data()
        .music
        .locale_for(ctx.guild_id(), Some(ctx.author().id))
        .await
}

/// User mistakes are only answered; backend failures are also logged.
fn log_failure(ctx: Context<'_>, err: &MusicError) {
    if matches!(err, MusicError::Node(_) | MusicError::Store(_) | MusicError::JoinError(_)) {
        error!("/{} failed for {}: {}", ctx.command().name, ctx.author().name, err);
    }
}

fn failure_reply(ctx: Context<'_>, locale: Locale, err: &MusicError) -> CreateReply {
    log_failure(ctx, err);
    embedded_messages::error_reply(locale, &err.localized(locale))
}

/// Send exactly one reply: the confirmation or the localized failure.
async fn respond(ctx: Context<'_>, locale: Locale, result: MusicResult<String>) -> CommandResult {
    let reply = match result {
        Ok(message) => embedded_messages::success_reply(&message),
        Err(e) => failure_reply(ctx, locale, &e),
    };
    ctx.send(reply).await?;
    Ok(())
}
