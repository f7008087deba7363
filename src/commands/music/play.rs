use super::*;
use crate::commands::music::utils::button_controls;
use crate::utils::locale::Text;
use poise::serenity_prelude::{
    ComponentInteractionCollector, ComponentInteractionDataKind, CreateInteractionResponse,
    CreateInteractionResponseMessage,
};
use std::time::Duration;
use tracing::{debug, info};

/// How long the search picker accepts a selection.
const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Play a song from a URL or search query
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn play(
    ctx: Context<'_>,
    #[description = "URL or search query"] query: String,
) -> CommandResult {
    info!("Received play command with query: {}", query);
    let locale = locale(ctx).await;
    let caller = match caller(ctx) {
        Ok(caller) => caller,
        Err(e) => return respond(ctx, locale, Err(e)).await,
    };

    // Resolving can take a while
    ctx.defer_ephemeral().await?;

    let result = ctx.data().music.play(&caller, &query).await;
    respond(ctx, locale, result.map(|outcome| outcome.localized(locale))).await
}

/// Search for a track and pick one from the results
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn search(
    ctx: Context<'_>,
    #[description = "What to search for"] query: String,
) -> CommandResult {
    let locale = locale(ctx).await;
    let caller = match caller(ctx) {
        Ok(caller) => caller,
        Err(e) => return respond(ctx, locale, Err(e)).await,
    };

    ctx.defer_ephemeral().await?;

    let music = &ctx.data().music;
    let tracks = match music.search(&caller, &query).await {
        Ok(tracks) => tracks,
        Err(e) => return respond(ctx, locale, Err(e)).await,
    };

    let custom_id = format!("search:{}", ctx.id());
    let handle = ctx
        .send(
            CreateReply::default()
                .content(Text::SearchPrompt.get(locale))
                .components(button_controls::search_menu(&custom_id, &tracks, locale))
                .ephemeral(true),
        )
        .await?;

    let Some(selection) = ComponentInteractionCollector::new(ctx.serenity_context())
        .author_id(ctx.author().id)
        .channel_id(ctx.channel_id())
        .custom_ids(vec![custom_id])
        .timeout(SEARCH_TIMEOUT)
        .await
    else {
        debug!("Search picker for {} expired", ctx.author().name);
        handle.delete(ctx).await?;
        return Ok(());
    };

    let picked = match &selection.data.kind {
        ComponentInteractionDataKind::StringSelect { values } => values
            .first()
            .and_then(|value| value.parse::<usize>().ok())
            .and_then(|index| tracks.get(index))
            .cloned(),
        _ => None,
    };

    let message = match picked {
        Some(track) => match music.play_selected(&caller, track).await {
            Ok(outcome) => outcome.localized(locale),
            Err(e) => {
                log_failure(ctx, &e);
                e.localized(locale)
            }
        },
        None => MusicError::NothingFound.localized(locale),
    };

    selection
        .create_response(
            ctx,
            CreateInteractionResponse::UpdateMessage(
                CreateInteractionResponseMessage::new()
                    .content(message)
                    .components(Vec::new()),
            ),
        )
        .await?;
    Ok(())
}
