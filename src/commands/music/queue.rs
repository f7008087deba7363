use super::*;

/// Show the queue
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn queue(ctx: Context<'_>) -> CommandResult {
    let locale = locale(ctx).await;
    let Some(guild_id) = ctx.guild_id() else {
        return respond(ctx, locale, Err(MusicError::NotInGuild)).await;
    };

    let state = match ctx.data().music.queue(guild_id).await {
        Ok(state) => state,
        Err(e) => return respond(ctx, locale, Err(e)).await,
    };

    let pages = embedded_messages::queue_pages(&state, locale);
    let pages: Vec<&str> = pages.iter().map(String::as_str).collect();
    poise::builtins::paginate(ctx, &pages).await?;
    Ok(())
}
