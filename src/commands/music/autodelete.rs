use super::*;
use crate::utils::locale::{Text, fill};
use crate::utils::settings::GuildSettingsPatch;
use poise::serenity_prelude::ChannelId;
use tracing::info;

/// Turn this channel into a song request channel, or turn it off
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    category = "Music"
)]
pub async fn autodelete(
    ctx: Context<'_>,
    #[description = "Treat messages in this channel as song requests"] enabled: bool,
) -> CommandResult {
    let locale = locale(ctx).await;
    let Some(guild_id) = ctx.guild_id() else {
        return respond(ctx, locale, Err(MusicError::NotInGuild)).await;
    };

    let channel_id: ChannelId = ctx.channel_id();
    let patch = GuildSettingsPatch {
        auto_delete_channel: Some(enabled.then_some(channel_id)),
        auto_delete: Some(enabled),
        ..Default::default()
    };

    let result = ctx
        .data()
        .music
        .settings()
        .upsert_guild_settings(guild_id, patch)
        .await
        .map_err(MusicError::from)
        .map(|_| {
            info!("Request channel in guild {} set to {:?}", guild_id, enabled.then_some(channel_id));
            if enabled {
                let channel = format!("<#{}>", channel_id);
                fill(Text::AutoDeleteOn.get(locale), &[("channel", &channel)])
            } else {
                Text::AutoDeleteOff.get(locale).to_string()
            }
        });
    respond(ctx, locale, result).await
}
