use ::serenity::all::{ComponentInteraction, CreateInteractionResponseFollowup};
use poise::serenity_prelude::Context;
use tracing::{debug, error};

use super::button_controls::{PlayerControl, VOLUME_STEP};
use super::music_manager::{Caller, MusicError, MusicManager, MusicResult, Origin};

type ButtonInteractionResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Handle a click on one of the now-playing buttons.
///
/// Interactions with other custom ids are left alone so collectors waiting on
/// them still see them.
pub async fn handle_interaction(
    ctx: &Context,
    music: &MusicManager,
    interaction: &ComponentInteraction,
) -> ButtonInteractionResult {
    let Some(control) = PlayerControl::from_custom_id(&interaction.data.custom_id) else {
        return Ok(());
    };

    interaction.defer(&ctx.http).await?;

    let Some(guild_id) = interaction.guild_id else {
        let locale = music.locale_for(None, Some(interaction.user.id)).await;
        return error_followup(ctx, interaction, &MusicError::NotInGuild.localized(locale)).await;
    };

    let caller = Caller {
        guild_id,
        user_id: interaction.user.id,
        user_name: interaction.user.name.clone(),
        text_channel_id: Some(interaction.channel_id),
        origin: Origin::Component,
    };
    debug!("Button {:?} pressed by {} in guild {}", control, caller.user_name, guild_id);

    if let Err(e) = apply(music, &caller, control).await {
        let locale = music.locale_for(Some(guild_id), Some(caller.user_id)).await;
        if matches!(e, MusicError::Node(_) | MusicError::Store(_) | MusicError::JoinError(_)) {
            error!("Button {:?} failed in guild {}: {}", control, guild_id, e);
        }
        return error_followup(ctx, interaction, &e.localized(locale)).await;
    }
    Ok(())
}

/// Run the operation behind a button. The player message refresh happens
/// inside the orchestrator.
async fn apply(music: &MusicManager, caller: &Caller, control: PlayerControl) -> MusicResult<()> {
    match control {
        PlayerControl::PauseResume => {
            music.pause_resume(caller).await?;
        }
        PlayerControl::Skip => music.skip(caller).await?,
        PlayerControl::Stop => music.stop(caller).await?,
        PlayerControl::Loop => {
            music.repeat(caller).await?;
        }
        PlayerControl::Shuffle => {
            music.shuffle(caller).await?;
        }
        PlayerControl::VolumeDown | PlayerControl::VolumeUp => {
            let current = music.get_state(caller.guild_id).await.volume;
            music
                .volume(caller, stepped_volume(current, control, music.limits().max_volume))
                .await?;
        }
    }
    Ok(())
}

fn stepped_volume(current: u16, control: PlayerControl, max: u16) -> i64 {
    let next = match control {
        PlayerControl::VolumeUp => current.saturating_add(VOLUME_STEP),
        _ => current.saturating_sub(VOLUME_STEP),
    };
    i64::from(next.clamp(1, max.max(1)))
}

async fn error_followup(
    ctx: &Context,
    interaction: &ComponentInteraction,
    content: &str,
) -> ButtonInteractionResult {
    interaction
        .create_followup(
            &ctx.http,
            CreateInteractionResponseFollowup::new()
                .content(content)
                .ephemeral(true),
        )
        .await?;
    Ok(())
}
