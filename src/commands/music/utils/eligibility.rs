//! Who may issue a playback command, and from where.

use poise::serenity_prelude::{Cache, ChannelId, GuildId, UserId};
use std::sync::Arc;

use super::audio_session::GuildPlaybackState;
use super::music_manager::{Caller, MusicError, Origin};

/// What the bot is allowed to do in a voice channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceAccess {
    pub connect: bool,
    pub speak: bool,
    pub move_members: bool,
    /// `None` or `Some(0)` means unlimited.
    pub user_limit: Option<u32>,
    pub occupants: usize,
}

impl VoiceAccess {
    pub fn has_room(&self) -> bool {
        match self.user_limit {
            Some(limit) if limit > 0 => self.occupants < limit as usize || self.move_members,
            _ => true,
        }
    }
}

/// Read-only view of guild membership, voice state and permissions.
pub trait VoiceDirectory: Send + Sync {
    fn bot_user_id(&self) -> UserId;

    /// Whether this process can see the guild.
    fn manages_guild(&self, guild_id: GuildId) -> bool;

    fn user_voice_channel(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId>;

    /// Non-bot users currently in `channel_id`.
    fn humans_in_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> Vec<UserId>;

    fn bot_voice_access(&self, guild_id: GuildId, channel_id: ChannelId) -> Option<VoiceAccess>;

    /// Whether the bot can post embeds in a text channel.
    fn can_post(&self, guild_id: GuildId, channel_id: ChannelId) -> bool;

    fn guild_name(&self, guild_id: GuildId) -> Option<String>;

    fn channel_name(&self, guild_id: GuildId, channel_id: ChannelId) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// The command only makes sense with a live session.
    ExistingSession,
    /// The command may create a session and join the caller's channel.
    MayJoin,
}

/// Check whether `caller` may run a command against the current session.
///
/// Returns the voice channel the command applies to. Nothing is mutated
/// here; a rejected command leaves every piece of state untouched.
pub fn check(
    directory: &dyn VoiceDirectory,
    caller: &Caller,
    session: Option<&GuildPlaybackState>,
    requirement: Requirement,
) -> Result<ChannelId, MusicError> {
    let connected_channel = session
        .filter(|state| state.is_connected)
        .and_then(|state| state.voice_channel_id);

    if requirement == Requirement::ExistingSession && connected_channel.is_none() {
        return Err(MusicError::NoSession);
    }

    if let Some(bot_channel) = connected_channel {
        return match caller.origin {
            Origin::Bus => {
                // no interaction snapshot on the bus, so look at live membership
                if directory
                    .humans_in_channel(caller.guild_id, bot_channel)
                    .contains(&caller.user_id)
                {
                    Ok(bot_channel)
                } else if directory
                    .user_voice_channel(caller.guild_id, caller.user_id)
                    .is_some()
                {
                    Err(MusicError::WrongChannel)
                } else {
                    Err(MusicError::UserNotInVoice)
                }
            }
            Origin::Slash | Origin::Component | Origin::Message => {
                let user_channel = directory
                    .user_voice_channel(caller.guild_id, caller.user_id)
                    .ok_or(MusicError::UserNotInVoice)?;
                if user_channel == bot_channel {
                    Ok(bot_channel)
                } else {
                    Err(MusicError::WrongChannel)
                }
            }
        };
    }

    let user_channel = directory
        .user_voice_channel(caller.guild_id, caller.user_id)
        .ok_or(MusicError::UserNotInVoice)?;
    let access = directory
        .bot_voice_access(caller.guild_id, user_channel)
        .ok_or(MusicError::MissingPermissions)?;
    if !access.connect || !access.speak {
        return Err(MusicError::MissingPermissions);
    }
    if !access.has_room() {
        return Err(MusicError::ChannelFull);
    }
    Ok(user_channel)
}

/// [`VoiceDirectory`] backed by the gateway cache.
pub struct CacheDirectory {
    cache: Arc<Cache>,
}

impl CacheDirectory {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }
}

impl VoiceDirectory for CacheDirectory {
    fn bot_user_id(&self) -> UserId {
        self.cache.current_user().id
    }

    fn manages_guild(&self, guild_id: GuildId) -> bool {
        self.cache.guild(guild_id).is_some()
    }

    fn user_voice_channel(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
        self.cache
            .guild(guild_id)?
            .voice_states
            .get(&user_id)?
            .channel_id
    }

    fn humans_in_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> Vec<UserId> {
        let Some(guild) = self.cache.guild(guild_id) else {
            return Vec::new();
        };
        guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel_id))
            .filter(|state| {
                let is_bot = guild
                    .members
                    .get(&state.user_id)
                    .map(|member| member.user.bot)
                    .or_else(|| state.member.as_ref().map(|member| member.user.bot))
                    .unwrap_or(false);
                !is_bot
            })
            .map(|state| state.user_id)
            .collect()
    }

    fn bot_voice_access(&self, guild_id: GuildId, channel_id: ChannelId) -> Option<VoiceAccess> {
        let bot_id = self.cache.current_user().id;
        let guild = self.cache.guild(guild_id)?;
        let channel = guild.channels.get(&channel_id)?;
        let member = guild.members.get(&bot_id)?;
        let permissions = guild.user_permissions_in(channel, member);
        let occupants = guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel_id))
            .count();

        Some(VoiceAccess {
            connect: permissions.connect(),
            speak: permissions.speak(),
            move_members: permissions.move_members(),
            user_limit: channel.user_limit,
            occupants,
        })
    }

    fn can_post(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        let bot_id = self.cache.current_user().id;
        let Some(guild) = self.cache.guild(guild_id) else {
            return false;
        };
        let (Some(channel), Some(member)) = (guild.channels.get(&channel_id), guild.members.get(&bot_id))
        else {
            return false;
        };
        let permissions = guild.user_permissions_in(channel, member);
        permissions.view_channel() && permissions.send_messages() && permissions.embed_links()
    }

    fn guild_name(&self, guild_id: GuildId) -> Option<String> {
        self.cache.guild(guild_id).map(|guild| guild.name.clone())
    }

    fn channel_name(&self, guild_id: GuildId, channel_id: ChannelId) -> Option<String> {
        self.cache
            .guild(guild_id)?
            .channels
            .get(&channel_id)
            .map(|channel| channel.name.clone())
    }
}
