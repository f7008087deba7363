//! Per-guild and per-user settings with a read-through cache.

use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::database::StoreError;
use super::locale::{Locale, LocaleContext};
use super::ttl_cache::TtlCache;
use crate::commands::music::utils::audio_session::LoopMode;

/// Volume a guild starts with before anyone changes it.
pub const DEFAULT_VOLUME: u16 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildSettings {
    pub volume: u16,
    pub loop_mode: LoopMode,
    pub shuffle: bool,
    pub language: Locale,
    pub auto_delete_channel: Option<ChannelId>,
    pub auto_delete: bool,
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            volume: DEFAULT_VOLUME,
            loop_mode: LoopMode::Off,
            shuffle: false,
            language: Locale::default(),
            auto_delete_channel: None,
            auto_delete: false,
        }
    }
}

/// A partial update. `None` leaves the stored column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuildSettingsPatch {
    pub volume: Option<u16>,
    pub loop_mode: Option<LoopMode>,
    pub shuffle: Option<bool>,
    pub language: Option<Locale>,
    pub auto_delete_channel: Option<Option<ChannelId>>,
    pub auto_delete: Option<bool>,
}

impl GuildSettingsPatch {
    fn apply_to(&self, settings: &mut GuildSettings) {
        if let Some(volume) = self.volume {
            settings.volume = volume;
        }
        if let Some(loop_mode) = self.loop_mode {
            settings.loop_mode = loop_mode;
        }
        if let Some(shuffle) = self.shuffle {
            settings.shuffle = shuffle;
        }
        if let Some(language) = self.language {
            settings.language = language;
        }
        if let Some(channel) = self.auto_delete_channel {
            settings.auto_delete_channel = channel;
        }
        if let Some(auto_delete) = self.auto_delete {
            settings.auto_delete = auto_delete;
        }
    }
}

/// Storage backend for settings. Implemented by the SQLite store and by test fakes.
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn load_guild_settings(&self, guild_id: GuildId)
    -> Result<Option<GuildSettings>, StoreError>;

    async fn upsert_guild_settings(
        &self,
        guild_id: GuildId,
        patch: GuildSettingsPatch,
    ) -> Result<(), StoreError>;

    async fn load_user_language(&self, user_id: UserId) -> Result<Option<Locale>, StoreError>;

    async fn store_user_language(&self, user_id: UserId, language: Locale)
    -> Result<(), StoreError>;
}

/// Settings access used by the rest of the bot.
///
/// Reads go through a TTL cache and fall back to defaults when the store is
/// unreachable. Writes invalidate the cached entry and report failures.
pub struct SettingsStore {
    repo: Arc<dyn SettingsRepository>,
    guilds: TtlCache<GuildId, GuildSettings>,
    users: TtlCache<UserId, Option<Locale>>,
}

impl SettingsStore {
    pub fn new(repo: Arc<dyn SettingsRepository>, ttl: Duration) -> Self {
        Self {
            repo,
            guilds: TtlCache::new(ttl),
            users: TtlCache::new(ttl),
        }
    }

    pub async fn get_guild_settings(&self, guild_id: GuildId) -> GuildSettings {
        if let Some(settings) = self.guilds.get(&guild_id) {
            return settings;
        }

        match self.repo.load_guild_settings(guild_id).await {
            Ok(stored) => {
                let settings = stored.unwrap_or_default();
                self.guilds.insert(guild_id, settings.clone());
                settings
            }
            Err(e) => {
                warn!("Falling back to default settings for guild {}: {}", guild_id, e);
                GuildSettings::default()
            }
        }
    }

    pub async fn upsert_guild_settings(
        &self,
        guild_id: GuildId,
        patch: GuildSettingsPatch,
    ) -> Result<GuildSettings, StoreError> {
        self.guilds.invalidate(&guild_id);
        let result = self.repo.upsert_guild_settings(guild_id, patch.clone()).await;
        // a read racing the write may have cached the old row
        self.guilds.invalidate(&guild_id);
        result?;

        let mut settings = self.get_guild_settings(guild_id).await;
        patch.apply_to(&mut settings);
        Ok(settings)
    }

    pub async fn get_user_language(&self, user_id: UserId) -> Option<Locale> {
        if let Some(language) = self.users.get(&user_id) {
            return language;
        }

        match self.repo.load_user_language(user_id).await {
            Ok(language) => {
                self.users.insert(user_id, language);
                language
            }
            Err(e) => {
                warn!("Could not load language for user {}: {}", user_id, e);
                None
            }
        }
    }

    pub async fn set_user_language(&self, user_id: UserId, language: Locale) -> Result<(), StoreError> {
        self.users.invalidate(&user_id);
        let result = self.repo.store_user_language(user_id, language).await;
        self.users.invalidate(&user_id);
        result
    }

    /// Resolve the language for a message: user preference, then guild, then default.
    pub async fn locale_context(
        &self,
        guild_id: Option<GuildId>,
        user_id: Option<UserId>,
    ) -> LocaleContext {
        let user_language = match user_id {
            Some(user_id) => self.get_user_language(user_id).await,
            None => None,
        };
        let locale = match (user_language, guild_id) {
            (Some(language), _) => language,
            (None, Some(guild_id)) => self.get_guild_settings(guild_id).await.language,
            (None, None) => Locale::default(),
        };
        LocaleContext::new(user_id, guild_id, locale)
    }
}
