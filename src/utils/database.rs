//! SQLite persistence for guild settings, user language preferences and play statistics.
//!
//! All statements run on the blocking thread pool so callers never stall the
//! async runtime while SQLite holds its file lock.

use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, GuildId, UserId};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::locale::Locale;
use super::settings::{GuildSettings, GuildSettingsPatch, SettingsRepository};
use super::statistics::{PlayEvent, StatsSink};
use crate::commands::music::utils::audio_session::LoopMode;

/// Errors raised by the persistent store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Database connection lock poisoned")]
    Poisoned,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS guild_settings (
        guild_id INTEGER PRIMARY KEY,
        volume INTEGER NOT NULL DEFAULT 20,
        loop_mode INTEGER NOT NULL DEFAULT 0,
        shuffle BOOLEAN NOT NULL DEFAULT 0,
        language TEXT NOT NULL DEFAULT 'ko',
        auto_delete_channel_id INTEGER,
        auto_delete BOOLEAN NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS user_settings (
        user_id INTEGER PRIMARY KEY,
        language TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS play_statistics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        date TEXT NOT NULL,
        time TEXT NOT NULL,
        guild_id INTEGER NOT NULL,
        guild_name TEXT NOT NULL,
        channel_id INTEGER NOT NULL,
        channel_name TEXT NOT NULL,
        user_id INTEGER NOT NULL,
        user_name TEXT NOT NULL,
        track_title TEXT,
        track_uri TEXT,
        track_identifier TEXT,
        success BOOLEAN NOT NULL,
        created_at TEXT NOT NULL
    );
";

/// Handle to the application database. Cloning shares the same connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and make sure every table exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut conn).map_err(StoreError::from)
        })
        .await?
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[async_trait]
impl SettingsRepository for SqliteStore {
    async fn load_guild_settings(
        &self,
        guild_id: GuildId,
    ) -> Result<Option<GuildSettings>, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT volume, loop_mode, shuffle, language, auto_delete_channel_id, auto_delete
                 FROM guild_settings WHERE guild_id = ?1",
                params![guild_id.get()],
                |row| {
                    let language: String = row.get(3)?;
                    let channel: Option<u64> = row.get(4)?;
                    Ok(GuildSettings {
                        volume: row.get(0)?,
                        loop_mode: LoopMode::from_index(row.get(1)?),
                        shuffle: row.get(2)?,
                        language: Locale::from_tag(&language).unwrap_or_default(),
                        auto_delete_channel: channel.filter(|id| *id != 0).map(ChannelId::new),
                        auto_delete: row.get(5)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    async fn upsert_guild_settings(
        &self,
        guild_id: GuildId,
        patch: GuildSettingsPatch,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO guild_settings (guild_id, updated_at) VALUES (?1, ?2)
                 ON CONFLICT(guild_id) DO UPDATE SET updated_at = excluded.updated_at",
                params![guild_id.get(), now()],
            )?;
            tx.execute(
                "UPDATE guild_settings SET
                    volume = COALESCE(?2, volume),
                    loop_mode = COALESCE(?3, loop_mode),
                    shuffle = COALESCE(?4, shuffle),
                    language = COALESCE(?5, language),
                    auto_delete = COALESCE(?6, auto_delete)
                 WHERE guild_id = ?1",
                params![
                    guild_id.get(),
                    patch.volume,
                    patch.loop_mode.map(LoopMode::index),
                    patch.shuffle,
                    patch.language.map(Locale::tag),
                    patch.auto_delete,
                ],
            )?;
            if let Some(channel) = patch.auto_delete_channel {
                tx.execute(
                    "UPDATE guild_settings SET auto_delete_channel_id = ?2 WHERE guild_id = ?1",
                    params![guild_id.get(), channel.map(|id| id.get())],
                )?;
            }
            tx.commit()
        })
        .await
    }

    async fn load_user_language(&self, user_id: UserId) -> Result<Option<Locale>, StoreError> {
        let language: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT language FROM user_settings WHERE user_id = ?1",
                    params![user_id.get()],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;
        Ok(language.as_deref().and_then(Locale::from_tag))
    }

    async fn store_user_language(&self, user_id: UserId, language: Locale) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO user_settings (user_id, language, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                    language = excluded.language,
                    updated_at = excluded.updated_at",
                params![user_id.get(), language.tag(), now()],
            )
            .map(|_| ())
        })
        .await
    }
}

#[async_trait]
impl StatsSink for SqliteStore {
    async fn insert_batch(&self, events: Vec<PlayEvent>) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut statement = tx.prepare(
                    "INSERT INTO play_statistics (
                        date, time, guild_id, guild_name, channel_id, channel_name,
                        user_id, user_name, track_title, track_uri, track_identifier,
                        success, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                )?;
                for event in &events {
                    statement.execute(params![
                        event.created_at.format("%Y-%m-%d").to_string(),
                        event.created_at.format("%H:%M:%S").to_string(),
                        event.guild_id.get(),
                        event.guild_name,
                        event.channel_id.get(),
                        event.channel_name,
                        event.user_id.get(),
                        event.user_name,
                        event.track_title,
                        event.track_uri,
                        event.track_identifier,
                        event.success,
                        event.created_at.to_rfc3339(),
                    ])?;
                }
            }
            tx.commit()
        })
        .await
    }
}
