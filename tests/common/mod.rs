//! Common test utilities, fixtures, and mocks
//! Each integration test crate pulls this in with `mod common;`

#![allow(dead_code)]

pub mod fixtures;
pub mod mocks;

use std::sync::{Arc, Once};
use std::time::Duration;

use ensemble::commands::music::utils::music_manager::{
    Caller, MusicLimits, MusicManager, MusicServices, Origin,
};
use ensemble::utils::database::SqliteStore;
use ensemble::utils::settings::SettingsStore;
use ensemble::utils::statistics::{StatsBuffer, StatsPolicy};
use poise::serenity_prelude::UserId;

use fixtures::{GUILD, LISTENER, TEXT, VOICE};
use mocks::{FakeChat, FakeDirectory, FakeNode, FakeVoice};

static INIT: Once = Once::new();

/// Initialize tracing for tests
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("ensemble=debug")
            .with_test_writer()
            .try_init();
    });
}

/// An orchestrator wired to in-memory collaborators.
pub struct Harness {
    pub music: Arc<MusicManager>,
    pub node: Arc<FakeNode>,
    pub voice: Arc<FakeVoice>,
    pub chat: Arc<FakeChat>,
    pub directory: Arc<FakeDirectory>,
    pub settings: Arc<SettingsStore>,
    pub stats: Arc<StatsBuffer>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_limits(MusicLimits::default())
    }

    pub fn with_limits(limits: MusicLimits) -> Self {
        init_tracing();

        let store = Arc::new(SqliteStore::open_in_memory().expect("in-memory database"));
        let settings = Arc::new(SettingsStore::new(store.clone(), Duration::from_secs(60)));
        let stats = Arc::new(StatsBuffer::new(
            store,
            StatsPolicy {
                batch_size: 1_000,
                flush_interval: Duration::from_secs(3_600),
                buffer_cap: 1_000,
            },
        ));

        let node = Arc::new(FakeNode::default());
        let voice = Arc::new(FakeVoice::default());
        let chat = Arc::new(FakeChat::default());
        let directory = Arc::new(FakeDirectory::new(GUILD));
        directory.join(LISTENER, VOICE);

        let music = Arc::new(MusicManager::new(
            MusicServices {
                node: node.clone(),
                voice: voice.clone(),
                chat: chat.clone(),
                directory: directory.clone(),
                settings: settings.clone(),
                stats: stats.clone(),
            },
            limits,
        ));

        Self {
            music,
            node,
            voice,
            chat,
            directory,
            settings,
            stats,
        }
    }

    /// The default listener issuing a slash command from the text channel.
    pub fn caller(&self) -> Caller {
        self.caller_as(LISTENER, Origin::Slash)
    }

    pub fn caller_as(&self, user_id: UserId, origin: Origin) -> Caller {
        Caller {
            guild_id: GUILD,
            user_id,
            user_name: format!("user-{user_id}"),
            text_channel_id: (origin != Origin::Bus).then_some(TEXT),
            origin,
        }
    }

    /// Queue tracks `1..=count` through `play`, each resolved as a search hit.
    pub async fn play_tracks(&self, count: u32) {
        for n in 1..=count {
            let query = format!("song {n}");
            self.node.add_result(
                &format!("ytsearch:{query}"),
                fixtures::search_result(vec![fixtures::track(n)]),
            );
            self.music
                .play(&self.caller(), &query)
                .await
                .expect("play succeeds");
        }
    }

    /// Deliver the node's track-start for whatever is current.
    pub async fn start_current(&self) {
        let state = self.music.queue(GUILD).await.expect("session exists");
        let current = state.current.expect("a track is current");
        self.music.on_track_start(GUILD, &current.encoded).await;
    }
}
