//! Sample ids and tracks shared by the integration tests

use ensemble::commands::music::utils::audio_session::Track;
use ensemble::commands::music::utils::lavalink::{LoadResult, LoadType};
use poise::serenity_prelude::{ChannelId, GuildId, UserId};

pub const GUILD: GuildId = GuildId::new(1_000);
pub const OTHER_GUILD: GuildId = GuildId::new(2_000);
pub const BOT: UserId = UserId::new(1);
pub const LISTENER: UserId = UserId::new(10);
pub const OTHER_LISTENER: UserId = UserId::new(11);
pub const VOICE: ChannelId = ChannelId::new(100);
pub const OTHER_VOICE: ChannelId = ChannelId::new(101);
pub const TEXT: ChannelId = ChannelId::new(200);

pub fn track(n: u32) -> Track {
    Track {
        encoded: format!("enc-{n}"),
        identifier: format!("id-{n}"),
        title: format!("Track {n}"),
        author: "Artist".to_string(),
        uri: Some(format!("https://example.com/watch?v={n}")),
        artwork_url: None,
        duration_ms: 180_000,
        is_stream: false,
        is_seekable: true,
        requester: None,
    }
}

pub fn search_result(tracks: Vec<Track>) -> LoadResult {
    LoadResult {
        load_type: LoadType::Search,
        tracks,
        playlist_name: None,
        error: None,
    }
}

pub fn playlist_result(name: &str, tracks: Vec<Track>) -> LoadResult {
    LoadResult {
        load_type: LoadType::Playlist,
        tracks,
        playlist_name: Some(name.to_string()),
        error: None,
    }
}
