//! Fake collaborators for driving the orchestrator without Discord or an audio node

use async_trait::async_trait;
use mockall::mock;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use ensemble::commands::music::utils::audio_session::{VoiceError, VoiceGateway};
use ensemble::commands::music::utils::chat::{ChatGateway, TransportError};
#[cfg(feature = "command_bus")]
use ensemble::commands::music::utils::command_bus::{BusError, BusPublisher};
use ensemble::commands::music::utils::eligibility::{VoiceAccess, VoiceDirectory};
use ensemble::commands::music::utils::embedded_messages::PlayerView;
use ensemble::commands::music::utils::lavalink::{
    AudioNode, LoadResult, NodeError, PlayerUpdate, VoiceServerInfo,
};

use super::fixtures::BOT;

/// Audio node that answers from a table of canned load results.
#[derive(Default)]
pub struct FakeNode {
    results: Mutex<HashMap<String, LoadResult>>,
    updates: Mutex<Vec<(GuildId, PlayerUpdate)>>,
    destroyed: Mutex<Vec<GuildId>>,
    resolve_calls: AtomicUsize,
    fail_requests: AtomicBool,
    fail_play: AtomicBool,
}

impl FakeNode {
    pub fn add_result(&self, identifier: &str, result: LoadResult) {
        self.results
            .lock()
            .unwrap()
            .insert(identifier.to_string(), result);
    }

    pub fn fail_requests(&self, fail: bool) {
        self.fail_requests.store(fail, Ordering::SeqCst);
    }

    /// Refuse player updates that start a track; searches still answer.
    pub fn fail_play(&self, fail: bool) {
        self.fail_play.store(fail, Ordering::SeqCst);
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> Vec<(GuildId, PlayerUpdate)> {
        self.updates.lock().unwrap().clone()
    }

    /// Encoded tracks the node was told to play, in order.
    pub fn played(&self) -> Vec<String> {
        self.updates()
            .into_iter()
            .filter_map(|(_, update)| update.track.and_then(|track| track.encoded))
            .collect()
    }

    pub fn destroyed(&self) -> Vec<GuildId> {
        self.destroyed.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), NodeError> {
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(NodeError::Status {
                status: 503,
                message: "unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AudioNode for FakeNode {
    async fn resolve(&self, query: &str) -> Result<LoadResult, NodeError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self
            .results
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_else(LoadResult::empty))
    }

    async fn update_player(&self, guild_id: GuildId, update: PlayerUpdate) -> Result<(), NodeError> {
        self.check()?;
        let starts_track = update.track.as_ref().is_some_and(|track| track.encoded.is_some());
        if starts_track && self.fail_play.load(Ordering::SeqCst) {
            return Err(NodeError::Status {
                status: 500,
                message: "player unavailable".into(),
            });
        }
        tokio::task::yield_now().await;
        self.updates.lock().unwrap().push((guild_id, update));
        Ok(())
    }

    async fn destroy_player(&self, guild_id: GuildId) -> Result<(), NodeError> {
        self.destroyed.lock().unwrap().push(guild_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeVoice {
    joins: Mutex<Vec<(GuildId, ChannelId)>>,
    leaves: Mutex<Vec<GuildId>>,
    fail_join: AtomicBool,
}

impl FakeVoice {
    pub fn fail_join(&self, fail: bool) {
        self.fail_join.store(fail, Ordering::SeqCst);
    }

    pub fn joins(&self) -> Vec<(GuildId, ChannelId)> {
        self.joins.lock().unwrap().clone()
    }

    pub fn leaves(&self) -> Vec<GuildId> {
        self.leaves.lock().unwrap().clone()
    }
}

#[async_trait]
impl VoiceGateway for FakeVoice {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<VoiceServerInfo, VoiceError> {
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(VoiceError("gateway timeout".into()));
        }
        tokio::task::yield_now().await;
        self.joins.lock().unwrap().push((guild_id, channel_id));
        Ok(VoiceServerInfo {
            token: "token".into(),
            endpoint: "voice.example".into(),
            session_id: "voice-session".into(),
        })
    }

    async fn leave(&self, guild_id: GuildId) -> Result<(), VoiceError> {
        self.leaves.lock().unwrap().push(guild_id);
        Ok(())
    }
}

/// Chat transport that keeps every live message in memory.
#[derive(Default)]
pub struct FakeChat {
    next_id: AtomicU64,
    live: Mutex<HashMap<MessageId, (ChannelId, PlayerView)>>,
    max_live: AtomicUsize,
    sends: AtomicUsize,
    edits: AtomicUsize,
    notices: Mutex<Vec<(ChannelId, String)>>,
    direct_messages: Mutex<Vec<(UserId, String)>>,
}

impl FakeChat {
    /// Live now-playing messages right now.
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// Highest number of simultaneously live now-playing messages ever seen.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn edits(&self) -> usize {
        self.edits.load(Ordering::SeqCst)
    }

    /// The only live message, if exactly one exists.
    pub fn live_view(&self) -> Option<(ChannelId, PlayerView)> {
        let live = self.live.lock().unwrap();
        if live.len() != 1 {
            return None;
        }
        live.values().next().cloned()
    }

    /// Simulate someone deleting every live message by hand.
    pub fn delete_all_externally(&self) {
        self.live.lock().unwrap().clear();
    }

    pub fn notices(&self) -> Vec<(ChannelId, String)> {
        self.notices.lock().unwrap().clone()
    }

    pub fn direct_messages(&self) -> Vec<(UserId, String)> {
        self.direct_messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatGateway for FakeChat {
    async fn send_player(&self, channel_id: ChannelId, view: &PlayerView) -> Result<MessageId, TransportError> {
        // give concurrent callers a chance to interleave
        tokio::time::sleep(Duration::from_millis(1)).await;
        let id = MessageId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut live = self.live.lock().unwrap();
        live.insert(id, (channel_id, view.clone()));
        self.max_live.fetch_max(live.len(), Ordering::SeqCst);
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn edit_player(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        view: &PlayerView,
    ) -> Result<(), TransportError> {
        tokio::task::yield_now().await;
        let mut live = self.live.lock().unwrap();
        let Some(entry) = live.get_mut(&message_id) else {
            return Err(TransportError::NotFound);
        };
        *entry = (channel_id, view.clone());
        self.edits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_message(&self, _channel_id: ChannelId, message_id: MessageId) -> Result<(), TransportError> {
        tokio::task::yield_now().await;
        match self.live.lock().unwrap().remove(&message_id) {
            Some(_) => Ok(()),
            None => Err(TransportError::NotFound),
        }
    }

    async fn send_notice(&self, channel_id: ChannelId, text: &str) -> Result<(), TransportError> {
        self.notices
            .lock()
            .unwrap()
            .push((channel_id, text.to_string()));
        Ok(())
    }

    async fn notify_user(&self, user_id: UserId, text: &str) -> Result<(), TransportError> {
        self.direct_messages
            .lock()
            .unwrap()
            .push((user_id, text.to_string()));
        Ok(())
    }
}

/// Guild membership that tests move users around in.
pub struct FakeDirectory {
    voice: Mutex<HashMap<UserId, ChannelId>>,
    managed: Mutex<HashSet<GuildId>>,
    access: Mutex<VoiceAccess>,
    can_post: AtomicBool,
}

impl FakeDirectory {
    pub fn new(managed: GuildId) -> Self {
        Self {
            voice: Mutex::new(HashMap::new()),
            managed: Mutex::new(HashSet::from([managed])),
            access: Mutex::new(VoiceAccess {
                connect: true,
                speak: true,
                move_members: false,
                user_limit: None,
                occupants: 0,
            }),
            can_post: AtomicBool::new(true),
        }
    }

    pub fn join(&self, user_id: UserId, channel_id: ChannelId) {
        self.voice.lock().unwrap().insert(user_id, channel_id);
    }

    pub fn leave(&self, user_id: UserId) {
        self.voice.lock().unwrap().remove(&user_id);
    }

    pub fn set_access(&self, access: VoiceAccess) {
        *self.access.lock().unwrap() = access;
    }

    pub fn set_can_post(&self, can_post: bool) {
        self.can_post.store(can_post, Ordering::SeqCst);
    }
}

impl VoiceDirectory for FakeDirectory {
    fn bot_user_id(&self) -> UserId {
        BOT
    }

    fn manages_guild(&self, guild_id: GuildId) -> bool {
        self.managed.lock().unwrap().contains(&guild_id)
    }

    fn user_voice_channel(&self, _guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
        self.voice.lock().unwrap().get(&user_id).copied()
    }

    fn humans_in_channel(&self, _guild_id: GuildId, channel_id: ChannelId) -> Vec<UserId> {
        self.voice
            .lock()
            .unwrap()
            .iter()
            .filter(|(user, channel)| **user != BOT && **channel == channel_id)
            .map(|(user, _)| *user)
            .collect()
    }

    fn bot_voice_access(&self, _guild_id: GuildId, _channel_id: ChannelId) -> Option<VoiceAccess> {
        Some(*self.access.lock().unwrap())
    }

    fn can_post(&self, _guild_id: GuildId, _channel_id: ChannelId) -> bool {
        self.can_post.load(Ordering::SeqCst)
    }

    fn guild_name(&self, _guild_id: GuildId) -> Option<String> {
        Some("Test Guild".into())
    }

    fn channel_name(&self, _guild_id: GuildId, channel_id: ChannelId) -> Option<String> {
        Some(format!("channel-{channel_id}"))
    }
}

#[cfg(feature = "command_bus")]
mock! {
    pub Publisher {}

    #[async_trait]
    impl BusPublisher for Publisher {
        async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError>;
    }
}
