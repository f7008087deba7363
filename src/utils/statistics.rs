//! Buffered play statistics.
//!
//! Events are appended in memory and written in batches. A flush is attempted
//! on the append that crosses the size or age threshold; there is no
//! background timer. Failed batches stay buffered for the next attempt, and
//! the oldest events are dropped once the buffer cap is reached.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{ChannelId, GuildId, UserId};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::database::StoreError;

/// One play attempt, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayEvent {
    pub guild_id: GuildId,
    pub guild_name: String,
    pub channel_id: ChannelId,
    pub channel_name: String,
    pub user_id: UserId,
    pub user_name: String,
    pub track_title: Option<String>,
    pub track_uri: Option<String>,
    pub track_identifier: Option<String>,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait StatsSink: Send + Sync {
    async fn insert_batch(&self, events: Vec<PlayEvent>) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy)]
pub struct StatsPolicy {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub buffer_cap: usize,
}

impl Default for StatsPolicy {
    fn default() -> Self {
        Self {
            batch_size: 50,
            flush_interval: Duration::from_secs(60),
            buffer_cap: 1000,
        }
    }
}

struct BufferState {
    events: VecDeque<PlayEvent>,
    last_flush: Instant,
}

pub struct StatsBuffer {
    sink: Arc<dyn StatsSink>,
    policy: StatsPolicy,
    state: Mutex<BufferState>,
}

impl StatsBuffer {
    pub fn new(sink: Arc<dyn StatsSink>, policy: StatsPolicy) -> Self {
        Self {
            sink,
            policy,
            state: Mutex::new(BufferState {
                events: VecDeque::new(),
                last_flush: Instant::now(),
            }),
        }
    }

    pub async fn record_play(&self, event: PlayEvent) {
        let due = {
            let mut state = self.state.lock().await;
            state.events.push_back(event);
            self.enforce_cap(&mut state.events);
            state.events.len() >= self.policy.batch_size
                || state.last_flush.elapsed() >= self.policy.flush_interval
        };

        if due {
            self.flush().await;
        }
    }

    /// Write everything currently buffered. Returns the number of events written.
    pub async fn flush(&self) -> usize {
        let batch: Vec<PlayEvent> = {
            let mut state = self.state.lock().await;
            state.last_flush = Instant::now();
            state.events.drain(..).collect()
        };
        if batch.is_empty() {
            return 0;
        }

        let count = batch.len();
        match self.sink.insert_batch(batch.clone()).await {
            Ok(()) => {
                debug!("Flushed {} play events", count);
                count
            }
            Err(e) => {
                warn!("Failed to flush {} play events, keeping them buffered: {}", count, e);
                let mut state = self.state.lock().await;
                // events recorded during the failed write go after the retried batch
                for event in batch.into_iter().rev() {
                    state.events.push_front(event);
                }
                self.enforce_cap(&mut state.events);
                0
            }
        }
    }

    pub async fn pending(&self) -> usize {
        self.state.lock().await.events.len()
    }

    fn enforce_cap(&self, events: &mut VecDeque<PlayEvent>) {
        let overflow = events.len().saturating_sub(self.policy.buffer_cap);
        if overflow > 0 {
            warn!("Statistics buffer full, dropping {} oldest events", overflow);
            events.drain(..overflow);
        }
    }
}
