//! Idle-emote cycle: background loop that keeps the avatar moving while
//! nobody is talking to it.
//!
//! Each tick plays the pending reactive emotion if one is waiting (once),
//! otherwise a random emote from the pool, then sleeps.

use super::config::VTubeStudioConfig;
use super::dispatcher::TriggerDispatcher;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Hotkey IDs the idle cycle picks from. Immutable after load.
#[derive(Debug, Clone, Default)]
pub struct IdleEmotePool {
    emotes: Vec<String>,
}

impl IdleEmotePool {
    pub fn new<I, S>(emotes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            emotes: emotes
                .into_iter()
                .map(Into::into)
                .filter(|e: &String| !e.trim().is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.emotes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.emotes.len()
    }

    pub fn contains(&self, emote: &str) -> bool {
        self.emotes.iter().any(|e| e == emote)
    }

    pub fn pick(&self) -> Option<&str> {
        self.emotes
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
    }
}

/// Sleep between ticks: fixed, or uniform in `[min, max]` when a max is
/// configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleDelay {
    min: Duration,
    max: Option<Duration>,
}

impl IdleDelay {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: None,
        }
    }

    pub fn between(min: Duration, max: Duration) -> Self {
        Self { min, max: Some(max) }
    }

    pub fn from_config(config: &VTubeStudioConfig) -> Self {
        let min = Duration::from_secs(config.idle_emote_delay_secs);
        match config.idle_emote_delay_max_secs {
            Some(max) if max > config.idle_emote_delay_secs => {
                Self::between(min, Duration::from_secs(max))
            }
            _ => Self::fixed(min),
        }
    }

    pub fn next(&self) -> Duration {
        match self.max {
            Some(max) if max > self.min => {
                let millis = rand::thread_rng().gen_range(self.min.as_millis()..=max.as_millis());
                Duration::from_millis(millis as u64)
            }
            _ => self.min,
        }
    }
}

pub struct IdleScheduler {
    dispatcher: Arc<TriggerDispatcher>,
    pool: IdleEmotePool,
    delay: IdleDelay,
}

impl IdleScheduler {
    pub fn new(dispatcher: Arc<TriggerDispatcher>, pool: IdleEmotePool, delay: IdleDelay) -> Self {
        Self {
            dispatcher,
            pool,
            delay,
        }
    }

    /// Choose the hotkey for the next tick. Consumes the pending emotion.
    pub fn select(&self) -> Option<String> {
        if let Some(emotion) = self.dispatcher.pending().take() {
            match self.dispatcher.emotions().resolve(&emotion) {
                Some(hotkey) => {
                    info!(%emotion, hotkey, "Using emotion emote");
                    return Some(hotkey.to_string());
                }
                None => {
                    info!(%emotion, "Emotion not mapped, falling back to idle");
                }
            }
        }

        let emote = self.pool.pick()?;
        info!(emote, "Using random idle emote");
        Some(emote.to_string())
    }

    /// Play one tick. Failures are logged by the dispatcher.
    pub async fn tick(&self) -> Option<String> {
        let selected = self.select()?;
        if let Err(e) = self.dispatcher.send_trigger(&selected).await {
            debug!(error = %e, "Idle emote skipped");
        }
        Some(selected)
    }

    /// Run until cancelled. Exits immediately if the pool is empty.
    pub async fn run(self, cancel: CancellationToken) {
        if self.pool.is_empty() {
            warn!("No idle emotes configured. Idle loop will not start.");
            return;
        }

        info!(emotes = self.pool.len(), "Idle emote loop started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.tick().await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.delay.next()) => {}
            }
        }
        info!("Idle loop has been stopped.");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
