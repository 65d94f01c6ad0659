//! Latency-masking filler phrases.
//!
//! When the agent takes too long to produce its first token, a short spoken
//! filler ("Let me think about that.") keeps the conversation from feeling
//! dead. The timer is armed once per turn; real agent text cancels it, and a
//! barge-in clears it without emitting anything.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tracing::debug;

/// Callback invoked with the chosen filler phrase.
pub type FillerCallback =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct FillerConfig {
    /// Silence after the turn starts before the first filler fires.
    pub delay_ms: u64,
    /// Interval between repeated fillers. `None` means at most one firing.
    pub repeat_interval_ms: Option<u64>,
    /// Upper bound on fillers per turn, regardless of repeat interval.
    pub max_per_turn: usize,
    /// Phrases to choose from, uniformly at random.
    pub phrases: Vec<String>,
}

impl Default for FillerConfig {
    fn default() -> Self {
        Self {
            delay_ms: 1000,
            repeat_interval_ms: None,
            max_per_turn: 1,
            phrases: vec![
                "Let me think about that.".to_string(),
                "One moment.".to_string(),
                "Hmm, let me see.".to_string(),
                "Give me a second.".to_string(),
            ],
        }
    }
}

#[derive(Debug)]
struct FillerState {
    /// A timer is pending or has fired for the current turn.
    armed: bool,
    /// Real agent text arrived; no further fillers this turn.
    responded: bool,
    emitted: usize,
    /// Bumped on every arm and cancel; a timer task whose generation no
    /// longer matches must not emit.
    generation: u64,
}

struct FillerInner {
    config: FillerConfig,
    state: parking_lot::Mutex<FillerState>,
    timer: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    callback: parking_lot::RwLock<Option<FillerCallback>>,
}

impl FillerInner {
    fn cancel_timer(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }
}

pub struct ThinkingFillerTimer {
    inner: Arc<FillerInner>,
}

impl ThinkingFillerTimer {
    pub fn new(config: FillerConfig) -> Self {
        Self {
            inner: Arc::new(FillerInner {
                config,
                state: parking_lot::Mutex::new(FillerState {
                    armed: false,
                    responded: false,
                    emitted: 0,
                    generation: 0,
                }),
                timer: parking_lot::Mutex::new(None),
                callback: parking_lot::RwLock::new(None),
            }),
        }
    }

    pub fn on_filler(&self, callback: FillerCallback) {
        *self.inner.callback.write() = Some(callback);
    }

    /// Arm the one-shot timer for a new turn. A no-op while already armed for
    /// the current turn.
    pub fn notify_turn_started(&self) {
        let gen = {
            let mut state = self.inner.state.lock();
            if state.armed {
                debug!("Filler timer already armed, ignoring re-arm");
                return;
            }
            state.armed = true;
            state.responded = false;
            state.emitted = 0;
            state.generation += 1;
            state.generation
        };

        self.inner.cancel_timer();

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut wait = Duration::from_millis(inner.config.delay_ms);
            loop {
                tokio::time::sleep(wait).await;

                let phrase = {
                    let mut state = inner.state.lock();
                    if state.generation != gen
                        || state.responded
                        || state.emitted >= inner.config.max_per_turn
                    {
                        return;
                    }
                    state.emitted += 1;
                    inner
                        .config
                        .phrases
                        .choose(&mut rand::thread_rng())
                        .cloned()
                };

                let Some(phrase) = phrase else { return };
                debug!(phrase = %phrase, "Emitting filler");
                let cb = inner.callback.read().clone();
                if let Some(cb) = cb {
                    cb(phrase).await;
                }

                let repeat = {
                    let state = inner.state.lock();
                    state.generation == gen
                        && !state.responded
                        && state.emitted < inner.config.max_per_turn
                };
                match (repeat, inner.config.repeat_interval_ms) {
                    (true, Some(interval)) => wait = Duration::from_millis(interval),
                    _ => return,
                }
            }
        });

        *self.inner.timer.lock() = Some(handle);
    }

    /// Real agent text arrived: cancel pending fillers and suppress any more
    /// this turn.
    pub fn notify_real_text(&self) {
        {
            let mut state = self.inner.state.lock();
            state.responded = true;
            state.armed = false;
            state.generation += 1;
        }
        self.inner.cancel_timer();
    }

    /// Barge-in: clear pending timers without emitting anything.
    pub fn cancel_pending(&self) {
        {
            let mut state = self.inner.state.lock();
            state.armed = false;
            state.generation += 1;
        }
        self.inner.cancel_timer();
    }
}

impl Drop for ThinkingFillerTimer {
    fn drop(&mut self) {
        self.inner.cancel_timer();
    }
}
