//! Barge-in coordination.
//!
//! Two broadcast points connect the transcriber's speech-start signal and the
//! synthesizer's completion signal to everything that must react: observer
//! lists with deterministic registration order, each listener's failure
//! isolated and logged rather than breaking the broadcast.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

/// An observer hook. Errors are logged per listener and never propagate.
pub type Hook =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

#[derive(Clone)]
struct NamedHook {
    name: String,
    hook: Hook,
}

pub struct BargeInCoordinator {
    speech_start: parking_lot::RwLock<Vec<NamedHook>>,
    audio_complete: parking_lot::RwLock<Vec<NamedHook>>,
    /// Set when the agent requests end-of-conversation; consumed by the
    /// audio-complete broadcast so the farewell finishes playing first.
    end_requested: AtomicBool,
}

impl BargeInCoordinator {
    pub fn new() -> Self {
        Self {
            speech_start: parking_lot::RwLock::new(Vec::new()),
            audio_complete: parking_lot::RwLock::new(Vec::new()),
            end_requested: AtomicBool::new(false),
        }
    }

    /// Register a speech-start listener. Listeners run in registration order.
    pub fn on_speech_start(&self, name: impl Into<String>, hook: Hook) {
        self.speech_start.write().push(NamedHook {
            name: name.into(),
            hook,
        });
    }

    /// Register an audio-complete listener. Listeners run in registration
    /// order.
    pub fn on_audio_complete(&self, name: impl Into<String>, hook: Hook) {
        self.audio_complete.write().push(NamedHook {
            name: name.into(),
            hook,
        });
    }

    /// The user started speaking; run the speech-start listeners in order.
    pub async fn fire_speech_start(&self) {
        debug!("Broadcasting speech-start");
        // The guard must drop before the await so the future stays Send.
        let hooks = self.speech_start.read().clone();
        Self::run_hooks(hooks, "speech-start").await;
    }

    /// All audio for the current turn has been delivered; run the
    /// audio-complete listeners in order.
    pub async fn fire_audio_complete(&self) {
        debug!("Broadcasting audio-complete");
        let hooks = self.audio_complete.read().clone();
        Self::run_hooks(hooks, "audio-complete").await;
    }

    /// Record an agent-issued end-of-conversation request. Actual teardown
    /// waits for the next audio-complete broadcast.
    pub fn request_end_conversation(&self) {
        debug!("End of conversation requested, deferring until audio completes");
        self.end_requested.store(true, Ordering::Release);
    }

    pub fn end_requested(&self) -> bool {
        self.end_requested.load(Ordering::Acquire)
    }

    /// Consume a pending end-of-conversation request, if any.
    pub fn take_end_request(&self) -> bool {
        self.end_requested.swap(false, Ordering::AcqRel)
    }

    async fn run_hooks(hooks: Vec<NamedHook>, event: &str) {
        for entry in hooks {
            if let Err(e) = (entry.hook)().await {
                warn!(listener = %entry.name, "Listener failed during {event}: {e:#}");
            }
        }
    }
}

impl Default for BargeInCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
