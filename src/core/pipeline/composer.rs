//! Stage composition.
//!
//! The stt→agent→tts chain is fixed; extension happens at four seams, each
//! holding an ordered list of stages applied sequentially. An empty seam is
//! the identity. A stage that fails is logged and skipped, leaving the event
//! as the previous stage produced it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::core::events::PipelineEvent;

/// A transformation applied to events at one seam.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Transform one event. Returning the event unchanged is valid.
    async fn process(&self, event: PipelineEvent) -> anyhow::Result<PipelineEvent>;
}

/// The four extension points around the fixed chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seam {
    /// Raw user audio, before voice activity detection and transcription.
    PreStt,
    /// Transcript events, before they reach the agent.
    PostStt,
    /// Agent tokens, before they reach the synthesizer.
    PreTts,
    /// Synthesized audio chunks, before they reach the client.
    PostTts,
}

pub struct StageComposer {
    pre_stt: parking_lot::RwLock<Vec<Arc<dyn Stage>>>,
    post_stt: parking_lot::RwLock<Vec<Arc<dyn Stage>>>,
    pre_tts: parking_lot::RwLock<Vec<Arc<dyn Stage>>>,
    post_tts: parking_lot::RwLock<Vec<Arc<dyn Stage>>>,
}

impl StageComposer {
    pub fn new() -> Self {
        Self {
            pre_stt: parking_lot::RwLock::new(Vec::new()),
            post_stt: parking_lot::RwLock::new(Vec::new()),
            pre_tts: parking_lot::RwLock::new(Vec::new()),
            post_tts: parking_lot::RwLock::new(Vec::new()),
        }
    }

    fn seam(&self, seam: Seam) -> &parking_lot::RwLock<Vec<Arc<dyn Stage>>> {
        match seam {
            Seam::PreStt => &self.pre_stt,
            Seam::PostStt => &self.post_stt,
            Seam::PreTts => &self.pre_tts,
            Seam::PostTts => &self.post_tts,
        }
    }

    /// Append a stage at the given seam. Stages run in registration order.
    pub fn add_stage(&self, seam: Seam, stage: Arc<dyn Stage>) {
        self.seam(seam).write().push(stage);
    }

    /// Apply the stage list at one seam to an event, in order.
    pub async fn apply(&self, seam: Seam, event: PipelineEvent) -> PipelineEvent {
        let stages = self.seam(seam).read().clone();
        let mut current = event;
        for stage in stages {
            match stage.process(current.clone()).await {
                Ok(next) => current = next,
                Err(e) => {
                    warn!(stage = %stage.name(), "Stage failed, passing event through: {e:#}");
                }
            }
        }
        current
    }
}

impl Default for StageComposer {
    fn default() -> Self {
        Self::new()
    }
}
