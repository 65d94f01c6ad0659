//! The session orchestrator.
//!
//! Wires the components into one pipeline: user audio → VAD → transcriber →
//! agent → synthesizer → outbound events, with the barge-in coordinator and
//! filler timer attached across the flow. One `VoicePipeline` per client
//! session; outbound events are delivered through an unbounded channel the
//! transport drains.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::agent::{Agent, AgentOutput};
use crate::core::events::PipelineEvent;
use crate::core::filler::{FillerConfig, ThinkingFillerTimer};
use crate::core::pipeline::composer::{Seam, StageComposer};
use crate::core::pipeline::coordinator::BargeInCoordinator;
use crate::core::stt::{BaseSTT, TranscriptEvent};
use crate::core::tts::{AudioCallback, AudioData, BaseTTS, TTSError};
use crate::core::vad::{VADConfig, VoiceActivityBuffer};

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub vad: VADConfig,
    pub filler: FillerConfig,
}

pub struct PipelineShared {
    stt: Arc<dyn BaseSTT>,
    tts: Arc<dyn BaseTTS>,
    agent: Arc<dyn Agent>,
    vad: parking_lot::Mutex<VoiceActivityBuffer>,
    filler: ThinkingFillerTimer,
    coordinator: BargeInCoordinator,
    composer: Arc<StageComposer>,
    events_tx: mpsc::UnboundedSender<PipelineEvent>,
    /// Resume token from a suspended agent turn, handed back with exactly
    /// the next transcript.
    resume_token: parking_lot::Mutex<Option<String>>,
    ended: AtomicBool,
}

impl PipelineShared {
    fn emit(&self, event: PipelineEvent) {
        if self.events_tx.send(event).is_err() {
            // The transport went away; stop producing audio for it.
            self.tts.mark_sink_closed();
            self.ended.store(true, Ordering::Release);
        }
    }
}

/// Forwards synthesized audio into the event stream and relays completion to
/// the coordinator.
struct PipelineAudioSink {
    shared: std::sync::Weak<PipelineShared>,
}

impl AudioCallback for PipelineAudioSink {
    fn on_audio(
        &self,
        audio_data: AudioData,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let Some(shared) = self.shared.upgrade() else {
                return;
            };
            let event = shared
                .composer
                .apply(Seam::PostTts, PipelineEvent::tts_chunk(audio_data.data))
                .await;
            shared.emit(event);
        })
    }

    fn on_error(
        &self,
        error: TTSError,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            warn!("Synthesis error: {error}");
        })
    }

    fn on_complete(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let Some(shared) = self.shared.upgrade() else {
                return;
            };
            shared.coordinator.fire_audio_complete().await;
        })
    }
}

pub struct VoicePipeline {
    shared: Arc<PipelineShared>,
}

impl VoicePipeline {
    /// Build a pipeline and return it with the outbound event stream.
    pub fn new(
        stt: Arc<dyn BaseSTT>,
        tts: Arc<dyn BaseTTS>,
        agent: Arc<dyn Agent>,
        composer: Arc<StageComposer>,
        config: PipelineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(PipelineShared {
            stt,
            tts,
            agent,
            vad: parking_lot::Mutex::new(VoiceActivityBuffer::new(config.vad)),
            filler: ThinkingFillerTimer::new(config.filler),
            coordinator: BargeInCoordinator::new(),
            composer,
            events_tx,
            resume_token: parking_lot::Mutex::new(None),
            ended: AtomicBool::new(false),
        });

        wire(&shared);

        (Self { shared }, events_rx)
    }

    /// Feed raw PCM from the client. Utterance boundaries are detected here;
    /// complete utterances go to the transcriber.
    pub async fn process_audio(&self, bytes: &[u8]) {
        if self.shared.ended.load(Ordering::Acquire) {
            return;
        }

        let event = self
            .shared
            .composer
            .apply(Seam::PreStt, PipelineEvent::user_audio(bytes.to_vec()))
            .await;
        let PipelineEvent::UserAudio { audio, .. } = event else {
            return;
        };

        let utterances = self.shared.vad.lock().push(&audio);
        for utterance in utterances {
            debug!(bytes = utterance.len(), "Utterance detected, transcribing");
            if let Err(e) = self.shared.stt.send_audio(utterance).await {
                // Non-fatal: the next utterance dials a fresh connection.
                warn!("Failed to send utterance to transcriber: {e}");
            }
        }
    }

    /// Client-driven barge-in, equivalent to the transcriber detecting
    /// speech while audio is playing.
    pub async fn barge_in(&self) {
        self.shared.coordinator.fire_speech_start().await;
    }

    /// Graceful teardown: flush the active utterance, then close both
    /// provider sessions.
    pub async fn finish(&self) {
        info!("Pipeline finishing");
        self.shared.filler.cancel_pending();

        let tail = self.shared.vad.lock().finish();
        if let Some(utterance) = tail {
            if let Err(e) = self.shared.stt.send_audio(utterance).await {
                warn!("Failed to send final utterance: {e}");
            }
        }

        if let Err(e) = self.shared.stt.finish().await {
            warn!("Transcriber teardown failed: {e}");
        }
        if let Err(e) = self.shared.tts.finish().await {
            warn!("Synthesizer teardown failed: {e}");
        }
        self.shared.ended.store(true, Ordering::Release);
    }

    /// Whether the session is over (transport gone or conversation ended).
    pub fn is_ended(&self) -> bool {
        self.shared.ended.load(Ordering::Acquire)
    }
}

/// Attach all callbacks. Weak references break the cycle between providers
/// and the shared state that owns them.
fn wire(shared: &Arc<PipelineShared>) {
    // Transcriber speech-start feeds the coordinator broadcast.
    let weak = Arc::downgrade(shared);
    shared.stt.on_speech_start(Arc::new(move || {
        let weak = weak.clone();
        Box::pin(async move {
            if let Some(shared) = weak.upgrade() {
                shared.coordinator.fire_speech_start().await;
            }
        }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
    }));

    // Speech-start listener order is the barge-in contract: stop the
    // synthesizer, tell the client to drop buffered audio, cancel fillers.
    let weak = Arc::downgrade(shared);
    shared.coordinator.on_speech_start(
        "synthesizer-interrupt",
        Arc::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(shared) = weak.upgrade() {
                    shared.tts.interrupt().await?;
                }
                Ok(())
            })
                as std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>
        }),
    );
    let weak = Arc::downgrade(shared);
    shared.coordinator.on_speech_start(
        "client-clear",
        Arc::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(shared) = weak.upgrade() {
                    shared.emit(PipelineEvent::clear());
                }
                Ok(())
            })
                as std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>
        }),
    );
    let weak = Arc::downgrade(shared);
    shared.coordinator.on_speech_start(
        "filler-cancel",
        Arc::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(shared) = weak.upgrade() {
                    shared.filler.cancel_pending();
                }
                Ok(())
            })
                as std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>
        }),
    );

    // Audio-complete: notify the client, then honor a deferred
    // end-of-conversation request now that the farewell has been delivered.
    let weak = Arc::downgrade(shared);
    shared.coordinator.on_audio_complete(
        "client-audio-complete",
        Arc::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(shared) = weak.upgrade() {
                    shared.emit(PipelineEvent::audio_complete());
                }
                Ok(())
            })
                as std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>
        }),
    );
    let weak = Arc::downgrade(shared);
    shared.coordinator.on_audio_complete(
        "deferred-end",
        Arc::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(shared) = weak.upgrade() {
                    if shared.coordinator.take_end_request() {
                        info!("Conversation ended after final audio");
                        shared.ended.store(true, Ordering::Release);
                    }
                }
                Ok(())
            })
                as std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>
        }),
    );

    // Transcripts: partials are informational, finals run an agent turn.
    let weak = Arc::downgrade(shared);
    shared.stt.on_transcript(Arc::new(move |event| {
        let weak = weak.clone();
        Box::pin(async move {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            match event {
                TranscriptEvent::Partial { transcript } => {
                    let event = shared
                        .composer
                        .apply(Seam::PostStt, PipelineEvent::stt_partial(transcript))
                        .await;
                    shared.emit(event);
                }
                TranscriptEvent::Final {
                    transcript,
                    confidence,
                    ..
                } => {
                    tokio::spawn(run_turn(shared, transcript, confidence));
                }
            }
        }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
    }));

    let weak = Arc::downgrade(shared);
    shared.stt.on_error(Arc::new(move |error| {
        let weak = weak.clone();
        Box::pin(async move {
            if weak.upgrade().is_some() {
                warn!("Transcription error: {error}");
            }
        }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
    }));

    shared.tts.on_audio(Arc::new(PipelineAudioSink {
        shared: Arc::downgrade(shared),
    }));

    // Fillers are spoken and shown like regular agent text.
    let weak = Arc::downgrade(shared);
    shared.filler.on_filler(Arc::new(move |phrase| {
        let weak = weak.clone();
        Box::pin(async move {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let event = shared
                .composer
                .apply(Seam::PreTts, PipelineEvent::agent_chunk(phrase.clone()))
                .await;
            shared.emit(event);
            if let Err(e) = shared.tts.speak(&phrase).await {
                warn!("Failed to speak filler: {e}");
            }
        }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
    }));
}

/// One agent turn: final transcript in, token stream out to the synthesizer.
async fn run_turn(shared: Arc<PipelineShared>, transcript: String, confidence: f32) {
    let event = shared
        .composer
        .apply(
            Seam::PostStt,
            PipelineEvent::stt_final(transcript.clone(), confidence),
        )
        .await;
    let transcript = match &event {
        PipelineEvent::SttFinal { transcript, .. } => transcript.clone(),
        _ => transcript,
    };
    shared.emit(event);

    shared.filler.notify_turn_started();

    let resume = shared.resume_token.lock().take();
    let mut stream = match shared.agent.respond(&transcript, resume).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Agent failed for turn: {e}");
            shared.filler.cancel_pending();
            return;
        }
    };

    let mut spoke = false;
    while let Some(output) = stream.next().await {
        match output {
            AgentOutput::Token(text) => {
                spoke = true;
                shared.filler.notify_real_text();
                let event = shared
                    .composer
                    .apply(Seam::PreTts, PipelineEvent::agent_chunk(text))
                    .await;
                let spoken = match &event {
                    PipelineEvent::AgentChunk { text, .. } => text.clone(),
                    _ => continue,
                };
                shared.emit(event);
                if let Err(e) = shared.tts.speak(&spoken).await {
                    warn!("Failed to submit token for synthesis: {e}");
                }
            }
            AgentOutput::Suspend { resume_token } => {
                debug!("Agent suspended, holding resume token for next turn");
                *shared.resume_token.lock() = Some(resume_token);
            }
            AgentOutput::EndConversation => {
                shared.coordinator.request_end_conversation();
            }
        }
    }

    // A turn that produced no spoken text (suspend-only, end-only) must not
    // leave its filler armed for a turn that is already over.
    if !spoke {
        shared.filler.cancel_pending();
    }
}
