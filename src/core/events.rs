//! Pipeline event types.
//!
//! Every stage of the pipeline consumes and produces [`PipelineEvent`]s.
//! Stages pass through events they do not handle, so downstream consumers
//! (including the client transport) can observe the full stream: partial
//! transcripts while the agent is still thinking, agent tokens while audio
//! is still being synthesized, and so on.

use serde::{Deserialize, Serialize};

/// Current Unix timestamp in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// An event flowing through the voice pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Raw PCM audio received from the user (16-bit LE, mono).
    UserAudio {
        #[serde(skip)]
        audio: Vec<u8>,
        ts: u64,
    },
    /// Revisable partial transcript. Not actionable.
    SttPartial { transcript: String, ts: u64 },
    /// Final transcript for a completed turn. Drives the agent.
    SttFinal {
        transcript: String,
        confidence: f32,
        ts: u64,
    },
    /// A text token streamed from the agent.
    AgentChunk { text: String, ts: u64 },
    /// Synthesized PCM audio (16-bit LE, mono, always even byte length).
    TtsChunk {
        #[serde(skip)]
        audio: Vec<u8>,
        ts: u64,
    },
    /// The user started speaking while audio may still be playing; the
    /// client should drop any buffered playback immediately.
    Clear { ts: u64 },
    /// All synthesized audio for the current turn has been delivered.
    AudioComplete { ts: u64 },
}

impl PipelineEvent {
    pub fn user_audio(audio: Vec<u8>) -> Self {
        Self::UserAudio {
            audio,
            ts: now_ms(),
        }
    }

    pub fn stt_partial(transcript: impl Into<String>) -> Self {
        Self::SttPartial {
            transcript: transcript.into(),
            ts: now_ms(),
        }
    }

    pub fn stt_final(transcript: impl Into<String>, confidence: f32) -> Self {
        Self::SttFinal {
            transcript: transcript.into(),
            confidence,
            ts: now_ms(),
        }
    }

    pub fn agent_chunk(text: impl Into<String>) -> Self {
        Self::AgentChunk {
            text: text.into(),
            ts: now_ms(),
        }
    }

    pub fn tts_chunk(audio: Vec<u8>) -> Self {
        Self::TtsChunk {
            audio,
            ts: now_ms(),
        }
    }

    pub fn clear() -> Self {
        Self::Clear { ts: now_ms() }
    }

    pub fn audio_complete() -> Self {
        Self::AudioComplete { ts: now_ms() }
    }
}
