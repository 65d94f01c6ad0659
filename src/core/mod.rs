pub mod agent;
pub mod events;
pub mod filler;
pub mod pipeline;
pub mod stt;
pub mod tts;
pub mod vad;

// Re-export commonly used types for convenience
pub use agent::{Agent, AgentError, AgentOutput, AgentResult, ScriptedAgent};
pub use events::PipelineEvent;
pub use filler::{FillerConfig, ThinkingFillerTimer};
pub use pipeline::{BargeInCoordinator, PipelineConfig, Seam, Stage, StageComposer, VoicePipeline};
pub use stt::{
    AssemblyAISTT, BaseSTT, STTConfig, STTConnectionState, STTError, STTResult, TranscriptEvent,
    TranscriptWord,
};
pub use tts::{
    AudioCallback, AudioData, BaseTTS, ElevenLabsTTS, TTSConfig, TTSError, TTSResult,
};
pub use vad::{VADConfig, VoiceActivityBuffer};
