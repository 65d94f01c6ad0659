pub mod assemblyai;
pub mod base;

pub use assemblyai::AssemblyAISTT;
pub use base::{
    BaseSTT, STTConfig, STTConnectionState, STTError, STTErrorCallback, STTResult,
    SpeechStartCallback, TranscriptCallback, TranscriptEvent, TranscriptWord,
};
