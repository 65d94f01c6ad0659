pub mod base;
pub mod elevenlabs;
pub mod session;

pub use base::{
    AudioCallback, AudioData, BaseTTS, InterruptCallback, TTSConfig, TTSError, TTSResult,
};
pub use elevenlabs::ElevenLabsTTS;
pub use session::{SessionPhase, SessionState};
