use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A single word with backend-reported timing and confidence.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TranscriptWord {
    pub text: String,
    /// Start offset in milliseconds from the beginning of the stream.
    pub start_ms: u64,
    /// End offset in milliseconds from the beginning of the stream.
    pub end_ms: u64,
    pub confidence: f32,
}

/// A transcript event emitted by an STT provider.
///
/// `Partial` results are revisable and must never drive the agent; exactly
/// one `Final` is emitted per completed turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEvent {
    /// Interim transcript that may still be revised.
    Partial { transcript: String },
    /// Immutable formatted transcript for a completed turn.
    Final {
        transcript: String,
        confidence: f32,
        words: Vec<TranscriptWord>,
    },
}

impl TranscriptEvent {
    /// The transcript text regardless of finality.
    pub fn transcript(&self) -> &str {
        match self {
            TranscriptEvent::Partial { transcript } => transcript,
            TranscriptEvent::Final { transcript, .. } => transcript,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, TranscriptEvent::Final { .. })
    }
}

/// Configuration for STT providers
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct STTConfig {
    /// API key for the STT provider
    pub api_key: String,
    /// Sample rate of the audio in Hz
    pub sample_rate: u32,
    /// Request formatted (punctuated/cased) final turns from the backend
    pub format_turns: bool,
    /// How long to wait for the backend to acknowledge termination
    pub termination_timeout_ms: u64,
    /// Override the backend endpoint (used by tests and self-hosted proxies)
    pub base_url: Option<String>,
}

impl Default for STTConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            sample_rate: 16000,
            format_turns: true,
            termination_timeout_ms: 3000,
            base_url: None,
        }
    }
}

/// Error types for STT operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum STTError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
}

/// Result type for STT operations
pub type STTResult<T> = Result<T, STTError>;

/// Type alias for transcript event callback
pub type TranscriptCallback =
    Arc<dyn Fn(TranscriptEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Type alias for STT error callback
pub type STTErrorCallback =
    Arc<dyn Fn(STTError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Type alias for the speech-start notification callback.
///
/// Fired exactly once per utterance, on the first non-empty partial result.
pub type SpeechStartCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Connection state for STT providers
#[derive(Debug, Clone, PartialEq)]
pub enum STTConnectionState {
    /// Not connected
    Disconnected,
    /// In the process of connecting
    Connecting,
    /// Connected and ready to receive audio
    Connected,
    /// Error state
    Error(String),
}

/// Base trait for streaming Speech-to-Text providers.
///
/// Implementations hold one persistent duplex connection, established lazily
/// on the first audio frame. A closed or errored connection is discarded
/// entirely; the next frame dials a fresh one.
#[async_trait::async_trait]
pub trait BaseSTT: Send + Sync {
    /// Send audio data to the STT provider for transcription.
    ///
    /// Connects lazily if no session is open; concurrent callers share one
    /// in-flight connection attempt.
    async fn send_audio(&self, audio_data: Vec<u8>) -> STTResult<()>;

    /// Register a callback for transcript events (partial and final).
    fn on_transcript(&self, callback: TranscriptCallback);

    /// Register a callback for streaming errors.
    fn on_error(&self, callback: STTErrorCallback);

    /// Register the speech-start notification callback.
    fn on_speech_start(&self, callback: SpeechStartCallback);

    /// Whether a connection is currently open.
    fn is_ready(&self) -> bool;

    /// Current connection state.
    fn connection_state(&self) -> STTConnectionState;

    /// Send the explicit termination request and wait (bounded) for the
    /// backend to close the session.
    async fn finish(&self) -> STTResult<()>;

    /// Send termination and force-close without waiting.
    async fn interrupt(&self) -> STTResult<()>;

    /// Provider-specific information
    fn provider_info(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_event_accessors() {
        let partial = TranscriptEvent::Partial {
            transcript: "hel".to_string(),
        };
        assert!(!partial.is_final());
        assert_eq!(partial.transcript(), "hel");

        let fin = TranscriptEvent::Final {
            transcript: "Hello.".to_string(),
            confidence: 0.97,
            words: vec![TranscriptWord {
                text: "Hello.".to_string(),
                start_ms: 0,
                end_ms: 400,
                confidence: 0.97,
            }],
        };
        assert!(fin.is_final());
        assert_eq!(fin.transcript(), "Hello.");
    }

    #[test]
    fn test_stt_config_default() {
        let config = STTConfig::default();
        assert_eq!(config.sample_rate, 16000);
        assert!(config.format_turns);
        assert_eq!(config.termination_timeout_ms, 3000);
    }
}
