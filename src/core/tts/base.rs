//! Base trait abstraction for streaming Text-to-Speech providers.
//!
//! A provider owns one duplex session at a time: text tokens go in, PCM audio
//! chunks come out through an [`AudioCallback`]. All methods take `&self` so
//! that [`BaseTTS::interrupt`] can preempt an in-flight [`BaseTTS::speak`]
//! instead of queueing behind it; implementations use interior locks.

use async_trait::async_trait;
use futures::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Audio data structure for TTS output
#[derive(Debug, Clone)]
pub struct AudioData {
    /// Raw PCM bytes, 16-bit little-endian mono. Always even length.
    pub data: Vec<u8>,
    /// Sample rate of the audio
    pub sample_rate: u32,
    /// Audio format (e.g., "pcm", "mp3")
    pub format: String,
}

/// TTS-specific error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum TTSError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Provider not ready: {0}")]
    ProviderNotReady(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type for TTS operations
pub type TTSResult<T> = Result<T, TTSError>;

/// Audio callback trait for handling audio data from TTS providers
pub trait AudioCallback: Send + Sync {
    /// Called when audio data is received from the TTS provider
    fn on_audio(&self, audio_data: AudioData) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Called when an error occurs during synthesis
    fn on_error(&self, error: TTSError) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Called when the provider has delivered all audio for the flushed text
    fn on_complete(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Callback fired when an interrupt actually takes effect (after debounce).
pub type InterruptCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Configuration for TTS providers
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct TTSConfig {
    /// API key for the TTS provider
    pub api_key: String,
    /// Voice ID to use for synthesis
    pub voice_id: String,
    /// Model to use for synthesis
    pub model: String,
    /// Output format requested from the provider
    pub output_format: String,
    /// Sample rate of the synthesized audio in Hz
    pub sample_rate: u32,
    /// Voice stability (0.0 to 1.0)
    pub stability: f32,
    /// Voice similarity boost (0.0 to 1.0)
    pub similarity_boost: f32,
    /// Silence on the token stream before an automatic flush
    pub idle_flush_ms: u64,
    /// How long a flush waits for the completion acknowledgement
    pub flush_ack_timeout_ms: u64,
    /// How long teardown waits for the final flush acknowledgement
    pub teardown_timeout_ms: u64,
    /// Window in which repeated interrupts collapse into one
    pub interrupt_debounce_ms: u64,
    /// How long after an interrupt new tokens keep being ignored
    pub interrupt_cooldown_ms: u64,
    /// Override the backend endpoint (used by tests and self-hosted proxies)
    pub base_url: Option<String>,
}

impl Default for TTSConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            voice_id: String::new(),
            model: "eleven_turbo_v2_5".to_string(),
            output_format: "pcm_16000".to_string(),
            sample_rate: 16000,
            stability: 0.5,
            similarity_boost: 0.8,
            idle_flush_ms: 400,
            flush_ack_timeout_ms: 3000,
            teardown_timeout_ms: 5000,
            interrupt_debounce_ms: 100,
            interrupt_cooldown_ms: 100,
            base_url: None,
        }
    }
}

/// Base trait for streaming Text-to-Speech providers.
#[async_trait]
pub trait BaseTTS: Send + Sync {
    /// Submit one text token for synthesis.
    ///
    /// Opens a session lazily; concurrent callers coalesce into one connection
    /// attempt. Empty tokens and tokens arriving while interrupted are
    /// silently dropped. Submissions are strictly serialized; a token arriving
    /// during a flush is queued and drained afterwards, never interleaved.
    async fn speak(&self, text: &str) -> TTSResult<()>;

    /// Flush accumulated text now instead of waiting for the idle timer.
    async fn flush(&self) -> TTSResult<()>;

    /// Stop the current synthesis immediately.
    ///
    /// Discards accumulated and queued text, aborts in-flight network I/O and
    /// closes the session without waiting for pending audio. Repeated calls
    /// within the debounce window collapse into one. Never waits behind an
    /// in-flight `speak`.
    async fn interrupt(&self) -> TTSResult<()>;

    /// Graceful teardown: flush remaining text and wait (bounded) for the
    /// backend to finish speaking, then close.
    async fn finish(&self) -> TTSResult<()>;

    /// Register the audio callback.
    fn on_audio(&self, callback: Arc<dyn AudioCallback>);

    /// Register the callback fired when an interrupt takes effect.
    fn on_interrupt(&self, callback: InterruptCallback);

    /// Mark the downstream sink closed: received audio is no longer forwarded
    /// and the session tears down early.
    fn mark_sink_closed(&self);

    /// Whether a session is currently open.
    fn is_ready(&self) -> bool;

    /// Provider-specific information
    fn provider_info(&self) -> &'static str;
}
