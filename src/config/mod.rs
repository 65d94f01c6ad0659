//! Server configuration.
//!
//! Configuration is loaded from environment variables (with a `.env` file
//! picked up if present). Provider credentials are optional at startup so the
//! health endpoint works without them; sessions that need an unconfigured
//! provider fail with a clear error instead.

mod env;

use crate::core::filler::FillerConfig;
use crate::core::pipeline::PipelineConfig;
use crate::core::stt::STTConfig;
use crate::core::tts::TTSConfig;
use crate::core::vad::VADConfig;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // Provider API keys
    pub assemblyai_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    pub elevenlabs_voice_id: Option<String>,
    pub tts_model: String,

    // Audio settings
    pub sample_rate: u32,
    pub vad_energy_threshold: f32,

    // Timing tunables
    pub idle_flush_ms: u64,
    pub filler_delay_ms: u64,
}

impl ServerConfig {
    /// The socket address string to bind to.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Transcriber configuration, if a key is configured.
    pub fn stt_config(&self) -> Option<STTConfig> {
        self.assemblyai_api_key.as_ref().map(|key| STTConfig {
            api_key: key.clone(),
            sample_rate: self.sample_rate,
            ..Default::default()
        })
    }

    /// Synthesizer configuration, if a key and voice are configured.
    pub fn tts_config(&self) -> Option<TTSConfig> {
        let api_key = self.elevenlabs_api_key.clone()?;
        let voice_id = self.elevenlabs_voice_id.clone()?;
        Some(TTSConfig {
            api_key,
            voice_id,
            model: self.tts_model.clone(),
            sample_rate: self.sample_rate,
            idle_flush_ms: self.idle_flush_ms,
            ..Default::default()
        })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            vad: VADConfig {
                sample_rate: self.sample_rate,
                energy_threshold: self.vad_energy_threshold,
                ..Default::default()
            },
            filler: FillerConfig {
                delay_ms: self.filler_delay_ms,
                ..Default::default()
            },
        }
    }

    /// Whether both providers are configured for full voice sessions.
    pub fn providers_configured(&self) -> bool {
        self.stt_config().is_some() && self.tts_config().is_some()
    }
}
