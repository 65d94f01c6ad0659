use std::env;

use super::ServerConfig;

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// Reads configuration from environment variables, with sensible
    /// defaults. Also loads from a `.env` file if present using dotenvy.
    ///
    /// # Errors
    /// Returns an error if a numeric variable is present but malformed.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse::<u16>()
            .map_err(|e| format!("Invalid port number: {e}"))?;

        // Provider API keys
        let assemblyai_api_key = env::var("ASSEMBLYAI_API_KEY").ok();
        let elevenlabs_api_key = env::var("ELEVENLABS_API_KEY").ok();
        let elevenlabs_voice_id = env::var("ELEVENLABS_VOICE_ID").ok();
        let tts_model =
            env::var("TTS_MODEL").unwrap_or_else(|_| "eleven_turbo_v2_5".to_string());

        let sample_rate = env::var("SAMPLE_RATE")
            .unwrap_or_else(|_| "16000".to_string())
            .parse::<u32>()
            .map_err(|e| format!("Invalid sample rate: {e}"))?;

        let vad_energy_threshold = env::var("VAD_ENERGY_THRESHOLD")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<f32>()
            .map_err(|e| format!("Invalid VAD energy threshold: {e}"))?;

        let idle_flush_ms = env::var("TTS_IDLE_FLUSH_MS")
            .unwrap_or_else(|_| "400".to_string())
            .parse::<u64>()
            .map_err(|e| format!("Invalid idle flush delay: {e}"))?;

        let filler_delay_ms = env::var("FILLER_DELAY_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse::<u64>()
            .map_err(|e| format!("Invalid filler delay: {e}"))?;

        Ok(ServerConfig {
            host,
            port,
            assemblyai_api_key,
            elevenlabs_api_key,
            elevenlabs_voice_id,
            tts_model,
            sample_rate,
            vad_energy_threshold,
            idle_flush_ms,
            filler_delay_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn cleanup_env_vars() {
        env::remove_var("HOST");
        env::remove_var("PORT");
        env::remove_var("ASSEMBLYAI_API_KEY");
        env::remove_var("ELEVENLABS_API_KEY");
        env::remove_var("ELEVENLABS_VOICE_ID");
        env::remove_var("TTS_MODEL");
        env::remove_var("SAMPLE_RATE");
        env::remove_var("VAD_ENERGY_THRESHOLD");
        env::remove_var("TTS_IDLE_FLUSH_MS");
        env::remove_var("FILLER_DELAY_MS");
    }

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        cleanup_env_vars();

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3001);
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.idle_flush_ms, 400);
        assert_eq!(config.filler_delay_ms, 1000);
        assert!(config.stt_config().is_none());
        assert!(config.tts_config().is_none());
        assert!(!config.providers_configured());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_provider_configs_from_env() {
        cleanup_env_vars();
        env::set_var("ASSEMBLYAI_API_KEY", "aai_key");
        env::set_var("ELEVENLABS_API_KEY", "el_key");
        env::set_var("ELEVENLABS_VOICE_ID", "voice_1");
        env::set_var("SAMPLE_RATE", "8000");

        let config = ServerConfig::from_env().unwrap();
        assert!(config.providers_configured());

        let stt = config.stt_config().unwrap();
        assert_eq!(stt.api_key, "aai_key");
        assert_eq!(stt.sample_rate, 8000);

        let tts = config.tts_config().unwrap();
        assert_eq!(tts.api_key, "el_key");
        assert_eq!(tts.voice_id, "voice_1");
        assert_eq!(tts.sample_rate, 8000);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_invalid_port_rejected() {
        cleanup_env_vars();
        env::set_var("PORT", "not_a_port");

        assert!(ServerConfig::from_env().is_err());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_tts_config_requires_voice_id() {
        cleanup_env_vars();
        env::set_var("ELEVENLABS_API_KEY", "el_key");

        let config = ServerConfig::from_env().unwrap();
        assert!(config.tts_config().is_none());

        cleanup_env_vars();
    }
}
