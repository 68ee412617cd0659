//! TOML configuration file loading
//!
//! Supports `~/.config/omni/murmur/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct MurmurConfigFile {
    /// Remote chat endpoint
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// Speech capture (speech-to-text)
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Microphone level meter
    #[serde(default)]
    pub meter: MeterFileConfig,

    /// Speech output (text-to-speech)
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Chat endpoint configuration
#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    /// Streaming chat endpoint URL
    pub endpoint: Option<String>,

    /// Bearer token identifying this client to the endpoint host
    pub gateway_key: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Speech capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    pub enabled: Option<bool>,
    pub language: Option<String>,
    pub stt_model: Option<String>,
    pub stt_url: Option<String>,
    pub energy_threshold: Option<f32>,
    pub silence_ms: Option<u64>,
    pub min_speech_ms: Option<u64>,
    pub no_speech_timeout_ms: Option<u64>,
    pub interim_interval_ms: Option<u64>,
}

/// Level meter configuration
#[derive(Debug, Default, Deserialize)]
pub struct MeterFileConfig {
    pub bars: Option<usize>,
    pub fft_size: Option<usize>,
    pub smoothing: Option<f32>,
    pub frame_interval_ms: Option<u64>,
}

/// Speech output configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// Speak replies aloud
    pub enabled: Option<bool>,

    /// Explicit voice name (e.g. "nova")
    pub voice: Option<String>,

    /// Provider-name hints used when no voice is configured
    pub preferred_voices: Option<Vec<String>>,

    pub rate: Option<f32>,
    pub pitch: Option<f32>,
    pub volume: Option<f32>,
    pub tts_model: Option<String>,
    pub tts_url: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub openrouter: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `MurmurConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> MurmurConfigFile {
    config_file_path().map_or_else(MurmurConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from an explicit path
pub fn load_config_file_from(path: &Path) -> MurmurConfigFile {
    if !path.exists() {
        return MurmurConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                MurmurConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            MurmurConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/murmur/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("murmur")
            .join("config.toml")
    })
}
