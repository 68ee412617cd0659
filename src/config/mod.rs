//! Configuration management for Murmur
//!
//! Values resolve as environment variable > TOML file > built-in default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::{Error, Result};

use file::MurmurConfigFile;

/// Default chat endpoint (local Supabase edge function)
pub const DEFAULT_CHAT_ENDPOINT: &str = "http://localhost:54321/functions/v1/chat";

/// Murmur configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (credential file)
    pub data_dir: PathBuf,

    /// Remote chat endpoint configuration
    pub chat: ChatConfig,

    /// Speech capture configuration
    pub capture: CaptureConfig,

    /// Level meter configuration
    pub meter: MeterConfig,

    /// Speech output configuration
    pub speech: SpeechConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Remote chat endpoint configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Streaming chat endpoint
    pub endpoint: Url,

    /// Bearer token identifying this client to the endpoint host
    pub gateway_key: Option<String>,

    /// Whole-request timeout
    pub timeout: Duration,
}

/// Speech capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Enable speech capture
    pub enabled: bool,

    /// Recognition language tag (e.g. "en-US")
    pub language: String,

    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// Transcription endpoint
    pub stt_url: String,

    /// RMS energy above which a chunk counts as speech
    pub energy_threshold: f32,

    /// Trailing silence that closes a speech segment
    pub silence: Duration,

    /// Minimum speech before a segment is worth transcribing
    pub min_speech: Duration,

    /// Silence after which the engine reports `no-speech` and ends
    pub no_speech_timeout: Duration,

    /// Cadence of interim re-transcription while speech continues
    pub interim_interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            language: "en-US".to_string(),
            stt_model: "whisper-1".to_string(),
            stt_url: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            energy_threshold: 0.02,
            silence: Duration::from_millis(700),
            min_speech: Duration::from_millis(300),
            no_speech_timeout: Duration::from_millis(8000),
            interim_interval: Duration::from_millis(1500),
        }
    }
}

/// Level meter configuration
#[derive(Debug, Clone)]
pub struct MeterConfig {
    /// Number of level bars
    pub bars: usize,

    /// FFT window size (power of two)
    pub fft_size: usize,

    /// Smoothing time constant in `[0, 1]`
    pub smoothing: f32,

    /// Frame cadence
    pub frame_interval: Duration,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            bars: 24,
            fft_size: 512,
            smoothing: 0.8,
            frame_interval: Duration::from_millis(16),
        }
    }
}

/// Speech output configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Speak replies aloud
    pub enabled: bool,

    /// Explicitly configured voice name
    pub voice: Option<String>,

    /// Provider-name hints for the default English voice
    pub preferred_voices: Vec<String>,

    /// Speaking rate multiplier
    pub rate: f32,

    /// Pitch multiplier
    pub pitch: f32,

    /// Output volume in `[0, 1]`
    pub volume: f32,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// Synthesis endpoint
    pub tts_url: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            voice: None,
            preferred_voices: vec!["Google".to_string(), "Samantha".to_string()],
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
            tts_model: "tts-1".to_string(),
            tts_url: "https://api.openai.com/v1/audio/speech".to_string(),
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (for Whisper and TTS)
    pub openai: Option<String>,

    /// `OpenRouter` API key, used when no credential has been saved
    /// See: <https://openrouter.ai/keys>
    pub openrouter: Option<String>,
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// # Errors
    ///
    /// Returns error if a value is out of range or the endpoint is not a URL
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is out of range or the endpoint is not a URL
    pub fn from_sources(
        fc: MurmurConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let endpoint = env("MURMUR_CHAT_URL")
            .or(fc.chat.endpoint)
            .unwrap_or_else(|| DEFAULT_CHAT_ENDPOINT.to_string());
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| Error::Config(format!("invalid chat endpoint {endpoint:?}: {e}")))?;

        let chat = ChatConfig {
            endpoint,
            gateway_key: env("MURMUR_GATEWAY_KEY").or(fc.chat.gateway_key),
            timeout: Duration::from_secs(fc.chat.timeout_secs.unwrap_or(120)),
        };

        let capture_defaults = CaptureConfig::default();
        let capture = CaptureConfig {
            enabled: env("MURMUR_DISABLE_CAPTURE")
                .map(|v| !(v == "1" || v.eq_ignore_ascii_case("true")))
                .or(fc.capture.enabled)
                .unwrap_or(capture_defaults.enabled),
            language: fc.capture.language.unwrap_or(capture_defaults.language),
            stt_model: env("MURMUR_STT_MODEL")
                .or(fc.capture.stt_model)
                .unwrap_or(capture_defaults.stt_model),
            stt_url: fc.capture.stt_url.unwrap_or(capture_defaults.stt_url),
            energy_threshold: fc
                .capture
                .energy_threshold
                .unwrap_or(capture_defaults.energy_threshold),
            silence: fc
                .capture
                .silence_ms
                .map_or(capture_defaults.silence, Duration::from_millis),
            min_speech: fc
                .capture
                .min_speech_ms
                .map_or(capture_defaults.min_speech, Duration::from_millis),
            no_speech_timeout: fc
                .capture
                .no_speech_timeout_ms
                .map_or(capture_defaults.no_speech_timeout, Duration::from_millis),
            interim_interval: fc
                .capture
                .interim_interval_ms
                .map_or(capture_defaults.interim_interval, Duration::from_millis),
        };

        let meter_defaults = MeterConfig::default();
        let meter = MeterConfig {
            bars: fc.meter.bars.unwrap_or(meter_defaults.bars),
            fft_size: fc.meter.fft_size.unwrap_or(meter_defaults.fft_size),
            smoothing: fc.meter.smoothing.unwrap_or(meter_defaults.smoothing),
            frame_interval: fc
                .meter
                .frame_interval_ms
                .map_or(meter_defaults.frame_interval, Duration::from_millis),
        };

        let speech_defaults = SpeechConfig::default();
        let speech = SpeechConfig {
            enabled: fc.speech.enabled.unwrap_or(speech_defaults.enabled),
            voice: env("MURMUR_VOICE").or(fc.speech.voice),
            preferred_voices: fc
                .speech
                .preferred_voices
                .unwrap_or(speech_defaults.preferred_voices),
            rate: fc.speech.rate.unwrap_or(speech_defaults.rate),
            pitch: fc.speech.pitch.unwrap_or(speech_defaults.pitch),
            volume: fc.speech.volume.unwrap_or(speech_defaults.volume),
            tts_model: env("MURMUR_TTS_MODEL")
                .or(fc.speech.tts_model)
                .unwrap_or(speech_defaults.tts_model),
            tts_url: fc.speech.tts_url.unwrap_or(speech_defaults.tts_url),
        };

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            openrouter: env("OPENROUTER_API_KEY").or(fc.api_keys.openrouter),
        };

        // Determine data directory (~/.local/share/omni/murmur on Linux)
        let data_dir = env("MURMUR_DATA_DIR").map_or_else(
            || {
                directories::BaseDirs::new().map_or_else(
                    || PathBuf::from(".local/share/omni/murmur"),
                    |d| d.data_dir().join("omni").join("murmur"),
                )
            },
            PathBuf::from,
        );

        let config = Self {
            data_dir,
            chat,
            capture,
            meter,
            speech,
            api_keys,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        self.meter.validate()?;

        let speech = &self.speech;
        if !(0.0..=1.0).contains(&speech.volume) {
            return Err(Error::Config(format!(
                "speech.volume must be within [0, 1], got {}",
                speech.volume
            )));
        }
        if speech.rate <= 0.0 || speech.rate > 4.0 {
            return Err(Error::Config(format!(
                "speech.rate must be within (0, 4], got {}",
                speech.rate
            )));
        }

        Ok(())
    }
}

impl MeterConfig {
    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if bars is zero, the FFT size is not a power
    /// of two in `[32, 32768]`, or smoothing is outside `[0, 1]`
    pub fn validate(&self) -> Result<()> {
        if self.bars == 0 {
            return Err(Error::Config("meter.bars must be at least 1".to_string()));
        }
        if !self.fft_size.is_power_of_two() || !(32..=32768).contains(&self.fft_size) {
            return Err(Error::Config(format!(
                "meter.fft_size must be a power of two in [32, 32768], got {}",
                self.fft_size
            )));
        }
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(Error::Config(format!(
                "meter.smoothing must be within [0, 1], got {}",
                self.smoothing
            )));
        }
        Ok(())
    }
}
