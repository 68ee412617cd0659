//! Error types for Murmur

use std::fmt;

use thiserror::Error;

use crate::chat::ChatError;

/// Result type alias for Murmur operations
pub type Result<T> = std::result::Result<T, Error>;

/// Host capability that may be missing at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Continuous speech-to-text
    SpeechRecognition,
    /// Microphone level metering
    Metering,
    /// Text-to-speech output
    SpeechSynthesis,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpeechRecognition => f.write_str("speech recognition"),
            Self::Metering => f.write_str("microphone input"),
            Self::SpeechSynthesis => f.write_str("speech synthesis"),
        }
    }
}

/// Errors that can occur in Murmur
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Credential storage error
    #[error("credential error: {0}")]
    Credential(String),

    /// Clipboard error
    #[error("clipboard error: {0}")]
    Clipboard(String),

    /// Capability not available on this host
    #[error("{0} is not supported on this host")]
    Unsupported(Capability),

    /// Remote chat request failed
    #[error(transparent)]
    Chat(#[from] ChatError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_names_the_capability() {
        let err = Error::Unsupported(Capability::SpeechRecognition);
        assert_eq!(err.to_string(), "speech recognition is not supported on this host");
    }
}
