//! Speech output
//!
//! [`SpeechOutput`] speaks one utterance at a time. Every utterance gets an
//! id; engine events carrying any other id are stale and ignored, so a
//! superseded utterance finishing late never clears the speaking flag of
//! the one that replaced it.

use crate::config::SpeechConfig;

/// A synthesis voice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub name: String,
    /// BCP 47 tag, e.g. "en-US"
    pub lang: String,
}

impl Voice {
    #[must_use]
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
        }
    }

    fn is_english(&self) -> bool {
        self.lang.to_ascii_lowercase().starts_with("en")
    }
}

/// Identifies one `speak` request
pub type UtteranceId = u64;

/// Text plus everything needed to voice it
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: UtteranceId,
    pub text: String,
    /// `None` uses the engine default
    pub voice: Option<Voice>,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

/// Lifecycle events from a synthesis engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    Started(UtteranceId),
    Finished(UtteranceId),
    Failed { id: UtteranceId, message: String },
}

impl SynthesisEvent {
    #[must_use]
    pub const fn id(&self) -> UtteranceId {
        match self {
            Self::Started(id) | Self::Finished(id) | Self::Failed { id, .. } => *id,
        }
    }
}

/// Text-to-speech engine
///
/// Events are delivered on a channel handed to the engine at construction.
pub trait SynthesisEngine {
    /// Voices currently available
    fn voices(&self) -> Vec<Voice>;

    /// Start speaking; any previous utterance has already been cancelled
    fn speak(&mut self, utterance: Utterance);

    /// Silence output immediately
    fn cancel(&mut self);
}

/// Pick a voice: configured name, then a preferred English voice, then any
/// English voice, else the engine default
#[must_use]
pub fn select_voice(
    voices: &[Voice],
    configured: Option<&str>,
    preferred: &[String],
) -> Option<Voice> {
    if let Some(name) = configured {
        if let Some(voice) = voices.iter().find(|v| v.name == name) {
            return Some(voice.clone());
        }
        tracing::debug!(voice = name, "configured voice unavailable, falling back");
    }

    voices
        .iter()
        .find(|v| v.is_english() && preferred.iter().any(|hint| v.name.contains(hint.as_str())))
        .or_else(|| voices.iter().find(|v| v.is_english()))
        .cloned()
}

/// Single-utterance speech output over an optional engine
pub struct SpeechOutput {
    engine: Option<Box<dyn SynthesisEngine>>,
    config: SpeechConfig,
    next_id: UtteranceId,
    current: Option<UtteranceId>,
    speaking: bool,
}

impl SpeechOutput {
    /// `None` means synthesis is unsupported; every call becomes a no-op
    #[must_use]
    pub fn new(engine: Option<Box<dyn SynthesisEngine>>, config: SpeechConfig) -> Self {
        if engine.is_none() {
            tracing::info!("speech synthesis unsupported");
        }
        Self {
            engine,
            config,
            next_id: 1,
            current: None,
            speaking: false,
        }
    }

    #[must_use]
    pub const fn is_supported(&self) -> bool {
        self.engine.is_some()
    }

    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Whether replies should be spoken without being asked
    #[must_use]
    pub const fn speaks_replies(&self) -> bool {
        self.config.enabled
    }

    #[must_use]
    pub fn voices(&self) -> Vec<Voice> {
        self.engine.as_ref().map(|e| e.voices()).unwrap_or_default()
    }

    /// The voice the next utterance would use
    #[must_use]
    pub fn selected_voice(&self) -> Option<Voice> {
        select_voice(
            &self.voices(),
            self.config.voice.as_deref(),
            &self.config.preferred_voices,
        )
    }

    /// Speak `text`, superseding anything already playing
    ///
    /// Returns the utterance id, or `None` if nothing was started.
    pub fn speak(&mut self, text: &str) -> Option<UtteranceId> {
        let engine = self.engine.as_mut()?;
        if text.trim().is_empty() {
            return None;
        }

        engine.cancel();

        let id = self.next_id;
        self.next_id += 1;
        self.current = Some(id);

        let voice = select_voice(
            &engine.voices(),
            self.config.voice.as_deref(),
            &self.config.preferred_voices,
        );
        tracing::debug!(
            utterance = id,
            voice = voice.as_ref().map_or("default", |v| v.name.as_str()),
            chars = text.len(),
            "speaking"
        );

        engine.speak(Utterance {
            id,
            text: text.to_string(),
            voice,
            rate: self.config.rate,
            pitch: self.config.pitch,
            volume: self.config.volume,
        });
        Some(id)
    }

    /// Cancel the current utterance; returns true if the speaking flag changed
    pub fn stop(&mut self) -> bool {
        let Some(engine) = self.engine.as_mut() else {
            return false;
        };
        engine.cancel();
        self.current = None;
        std::mem::replace(&mut self.speaking, false)
    }

    /// Apply an engine event; returns the new speaking flag if it changed
    pub fn handle_event(&mut self, event: &SynthesisEvent) -> Option<bool> {
        if self.current != Some(event.id()) {
            tracing::trace!(utterance = event.id(), "stale synthesis event");
            return None;
        }

        let speaking = match event {
            SynthesisEvent::Started(_) => true,
            SynthesisEvent::Finished(_) => {
                self.current = None;
                false
            }
            SynthesisEvent::Failed { id, message } => {
                tracing::warn!(utterance = id, error = %message, "speech synthesis failed");
                self.current = None;
                false
            }
        };

        (self.speaking != speaking).then(|| {
            self.speaking = speaking;
            speaking
        })
    }
}
