//! Continuous speech capture session
//!
//! [`SpeechCaptureSession`] drives a [`RecognitionEngine`] and turns its raw
//! events into transcript updates. The engine may end on its own (silence
//! timeout, network hiccup); while the caller still wants to listen the
//! session restarts it and keeps the text finalized so far.

use thiserror::Error;

use crate::{Error, Result};

/// Recognition failure reported by an engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognitionError {
    #[error("no speech detected")]
    NoSpeech,
    #[error("recognition aborted")]
    Aborted,
    #[error("audio capture failed: {0}")]
    AudioCapture(String),
    #[error("recognition service unreachable: {0}")]
    Network(String),
    #[error("microphone permission denied")]
    NotAllowed,
    #[error("{0}")]
    Other(String),
}

impl RecognitionError {
    /// Stable error code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoSpeech => "no-speech",
            Self::Aborted => "aborted",
            Self::AudioCapture(_) => "audio-capture",
            Self::Network(_) => "network",
            Self::NotAllowed => "not-allowed",
            Self::Other(_) => "other",
        }
    }

    /// Expected during normal operation and never shown to the user
    #[must_use]
    pub const fn is_benign(&self) -> bool {
        matches!(self, Self::NoSpeech | Self::Aborted)
    }
}

/// One recognized segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub transcript: String,
    pub is_final: bool,
}

impl RecognitionResult {
    #[must_use]
    pub fn interim(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: false,
        }
    }

    #[must_use]
    pub fn final_(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: true,
        }
    }
}

/// Events emitted by a recognition engine run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Started,
    /// All results of the current run; entries before `result_index` are unchanged
    Result {
        result_index: usize,
        results: Vec<RecognitionResult>,
    },
    Error(RecognitionError),
    /// The run is over; the engine can be started again
    Ended,
}

/// Continuous speech-to-text engine
///
/// Events are delivered on a channel handed to the engine at construction.
pub trait RecognitionEngine {
    /// Begin a run
    ///
    /// # Errors
    ///
    /// Returns error if a run is already in progress or the device is unavailable
    fn start(&mut self) -> std::result::Result<(), RecognitionError>;

    /// Finish the run, delivering pending results before `Ended`
    fn stop(&mut self);

    /// End the run immediately, discarding pending audio
    fn abort(&mut self);
}

/// Transcript updates for the session owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureUpdate {
    /// Everything finalized so far plus the current interim segment
    Interim(String),
    /// The engine ended naturally and will not be restarted
    Final(String),
    /// A non-benign engine error, reported once per distinct code
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Idle,
    Running,
    Stopping,
}

/// Wraps a recognition engine with restart-on-end semantics
pub struct SpeechCaptureSession {
    engine: Option<Box<dyn RecognitionEngine>>,
    active: bool,
    engine_state: EngineState,
    restart_pending: bool,
    final_text: String,
    interim_text: String,
    last_error: Option<&'static str>,
}

impl SpeechCaptureSession {
    /// Wrap `engine`; `None` means recognition is unsupported on this host
    #[must_use]
    pub fn new(engine: Option<Box<dyn RecognitionEngine>>) -> Self {
        if engine.is_none() {
            tracing::info!("speech recognition unsupported");
        }
        Self {
            engine,
            active: false,
            engine_state: EngineState::Idle,
            restart_pending: false,
            final_text: String::new(),
            interim_text: String::new(),
            last_error: None,
        }
    }

    #[must_use]
    pub const fn is_supported(&self) -> bool {
        self.engine.is_some()
    }

    /// Between `start` and `stop`, including while suspended
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the engine is currently producing audio results
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.engine_state == EngineState::Running
    }

    /// A stopped run has not reported its end yet
    #[must_use]
    pub fn is_ending(&self) -> bool {
        self.engine_state == EngineState::Stopping
    }

    /// Finalized text plus the current interim segment
    #[must_use]
    pub fn transcript(&self) -> String {
        let mut text = self.final_text.clone();
        append_segment(&mut text, &self.interim_text);
        text
    }

    /// Begin continuous capture; a no-op when unsupported
    ///
    /// # Errors
    ///
    /// Returns error if the engine refuses to start
    pub fn start(&mut self) -> Result<()> {
        if self.engine.is_none() {
            return Ok(());
        }
        self.active = true;
        let launched = self.launch();
        if launched.is_err() {
            self.active = false;
        }
        launched
    }

    /// End capture; pending interim text is kept once the run ends
    pub fn stop(&mut self) {
        self.active = false;
        self.halt(false);
    }

    /// End capture discarding pending audio
    pub fn abort(&mut self) {
        self.active = false;
        self.halt(true);
    }

    /// Stop the engine but stay active
    pub fn suspend(&mut self) {
        self.halt(false);
    }

    /// Restart the engine after [`suspend`](Self::suspend)
    ///
    /// # Errors
    ///
    /// Returns error if the engine refuses to start
    pub fn resume(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.launch()
    }

    /// Clear all accumulated text
    pub fn reset(&mut self) {
        self.final_text.clear();
        self.interim_text.clear();
        self.last_error = None;
    }

    fn launch(&mut self) -> Result<()> {
        let Some(engine) = self.engine.as_mut() else {
            return Ok(());
        };
        match self.engine_state {
            EngineState::Running => Ok(()),
            EngineState::Stopping => {
                // Previous run has not ended yet; start once it does
                self.restart_pending = true;
                Ok(())
            }
            EngineState::Idle => {
                engine.start().map_err(|e| {
                    tracing::warn!(code = e.code(), error = %e, "speech recognition failed to start");
                    Error::Stt(e.to_string())
                })?;
                self.engine_state = EngineState::Running;
                tracing::debug!("speech recognition started");
                Ok(())
            }
        }
    }

    fn halt(&mut self, abort: bool) {
        self.restart_pending = false;

        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if self.engine_state == EngineState::Running {
            if abort {
                engine.abort();
            } else {
                engine.stop();
            }
            self.engine_state = EngineState::Stopping;
            tracing::debug!(abort, "speech recognition stopping");
        }
    }

    fn commit_interim(&mut self) {
        let interim = std::mem::take(&mut self.interim_text);
        append_segment(&mut self.final_text, &interim);
    }

    /// Apply an engine event
    ///
    /// `keep_listening` is the owner's intent; when set, a run that ends on
    /// its own is restarted.
    pub fn handle_engine_event(
        &mut self,
        event: RecognitionEvent,
        keep_listening: bool,
    ) -> Vec<CaptureUpdate> {
        match event {
            RecognitionEvent::Started => {
                self.last_error = None;
                Vec::new()
            }
            RecognitionEvent::Result {
                result_index,
                results,
            } => {
                // Results of a run superseded by a pending restart are stale
                let current = match self.engine_state {
                    EngineState::Running => true,
                    EngineState::Stopping => !self.restart_pending,
                    EngineState::Idle => false,
                };
                if !current {
                    return Vec::new();
                }
                let mut interim = String::new();
                for result in results.iter().skip(result_index) {
                    if result.is_final {
                        append_segment(&mut self.final_text, &result.transcript);
                    } else {
                        append_segment(&mut interim, &result.transcript);
                    }
                }
                self.interim_text = interim;
                vec![CaptureUpdate::Interim(self.transcript())]
            }
            RecognitionEvent::Error(error) => {
                if error.is_benign() {
                    tracing::debug!(code = error.code(), "benign recognition error");
                    return Vec::new();
                }
                tracing::warn!(code = error.code(), error = %error, "speech recognition error");
                if !self.active || self.last_error == Some(error.code()) {
                    return Vec::new();
                }
                self.last_error = Some(error.code());
                vec![CaptureUpdate::Error(error.to_string())]
            }
            RecognitionEvent::Ended => self.on_ended(keep_listening),
        }
    }

    fn on_ended(&mut self, keep_listening: bool) -> Vec<CaptureUpdate> {
        self.engine_state = EngineState::Idle;
        self.commit_interim();

        let restart = self.active && (keep_listening || self.restart_pending);
        self.restart_pending = false;

        if restart {
            tracing::debug!("speech recognition ended, restarting");
            return match self.launch() {
                Ok(()) => Vec::new(),
                Err(e) if self.last_error != Some("restart") => {
                    self.last_error = Some("restart");
                    vec![CaptureUpdate::Error(e.to_string())]
                }
                Err(_) => Vec::new(),
            };
        }

        tracing::debug!("speech recognition ended");
        if self.final_text.is_empty() {
            Vec::new()
        } else {
            vec![CaptureUpdate::Final(self.final_text.clone())]
        }
    }
}

/// Join recognized segments with a single space where neither side has one
fn append_segment(text: &mut String, piece: &str) {
    if piece.is_empty() {
        return;
    }
    if !text.is_empty()
        && !text.ends_with(char::is_whitespace)
        && !piece.starts_with(char::is_whitespace)
    {
        text.push(' ');
    }
    text.push_str(piece);
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    struct Calls {
        starts: usize,
        stops: usize,
        aborts: usize,
        refuse: bool,
    }

    struct FakeEngine(Arc<Mutex<Calls>>);

    impl RecognitionEngine for FakeEngine {
        fn start(&mut self) -> std::result::Result<(), RecognitionError> {
            let mut calls = self.0.lock().unwrap();
            if calls.refuse {
                return Err(RecognitionError::NotAllowed);
            }
            calls.starts += 1;
            Ok(())
        }
        fn stop(&mut self) {
            self.0.lock().unwrap().stops += 1;
        }
        fn abort(&mut self) {
            self.0.lock().unwrap().aborts += 1;
        }
    }

    fn session() -> (SpeechCaptureSession, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let engine = FakeEngine(Arc::clone(&calls));
        (SpeechCaptureSession::new(Some(Box::new(engine))), calls)
    }

    fn result(index: usize, results: &[(&str, bool)]) -> RecognitionEvent {
        RecognitionEvent::Result {
            result_index: index,
            results: results
                .iter()
                .map(|(t, f)| RecognitionResult {
                    transcript: (*t).to_string(),
                    is_final: *f,
                })
                .collect(),
        }
    }

    #[test]
    fn segments_are_space_joined() {
        let mut text = String::new();
        append_segment(&mut text, "one");
        append_segment(&mut text, "two");
        append_segment(&mut text, " three");
        append_segment(&mut text, "");
        assert_eq!(text, "one two three");
    }

    #[test]
    fn unsupported_start_is_noop() {
        let mut capture = SpeechCaptureSession::new(None);
        assert!(!capture.is_supported());
        capture.start().unwrap();
        assert!(!capture.is_active());
    }

    #[test]
    fn interim_text_accumulates_finals() {
        let (mut capture, _) = session();
        capture.start().unwrap();

        let updates = capture.handle_engine_event(result(0, &[("hello", false)]), true);
        assert_eq!(updates, [CaptureUpdate::Interim("hello".to_string())]);

        capture.handle_engine_event(result(0, &[("hello ", true)]), true);
        let updates =
            capture.handle_engine_event(result(1, &[("hello ", true), ("wor", false)]), true);
        assert_eq!(updates, [CaptureUpdate::Interim("hello wor".to_string())]);
    }

    #[test]
    fn unexpected_end_restarts_and_keeps_text() {
        let (mut capture, calls) = session();
        capture.start().unwrap();
        capture.handle_engine_event(result(0, &[("one ", true)]), true);

        let updates = capture.handle_engine_event(RecognitionEvent::Ended, true);
        assert!(updates.is_empty());
        assert_eq!(calls.lock().unwrap().starts, 2);

        capture.handle_engine_event(result(0, &[("two", false)]), true);
        assert_eq!(capture.transcript(), "one two");
    }

    #[test]
    fn end_after_stop_emits_final() {
        let (mut capture, calls) = session();
        capture.start().unwrap();
        capture.handle_engine_event(result(0, &[("pending", false)]), true);

        capture.stop();
        assert_eq!(calls.lock().unwrap().stops, 1);
        assert_eq!(capture.transcript(), "pending");

        let updates = capture.handle_engine_event(RecognitionEvent::Ended, false);
        assert_eq!(updates, [CaptureUpdate::Final("pending".to_string())]);
        assert_eq!(calls.lock().unwrap().starts, 1);
    }

    #[test]
    fn benign_errors_swallowed_and_others_reported_once() {
        let (mut capture, _) = session();
        capture.start().unwrap();

        let no_speech = RecognitionEvent::Error(RecognitionError::NoSpeech);
        assert!(capture.handle_engine_event(no_speech, true).is_empty());

        let network = RecognitionEvent::Error(RecognitionError::Network("down".to_string()));
        assert_eq!(capture.handle_engine_event(network.clone(), true).len(), 1);
        assert!(capture.handle_engine_event(network, true).is_empty());
    }

    #[test]
    fn start_while_stopping_is_deferred() {
        let (mut capture, calls) = session();
        capture.start().unwrap();
        capture.suspend();
        capture.resume().unwrap();
        assert_eq!(calls.lock().unwrap().starts, 1);

        capture.handle_engine_event(RecognitionEvent::Ended, false);
        assert_eq!(calls.lock().unwrap().starts, 2);
        assert!(capture.is_listening());
    }

    #[test]
    fn suspended_end_does_not_restart() {
        let (mut capture, calls) = session();
        capture.start().unwrap();
        capture.suspend();
        capture.handle_engine_event(RecognitionEvent::Ended, false);
        assert_eq!(calls.lock().unwrap().starts, 1);
        assert!(capture.is_active());
        assert!(!capture.is_listening());
    }

    #[test]
    fn refused_start_is_an_error() {
        let (mut capture, calls) = session();
        calls.lock().unwrap().refuse = true;
        assert!(capture.start().is_err());
        assert!(!capture.is_listening());
    }

    #[test]
    fn abort_uses_engine_abort() {
        let (mut capture, calls) = session();
        capture.start().unwrap();
        capture.abort();
        capture.abort();
        assert_eq!(calls.lock().unwrap().aborts, 1);
        assert!(!capture.is_active());
    }
}
