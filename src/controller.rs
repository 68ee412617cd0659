//! Conversation controller
//!
//! The state machine at the center of a voice session. It owns the
//! conversation log and the device wrappers, and is driven entirely from
//! one event loop: user commands, capture events, synthesis events and
//! streamed chat events all arrive as method calls on `&mut self`, so no
//! two transitions ever interleave.
//!
//! ```text
//!            toggle_recording            pause
//!   Idle ───────────────────▶ Recording ◀─────▶ Paused
//!    ▲                            │               │
//!    └──────────── stop ──────────┴───────────────┘
//! ```
//!
//! Stopping does not always send at once. A recognition run that is still
//! ending owes results for the audio heard before the stop, so the turn
//! begins only when that run reports its end.
//!
//! A streamed reply is tracked by `active_stream`, the id of the one
//! placeholder message still receiving content. Deleting that message
//! clears the id, which silently detaches the in-flight request.

use std::fmt;

use tokio::sync::{mpsc, watch};

use crate::chat::{ChatError, TurnEvent, TurnRequest};
use crate::clipboard::Clipboard;
use crate::conversation::{ConversationLog, Message, MessageId};
use crate::credential::Credential;
use crate::error::Capability;
use crate::voice::{
    AudioLevelMeter, CaptureUpdate, RecognitionEvent, SpeechCaptureSession, SpeechOutput,
    SynthesisEvent,
};
use crate::Error;

/// Top-level recording state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Paused,
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Recording => f.write_str("recording"),
            Self::Paused => f.write_str("paused"),
        }
    }
}

/// Severity of a user-visible notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Everything the presentation layer needs to render
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    StateChanged(RecordingState),
    TranscriptChanged(String),
    MessageAdded(Message),
    MessageUpdated {
        id: MessageId,
        content: String,
        streaming: bool,
    },
    MessageRemoved(MessageId),
    SpeakingChanged(bool),
    Notice {
        level: NoticeLevel,
        text: String,
    },
}

/// Device wrappers handed to the controller
pub struct Devices {
    pub capture: SpeechCaptureSession,
    pub meter: AudioLevelMeter,
    pub speech: SpeechOutput,
    pub clipboard: Box<dyn Clipboard>,
}

/// Coordinates capture, metering, chat streaming and speech output
pub struct ConversationController {
    state: RecordingState,
    log: ConversationLog,
    live_transcript: String,
    active_stream: Option<MessageId>,
    keep_listening: bool,
    finalizing: bool,
    credential: Option<Credential>,
    capture: SpeechCaptureSession,
    meter: AudioLevelMeter,
    speech: SpeechOutput,
    clipboard: Box<dyn Clipboard>,
    events: mpsc::UnboundedSender<UiEvent>,
}

impl ConversationController {
    /// Build a controller; unsupported capabilities are reported once here
    #[must_use]
    pub fn new(
        devices: Devices,
        credential: Option<Credential>,
        events: mpsc::UnboundedSender<UiEvent>,
    ) -> Self {
        let controller = Self {
            state: RecordingState::Idle,
            log: ConversationLog::new(),
            live_transcript: String::new(),
            active_stream: None,
            keep_listening: false,
            finalizing: false,
            credential,
            capture: devices.capture,
            meter: devices.meter,
            speech: devices.speech,
            clipboard: devices.clipboard,
            events,
        };

        if !controller.capture.is_supported() {
            controller.notice(
                NoticeLevel::Warning,
                Error::Unsupported(Capability::SpeechRecognition).to_string(),
            );
        }
        if !controller.meter.is_supported() {
            controller.notice(
                NoticeLevel::Warning,
                Error::Unsupported(Capability::Metering).to_string(),
            );
        }
        if !controller.speech.is_supported() {
            controller.notice(
                NoticeLevel::Warning,
                Error::Unsupported(Capability::SpeechSynthesis).to_string(),
            );
        }

        controller
    }

    #[must_use]
    pub const fn state(&self) -> RecordingState {
        self.state
    }

    #[must_use]
    pub const fn log(&self) -> &ConversationLog {
        &self.log
    }

    #[must_use]
    pub fn live_transcript(&self) -> &str {
        &self.live_transcript
    }

    /// Id of the placeholder currently receiving streamed content
    #[must_use]
    pub const fn active_stream(&self) -> Option<MessageId> {
        self.active_stream
    }

    /// A reply is streaming
    #[must_use]
    pub const fn is_sending(&self) -> bool {
        self.active_stream.is_some()
    }

    /// Whether capture should restart when the engine ends on its own
    #[must_use]
    pub const fn keep_listening(&self) -> bool {
        self.keep_listening
    }

    /// Recording has stopped and the last recognition run has not ended yet
    #[must_use]
    pub const fn is_finalizing(&self) -> bool {
        self.finalizing
    }

    #[must_use]
    pub const fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    #[must_use]
    pub const fn capture(&self) -> &SpeechCaptureSession {
        &self.capture
    }

    #[must_use]
    pub const fn meter(&self) -> &AudioLevelMeter {
        &self.meter
    }

    #[must_use]
    pub const fn speech(&self) -> &SpeechOutput {
        &self.speech
    }

    /// Receive level meter frames
    #[must_use]
    pub fn subscribe_levels(&self) -> watch::Receiver<Vec<f32>> {
        self.meter.subscribe()
    }

    /// Replace or clear the credential; takes effect for the next action
    pub fn set_credential(&mut self, credential: Option<Credential>) {
        tracing::debug!(present = credential.is_some(), "credential updated");
        self.credential = credential;
    }

    /// Start recording from `Idle`
    ///
    /// Refused with a notice when capture is unsupported, no credential
    /// is held, a reply is streaming or the last recording is still being
    /// finalized. Any other state makes this a no-op.
    pub fn toggle_recording(&mut self) {
        if self.state != RecordingState::Idle {
            return;
        }
        if self.is_sending() {
            self.notice(NoticeLevel::Warning, "Still waiting for the previous reply");
            return;
        }
        if self.finalizing {
            self.notice(NoticeLevel::Warning, "Still finishing the last recording");
            return;
        }
        if !self.capture.is_supported() {
            self.notice(
                NoticeLevel::Error,
                Error::Unsupported(Capability::SpeechRecognition).to_string(),
            );
            return;
        }
        if self.credential.is_none() {
            self.notice(NoticeLevel::Error, "A chat credential is required before recording");
            return;
        }

        self.stop_speech();
        self.set_transcript(String::new());
        self.capture.reset();

        self.keep_listening = true;
        if let Err(e) = self.capture.start() {
            self.keep_listening = false;
            self.notice(NoticeLevel::Error, format!("Could not start listening: {e}"));
            return;
        }
        self.start_meter();

        tracing::info!("recording started");
        self.set_state(RecordingState::Recording);
    }

    /// Toggle between `Recording` and `Paused`
    ///
    /// Capture and metering are suspended and resumed together; the
    /// transcript is left untouched.
    pub fn pause(&mut self) {
        match self.state {
            RecordingState::Idle => {}
            RecordingState::Recording => {
                self.keep_listening = false;
                self.capture.suspend();
                self.meter.stop();
                tracing::info!("recording paused");
                self.set_state(RecordingState::Paused);
            }
            RecordingState::Paused => {
                self.keep_listening = true;
                if let Err(e) = self.capture.resume() {
                    self.notice(NoticeLevel::Warning, format!("Could not resume listening: {e}"));
                }
                self.start_meter();
                tracing::info!("recording resumed");
                self.set_state(RecordingState::Recording);
            }
        }
    }

    /// End recording and, if anything was said, begin a turn
    ///
    /// Capture and metering always stop. When the recognition run is still
    /// ending the turn is deferred to [`handle_capture_event`], which
    /// returns the request once the run's final results are in. Otherwise
    /// the request is returned here.
    ///
    /// [`handle_capture_event`]: Self::handle_capture_event
    pub fn stop(&mut self) -> Option<TurnRequest> {
        if self.state == RecordingState::Idle {
            return None;
        }

        self.keep_listening = false;
        self.capture.stop();
        self.meter.stop();
        tracing::info!("recording stopped");
        self.set_state(RecordingState::Idle);

        if self.capture.is_ending() {
            tracing::debug!("waiting for final recognition results");
            self.finalizing = true;
            return None;
        }
        self.finish_recording()
    }

    /// Turn the settled transcript into a turn
    ///
    /// While a reply is streaming the transcript is kept on screen and
    /// nothing is sent.
    fn finish_recording(&mut self) -> Option<TurnRequest> {
        self.finalizing = false;
        if self.is_sending() {
            self.notice(NoticeLevel::Warning, "Still waiting for the previous reply");
            return None;
        }

        let transcript = std::mem::take(&mut self.live_transcript);
        self.emit(UiEvent::TranscriptChanged(String::new()));

        let text = transcript.trim();
        if text.is_empty() {
            tracing::debug!("nothing was said");
            return None;
        }
        self.begin_turn(text)
    }

    /// Send typed text as a turn
    pub fn submit_text(&mut self, text: &str) -> Option<TurnRequest> {
        if self.is_sending() {
            self.notice(NoticeLevel::Warning, "Still waiting for the previous reply");
            return None;
        }
        if self.finalizing {
            self.notice(NoticeLevel::Warning, "Still finishing the last recording");
            return None;
        }
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        self.begin_turn(text)
    }

    fn begin_turn(&mut self, text: &str) -> Option<TurnRequest> {
        let Some(credential) = self.credential.clone() else {
            self.notice(NoticeLevel::Error, "A chat credential is required to send messages");
            return None;
        };

        let user = Message::user(text);
        self.log.push(user.clone());
        self.emit(UiEvent::MessageAdded(user));

        // Taken before the placeholder exists so it can never be included
        let history = self.log.history();

        let placeholder = Message::placeholder();
        let message_id = self.log.push(placeholder.clone());
        self.active_stream = Some(message_id);
        self.emit(UiEvent::MessageAdded(placeholder));

        tracing::debug!(message_id = %message_id, history = history.len(), "turn begun");
        Some(TurnRequest {
            message_id,
            history,
            credential,
        })
    }

    /// Append a streamed fragment to the active placeholder
    ///
    /// Fragments for any other id are dropped.
    pub fn apply_delta(&mut self, id: MessageId, fragment: &str) {
        if self.active_stream != Some(id) {
            tracing::trace!(message_id = %id, "dropping delta for detached message");
            return;
        }
        let Some(message) = self.log.get_mut(id) else {
            return;
        };
        if message.append(fragment) {
            let content = message.content.clone();
            self.emit(UiEvent::MessageUpdated {
                id,
                content,
                streaming: true,
            });
        }
    }

    /// Finalize the active placeholder with the full reply and speak it
    pub fn complete_turn(&mut self, id: MessageId, text: String) {
        if self.active_stream != Some(id) {
            tracing::debug!(message_id = %id, "reply finished for detached message");
            return;
        }
        self.active_stream = None;

        if text.trim().is_empty() {
            if self.log.remove(id).is_some() {
                self.emit(UiEvent::MessageRemoved(id));
            }
            self.notice(NoticeLevel::Warning, "The assistant returned an empty reply");
            return;
        }

        let Some(message) = self.log.get_mut(id) else {
            return;
        };
        if !message.finalize(text.clone()) {
            return;
        }
        self.emit(UiEvent::MessageUpdated {
            id,
            content: text.clone(),
            streaming: false,
        });
        tracing::info!(message_id = %id, chars = text.len(), "reply complete");

        if self.speech.speaks_replies() {
            self.speech.speak(&text);
        }
    }

    /// Report a failed send and roll back its placeholder
    pub fn fail_turn(&mut self, id: MessageId, error: &ChatError) {
        tracing::warn!(message_id = %id, error = %error, "reply failed");
        self.notice(NoticeLevel::Error, error.user_message());

        if self.active_stream == Some(id) {
            self.active_stream = None;
            if self.log.remove(id).is_some() {
                self.emit(UiEvent::MessageRemoved(id));
            }
        }
    }

    /// Dispatch one event from a streamed turn
    pub fn handle_turn_event(&mut self, event: TurnEvent) {
        match event {
            TurnEvent::Delta { id, fragment } => self.apply_delta(id, &fragment),
            TurnEvent::Finished { id, result } => match result {
                Ok(text) => self.complete_turn(id, text),
                Err(e) => self.fail_turn(id, &e),
            },
        }
    }

    /// Remove a message; deleting the streaming placeholder detaches its request
    pub fn delete_message(&mut self, id: MessageId) -> bool {
        if self.log.remove(id).is_none() {
            return false;
        }
        if self.active_stream == Some(id) {
            tracing::debug!(message_id = %id, "streaming reply abandoned");
            self.active_stream = None;
        }
        self.emit(UiEvent::MessageRemoved(id));
        true
    }

    /// Copy a message's content to the clipboard
    pub fn copy_message(&mut self, id: MessageId) -> bool {
        let Some(message) = self.log.get(id) else {
            return false;
        };
        let content = message.content.clone();
        match self.clipboard.copy(&content) {
            Ok(()) => {
                self.notice(NoticeLevel::Info, "Copied to clipboard");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "copy failed");
                self.notice(NoticeLevel::Error, "Could not copy to clipboard");
                false
            }
        }
    }

    /// Speak a message again; blank content does nothing
    pub fn replay_message(&mut self, id: MessageId) {
        let Some(message) = self.log.get(id) else {
            return;
        };
        if message.content.trim().is_empty() {
            return;
        }
        let content = message.content.clone();
        self.speech.speak(&content);
    }

    /// Feed a recognition engine event through the capture session
    ///
    /// Returns the deferred turn when this event ends the run a [`stop`]
    /// was waiting on.
    ///
    /// [`stop`]: Self::stop
    pub fn handle_capture_event(&mut self, event: RecognitionEvent) -> Option<TurnRequest> {
        for update in self.capture.handle_engine_event(event, self.keep_listening) {
            match update {
                CaptureUpdate::Interim(text) | CaptureUpdate::Final(text) => {
                    if self.state != RecordingState::Idle || self.finalizing {
                        self.set_transcript(text);
                    }
                }
                CaptureUpdate::Error(message) => {
                    self.notice(NoticeLevel::Warning, format!("Speech recognition: {message}"));
                }
            }
        }

        if self.finalizing && !self.capture.is_ending() {
            return self.finish_recording();
        }
        None
    }

    /// Feed a synthesis engine event through speech output
    pub fn handle_speech_event(&mut self, event: &SynthesisEvent) {
        if let Some(speaking) = self.speech.handle_event(event) {
            self.emit(UiEvent::SpeakingChanged(speaking));
        }
    }

    /// Release every device; safe to call whatever the current state
    pub fn teardown(&mut self) {
        self.keep_listening = false;
        self.finalizing = false;
        self.capture.abort();
        self.meter.stop();
        self.stop_speech();
        if self.state != RecordingState::Idle {
            self.set_state(RecordingState::Idle);
        }
        tracing::debug!("controller torn down");
    }

    fn start_meter(&mut self) {
        if !self.meter.is_supported() {
            return;
        }
        if let Err(e) = self.meter.start() {
            let text = self
                .meter
                .error()
                .map_or_else(|| e.to_string(), str::to_string);
            self.notice(NoticeLevel::Warning, text);
        }
    }

    fn stop_speech(&mut self) {
        if self.speech.stop() {
            self.emit(UiEvent::SpeakingChanged(false));
        }
    }

    fn set_state(&mut self, state: RecordingState) {
        self.state = state;
        self.emit(UiEvent::StateChanged(state));
    }

    fn set_transcript(&mut self, text: String) {
        if self.live_transcript != text {
            self.live_transcript.clone_from(&text);
            self.emit(UiEvent::TranscriptChanged(text));
        }
    }

    fn notice(&self, level: NoticeLevel, text: impl Into<String>) {
        let text = text.into();
        match level {
            NoticeLevel::Error => tracing::warn!(notice = %text, "user notice"),
            NoticeLevel::Info | NoticeLevel::Warning => tracing::info!(notice = %text, "user notice"),
        }
        self.emit(UiEvent::Notice { level, text });
    }

    fn emit(&self, event: UiEvent) {
        let _ = self.events.send(event);
    }
}
