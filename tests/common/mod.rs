//! Shared test utilities
//!
//! Scripted stand-ins for every device and the chat backend. Each mock
//! records what it was asked to do behind an `Arc<Mutex<_>>` so tests can
//! inspect calls after handing the mock to the controller.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use murmur::chat::ChatBackend;
use murmur::clipboard::Clipboard;
use murmur::config::{MeterConfig, SpeechConfig};
use murmur::voice::{
    AudioLevelMeter, Microphone, MicrophoneStream, RecognitionEngine, RecognitionError,
    SampleTap, SpeechCaptureSession, SpeechOutput, SynthesisEngine, Utterance, Voice,
};
use murmur::{
    ChatError, ChatHistoryEntry, ConversationController, Credential, Devices, Error, UiEvent,
};

/// Recognition engine calls
#[derive(Debug, Default)]
pub struct EngineCalls {
    pub starts: usize,
    pub stops: usize,
    pub aborts: usize,
    /// Returned by the next `start` instead of succeeding
    pub refuse: Option<RecognitionError>,
}

pub struct MockEngine(pub Arc<Mutex<EngineCalls>>);

impl RecognitionEngine for MockEngine {
    fn start(&mut self) -> Result<(), RecognitionError> {
        let mut calls = self.0.lock().unwrap();
        if let Some(error) = calls.refuse.take() {
            return Err(error);
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

/// Microphone acquisitions and releases
#[derive(Debug, Default)]
pub struct MicCalls {
    pub opened: usize,
    pub released: usize,
    pub fail: bool,
}

impl MicCalls {
    /// Streams currently held
    pub const fn held(&self) -> usize {
        self.opened - self.released
    }
}

pub struct MockMicrophone {
    pub calls: Arc<Mutex<MicCalls>>,
    pub tap: SampleTap,
}

impl MockMicrophone {
    pub fn new() -> (Self, Arc<Mutex<MicCalls>>) {
        let calls = Arc::new(Mutex::new(MicCalls::default()));
        let microphone = Self {
            calls: Arc::clone(&calls),
            tap: SampleTap::new(16_000),
        };
        (microphone, calls)
    }
}

impl Microphone for MockMicrophone {
    fn open(&self) -> murmur::Result<Box<dyn MicrophoneStream>> {
        let mut calls = self.calls.lock().unwrap();
        if calls.fail {
            return Err(Error::Audio("permission denied".to_string()));
        }
        calls.opened += 1;
        Ok(Box::new(MockStream {
            calls: Arc::clone(&self.calls),
            tap: self.tap.clone(),
        }))
    }
}

pub struct MockStream {
    calls: Arc<Mutex<MicCalls>>,
    tap: SampleTap,
}

impl MicrophoneStream for MockStream {
    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn tap(&self) -> SampleTap {
        self.tap.clone()
    }

    fn release(self: Box<Self>) -> murmur::Result<()> {
        self.calls.lock().unwrap().released += 1;
        Ok(())
    }
}

/// Synthesis engine calls
#[derive(Debug, Default)]
pub struct SynthCalls {
    pub spoken: Vec<Utterance>,
    pub cancels: usize,
}

pub struct MockSynth {
    pub calls: Arc<Mutex<SynthCalls>>,
    pub voices: Vec<Voice>,
}

impl SynthesisEngine for MockSynth {
    fn voices(&self) -> Vec<Voice> {
        self.voices.clone()
    }

    fn speak(&mut self, utterance: Utterance) {
        self.calls.lock().unwrap().spoken.push(utterance);
    }

    fn cancel(&mut self) {
        self.calls.lock().unwrap().cancels += 1;
    }
}

pub struct MockClipboard {
    pub copied: Arc<Mutex<Vec<String>>>,
    pub fail: bool,
}

impl Clipboard for MockClipboard {
    fn copy(&mut self, text: &str) -> murmur::Result<()> {
        if self.fail {
            return Err(Error::Clipboard("no display".to_string()));
        }
        self.copied.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// One recorded backend request
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub history: Vec<ChatHistoryEntry>,
    pub credential: String,
}

/// Chat backend that streams a scripted reply
pub struct MockBackend {
    pub fragments: Vec<String>,
    pub failure: Option<ChatError>,
    pub requests: Arc<Mutex<Vec<SentRequest>>>,
}

impl MockBackend {
    pub fn replying(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(ToString::to_string).collect(),
            failure: None,
            requests: Arc::default(),
        }
    }

    pub fn failing(error: ChatError) -> Self {
        Self {
            fragments: Vec::new(),
            failure: Some(error),
            requests: Arc::default(),
        }
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn send(
        &self,
        history: &[ChatHistoryEntry],
        credential: &Credential,
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, ChatError> {
        self.requests.lock().unwrap().push(SentRequest {
            history: history.to_vec(),
            credential: credential.expose().to_string(),
        });
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        let mut full = String::new();
        for fragment in &self.fragments {
            on_delta(fragment);
            full.push_str(fragment);
        }
        Ok(full)
    }
}

/// Which capabilities the controller gets
pub struct Setup {
    pub capture: bool,
    pub meter: bool,
    pub speech: bool,
    pub credential: bool,
    pub speak_replies: bool,
    pub clipboard_fails: bool,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            capture: true,
            meter: true,
            speech: true,
            credential: true,
            speak_replies: true,
            clipboard_fails: false,
        }
    }
}

/// A controller wired to mocks, plus handles to inspect them
pub struct Harness {
    pub controller: ConversationController,
    pub ui: mpsc::UnboundedReceiver<UiEvent>,
    pub engine: Arc<Mutex<EngineCalls>>,
    pub mic: Arc<Mutex<MicCalls>>,
    pub synth: Arc<Mutex<SynthCalls>>,
    pub copied: Arc<Mutex<Vec<String>>>,
}

impl Setup {
    pub fn build(self) -> Harness {
        let engine = Arc::new(Mutex::new(EngineCalls::default()));
        let synth = Arc::new(Mutex::new(SynthCalls::default()));
        let copied = Arc::new(Mutex::new(Vec::new()));
        let (microphone, mic) = MockMicrophone::new();

        let recognizer: Option<Box<dyn RecognitionEngine>> = if self.capture {
            Some(Box::new(MockEngine(Arc::clone(&engine))))
        } else {
            None
        };
        let microphone: Option<Box<dyn Microphone>> = if self.meter {
            Some(Box::new(microphone))
        } else {
            None
        };
        let synthesizer: Option<Box<dyn SynthesisEngine>> = if self.speech {
            Some(Box::new(MockSynth {
                calls: Arc::clone(&synth),
                voices: vec![Voice::new("alloy", "en-US"), Voice::new("Amélie", "fr-CA")],
            }))
        } else {
            None
        };

        let speech_config = SpeechConfig {
            enabled: self.speak_replies,
            ..SpeechConfig::default()
        };
        let meter_config = MeterConfig {
            bars: 4,
            ..MeterConfig::default()
        };

        let devices = Devices {
            capture: SpeechCaptureSession::new(recognizer),
            meter: AudioLevelMeter::new(microphone, meter_config),
            speech: SpeechOutput::new(synthesizer, speech_config),
            clipboard: Box::new(MockClipboard {
                copied: Arc::clone(&copied),
                fail: self.clipboard_fails,
            }),
        };

        let credential = self
            .credential
            .then(|| Credential::new("sk-or-test").unwrap());
        let (ui_tx, ui) = mpsc::unbounded_channel();

        Harness {
            controller: ConversationController::new(devices, credential, ui_tx),
            ui,
            engine,
            mic,
            synth,
            copied,
        }
    }
}

impl Harness {
    /// Everything emitted since the last drain
    pub fn drain(&mut self) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.ui.try_recv() {
            events.push(event);
        }
        events
    }

    /// Notice texts emitted since the last drain
    pub fn notices(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|event| match event {
                UiEvent::Notice { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }
}

/// Fully supported controller with a credential
pub fn harness() -> Harness {
    Setup::default().build()
}
