//! Voice processing module
//!
//! Device-facing wrappers used by the conversation controller: continuous
//! speech capture, the microphone level meter and speech output. Each wraps
//! an optional engine; a missing engine means the host lacks the capability.

mod analyzer;
mod capture;
mod meter;
mod playback;
mod recognition;
mod recognizer;
mod segmenter;
mod speech;
mod stt;
mod synthesizer;
mod tts;

pub use analyzer::{FrequencyAnalyzer, MAX_DECIBELS, MIN_DECIBELS, bin_levels};
pub use capture::{
    CpalMicrophone, Microphone, MicrophoneStream, SAMPLE_RATE, SampleTap, samples_to_wav,
};
pub use meter::AudioLevelMeter;
pub use playback::{AudioPlayback, decode_mp3};
pub use recognition::{
    CaptureUpdate, RecognitionEngine, RecognitionError, RecognitionEvent, RecognitionResult,
    SpeechCaptureSession,
};
pub use recognizer::WhisperRecognizer;
pub use segmenter::{SegmentEvent, SegmenterState, SpeechSegmenter, rms_energy};
pub use speech::{
    SpeechOutput, SynthesisEngine, SynthesisEvent, Utterance, UtteranceId, Voice, select_voice,
};
pub use stt::SpeechToText;
pub use synthesizer::RemoteSynthesizer;
pub use tts::{OPENAI_VOICES, TextToSpeech};
