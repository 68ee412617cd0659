//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use murmur::config::{CaptureConfig, MeterConfig};
use murmur::voice::{
    AudioLevelMeter, RecognitionEngine, RecognitionError, RecognitionEvent, SAMPLE_RATE,
    SegmentEvent, SegmenterState, SpeechSegmenter, SpeechToText, Voice, WhisperRecognizer,
    samples_to_wav, select_voice,
};
use murmur::{Capability, Error};

mod common;

use common::{MicCalls, MockMicrophone};

/// Generate sine wave audio samples
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn generate_silence(duration_secs: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

fn meter_config() -> MeterConfig {
    MeterConfig {
        bars: 8,
        frame_interval: Duration::from_millis(5),
        ..MeterConfig::default()
    }
}

#[tokio::test]
async fn test_meter_publishes_levels_and_releases() {
    let (microphone, calls) = MockMicrophone::new();
    microphone
        .tap
        .push(&generate_sine_samples(1000.0, 0.1, 0.8));
    let mut meter = AudioLevelMeter::new(Some(Box::new(microphone)), meter_config());
    let mut levels = meter.subscribe();

    meter.start().unwrap();
    assert!(meter.is_active());
    assert_eq!(calls.lock().unwrap().held(), 1);

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            levels.changed().await.unwrap();
            if levels.borrow_and_update().iter().any(|l| *l > 0.0) {
                break;
            }
        }
    })
    .await
    .expect("meter never produced a frame");

    let frame = meter.levels();
    assert_eq!(frame.len(), 8);
    assert!(frame.iter().all(|l| (0.0..=1.0).contains(l)));

    meter.stop();
    assert!(!meter.is_active());
    assert_eq!(calls.lock().unwrap().held(), 0);
    assert_eq!(meter.levels(), vec![0.0; 8]);

    // The cancelled frame loop never overwrites the reset
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(meter.levels(), vec![0.0; 8]);
}

#[tokio::test]
async fn test_meter_stop_is_idempotent() {
    let (microphone, calls) = MockMicrophone::new();
    let mut meter = AudioLevelMeter::new(Some(Box::new(microphone)), meter_config());

    // Never started
    meter.stop();
    assert_eq!(meter.levels(), vec![0.0; 8]);

    meter.start().unwrap();
    meter.stop();
    meter.stop();

    assert_eq!(meter.levels(), vec![0.0; 8]);
    let calls = calls.lock().unwrap();
    assert_eq!(calls.opened, 1);
    assert_eq!(calls.released, 1);
}

#[tokio::test]
async fn test_meter_start_twice_holds_one_stream() {
    let (microphone, calls) = MockMicrophone::new();
    let mut meter = AudioLevelMeter::new(Some(Box::new(microphone)), meter_config());

    meter.start().unwrap();
    meter.start().unwrap();
    assert_eq!(calls.lock().unwrap().opened, 1);

    drop(meter);
    assert_eq!(calls.lock().unwrap().held(), 0);
}

#[tokio::test]
async fn test_meter_open_failure() {
    let (microphone, calls) = MockMicrophone::new();
    calls.lock().unwrap().fail = true;
    let mut meter = AudioLevelMeter::new(Some(Box::new(microphone)), meter_config());

    assert!(meter.start().is_err());
    assert!(!meter.is_active());
    assert_eq!(meter.error(), Some("Unable to access the microphone"));
    assert_eq!(meter.levels(), vec![0.0; 8]);

    // A later successful start clears the error
    calls.lock().unwrap().fail = false;
    meter.start().unwrap();
    assert!(meter.error().is_none());
    meter.stop();
}

#[test]
fn test_meter_unsupported() {
    let mut meter = AudioLevelMeter::new(None, meter_config());

    assert!(!meter.is_supported());
    assert!(meter.error().is_some());
    assert!(matches!(
        meter.start(),
        Err(Error::Unsupported(Capability::Metering))
    ));
    meter.stop();
    assert_eq!(meter.levels(), vec![0.0; 8]);
}

fn segmenter() -> SpeechSegmenter {
    let config = CaptureConfig {
        energy_threshold: 0.02,
        silence: Duration::from_millis(500),
        min_speech: Duration::from_millis(300),
        ..CaptureConfig::default()
    };
    SpeechSegmenter::new(SAMPLE_RATE, &config)
}

#[test]
fn test_segmenter_completes_utterance() {
    let mut segmenter = segmenter();

    assert_eq!(segmenter.push(&generate_silence(0.1)), SegmentEvent::Silence);
    for _ in 0..5 {
        assert_eq!(
            segmenter.push(&generate_sine_samples(300.0, 0.1, 0.5)),
            SegmentEvent::Voiced
        );
    }
    assert_eq!(segmenter.state(), SegmenterState::Speaking);
    assert!(segmenter.has_speech());

    let mut closed = None;
    for _ in 0..10 {
        match segmenter.push(&generate_silence(0.1)) {
            SegmentEvent::Trailing => {}
            SegmentEvent::Complete(samples) => {
                closed = Some(samples);
                break;
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    let samples = closed.expect("segment should close after trailing silence");
    // 0.5s of speech plus 0.5s of trailing silence
    assert_eq!(samples.len(), 16_000);
    assert_eq!(segmenter.state(), SegmenterState::Idle);
}

#[test]
fn test_segmenter_discards_blips() {
    let mut segmenter = segmenter();

    segmenter.push(&generate_sine_samples(300.0, 0.1, 0.5));
    let mut last = SegmentEvent::Silence;
    for _ in 0..5 {
        last = segmenter.push(&generate_silence(0.1));
    }
    assert_eq!(last, SegmentEvent::Discarded);
    assert_eq!(segmenter.state(), SegmenterState::Idle);
}

#[test]
fn test_segmenter_flush() {
    let mut segmenter = segmenter();
    assert!(segmenter.flush().is_none());

    for _ in 0..4 {
        segmenter.push(&generate_sine_samples(300.0, 0.1, 0.5));
    }
    let flushed = segmenter.flush().expect("enough speech to keep");
    assert_eq!(flushed.len(), 6_400);
    assert!(segmenter.current().is_empty());
}

#[test]
fn test_samples_to_wav() {
    let samples = generate_sine_samples(440.0, 0.5, 0.5);
    let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(reader.len() as usize, samples.len());
}

#[test]
fn test_voice_fallback_chain() {
    let voices = vec![
        Voice::new("Thomas", "fr-FR"),
        Voice::new("Daniel", "en-GB"),
        Voice::new("Google US English", "en-US"),
    ];
    let preferred = ["Google".to_string(), "Samantha".to_string()];

    let pick = |configured: Option<&str>, voices: &[Voice]| {
        select_voice(voices, configured, &preferred).map(|v| v.name)
    };

    assert_eq!(pick(Some("Thomas"), &voices).as_deref(), Some("Thomas"));
    assert_eq!(
        pick(Some("missing"), &voices).as_deref(),
        Some("Google US English")
    );
    assert_eq!(pick(None, &voices[..2]).as_deref(), Some("Daniel"));
    assert_eq!(pick(None, &voices[..1]), None);
    assert_eq!(pick(None, &[]), None);
}

/// Whisper recognizer over a silent mock microphone; no transcription is ever requested
fn recognizer(
    no_speech_timeout: Duration,
) -> (
    WhisperRecognizer,
    Arc<Mutex<MicCalls>>,
    mpsc::UnboundedReceiver<RecognitionEvent>,
) {
    let (microphone, calls) = MockMicrophone::new();
    let config = CaptureConfig {
        no_speech_timeout,
        ..CaptureConfig::default()
    };
    let stt = SpeechToText::new(
        "sk-test".to_string(),
        config.stt_model.clone(),
        "http://127.0.0.1:9/v1/audio/transcriptions".to_string(),
        &config.language,
    )
    .unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let recognizer = WhisperRecognizer::new(Box::new(microphone), stt, config, tx);
    (recognizer, calls, rx)
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<RecognitionEvent>) -> RecognitionEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("recognizer went quiet")
        .expect("event channel closed")
}

/// Everything delivered within `window`
async fn collect_events(
    events: &mut mpsc::UnboundedReceiver<RecognitionEvent>,
    window: Duration,
) -> Vec<RecognitionEvent> {
    let mut seen = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(window, events.recv()).await {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn test_recognizer_holds_one_run() {
    let (mut recognizer, calls, mut events) = recognizer(Duration::from_secs(30));

    recognizer.start().unwrap();
    assert_eq!(next_event(&mut events).await, RecognitionEvent::Started);

    assert!(matches!(
        recognizer.start(),
        Err(RecognitionError::Other(_))
    ));
    assert_eq!(calls.lock().unwrap().opened, 1);

    // The device is given back before the run reports its end
    recognizer.stop();
    assert_eq!(calls.lock().unwrap().held(), 0);
    assert_eq!(next_event(&mut events).await, RecognitionEvent::Ended);

    recognizer.start().unwrap();
    assert_eq!(calls.lock().unwrap().opened, 2);
    recognizer.stop();
    assert_eq!(calls.lock().unwrap().held(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_recognizer_restarts_as_soon_as_run_ends() {
    let (mut recognizer, calls, mut events) = recognizer(Duration::from_millis(200));

    recognizer.start().unwrap();
    assert_eq!(next_event(&mut events).await, RecognitionEvent::Started);
    assert_eq!(
        next_event(&mut events).await,
        RecognitionEvent::Error(RecognitionError::NoSpeech)
    );
    assert_eq!(next_event(&mut events).await, RecognitionEvent::Ended);

    // Restarting on receipt of the end must not race the finished worker
    recognizer.start().unwrap();
    assert_eq!(next_event(&mut events).await, RecognitionEvent::Started);
    {
        let calls = calls.lock().unwrap();
        assert_eq!(calls.opened, 2);
        assert_eq!(calls.held(), 1);
    }

    recognizer.abort();
    assert_eq!(calls.lock().unwrap().held(), 0);
}

#[tokio::test]
async fn test_recognizer_abort_reports_end_once() {
    let (mut recognizer, calls, mut events) = recognizer(Duration::from_secs(30));

    recognizer.start().unwrap();
    assert_eq!(next_event(&mut events).await, RecognitionEvent::Started);

    recognizer.abort();
    recognizer.abort();
    assert_eq!(calls.lock().unwrap().held(), 0);

    let seen = collect_events(&mut events, Duration::from_millis(300)).await;
    assert_eq!(
        seen,
        [
            RecognitionEvent::Error(RecognitionError::Aborted),
            RecognitionEvent::Ended,
        ]
    );
}

#[tokio::test]
async fn test_recognizer_stop_then_abort_ends_once() {
    let (mut recognizer, calls, mut events) = recognizer(Duration::from_secs(30));

    recognizer.start().unwrap();
    recognizer.stop();
    recognizer.abort();

    let seen = collect_events(&mut events, Duration::from_millis(300)).await;
    let ends = seen
        .iter()
        .filter(|e| **e == RecognitionEvent::Ended)
        .count();
    assert_eq!(ends, 1);
    assert_eq!(calls.lock().unwrap().held(), 0);

    // A fresh run is accepted afterwards
    recognizer.start().unwrap();
    assert_eq!(calls.lock().unwrap().opened, 2);
    recognizer.abort();
}
