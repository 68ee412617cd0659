//! Whisper-backed continuous recognition engine
//!
//! Microphone audio is segmented locally by energy; each segment is sent to
//! Whisper. While a segment is still open it is re-transcribed at a fixed
//! cadence so the caller sees interim text.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::capture::{Microphone, MicrophoneStream, SampleTap, samples_to_wav};
use super::recognition::{RecognitionEngine, RecognitionError, RecognitionEvent, RecognitionResult};
use super::segmenter::{SegmentEvent, SpeechSegmenter};
use super::stt::SpeechToText;
use crate::config::CaptureConfig;

/// Audio is pulled from the tap at this cadence
const CHUNK_INTERVAL: Duration = Duration::from_millis(100);

struct Run {
    /// Released as soon as the run is asked to stop
    stream: Option<Box<dyn MicrophoneStream>>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    /// Claimed by whichever side reports `Ended`, so it is sent once
    ended: Arc<AtomicBool>,
}

impl Run {
    fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn release_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            release(stream);
        }
    }
}

/// Recognition engine built from a microphone and Whisper
pub struct WhisperRecognizer {
    microphone: Box<dyn Microphone>,
    stt: Arc<SpeechToText>,
    config: CaptureConfig,
    events: mpsc::UnboundedSender<RecognitionEvent>,
    run: Option<Run>,
}

impl WhisperRecognizer {
    #[must_use]
    pub fn new(
        microphone: Box<dyn Microphone>,
        stt: SpeechToText,
        config: CaptureConfig,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> Self {
        Self {
            microphone,
            stt: Arc::new(stt),
            config,
            events,
            run: None,
        }
    }

    /// Forget a run that has reported its end
    fn reap(&mut self) {
        if self.run.as_ref().is_some_and(Run::has_ended) {
            if let Some(mut run) = self.run.take() {
                run.release_stream();
            }
        }
    }
}

impl RecognitionEngine for WhisperRecognizer {
    fn start(&mut self) -> Result<(), RecognitionError> {
        self.reap();
        if self.run.is_some() {
            return Err(RecognitionError::Other("recognition already started".to_string()));
        }

        let stream = self
            .microphone
            .open()
            .map_err(|e| RecognitionError::AudioCapture(e.to_string()))?;

        let (stop, stop_rx) = oneshot::channel();
        let ended = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            tap: stream.tap(),
            sample_rate: stream.sample_rate(),
            stt: Arc::clone(&self.stt),
            config: self.config.clone(),
            events: self.events.clone(),
            ended: Arc::clone(&ended),
            results: Vec::new(),
        };

        let _ = self.events.send(RecognitionEvent::Started);
        let task = tokio::spawn(worker.run(stop_rx));

        self.run = Some(Run {
            stream: Some(stream),
            stop: Some(stop),
            task,
            ended,
        });
        Ok(())
    }

    fn stop(&mut self) {
        // The worker keeps draining the tap after the device is released
        if let Some(run) = self.run.as_mut() {
            if let Some(stop) = run.stop.take() {
                let _ = stop.send(());
            }
            run.release_stream();
        }
        self.reap();
    }

    fn abort(&mut self) {
        // A finished worker has already reported its end
        self.reap();
        if let Some(mut run) = self.run.take() {
            run.task.abort();
            run.release_stream();
            if !run.ended.swap(true, Ordering::AcqRel) {
                let _ = self.events.send(RecognitionEvent::Error(RecognitionError::Aborted));
                let _ = self.events.send(RecognitionEvent::Ended);
            }
        }
    }
}

impl Drop for WhisperRecognizer {
    fn drop(&mut self) {
        if let Some(mut run) = self.run.take() {
            run.task.abort();
            run.release_stream();
        }
    }
}

fn release(stream: Box<dyn MicrophoneStream>) {
    if let Err(e) = stream.release() {
        tracing::warn!(error = %e, "failed to release recognition microphone");
    }
}

/// State of one recognition run, owned by its task
struct Worker {
    tap: SampleTap,
    sample_rate: u32,
    stt: Arc<SpeechToText>,
    config: CaptureConfig,
    events: mpsc::UnboundedSender<RecognitionEvent>,
    ended: Arc<AtomicBool>,
    results: Vec<RecognitionResult>,
}

impl Worker {
    async fn run(mut self, mut stop: oneshot::Receiver<()>) {
        let mut segmenter = SpeechSegmenter::new(self.sample_rate, &self.config);
        let mut ticker = tokio::time::interval(CHUNK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut last_voice = Instant::now();
        let mut last_interim: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                _ = &mut stop => {
                    // Flush whatever the user said before stopping
                    let tail = self.tap.drain();
                    let pending = match segmenter.push(&tail) {
                        SegmentEvent::Complete(segment) => Some(segment),
                        _ => segmenter.flush(),
                    };
                    if let Some(pending) = pending {
                        self.finalize(&pending).await;
                    }
                    break;
                }
                _ = ticker.tick() => {
                    let chunk = self.tap.drain();
                    match segmenter.push(&chunk) {
                        SegmentEvent::Silence => {}
                        SegmentEvent::Voiced | SegmentEvent::Trailing => {
                            last_voice = Instant::now();
                            let due = last_interim
                                .is_none_or(|at| at.elapsed() >= self.config.interim_interval);
                            if segmenter.has_speech() && due {
                                last_interim = Some(Instant::now());
                                self.interim(segmenter.current()).await;
                            }
                        }
                        SegmentEvent::Complete(segment) => {
                            last_voice = Instant::now();
                            last_interim = None;
                            self.finalize(&segment).await;
                        }
                        SegmentEvent::Discarded => {
                            last_voice = Instant::now();
                            last_interim = None;
                        }
                    }

                    if last_voice.elapsed() >= self.config.no_speech_timeout {
                        if self.results.is_empty() {
                            let _ = self.events.send(RecognitionEvent::Error(RecognitionError::NoSpeech));
                        }
                        tracing::debug!("recognition run timed out");
                        break;
                    }
                }
            }
        }

        // Marked before sending so a start issued on receipt finds the run over
        if !self.ended.swap(true, Ordering::AcqRel) {
            let _ = self.events.send(RecognitionEvent::Ended);
        }
    }

    async fn transcribe(&self, samples: &[f32]) -> Option<String> {
        let wav = match samples_to_wav(samples, self.sample_rate) {
            Ok(wav) => wav,
            Err(e) => {
                let _ = self
                    .events
                    .send(RecognitionEvent::Error(RecognitionError::Other(e.to_string())));
                return None;
            }
        };

        match self.stt.transcribe(&wav).await {
            Ok(text) => Some(text),
            Err(e) => {
                let _ = self
                    .events
                    .send(RecognitionEvent::Error(RecognitionError::Network(e.to_string())));
                None
            }
        }
    }

    async fn interim(&mut self, samples: &[f32]) {
        let Some(text) = self.transcribe(samples).await else {
            return;
        };
        if text.is_empty() {
            return;
        }

        let index = self.results.len();
        let mut results = self.results.clone();
        results.push(RecognitionResult::interim(text));
        let _ = self.events.send(RecognitionEvent::Result {
            result_index: index,
            results,
        });
    }

    async fn finalize(&mut self, samples: &[f32]) {
        let index = self.results.len();
        let text = self.transcribe(samples).await.unwrap_or_default();
        if text.is_empty() {
            // Clear any interim shown for this segment
            let _ = self.events.send(RecognitionEvent::Result {
                result_index: index,
                results: self.results.clone(),
            });
            return;
        }

        self.results.push(RecognitionResult::final_(text));
        let _ = self.events.send(RecognitionEvent::Result {
            result_index: index,
            results: self.results.clone(),
        });
    }
}
