//! Energy-based speech segmentation
//!
//! Splits a continuous microphone feed into utterances: a segment opens on
//! the first voiced chunk and closes after a stretch of trailing silence.

use crate::config::CaptureConfig;

/// Segmenter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Idle,
    /// Inside an utterance
    Speaking,
}

/// Outcome of feeding one chunk
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentEvent {
    /// Nothing happening
    Silence,
    /// Voiced chunk inside an open segment
    Voiced,
    /// Quiet chunk inside an open segment
    Trailing,
    /// Segment closed with enough speech to transcribe
    Complete(Vec<f32>),
    /// Segment closed but was too short to keep
    Discarded,
}

/// Splits audio into speech segments
pub struct SpeechSegmenter {
    state: SegmenterState,
    buffer: Vec<f32>,
    voiced_samples: usize,
    silence_counter: usize,
    energy_threshold: f32,
    min_speech_samples: usize,
    silence_samples: usize,
}

impl SpeechSegmenter {
    /// Create a segmenter for audio at `sample_rate`
    #[must_use]
    pub fn new(sample_rate: u32, config: &CaptureConfig) -> Self {
        let per_ms = |ms: u128| {
            usize::try_from(ms * u128::from(sample_rate) / 1000).unwrap_or(usize::MAX)
        };

        tracing::debug!(
            energy_threshold = config.energy_threshold,
            silence_ms = config.silence.as_millis(),
            min_speech_ms = config.min_speech.as_millis(),
            "speech segmenter initialized"
        );

        Self {
            state: SegmenterState::Idle,
            buffer: Vec::new(),
            voiced_samples: 0,
            silence_counter: 0,
            energy_threshold: config.energy_threshold,
            min_speech_samples: per_ms(config.min_speech.as_millis()),
            silence_samples: per_ms(config.silence.as_millis()),
        }
    }

    /// Feed a chunk of samples
    pub fn push(&mut self, samples: &[f32]) -> SegmentEvent {
        if samples.is_empty() {
            return match self.state {
                SegmenterState::Idle => SegmentEvent::Silence,
                SegmenterState::Speaking => SegmentEvent::Trailing,
            };
        }

        let energy = rms_energy(samples);
        let is_speech = energy > self.energy_threshold;

        match self.state {
            SegmenterState::Idle => {
                if !is_speech {
                    return SegmentEvent::Silence;
                }
                self.state = SegmenterState::Speaking;
                self.buffer.clear();
                self.buffer.extend_from_slice(samples);
                self.voiced_samples = samples.len();
                self.silence_counter = 0;
                tracing::trace!(energy, "speech detected");
                SegmentEvent::Voiced
            }
            SegmenterState::Speaking => {
                self.buffer.extend_from_slice(samples);

                if is_speech {
                    self.voiced_samples += samples.len();
                    self.silence_counter = 0;
                    return SegmentEvent::Voiced;
                }

                self.silence_counter += samples.len();
                if self.silence_counter < self.silence_samples {
                    return SegmentEvent::Trailing;
                }

                tracing::trace!(
                    samples = self.buffer.len(),
                    voiced = self.voiced_samples,
                    "segment closed"
                );
                self.close().map_or(SegmentEvent::Discarded, SegmentEvent::Complete)
            }
        }
    }

    /// Close any open segment, returning it if it holds enough speech
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        if self.state == SegmenterState::Idle {
            return None;
        }
        self.close()
    }

    fn close(&mut self) -> Option<Vec<f32>> {
        let keep = self.voiced_samples >= self.min_speech_samples;
        let buffer = std::mem::take(&mut self.buffer);
        self.reset();
        keep.then_some(buffer)
    }

    /// Audio of the open segment
    #[must_use]
    pub fn current(&self) -> &[f32] {
        &self.buffer
    }

    /// Whether the open segment already holds enough speech to transcribe
    #[must_use]
    pub const fn has_speech(&self) -> bool {
        matches!(self.state, SegmenterState::Speaking)
            && self.voiced_samples >= self.min_speech_samples
    }

    /// Drop any open segment
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.buffer.clear();
        self.voiced_samples = 0;
        self.silence_counter = 0;
    }

    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
