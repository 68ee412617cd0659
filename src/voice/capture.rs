//! Audio capture from microphone

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Sample rate for speech capture (16kHz)
pub const SAMPLE_RATE: u32 = 16000;

/// Seconds of audio a tap retains before dropping the oldest samples
const TAP_SECONDS: usize = 30;

/// Source of microphone streams
pub trait Microphone {
    /// Acquire the device and start delivering samples
    ///
    /// # Errors
    ///
    /// Returns error if the device is unavailable or refuses to open
    fn open(&self) -> Result<Box<dyn MicrophoneStream>>;
}

/// A live, acquired microphone stream
pub trait MicrophoneStream {
    /// Sample rate of the mono samples delivered to the tap
    fn sample_rate(&self) -> u32;

    /// Shared handle to the rolling sample buffer
    fn tap(&self) -> SampleTap;

    /// Stop the stream and give the device back
    ///
    /// # Errors
    ///
    /// Returns error if the device reports a failure while pausing
    fn release(self: Box<Self>) -> Result<()>;
}

/// Bounded rolling buffer of mono samples, shared with the audio callback
#[derive(Debug, Clone)]
pub struct SampleTap {
    buffer: Arc<Mutex<VecDeque<f32>>>,
    capacity: usize,
}

impl SampleTap {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1 << 16)))),
            capacity,
        }
    }

    /// Append samples, discarding the oldest beyond capacity
    pub fn push(&self, samples: &[f32]) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.extend(samples.iter().copied());
            let excess = buf.len().saturating_sub(self.capacity);
            buf.drain(..excess);
        }
    }

    /// Most recent `n` samples, zero-padded at the front when short
    #[must_use]
    pub fn latest(&self, n: usize) -> Vec<f32> {
        let mut out = vec![0.0; n];
        if let Ok(buf) = self.buffer.lock() {
            let take = buf.len().min(n);
            let skip = buf.len() - take;
            for (slot, sample) in out[n - take..].iter_mut().zip(buf.iter().skip(skip)) {
                *slot = *sample;
            }
        }
        out
    }

    /// Take everything buffered so far
    #[must_use]
    pub fn drain(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| buf.drain(..).collect())
            .unwrap_or_default()
    }

    /// Number of buffered samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.lock().map(|buf| buf.len()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Default input device via cpal
#[derive(Debug, Clone)]
pub struct CpalMicrophone {
    device_name: String,
}

impl CpalMicrophone {
    /// Check that an input device exists
    ///
    /// # Errors
    ///
    /// Returns error if the host has no default input device
    pub fn probe() -> Result<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let device_name = device.name().unwrap_or_default();
        tracing::debug!(device = %device_name, "input device found");

        Ok(Self { device_name })
    }

    /// Name reported by the host for the input device
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl Microphone for CpalMicrophone {
    fn open(&self) -> Result<Box<dyn MicrophoneStream>> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device".to_string()))?;

        // Prefer 16kHz mono; otherwise take the device default and downmix
        let config: StreamConfig = match device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.sample_format() == cpal::SampleFormat::F32
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            }) {
            Some(supported) => supported.with_sample_rate(SampleRate(SAMPLE_RATE)).config(),
            None => device
                .default_input_config()
                .map_err(|e| Error::Audio(e.to_string()))?
                .config(),
        };

        let channels = usize::from(config.channels.max(1));
        let sample_rate = config.sample_rate.0;
        let tap = SampleTap::new(sample_rate as usize * TAP_SECONDS);
        let writer = tap.clone();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if channels == 1 {
                        writer.push(data);
                    } else {
                        #[allow(clippy::cast_precision_loss)]
                        let mono: Vec<f32> = data
                            .chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                            .collect();
                        writer.push(&mono);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "audio capture started"
        );

        Ok(Box::new(CpalStream {
            stream,
            tap,
            sample_rate,
        }))
    }
}

struct CpalStream {
    stream: Stream,
    tap: SampleTap,
    sample_rate: u32,
}

impl MicrophoneStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn tap(&self) -> SampleTap {
        self.tap.clone()
    }

    fn release(self: Box<Self>) -> Result<()> {
        let paused = self.stream.pause().map_err(|e| Error::Audio(e.to_string()));
        drop(self.stream);
        tracing::debug!("audio capture stopped");
        paused
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tap_is_bounded() {
        let tap = SampleTap::new(4);
        tap.push(&[1.0, 2.0, 3.0]);
        tap.push(&[4.0, 5.0, 6.0]);
        assert_eq!(tap.len(), 4);
        assert_eq!(tap.drain(), [3.0, 4.0, 5.0, 6.0]);
        assert!(tap.is_empty());
    }

    #[test]
    fn test_tap_latest_pads_front() {
        let tap = SampleTap::new(16);
        tap.push(&[0.5, 0.25]);
        assert_eq!(tap.latest(4), [0.0, 0.0, 0.5, 0.25]);
        assert_eq!(tap.latest(1), [0.25]);
        // latest does not consume
        assert_eq!(tap.len(), 2);
    }
}
