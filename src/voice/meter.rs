//! Microphone level meter
//!
//! While active, a frame task samples the microphone tap, runs it through a
//! [`FrequencyAnalyzer`] and publishes `bars` levels in `[0, 1]` on a watch
//! channel. Stopping releases the microphone and zeroes the levels.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::analyzer::{FrequencyAnalyzer, bin_levels};
use super::capture::{Microphone, MicrophoneStream};
use crate::config::MeterConfig;
use crate::error::Capability;
use crate::{Error, Result};

struct Active {
    stream: Box<dyn MicrophoneStream>,
    task: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

/// Frequency-band level meter over a microphone stream
pub struct AudioLevelMeter {
    microphone: Option<Box<dyn Microphone>>,
    config: MeterConfig,
    active: Option<Active>,
    levels: Arc<watch::Sender<Vec<f32>>>,
    error: Option<String>,
}

impl AudioLevelMeter {
    /// `None` means microphone input is unsupported on this host
    #[must_use]
    pub fn new(microphone: Option<Box<dyn Microphone>>, config: MeterConfig) -> Self {
        let (levels, _) = watch::channel(vec![0.0; config.bars]);
        let error = microphone
            .is_none()
            .then(|| "Microphone input is not supported on this host".to_string());

        Self {
            microphone,
            config,
            active: None,
            levels: Arc::new(levels),
            error,
        }
    }

    #[must_use]
    pub const fn is_supported(&self) -> bool {
        self.microphone.is_some()
    }

    /// Whether the microphone is held and frames are being produced
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Last error, cleared by a successful start
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Snapshot of the current levels
    #[must_use]
    pub fn levels(&self) -> Vec<f32> {
        self.levels.borrow().clone()
    }

    /// Receive every published frame
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<f32>> {
        self.levels.subscribe()
    }

    /// Acquire the microphone and start the frame loop
    ///
    /// Starting an active meter does nothing.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unsupported` without a microphone, or the device
    /// error if it cannot be opened
    pub fn start(&mut self) -> Result<()> {
        let Some(microphone) = self.microphone.as_ref() else {
            self.error = Some("Microphone input is not supported on this host".to_string());
            return Err(Error::Unsupported(Capability::Metering));
        };
        if self.active.is_some() {
            return Ok(());
        }
        self.error = None;

        let stream = match microphone.open() {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "failed to start level meter");
                self.error = Some("Unable to access the microphone".to_string());
                self.stop();
                return Err(e);
            }
        };

        let tap = stream.tap();
        let fft_size = self.config.fft_size;
        let bars = self.config.bars;
        let frame_interval = self.config.frame_interval;
        let mut analyzer = FrequencyAnalyzer::new(fft_size, self.config.smoothing);
        let levels = Arc::clone(&self.levels);
        let running = Arc::new(AtomicBool::new(true));
        let frame_running = Arc::clone(&running);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let bytes = analyzer.frequency_bytes(&tap.latest(fft_size));
                let next = bin_levels(&bytes, bars);

                // Checked under the channel lock so a frame never lands after stop's reset
                levels.send_if_modified(|current| {
                    if !frame_running.load(Ordering::Acquire) {
                        return false;
                    }
                    *current = next;
                    true
                });
            }
        });

        tracing::debug!(bars, fft_size, "level meter started");
        self.active = Some(Active {
            stream,
            task,
            running,
        });
        Ok(())
    }

    /// Release the microphone, cancel the frame loop and zero the levels
    ///
    /// Safe to call any number of times, including before `start`.
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.running.store(false, Ordering::Release);
            active.task.abort();
            if let Err(e) = active.stream.release() {
                tracing::warn!(error = %e, "failed to release meter microphone");
            }
            tracing::debug!("level meter stopped");
        }
        self.levels.send_replace(vec![0.0; self.config.bars]);
    }
}

impl Drop for AudioLevelMeter {
    fn drop(&mut self) {
        self.stop();
    }
}
