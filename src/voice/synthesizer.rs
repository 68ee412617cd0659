//! Remote synthesis engine: `OpenAI` TTS decoded and played through cpal

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::playback::AudioPlayback;
use super::speech::{SynthesisEngine, SynthesisEvent, Utterance, Voice};
use super::tts::{OPENAI_VOICES, TextToSpeech};

/// Voice used when none is selected
const DEFAULT_VOICE: &str = "alloy";

struct Playing {
    cancel: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Speaks utterances by synthesizing remotely and playing locally
pub struct RemoteSynthesizer {
    tts: Arc<TextToSpeech>,
    playback: AudioPlayback,
    events: mpsc::UnboundedSender<SynthesisEvent>,
    playing: Option<Playing>,
}

impl RemoteSynthesizer {
    #[must_use]
    pub fn new(
        tts: TextToSpeech,
        playback: AudioPlayback,
        events: mpsc::UnboundedSender<SynthesisEvent>,
    ) -> Self {
        Self {
            tts: Arc::new(tts),
            playback,
            events,
            playing: None,
        }
    }
}

impl SynthesisEngine for RemoteSynthesizer {
    fn voices(&self) -> Vec<Voice> {
        OPENAI_VOICES
            .iter()
            .map(|name| Voice::new(*name, "en-US"))
            .collect()
    }

    fn speak(&mut self, utterance: Utterance) {
        self.cancel();

        let cancel = Arc::new(AtomicBool::new(false));
        let tts = Arc::clone(&self.tts);
        let playback = self.playback.clone();
        let events = self.events.clone();
        let flag = Arc::clone(&cancel);

        let task = tokio::spawn(async move {
            let id = utterance.id;
            let voice = utterance
                .voice
                .as_ref()
                .map_or(DEFAULT_VOICE, |v| v.name.as_str());

            let audio = match tts.synthesize(&utterance.text, voice, utterance.rate).await {
                Ok(audio) => audio,
                Err(e) => {
                    let _ = events.send(SynthesisEvent::Failed {
                        id,
                        message: e.to_string(),
                    });
                    return;
                }
            };
            if flag.load(Ordering::Acquire) {
                return;
            }

            let _ = events.send(SynthesisEvent::Started(id));
            let volume = utterance.volume;
            let played = tokio::task::spawn_blocking(move || {
                playback.play_mp3_blocking(&audio, volume, &flag)
            })
            .await;

            let event = match played {
                Ok(Ok(())) => SynthesisEvent::Finished(id),
                Ok(Err(e)) => SynthesisEvent::Failed {
                    id,
                    message: e.to_string(),
                },
                Err(e) => SynthesisEvent::Failed {
                    id,
                    message: e.to_string(),
                },
            };
            let _ = events.send(event);
        });

        self.playing = Some(Playing { cancel, task });
    }

    fn cancel(&mut self) {
        if let Some(playing) = self.playing.take() {
            playing.cancel.store(true, Ordering::Release);
            // Aborting only lands before playback; the blocking player watches the flag
            playing.task.abort();
        }
    }
}

impl Drop for RemoteSynthesizer {
    fn drop(&mut self) {
        self.cancel();
    }
}
