use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dialoguer::Password;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use murmur::clipboard::SystemClipboard;
use murmur::session::spawn_line_reader;
use murmur::terminal::{TerminalRenderer, wave_char};
use murmur::voice::{
    AudioLevelMeter, AudioPlayback, CpalMicrophone, FrequencyAnalyzer, Microphone,
    RecognitionEngine, RecognitionEvent, RemoteSynthesizer, SpeechCaptureSession, SpeechOutput,
    SpeechToText, SynthesisEngine, SynthesisEvent, TextToSpeech, WhisperRecognizer, bin_levels,
    rms_energy,
};
use murmur::{
    Config, ConversationController, Credential, CredentialStore, Devices, SessionChannels,
    StreamingChatClient, VoiceSession,
};

/// Murmur - Talk to an AI assistant from your terminal
#[derive(Parser)]
#[command(name = "murmur", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Never speak replies aloud
    #[arg(long, env = "MURMUR_MUTE")]
    mute: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Manage the chat credential
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// Test microphone input with a live level meter
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Speak text through speech output
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of speech output.")]
        text: String,
    },
    /// List synthesis voices, marking the one in use
    Voices,
}

#[derive(Subcommand)]
enum KeyAction {
    /// Save the chat credential (prompts when omitted)
    Set {
        key: Option<String>,
    },
    /// Forget the saved chat credential
    Clear,
    /// Show whether a credential is available
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,murmur=info",
        1 => "info,murmur=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if cli.mute {
        config.speech.enabled = false;
    }
    let store = CredentialStore::in_dir(&config.data_dir);

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Key { action } => key(&store, &config, action),
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::Say { text } => say(&config, &text).await,
            Command::Voices => voices(&config),
        };
    }

    tracing::info!(endpoint = %config.chat.endpoint, "starting murmur");

    let credential = load_credential(&store, &config)?;
    if credential.is_none() {
        tracing::info!("no chat credential; run `murmur key set` or type `key <secret>`");
    }

    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let (capture_tx, capture_rx) = mpsc::unbounded_channel();
    let (speech_tx, speech_rx) = mpsc::unbounded_channel();

    let devices = build_devices(&config, capture_tx, speech_tx);
    let controller = ConversationController::new(devices, credential, ui_tx);
    let backend = Arc::new(StreamingChatClient::new(&config.chat)?);

    let channels = SessionChannels {
        ui: ui_rx,
        capture: capture_rx,
        speech: speech_rx,
    };
    let mut session = VoiceSession::new(
        controller,
        backend,
        store,
        channels,
        TerminalRenderer::new(std::io::stdout()),
    );

    session.run(spawn_line_reader()).await?;
    Ok(())
}

/// Stored credential first, then the configured fallback
fn load_credential(store: &CredentialStore, config: &Config) -> anyhow::Result<Option<Credential>> {
    if let Some(credential) = store.load()? {
        return Ok(Some(credential));
    }
    Ok(config
        .api_keys
        .openrouter
        .as_deref()
        .and_then(|key| Credential::new(key).ok()))
}

/// Bind host capabilities; anything unavailable is left unsupported
fn build_devices(
    config: &Config,
    capture_events: mpsc::UnboundedSender<RecognitionEvent>,
    speech_events: mpsc::UnboundedSender<SynthesisEvent>,
) -> Devices {
    let openai_key = config.api_keys.openai.clone().filter(|k| !k.is_empty());

    let microphone = if config.capture.enabled {
        match CpalMicrophone::probe() {
            Ok(microphone) => Some(microphone),
            Err(e) => {
                tracing::warn!(error = %e, "microphone unavailable");
                None
            }
        }
    } else {
        tracing::info!("speech capture disabled");
        None
    };

    let recognizer: Option<Box<dyn RecognitionEngine>> = match (&microphone, &openai_key) {
        (Some(microphone), Some(key)) => {
            let capture = &config.capture;
            match SpeechToText::new(
                key.clone(),
                capture.stt_model.clone(),
                capture.stt_url.clone(),
                &capture.language,
            ) {
                Ok(stt) => Some(Box::new(WhisperRecognizer::new(
                    Box::new(microphone.clone()),
                    stt,
                    capture.clone(),
                    capture_events,
                ))),
                Err(e) => {
                    tracing::warn!(error = %e, "speech recognition unavailable");
                    None
                }
            }
        }
        (Some(_), None) => {
            tracing::warn!("speech recognition needs OPENAI_API_KEY");
            None
        }
        (None, _) => None,
    };

    let meter_microphone = microphone.map(|m| Box::new(m) as Box<dyn Microphone>);

    Devices {
        capture: SpeechCaptureSession::new(recognizer),
        meter: AudioLevelMeter::new(meter_microphone, config.meter.clone()),
        speech: SpeechOutput::new(
            synthesizer(config, openai_key.as_deref(), speech_events),
            config.speech.clone(),
        ),
        clipboard: Box::new(SystemClipboard),
    }
}

fn synthesizer(
    config: &Config,
    openai_key: Option<&str>,
    events: mpsc::UnboundedSender<SynthesisEvent>,
) -> Option<Box<dyn SynthesisEngine>> {
    let Some(key) = openai_key else {
        tracing::warn!("speech synthesis needs OPENAI_API_KEY");
        return None;
    };
    let tts = TextToSpeech::new(
        key.to_string(),
        config.speech.tts_model.clone(),
        config.speech.tts_url.clone(),
    );
    let playback = AudioPlayback::new();

    match (tts, playback) {
        (Ok(tts), Ok(playback)) => Some(Box::new(RemoteSynthesizer::new(tts, playback, events))),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "speech synthesis unavailable");
            None
        }
    }
}

/// Manage the stored chat credential
fn key(store: &CredentialStore, config: &Config, action: KeyAction) -> anyhow::Result<()> {
    match action {
        KeyAction::Set { key } => {
            let raw = match key {
                Some(key) => key,
                None => Password::new()
                    .with_prompt("OpenRouter API key")
                    .interact()?,
            };
            let credential = Credential::new(&raw)?;
            store.save(&credential)?;
            println!("Credential saved to {}", store.path().display());
        }
        KeyAction::Clear => {
            store.clear()?;
            println!("Credential cleared");
        }
        KeyAction::Status => {
            if store.load()?.is_some() {
                println!("Credential saved at {}", store.path().display());
            } else if config.api_keys.openrouter.is_some() {
                println!("Using OPENROUTER_API_KEY (nothing saved)");
            } else {
                println!("No credential; run `murmur key set`");
            }
        }
    }
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let microphone = CpalMicrophone::probe()?;
    let stream = microphone.open()?;
    let tap = stream.tap();

    println!("Device: {}", microphone.device_name());
    println!("Sample rate: {} Hz", stream.sample_rate());
    println!("---");

    let mut analyzer = FrequencyAnalyzer::new(config.meter.fft_size, config.meter.smoothing);

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = tap.drain();
        let energy = rms_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        let tail_start = samples.len().saturating_sub(config.meter.fft_size);
        let bytes = analyzer.frequency_bytes(&samples[tail_start..]);
        let bands: String = bin_levels(&bytes, config.meter.bars)
            .iter()
            .map(|level| wave_char(*level))
            .collect();

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | {}",
            i + 1,
            energy,
            peak,
            bands
        );
    }

    stream.release()?;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Speak text and wait for playback to finish
#[allow(clippy::future_not_send)]
async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut speech = SpeechOutput::new(
        synthesizer(config, config.api_keys.openai.as_deref(), events_tx),
        config.speech.clone(),
    );
    if !speech.is_supported() {
        anyhow::bail!("speech synthesis is not available (is OPENAI_API_KEY set?)");
    }

    let voice = speech.selected_voice();
    println!(
        "Speaking with voice {}...",
        voice.as_ref().map_or("default", |v| v.name.as_str())
    );

    if speech.speak(text).is_none() {
        anyhow::bail!("nothing to say");
    }

    while let Some(event) = events.recv().await {
        if let SynthesisEvent::Failed { message, .. } = &event {
            anyhow::bail!("speech failed: {message}");
        }
        if speech.handle_event(&event) == Some(false) {
            break;
        }
    }

    println!("\n---");
    println!("If you heard the speech, speech output is working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// List voices with the selected one marked
fn voices(config: &Config) -> anyhow::Result<()> {
    let (events_tx, _events) = mpsc::unbounded_channel();
    let speech = SpeechOutput::new(
        synthesizer(config, config.api_keys.openai.as_deref(), events_tx),
        config.speech.clone(),
    );
    if !speech.is_supported() {
        anyhow::bail!("speech synthesis is not available (is OPENAI_API_KEY set?)");
    }

    let mut renderer = TerminalRenderer::new(std::io::stdout());
    renderer.voices(&speech.voices(), speech.selected_voice().as_ref())?;
    std::io::stdout().flush()?;
    Ok(())
}
