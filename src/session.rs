//! Interactive voice session
//!
//! The single event loop that owns the [`ConversationController`]. Every
//! input (typed commands, recognition and synthesis events, streamed chat
//! events, meter frames and Ctrl-C) is awaited in one `select!` and applied
//! to the controller in arrival order. Controller output is drained into
//! the renderer after each step.

use std::io::Write;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::chat::{ChatBackend, TurnEvent, TurnRequest, spawn_turn};
use crate::commands::Command;
use crate::controller::{ConversationController, RecordingState, UiEvent};
use crate::conversation::MessageId;
use crate::credential::{Credential, CredentialStore};
use crate::terminal::TerminalRenderer;
use crate::voice::{RecognitionEvent, SynthesisEvent};
use crate::Result;

/// Receiving ends of the channels the controller and engines publish on
pub struct SessionChannels {
    pub ui: mpsc::UnboundedReceiver<UiEvent>,
    pub capture: mpsc::UnboundedReceiver<RecognitionEvent>,
    pub speech: mpsc::UnboundedReceiver<SynthesisEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Event loop tying the controller to a terminal
pub struct VoiceSession<W: Write> {
    controller: ConversationController,
    backend: Arc<dyn ChatBackend>,
    store: CredentialStore,
    channels: SessionChannels,
    turn_tx: mpsc::UnboundedSender<TurnEvent>,
    turn_rx: mpsc::UnboundedReceiver<TurnEvent>,
    renderer: TerminalRenderer<W>,
}

impl<W: Write> VoiceSession<W> {
    pub fn new(
        controller: ConversationController,
        backend: Arc<dyn ChatBackend>,
        store: CredentialStore,
        channels: SessionChannels,
        renderer: TerminalRenderer<W>,
    ) -> Self {
        let (turn_tx, turn_rx) = mpsc::unbounded_channel();
        Self {
            controller,
            backend,
            store,
            channels,
            turn_tx,
            turn_rx,
            renderer,
        }
    }

    #[must_use]
    pub const fn controller(&self) -> &ConversationController {
        &self.controller
    }

    #[must_use]
    pub const fn renderer(&self) -> &TerminalRenderer<W> {
        &self.renderer
    }

    /// Run until `q`, end of input or Ctrl-C
    ///
    /// Devices are always released on the way out.
    ///
    /// # Errors
    ///
    /// Returns error if the terminal cannot be written
    pub async fn run(&mut self, mut lines: mpsc::Receiver<String>) -> Result<()> {
        let result = self.event_loop(&mut lines).await;

        self.controller.teardown();
        let drained = self.drain_ui();
        tracing::debug!("session ended");

        result.and(drained)
    }

    async fn event_loop(&mut self, lines: &mut mpsc::Receiver<String>) -> Result<()> {
        let mut levels = self.controller.subscribe_levels();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        self.drain_ui()?;
        self.renderer.info("Press enter to talk, ? for help")?;

        loop {
            let flow = tokio::select! {
                line = lines.recv() => match line {
                    Some(line) => self.handle_line(&line)?,
                    None => Flow::Quit,
                },
                Some(event) = self.channels.capture.recv() => {
                    if let Some(request) = self.controller.handle_capture_event(event) {
                        self.send(request);
                    }
                    Flow::Continue
                }
                Some(event) = self.channels.speech.recv() => {
                    self.controller.handle_speech_event(&event);
                    Flow::Continue
                }
                Some(event) = self.turn_rx.recv() => {
                    self.controller.handle_turn_event(event);
                    Flow::Continue
                }
                Ok(()) = levels.changed() => {
                    let frame = levels.borrow_and_update().clone();
                    self.renderer.levels(&frame)?;
                    Flow::Continue
                }
                _ = &mut ctrl_c => {
                    tracing::info!("interrupted");
                    Flow::Quit
                }
            };

            self.drain_ui()?;
            if flow == Flow::Quit {
                return Ok(());
            }
        }
    }

    fn handle_line(&mut self, line: &str) -> Result<Flow> {
        match line.parse::<Command>() {
            Ok(command) => self.handle_command(command),
            Err(e) => {
                self.renderer.error(&e.to_string())?;
                Ok(Flow::Continue)
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> Result<Flow> {
        tracing::trace!(?command, "command");
        match command {
            Command::Talk => {
                if self.controller.state() == RecordingState::Idle {
                    self.controller.toggle_recording();
                } else if let Some(request) = self.controller.stop() {
                    self.send(request);
                }
            }
            Command::Pause => self.controller.pause(),
            Command::Type(text) => {
                if let Some(request) = self.controller.submit_text(&text) {
                    self.send(request);
                }
            }
            Command::List => self.renderer.list(self.controller.log())?,
            Command::Delete(n) => {
                if let Some(id) = self.message_at(n)? {
                    self.controller.delete_message(id);
                }
            }
            Command::Copy(n) => {
                if let Some(id) = self.message_at(n)? {
                    self.controller.copy_message(id);
                }
            }
            Command::Replay(n) => {
                if let Some(id) = self.message_at(n)? {
                    self.controller.replay_message(id);
                }
            }
            Command::SetKey(secret) => self.save_credential(&secret)?,
            Command::ClearKey => match self.store.clear() {
                Ok(()) => {
                    self.controller.set_credential(None);
                    self.renderer.info("Credential cleared")?;
                }
                Err(e) => self.renderer.error(&e.to_string())?,
            },
            Command::Voices => {
                let speech = self.controller.speech();
                let voices = speech.voices();
                let selected = speech.selected_voice();
                self.renderer.voices(&voices, selected.as_ref())?;
            }
            Command::Help => self.renderer.help()?,
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn save_credential(&mut self, secret: &str) -> Result<()> {
        let saved = Credential::new(secret).and_then(|credential| {
            self.store.save(&credential)?;
            Ok(credential)
        });
        match saved {
            Ok(credential) => {
                self.controller.set_credential(Some(credential));
                self.renderer.info("Credential saved")?;
            }
            Err(e) => self.renderer.error(&e.to_string())?,
        }
        Ok(())
    }

    fn message_at(&mut self, n: usize) -> Result<Option<MessageId>> {
        let id = self.controller.log().nth(n).map(|m| m.id);
        if id.is_none() {
            self.renderer.error(&format!("no message {n}"))?;
        }
        Ok(id)
    }

    fn send(&self, request: TurnRequest) {
        // Detached; a deleted placeholder simply ignores the events
        drop(spawn_turn(
            Arc::clone(&self.backend),
            request,
            self.turn_tx.clone(),
        ));
    }

    fn drain_ui(&mut self) -> Result<()> {
        while let Ok(event) = self.channels.ui.try_recv() {
            self.renderer.render(&event)?;
        }
        Ok(())
    }
}

/// Read stdin lines on a dedicated thread
///
/// The channel closes at end of input.
#[must_use]
pub fn spawn_line_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
        tracing::debug!("stdin closed");
    });
    rx
}
