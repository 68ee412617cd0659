//! Line-oriented terminal front-end
//!
//! Renders [`UiEvent`]s to a writer. While recording, the bottom line is a
//! status line that is redrawn in place with the live meter and transcript;
//! everything else is printed above it.

use std::collections::HashMap;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use crate::controller::{NoticeLevel, RecordingState, UiEvent};
use crate::conversation::{ConversationLog, MessageId, Role};
use crate::voice::Voice;

const WAVE: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Minimum time between status line redraws from meter frames
const LEVEL_REDRAW: Duration = Duration::from_millis(50);

const CLEAR_LINE: &str = "\r\x1b[2K";

const HELP: &str = "\
  <enter>       start recording, or stop and send
  p             pause / resume recording
  t <text>      send typed text
  ls            list the conversation
  d <n>         delete message n
  c <n>         copy message n
  r <n>         speak message n again
  key <secret>  save the chat credential
  key clear     forget the chat credential
  voices        list synthesis voices
  q             quit";

/// Writes the conversation to a terminal
pub struct TerminalRenderer<W: Write> {
    out: W,
    state: RecordingState,
    transcript: String,
    levels: Vec<f32>,
    status_drawn: bool,
    last_levels: Option<Instant>,
    /// Bytes of each streaming reply already printed
    streamed: HashMap<MessageId, usize>,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            state: RecordingState::Idle,
            transcript: String::new(),
            levels: Vec::new(),
            status_drawn: false,
            last_levels: None,
            streamed: HashMap::new(),
        }
    }

    /// The underlying writer
    pub const fn writer(&self) -> &W {
        &self.out
    }

    /// Render one controller event
    ///
    /// # Errors
    ///
    /// Returns error if the writer fails
    pub fn render(&mut self, event: &UiEvent) -> io::Result<()> {
        match event {
            UiEvent::StateChanged(state) => {
                self.state = *state;
                self.clear_status()?;
                match state {
                    RecordingState::Recording => writeln!(self.out, "● listening")?,
                    RecordingState::Paused => writeln!(self.out, "‖ paused")?,
                    RecordingState::Idle => {
                        self.levels.clear();
                        writeln!(self.out, "■ stopped")?;
                    }
                }
                self.draw_status()?;
            }
            UiEvent::TranscriptChanged(text) => {
                self.transcript.clone_from(text);
                self.draw_status()?;
            }
            UiEvent::MessageAdded(message) => {
                self.clear_status()?;
                match message.role {
                    Role::User => writeln!(self.out, "you: {}", message.content)?,
                    Role::Assistant => {
                        write!(self.out, "assistant: {}", message.content)?;
                        if message.streaming {
                            self.streamed.insert(message.id, message.content.len());
                        } else {
                            writeln!(self.out)?;
                        }
                    }
                }
                self.out.flush()?;
            }
            UiEvent::MessageUpdated {
                id,
                content,
                streaming,
            } => self.stream_update(*id, content, *streaming)?,
            UiEvent::MessageRemoved(id) => {
                if self.streamed.remove(id).is_some() {
                    writeln!(self.out, " [removed]")?;
                } else {
                    self.clear_status()?;
                    writeln!(self.out, "(message {} removed)", id.short())?;
                }
                self.draw_status()?;
            }
            UiEvent::SpeakingChanged(speaking) => {
                tracing::trace!(speaking, "speaking changed");
            }
            UiEvent::Notice { level, text } => {
                self.clear_status()?;
                let tag = match level {
                    NoticeLevel::Info => "info",
                    NoticeLevel::Warning => "warning",
                    NoticeLevel::Error => "error",
                };
                writeln!(self.out, "[{tag}] {text}")?;
                self.draw_status()?;
            }
        }
        Ok(())
    }

    /// Redraw the meter on the status line, throttled
    ///
    /// # Errors
    ///
    /// Returns error if the writer fails
    pub fn levels(&mut self, levels: &[f32]) -> io::Result<()> {
        if self.state != RecordingState::Recording || !self.streamed.is_empty() {
            return Ok(());
        }
        let now = Instant::now();
        if self
            .last_levels
            .is_some_and(|last| now.duration_since(last) < LEVEL_REDRAW)
        {
            return Ok(());
        }
        self.last_levels = Some(now);
        self.levels = levels.to_vec();
        self.draw_status()
    }

    /// Print the numbered conversation
    ///
    /// # Errors
    ///
    /// Returns error if the writer fails
    pub fn list(&mut self, log: &ConversationLog) -> io::Result<()> {
        self.clear_status()?;
        if log.is_empty() {
            writeln!(self.out, "(no messages)")?;
        }
        for (n, message) in log.iter().enumerate() {
            let who = match message.role {
                Role::User => "you",
                Role::Assistant => "assistant",
            };
            let marker = if message.streaming { " …" } else { "" };
            writeln!(
                self.out,
                "{:>3}. [{}] {who}: {}{marker}",
                n + 1,
                message.created_at.format("%H:%M:%S"),
                message.content
            )?;
        }
        self.draw_status()
    }

    /// Print the available voices, marking the selected one
    ///
    /// # Errors
    ///
    /// Returns error if the writer fails
    pub fn voices(&mut self, voices: &[Voice], selected: Option<&Voice>) -> io::Result<()> {
        self.clear_status()?;
        if voices.is_empty() {
            writeln!(self.out, "(no voices available)")?;
        }
        for voice in voices {
            let mark = if selected == Some(voice) { "*" } else { " " };
            writeln!(self.out, "{mark} {} ({})", voice.name, voice.lang)?;
        }
        self.draw_status()
    }

    /// Print the command summary
    ///
    /// # Errors
    ///
    /// Returns error if the writer fails
    pub fn help(&mut self) -> io::Result<()> {
        self.clear_status()?;
        writeln!(self.out, "{HELP}")?;
        self.draw_status()
    }

    /// Print a plain informational line
    ///
    /// # Errors
    ///
    /// Returns error if the writer fails
    pub fn info(&mut self, text: &str) -> io::Result<()> {
        self.clear_status()?;
        writeln!(self.out, "{text}")?;
        self.draw_status()
    }

    /// Print an error line
    ///
    /// # Errors
    ///
    /// Returns error if the writer fails
    pub fn error(&mut self, text: &str) -> io::Result<()> {
        self.clear_status()?;
        writeln!(self.out, "[error] {text}")?;
        self.draw_status()
    }

    fn stream_update(&mut self, id: MessageId, content: &str, streaming: bool) -> io::Result<()> {
        let Some(printed) = self.streamed.get(&id).copied() else {
            // Not streamed here (e.g. finalized before we saw it)
            if !streaming {
                self.clear_status()?;
                writeln!(self.out, "assistant: {content}")?;
                self.draw_status()?;
            }
            return Ok(());
        };

        if let Some(tail) = content.get(printed..) {
            write!(self.out, "{tail}")?;
        }
        if streaming {
            self.streamed.insert(id, content.len());
        } else {
            self.streamed.remove(&id);
            writeln!(self.out)?;
            self.draw_status()?;
        }
        self.out.flush()
    }

    fn draw_status(&mut self) -> io::Result<()> {
        if self.state == RecordingState::Idle || !self.streamed.is_empty() {
            return self.out.flush();
        }
        let wave: String = self.levels.iter().map(|l| wave_char(*l)).collect();
        let prefix = match self.state {
            RecordingState::Paused => "‖",
            _ => "●",
        };
        write!(self.out, "{CLEAR_LINE}{prefix} {wave} {}", self.transcript)?;
        self.status_drawn = true;
        self.out.flush()
    }

    fn clear_status(&mut self) -> io::Result<()> {
        if self.status_drawn {
            write!(self.out, "{CLEAR_LINE}")?;
            self.status_drawn = false;
        }
        Ok(())
    }
}

/// Waveform glyph for a level in `[0, 1]`
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
#[must_use]
pub fn wave_char(level: f32) -> char {
    let top = (WAVE.len() - 1) as f32;
    let idx = (level.clamp(0.0, 1.0) * top).round() as usize;
    WAVE[idx.min(WAVE.len() - 1)]
}
