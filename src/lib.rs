//! Murmur - Voice-driven conversation client for AI assistants
//!
//! Speak, watch the transcript form live, and hear the assistant's streamed
//! reply read back:
//! - Continuous speech capture with interim and final transcripts
//! - Frequency-band microphone level meter
//! - Streaming chat against a remote endpoint
//! - Speech output with voice selection
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Terminal session                     │
//! │   Commands  │  Renderer  │  Event loop              │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │             Conversation controller                  │
//! │   Recording state  │  Message log  │  Active stream │
//! └──────┬──────────────┬──────────────┬────────────────┘
//!        │              │              │
//! ┌──────▼──────┐ ┌─────▼──────┐ ┌─────▼──────────────┐
//! │   Capture   │ │   Meter    │ │  Speech  │  Chat   │
//! │  (Whisper)  │ │   (FFT)    │ │  (TTS)   │  (SSE)  │
//! └─────────────┘ └────────────┘ └────────────────────┘
//! ```

pub mod chat;
pub mod clipboard;
pub mod commands;
pub mod config;
pub mod controller;
pub mod conversation;
pub mod credential;
pub mod error;
pub mod session;
pub mod terminal;
pub mod voice;

pub use chat::{ChatBackend, ChatError, StreamingChatClient, TurnEvent, TurnRequest};
pub use config::Config;
pub use controller::{ConversationController, Devices, NoticeLevel, RecordingState, UiEvent};
pub use conversation::{ChatHistoryEntry, ConversationLog, Message, MessageId, Role};
pub use credential::{Credential, CredentialStore};
pub use error::{Capability, Error, Result};
pub use session::{SessionChannels, VoiceSession};
