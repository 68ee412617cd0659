//! Remote streaming chat
//!
//! [`ChatBackend`] is the seam between the controller and the network.
//! [`spawn_turn`] runs one send on the runtime and forwards its deltas and
//! terminal result, in order, over a single channel.

mod client;
mod error;
pub mod sse;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::conversation::{ChatHistoryEntry, MessageId};
use crate::credential::Credential;

pub use client::StreamingChatClient;
pub use error::ChatError;

/// Sends a conversation history and streams back the reply
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send `history`, calling `on_delta` for every non-empty fragment
    ///
    /// Resolves with the full concatenated reply.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ChatError`] if the endpoint rejects the request
    /// or the stream fails part way
    async fn send(
        &self,
        history: &[ChatHistoryEntry],
        credential: &Credential,
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, ChatError>;
}

/// Everything needed to run one streamed turn
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Placeholder assistant message receiving the reply
    pub message_id: MessageId,
    /// Finalized history, placeholder excluded
    pub history: Vec<ChatHistoryEntry>,
    pub credential: Credential,
}

/// Progress of a streamed turn, delivered in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    Delta {
        id: MessageId,
        fragment: String,
    },
    Finished {
        id: MessageId,
        result: Result<String, ChatError>,
    },
}

/// Run `request` against `backend` on the runtime
///
/// Deltas and the final result are forwarded to `events`. The task is never
/// aborted by the caller; a closed receiver simply drops further events.
pub fn spawn_turn(
    backend: Arc<dyn ChatBackend>,
    request: TurnRequest,
    events: mpsc::UnboundedSender<TurnEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let id = request.message_id;
        tracing::debug!(message_id = %id, history = request.history.len(), "turn started");

        let delta_tx = events.clone();
        let mut on_delta = move |fragment: &str| {
            let _ = delta_tx.send(TurnEvent::Delta {
                id,
                fragment: fragment.to_string(),
            });
        };

        let result = backend
            .send(&request.history, &request.credential, &mut on_delta)
            .await;

        match &result {
            Ok(text) => tracing::debug!(message_id = %id, chars = text.len(), "turn finished"),
            Err(e) => tracing::warn!(message_id = %id, error = %e, "turn failed"),
        }

        let _ = events.send(TurnEvent::Finished { id, result });
    })
}
