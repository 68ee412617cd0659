//! HTTP client for the streaming chat endpoint

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use super::sse::SseParser;
use super::{ChatBackend, ChatError};
use crate::config::ChatConfig;
use crate::conversation::ChatHistoryEntry;
use crate::credential::Credential;
use crate::Result;

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatHistoryEntry],
    credential: &'a str,
}

/// OpenAI-compatible streaming chunk
#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Streaming chat client over reqwest
pub struct StreamingChatClient {
    http: reqwest::Client,
    endpoint: Url,
    gateway_key: Option<SecretString>,
}

impl StreamingChatClient {
    /// Create a client for the configured endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;

        tracing::debug!(endpoint = %config.endpoint, "chat client initialized");

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            gateway_key: config.gateway_key.clone().map(SecretString::from),
        })
    }

    /// Endpoint requests are sent to
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ChatBackend for StreamingChatClient {
    async fn send(
        &self,
        history: &[ChatHistoryEntry],
        credential: &Credential,
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> std::result::Result<String, ChatError> {
        let body = ChatRequest {
            messages: history,
            credential: credential.expose(),
        };

        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(&body);
        if let Some(key) = &self.gateway_key {
            request = request.header(AUTHORIZATION, format!("Bearer {}", key.expose_secret()));
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "chat request failed");
            ChatError::from(e)
        })?;

        let status = response.status();
        tracing::debug!(status = %status, "received chat response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = ChatError::from_status(status, &body);
            tracing::warn!(status = %status, error = %err, "chat endpoint rejected request");
            return Err(err);
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));

        let mut decoder = if is_event_stream {
            BodyDecoder::Sse(SseParser::new())
        } else {
            BodyDecoder::Text(Utf8Decoder::default())
        };

        let mut full = String::new();
        let mut emit = |fragment: &str| {
            if !fragment.is_empty() {
                full.push_str(fragment);
                on_delta(fragment);
            }
        };

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                tracing::error!(error = %e, "chat stream interrupted");
                ChatError::from(e)
            })?;
            if decoder.feed(&chunk, &mut emit)? == Flow::Done {
                break;
            }
        }
        decoder.finish(&mut emit)?;
        drop(emit);

        Ok(full)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Done,
}

enum BodyDecoder {
    Sse(SseParser),
    Text(Utf8Decoder),
}

impl BodyDecoder {
    fn feed(
        &mut self,
        chunk: &[u8],
        emit: &mut impl FnMut(&str),
    ) -> std::result::Result<Flow, ChatError> {
        match self {
            Self::Sse(parser) => {
                for event in parser.push(chunk) {
                    if event.is_done() {
                        return Ok(Flow::Done);
                    }
                    handle_payload(&event.data, emit)?;
                }
                Ok(Flow::Continue)
            }
            Self::Text(decoder) => {
                emit(&decoder.push(chunk));
                Ok(Flow::Continue)
            }
        }
    }

    fn finish(&mut self, emit: &mut impl FnMut(&str)) -> std::result::Result<(), ChatError> {
        match self {
            Self::Sse(parser) => {
                if let Some(event) = parser.finish().filter(|e| !e.is_done()) {
                    handle_payload(&event.data, emit)?;
                }
            }
            Self::Text(decoder) => emit(&decoder.finish()),
        }
        Ok(())
    }
}

/// Interpret one SSE data payload
fn handle_payload(data: &str, emit: &mut impl FnMut(&str)) -> std::result::Result<(), ChatError> {
    if let Some(message) = super::error::error_message(data) {
        return Err(ChatError::Stream(message));
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            if let Some(content) = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
            {
                emit(&content);
            }
        }
        Err(e) => tracing::trace!(error = %e, "skipping unparsable stream payload"),
    }
    Ok(())
}

/// Incremental UTF-8 decoding that holds back incomplete trailing sequences
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Truncated sequence at the end, wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
        out
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_decoder_reassembles_split_characters() {
        let bytes = "h\u{e9}llo \u{1f44b}".as_bytes();
        let mut decoder = Utf8Decoder::default();
        let mut out = String::new();
        for byte in bytes {
            out.push_str(&decoder.push(std::slice::from_ref(byte)));
        }
        out.push_str(&decoder.finish());
        assert_eq!(out, "h\u{e9}llo \u{1f44b}");
    }

    #[test]
    fn utf8_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.push(b"a\xffb"), "a\u{fffd}b");
    }

    #[test]
    fn payload_extracts_delta_content() {
        let mut out = String::new();
        handle_payload(
            r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
            &mut |s: &str| out.push_str(s),
        )
        .unwrap();
        handle_payload(r#"{"choices":[{"delta":{}}]}"#, &mut |s: &str| out.push_str(s)).unwrap();
        assert_eq!(out, "Hel");
    }

    #[test]
    fn payload_error_is_stream_error() {
        let result = handle_payload(r#"{"error":"model overloaded"}"#, &mut |_: &str| {});
        assert_eq!(result, Err(ChatError::Stream("model overloaded".to_string())));
    }
}
