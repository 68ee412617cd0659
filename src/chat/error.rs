//! Remote chat failure taxonomy

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Distinguishable chat endpoint failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// 429: retry later, never automatically
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// 402: billing or quota exhausted
    #[error("billing required: {0}")]
    Billing(String),

    /// 401/403: credential rejected
    #[error("credential rejected: {0}")]
    Unauthorized(String),

    /// Any other non-2xx status
    #[error("chat gateway error {status}: {message}")]
    Gateway { status: u16, message: String },

    /// Connection or body transfer failed
    #[error("chat transport error: {0}")]
    Transport(String),

    /// The endpoint reported an error inside the stream
    #[error("chat stream error: {0}")]
    Stream(String),
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorField,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Message(String),
    Object { message: String },
}

impl ErrorField {
    fn into_message(self) -> String {
        match self {
            Self::Message(message) | Self::Object { message } => message,
        }
    }
}

/// Pull the message out of `{"error": "..."}` or `{"error": {"message": "..."}}`
pub(crate) fn error_message(payload: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(payload)
        .ok()
        .map(|body| body.error.into_message())
}

impl ChatError {
    /// Classify a non-success response
    #[must_use]
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = error_message(body).unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                trimmed.to_string()
            }
        });

        match status.as_u16() {
            429 => Self::RateLimited(message),
            402 => Self::Billing(message),
            401 | 403 => Self::Unauthorized(message),
            code => Self::Gateway {
                status: code,
                message,
            },
        }
    }

    /// Whether the same request may succeed if the user tries again later
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Transport(_))
    }

    /// Human-readable notice distinguishing the failure category
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::RateLimited(m) => format!("Rate limit reached, try again shortly ({m})"),
            Self::Billing(m) => format!("Billing or quota problem ({m})"),
            Self::Unauthorized(m) => format!("Credential rejected, check your key ({m})"),
            Self::Gateway { status, message } => format!("Chat failed ({status}): {message}"),
            Self::Transport(m) => format!("Could not reach the chat endpoint ({m})"),
            Self::Stream(m) => format!("Chat stream failed: {m}"),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_taxonomy() {
        let body = r#"{"error":"slow down"}"#;
        assert_eq!(
            ChatError::from_status(StatusCode::TOO_MANY_REQUESTS, body),
            ChatError::RateLimited("slow down".to_string())
        );
        assert!(matches!(
            ChatError::from_status(StatusCode::PAYMENT_REQUIRED, body),
            ChatError::Billing(_)
        ));
        assert!(matches!(
            ChatError::from_status(StatusCode::UNAUTHORIZED, body),
            ChatError::Unauthorized(_)
        ));
        assert!(matches!(
            ChatError::from_status(StatusCode::FORBIDDEN, body),
            ChatError::Unauthorized(_)
        ));
        assert_eq!(
            ChatError::from_status(StatusCode::BAD_REQUEST, body),
            ChatError::Gateway {
                status: 400,
                message: "slow down".to_string()
            }
        );
    }

    #[test]
    fn test_message_fallbacks() {
        assert_eq!(
            ChatError::from_status(StatusCode::BAD_GATEWAY, "upstream died"),
            ChatError::Gateway {
                status: 502,
                message: "upstream died".to_string()
            }
        );
        assert_eq!(
            ChatError::from_status(StatusCode::INTERNAL_SERVER_ERROR, ""),
            ChatError::Gateway {
                status: 500,
                message: "Internal Server Error".to_string()
            }
        );
        assert_eq!(
            error_message(r#"{"error":{"message":"nested"}}"#).as_deref(),
            Some("nested")
        );
    }

    #[test]
    fn test_retryable() {
        assert!(ChatError::RateLimited(String::new()).is_retryable());
        assert!(!ChatError::Billing(String::new()).is_retryable());
        assert!(!ChatError::Unauthorized(String::new()).is_retryable());
    }
}
