// src/errors.rs
use actix_web::{HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::models::SessionId;

/// Failure of a single call to one of the external inference endpoints.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote error: {status} - {message}")]
    Remote { status: u16, message: String },

    #[error("Timeout: {message}")]
    Timeout { status: Option<u16>, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Failed to generate clothing image after {attempts} attempts: {detail}")]
    GenerationExhausted {
        attempts: u32,
        last_status: Option<u16>,
        detail: String,
    },
}

/// Serializable discriminant of [`InferenceError`], kept in the read model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Remote,
    Timeout,
    Parse,
    Validation,
    GenerationExhausted,
}

impl InferenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InferenceError::Transport(_) => ErrorKind::Transport,
            InferenceError::Remote { .. } => ErrorKind::Remote,
            InferenceError::Timeout { .. } => ErrorKind::Timeout,
            InferenceError::Parse(_) => ErrorKind::Parse,
            InferenceError::Validation(_) => ErrorKind::Validation,
            InferenceError::GenerationExhausted { .. } => ErrorKind::GenerationExhausted,
        }
    }

    /// HTTP status carried by the failure, if the remote answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            InferenceError::Remote { status, .. } => Some(*status),
            InferenceError::Timeout { status, .. } => *status,
            InferenceError::GenerationExhausted { last_status, .. } => *last_status,
            _ => None,
        }
    }
}

/// Char-safe excerpt of a remote error body, suffixed with `...` when cut.
pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Why a session did not reach `Completed`/`PartiallyCompleted`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestrationError {
    #[error("Style analysis failed: {0}")]
    Analysis(#[from] InferenceError),

    #[error("Session {0} was superseded by a newer analysis")]
    Superseded(SessionId),
}

/// Normalized failure of the auth/session provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("{0}")]
    Invalid(String),

    #[error("{message}")]
    Rejected {
        status: u16,
        message: String,
        fields: BTreeMap<String, String>,
    },

    #[error("Cannot connect to the auth server: {0}")]
    Unreachable(String),

    #[error("Not authenticated")]
    NotAuthenticated,
}

impl AuthError {
    /// One line per field error, falling back to the top-level message.
    pub fn display_lines(&self) -> Vec<String> {
        match self {
            AuthError::Rejected {
                message, fields, ..
            } if fields.is_empty() => vec![message.clone()],
            AuthError::Rejected { fields, .. } => fields
                .iter()
                .map(|(field, msg)| format!("{}: {}", field, msg))
                .collect(),
            other => vec![other.to_string()],
        }
    }
}

#[derive(Error, Debug)]
pub enum StyleError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Share error: {0}")]
    Share(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl From<redis::RedisError> for StyleError {
    fn from(e: redis::RedisError) -> Self {
        StyleError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for StyleError {
    fn from(e: serde_json::Error) -> Self {
        StyleError::Serialization(e.to_string())
    }
}

impl ResponseError for StyleError {
    fn error_response(&self) -> HttpResponse {
        match self {
            StyleError::Storage(_) => HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Storage error",
                "message": self.to_string()
            })),
            StyleError::Inference(_) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "error": "AI service error",
                "message": self.to_string()
            })),
            StyleError::ImageProcessing(_) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "Image processing error",
                    "message": self.to_string()
                }))
            }
            StyleError::Serialization(_) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "Data processing error",
                    "message": self.to_string()
                }))
            }
            StyleError::Validation(_) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Validation error",
                "message": self.to_string()
            })),
            StyleError::Config(_) => HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Configuration error",
                "message": self.to_string()
            })),
            StyleError::NotFound(_) => HttpResponse::NotFound().json(serde_json::json!({
                "error": "Not found",
                "message": self.to_string()
            })),
            StyleError::Share(_) => HttpResponse::BadGateway().json(serde_json::json!({
                "error": "Share error",
                "message": self.to_string()
            })),
            StyleError::Auth(AuthError::NotAuthenticated) => {
                HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "Unauthorized",
                    "message": self.to_string()
                }))
            }
            StyleError::Auth(AuthError::Unreachable(_)) => {
                HttpResponse::ServiceUnavailable().json(serde_json::json!({
                    "error": "Auth service unavailable",
                    "message": self.to_string()
                }))
            }
            StyleError::Auth(auth) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Authentication failed",
                "message": auth.display_lines().join("\n")
            })),
        }
    }
}
