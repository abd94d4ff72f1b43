use reqwest::StatusCode;
use thiserror::Error;

use crate::validation::FieldError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server responded with {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("invalid payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("stream closed by server")]
    StreamClosed,
    #[error("request superseded")]
    Cancelled,
    #[error("validation failed on {} field(s)", .0.len())]
    Validation(Vec<FieldError>),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            ClientError::Network(err) => err.status(),
            _ => None,
        }
    }

    /// Short text suitable for a transient notification.
    pub fn user_message(&self) -> String {
        match self.status() {
            Some(StatusCode::FORBIDDEN) => return "Please verify your email address".to_owned(),
            Some(StatusCode::UNAUTHORIZED) => return "Please sign in to continue".to_owned(),
            _ => {}
        }
        match self {
            ClientError::Status { message, .. } if !message.is_empty() => message.clone(),
            ClientError::Network(_) | ClientError::StreamClosed => {
                "Failed to connect to the server".to_owned()
            }
            ClientError::Validation(errors) => errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "Please check the form".to_owned()),
            _ => "Something went wrong".to_owned(),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
