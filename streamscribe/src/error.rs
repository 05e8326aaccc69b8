use std::fmt;
use std::path::PathBuf;

use crate::engine::CancelReason;
use crate::types::Transcript;

/// All errors that can occur in streamscribe.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input format: {0}")]
    InvalidInputFormat(String),

    #[error("input file not found: {path}")]
    InputNotFound { path: PathBuf },

    #[error("audio conversion failed: {0}")]
    ConversionFailure(String),

    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("transport error: {0}")]
    TransportFailure(String),

    /// The session ended early. Everything recognized before the cancellation is kept.
    #[error("recognition canceled ({reason}): {detail}")]
    EngineCanceled {
        reason: CancelReason,
        detail: String,
        partial: Box<Transcript>,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInputFormat,
    ConversionFailure,
    CapabilityUnavailable,
    AuthenticationFailure,
    TransportFailure,
    EngineCanceled,
    Configuration,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidInputFormat => "invalid-input-format",
            ErrorKind::ConversionFailure => "conversion-failure",
            ErrorKind::CapabilityUnavailable => "capability-unavailable",
            ErrorKind::AuthenticationFailure => "authentication-failure",
            ErrorKind::TransportFailure => "transport-failure",
            ErrorKind::EngineCanceled => "engine-canceled",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Io => "io",
        };
        f.write_str(name)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInputFormat(_) | Error::InputNotFound { .. } => {
                ErrorKind::InvalidInputFormat
            }
            Error::ConversionFailure(_) => ErrorKind::ConversionFailure,
            Error::CapabilityUnavailable(_) => ErrorKind::CapabilityUnavailable,
            Error::AuthenticationFailure(_) => ErrorKind::AuthenticationFailure,
            Error::TransportFailure(_) => ErrorKind::TransportFailure,
            Error::EngineCanceled { .. } => ErrorKind::EngineCanceled,
            Error::Configuration(_) | Error::Json(_) => ErrorKind::Configuration,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Only transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransportFailure(_))
    }

    /// Segments recognized before the session was canceled, if any were kept.
    pub fn partial_transcript(&self) -> Option<&Transcript> {
        match self {
            Error::EngineCanceled { partial, .. } => Some(partial.as_ref()),
            _ => None,
        }
    }

    /// Classify a non-success HTTP status returned by the recognition service.
    pub fn from_http_status(status: u16, body: &str) -> Self {
        let body: String = body.trim().chars().take(500).collect();
        let detail = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {body}")
        };

        match status {
            401 | 403 => Error::AuthenticationFailure(detail),
            400 | 404 | 415 => Error::Configuration(detail),
            _ => Error::TransportFailure(detail),
        }
    }

    /// Classify a websocket failure from the streaming connection.
    #[cfg(feature = "azure")]
    pub(crate) fn from_ws(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match err {
            WsError::Http(response) => {
                let body = response
                    .body()
                    .as_deref()
                    .map(String::from_utf8_lossy)
                    .unwrap_or_default();
                Error::from_http_status(response.status().as_u16(), &body)
            }
            WsError::Url(e) => Error::Configuration(format!("invalid service URL: {e}")),
            WsError::HttpFormat(e) => Error::Configuration(format!("invalid handshake request: {e}")),
            other => Error::TransportFailure(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Error::from_http_status(status.as_u16(), &err.to_string());
        }
        if err.is_builder() {
            return Error::Configuration(err.to_string());
        }
        Error::TransportFailure(err.to_string())
    }
}
