//! Boundary between the session driver and a remote recognition service.
//!
//! An engine opens a session and reports what the service says through an
//! [`EngineEvent`] channel; the driver owns the write side of the audio stream
//! through [`EngineSession`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::{Credentials, Language};
use crate::error::Result;

/// Everything an engine needs to open one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub credentials: Credentials,
    pub language: Language,
    /// Overrides the service URL derived from the region.
    pub endpoint: Option<String>,
    pub connect_timeout: Duration,
}

/// Why a session ended without a clean stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The service rejected the credentials.
    Authentication,
    /// The connection dropped or could not be kept open.
    Transport,
    /// The service reported a recognition error.
    EngineError,
    /// The service reached the end of the submitted audio.
    EndOfStream,
    /// The caller asked to stop.
    Caller,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancelReason::Authentication => "authentication",
            CancelReason::Transport => "transport",
            CancelReason::EngineError => "engine error",
            CancelReason::EndOfStream => "end of stream",
            CancelReason::Caller => "canceled by caller",
        };
        f.write_str(s)
    }
}

/// Something the service reported during a session.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A final phrase. Offsets are seconds from the start of the audio.
    Recognized {
        text: String,
        offset: Option<f64>,
        duration: Option<f64>,
    },
    /// The service finished the session normally.
    SessionStopped,
    /// The session ended abnormally.
    Canceled { reason: CancelReason, detail: String },
}

impl EngineEvent {
    pub fn recognized(text: impl Into<String>) -> Self {
        EngineEvent::Recognized {
            text: text.into(),
            offset: None,
            duration: None,
        }
    }

    pub fn canceled(reason: CancelReason, detail: impl Into<String>) -> Self {
        EngineEvent::Canceled {
            reason,
            detail: detail.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EngineEvent::Recognized { .. })
    }
}

/// A remote speech-recognition service.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Open a session. Events must be sent on `events` from now until a terminal
    /// event has been sent or the session is stopped.
    async fn connect(
        &self,
        config: &SessionConfig,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Box<dyn EngineSession>>;
}

/// Write side of an open session.
#[async_trait]
pub trait EngineSession: Send {
    /// Push a chunk of the audio stream.
    async fn write(&mut self, audio: &[u8]) -> Result<()>;

    /// Signal end of audio. The service keeps sending results afterwards.
    async fn finish(&mut self) -> Result<()>;

    /// Close the session. Safe to call more than once.
    async fn stop(&mut self) -> Result<()>;
}
