//! Drives one recognition session: connect, stream the audio, collect phrases
//! until the service ends the session, then stop it.

use std::cmp::Ordering;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::NormalizedAudio;
use crate::config::{SegmentOrder, TranscribeOptions};
use crate::engine::{CancelReason, EngineEvent, EngineSession, SessionConfig, SpeechEngine};
use crate::error::{Error, ErrorKind, Result};
use crate::progress::ProgressReporter;
use crate::types::{Segment, Transcript};

/// Bytes of audio per websocket write.
pub const AUDIO_CHUNK_SIZE: usize = 32 * 1024;

/// How long to wait for the service to explain a failed write before giving up on it.
const WRITE_FAILURE_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on closing the session once it has ended.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Canceled,
    Error,
}

/// Lifecycle of a recognition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Configuring,
    Streaming,
    Draining,
    Terminated(Outcome),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminated(_))
    }
}

/// How the session ended, before it is turned into a result.
#[derive(Debug)]
enum Terminal {
    Stopped,
    Canceled(CancelReason, String),
}

/// Run a session over `audio` and return the assembled transcript.
///
/// Progress is forced to 1.0 when the session ends, whatever the outcome. When the
/// service cancels mid-stream, the phrases received so far come back inside
/// [`Error::EngineCanceled`]; rejected credentials return
/// [`Error::AuthenticationFailure`] with nothing kept.
pub async fn run_session(
    engine: &dyn SpeechEngine,
    audio: &NormalizedAudio,
    options: &TranscribeOptions,
    reporter: &mut ProgressReporter<'_>,
    cancel: &CancellationToken,
) -> Result<Transcript> {
    let mut session = RecognitionSession::new(options);
    let result = session.run(engine, audio, reporter, cancel).await;
    reporter.finish();
    result
}

struct RecognitionSession<'o> {
    options: &'o TranscribeOptions,
    state: SessionState,
    segments: Vec<Segment>,
}

impl<'o> RecognitionSession<'o> {
    fn new(options: &'o TranscribeOptions) -> Self {
        Self {
            options,
            state: SessionState::Idle,
            segments: Vec::new(),
        }
    }

    async fn run(
        &mut self,
        engine: &dyn SpeechEngine,
        audio: &NormalizedAudio,
        reporter: &mut ProgressReporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<Transcript> {
        self.transition(SessionState::Configuring);

        let (config, mut source, bytes) = match self.prepare(audio).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.terminate(Outcome::Error);
                return Err(e);
            }
        };

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let connected = connect_with_retry(engine, &config, &events_tx, self.options, cancel).await;
        // The engine holds its own sender; the channel closes when it lets go.
        drop(events_tx);
        let mut handle = match connected {
            Ok(handle) => handle,
            Err(e) => {
                self.terminate(Outcome::Error);
                return Err(e);
            }
        };
        info!(engine = engine.name(), bytes, "recognition session open");

        self.transition(SessionState::Streaming);
        let (early, write_error) = self
            .stream(handle.as_mut(), &mut source, &mut events, reporter, cancel)
            .await;

        let terminal = match early {
            Some(terminal) => terminal,
            None => {
                self.transition(SessionState::Draining);
                self.drain(&mut events, write_error, reporter, cancel).await
            }
        };

        match tokio::time::timeout(STOP_TIMEOUT, handle.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to stop recognition session"),
            Err(_) => warn!(timeout = ?STOP_TIMEOUT, "recognition session did not stop in time"),
        }

        self.conclude(terminal)
    }

    async fn prepare(&self, audio: &NormalizedAudio) -> Result<(SessionConfig, File, u64)> {
        let config = self.options.session_config()?;
        let source = File::open(audio.path()).await?;
        let bytes = source.metadata().await?.len();
        Ok((config, source, bytes))
    }

    /// Read the audio in chunks and write each one, then signal end of audio.
    /// Events that arrive meanwhile are handled between chunks; a terminal one
    /// stops the writing. Cancellation interrupts a write that does not complete.
    async fn stream(
        &mut self,
        handle: &mut dyn EngineSession,
        source: &mut File,
        events: &mut mpsc::UnboundedReceiver<EngineEvent>,
        reporter: &mut ProgressReporter<'_>,
        cancel: &CancellationToken,
    ) -> (Option<Terminal>, Option<Error>) {
        let mut chunk = vec![0u8; AUDIO_CHUNK_SIZE];
        loop {
            if cancel.is_cancelled() {
                return (Some(caller_canceled()), None);
            }
            while let Ok(event) = events.try_recv() {
                if let Some(terminal) = self.handle_event(event, reporter) {
                    return (Some(terminal), None);
                }
            }

            let filled = match read_chunk(source, &mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "failed to read normalized audio");
                    return (None, Some(e.into()));
                }
            };

            let written = tokio::select! {
                biased;
                _ = cancel.cancelled() => return (Some(caller_canceled()), None),
                written = handle.write(&chunk[..filled]) => written,
            };
            if let Err(e) = written {
                warn!(error = %e, "audio write failed");
                return (None, Some(e));
            }
            if filled < AUDIO_CHUNK_SIZE {
                break;
            }
        }

        let finished = tokio::select! {
            biased;
            _ = cancel.cancelled() => return (Some(caller_canceled()), None),
            finished = handle.finish() => finished,
        };
        if let Err(e) = finished {
            warn!(error = %e, "failed to signal end of audio");
            return (None, Some(e));
        }
        debug!("audio fully written, waiting for results");
        (None, None)
    }

    /// Wait for the terminal event, ticking progress. After a failed write the
    /// service gets a short grace period to report why before the write error is used.
    async fn drain(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<EngineEvent>,
        write_error: Option<Error>,
        reporter: &mut ProgressReporter<'_>,
        cancel: &CancellationToken,
    ) -> Terminal {
        let mut ticker = tokio::time::interval(self.options.progress_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let has_write_error = write_error.is_some();
        let grace = async {
            if has_write_error {
                tokio::time::sleep(WRITE_FAILURE_GRACE).await;
            } else {
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(grace);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if let Some(terminal) = self.handle_event(event, reporter) {
                            return terminal;
                        }
                    }
                    None => {
                        return match write_error {
                            Some(e) => terminal_from_error(e),
                            None => Terminal::Canceled(
                                CancelReason::Transport,
                                "event stream closed before the session ended".into(),
                            ),
                        };
                    }
                },
                _ = ticker.tick() => reporter.tick(),
                _ = cancel.cancelled() => return caller_canceled(),
                _ = &mut grace => {
                    if let Some(e) = write_error {
                        return terminal_from_error(e);
                    }
                }
            }
        }
    }

    fn handle_event(
        &mut self,
        event: EngineEvent,
        reporter: &mut ProgressReporter<'_>,
    ) -> Option<Terminal> {
        match event {
            EngineEvent::Recognized {
                text,
                offset,
                duration,
            } => {
                let index = self.segments.len();
                debug!(index, chars = text.len(), "segment recognized");
                self.segments.push(Segment {
                    index,
                    text,
                    offset,
                    duration,
                });
                reporter.on_segment();
                None
            }
            EngineEvent::SessionStopped => Some(Terminal::Stopped),
            EngineEvent::Canceled { reason, detail } => Some(Terminal::Canceled(reason, detail)),
        }
    }

    fn conclude(&mut self, terminal: Terminal) -> Result<Transcript> {
        match terminal {
            Terminal::Stopped | Terminal::Canceled(CancelReason::EndOfStream, _) => {
                self.terminate(Outcome::Success);
                info!(segments = self.segments.len(), "recognition session finished");
                Ok(self.assemble())
            }
            Terminal::Canceled(CancelReason::Authentication, detail) => {
                self.terminate(Outcome::Error);
                Err(Error::AuthenticationFailure(detail))
            }
            Terminal::Canceled(reason, detail) => {
                self.terminate(Outcome::Canceled);
                warn!(
                    %reason,
                    %detail,
                    kept = self.segments.len(),
                    "recognition session canceled, keeping partial transcript"
                );
                Err(Error::EngineCanceled {
                    reason,
                    detail,
                    partial: Box::new(self.assemble()),
                })
            }
        }
    }

    fn assemble(&mut self) -> Transcript {
        let mut segments = std::mem::take(&mut self.segments);
        if self.options.segment_order == SegmentOrder::Offset {
            segments.sort_by(|a, b| match (a.offset, b.offset) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            });
        }
        Transcript {
            segments,
            language: self.options.language.code().to_string(),
            audio_duration: None,
            source: None,
        }
    }

    /// Move to `next` if the lifecycle allows it. States only move forward, and
    /// any live state may terminate.
    fn transition(&mut self, next: SessionState) -> bool {
        use SessionState::*;

        let allowed = matches!(
            (self.state, next),
            (Idle, Configuring)
                | (Configuring, Streaming)
                | (Streaming, Draining)
                | (Idle | Configuring | Streaming | Draining, Terminated(_))
        );
        if !allowed {
            warn!(from = ?self.state, to = ?next, "invalid session state transition");
            return false;
        }
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
        true
    }

    /// Enter the terminal state. Only the first call has any effect.
    fn terminate(&mut self, outcome: Outcome) -> bool {
        self.transition(SessionState::Terminated(outcome))
    }
}

/// Fill `buf` from `reader`. Short only at the end of the input.
async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn caller_canceled() -> Terminal {
    Terminal::Canceled(CancelReason::Caller, "transcription canceled".into())
}

fn terminal_from_error(err: Error) -> Terminal {
    let reason = match err.kind() {
        ErrorKind::AuthenticationFailure => CancelReason::Authentication,
        ErrorKind::TransportFailure | ErrorKind::Io => CancelReason::Transport,
        _ => CancelReason::EngineError,
    };
    Terminal::Canceled(reason, err.to_string())
}

/// Open a session, retrying transport failures with exponential backoff.
async fn connect_with_retry(
    engine: &dyn SpeechEngine,
    config: &SessionConfig,
    events: &mpsc::UnboundedSender<EngineEvent>,
    options: &TranscribeOptions,
    cancel: &CancellationToken,
) -> Result<Box<dyn EngineSession>> {
    let max_attempts = options.max_connect_attempts.max(1);
    let mut delay = options.retry_delay;

    for attempt in 1..=max_attempts {
        match engine.connect(config, events.clone()).await {
            Ok(handle) => return Ok(handle),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                warn!(
                    engine = engine.name(),
                    attempt,
                    max_attempts,
                    error = %e,
                    ?delay,
                    "connect failed, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(Error::EngineCanceled {
                            reason: CancelReason::Caller,
                            detail: "transcription canceled while reconnecting".into(),
                            partial: Box::default(),
                        });
                    }
                }
                delay = (delay * 2).min(options.max_retry_delay);
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::TransportFailure(format!(
        "could not connect after {max_attempts} attempts"
    )))
}
