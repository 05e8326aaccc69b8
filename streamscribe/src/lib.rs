//! Audio/video transcription over a streaming speech-recognition service: file
//! in, transcript out.
//!
//! **streamscribe** handles the whole pipeline: detecting the input format,
//! normalizing it to 16 kHz mono WAV (in-process via symphonia, or via ffmpeg for
//! video), streaming it to the recognition service, and assembling the phrases the
//! service returns into a transcript. Temporary files are removed on every exit path.
//! Output as plain text, SRT, WebVTT, or JSON.
//!
//! # Quick start
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # async fn main() -> streamscribe::Result<()> {
//! use streamscribe::{Credentials, NoProgress, TranscribeOptions};
//!
//! let options = TranscribeOptions::new()
//!     .credentials(Credentials::new("<subscription key>", "westeurope")?)
//!     .language("en-US")?;
//!
//! let transcript = streamscribe::transcribe_file("meeting.mp3", &NoProgress, &options).await?;
//! println!("{}", transcript.text());
//! # Ok(())
//! # }
//! ```
//!
//! Progress is reported as a fraction through any `Fn(f32)`:
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # async fn main() -> streamscribe::Result<()> {
//! # let options = streamscribe::TranscribeOptions::new();
//! let progress = |p: f32| eprintln!("{:.0}%", p * 100.0);
//! let transcript = streamscribe::transcribe_file("talk.mp4", &progress, &options).await?;
//! println!("{}", transcript.to_srt());
//! # Ok(())
//! # }
//! ```

pub mod audio;
#[cfg(feature = "azure")]
pub mod azure;
pub mod cleanup;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod input;
pub mod progress;
pub mod session;
pub mod types;

#[cfg(feature = "azure")]
pub use azure::AzureSpeechEngine;
pub use config::{Credentials, Language, SegmentOrder, TranscribeOptions};
pub use engine::{CancelReason, EngineEvent, EngineSession, SessionConfig, SpeechEngine};
pub use error::{Error, ErrorKind, Result};
pub use format::MediaKind;
pub use input::MediaInput;
pub use progress::{NoProgress, ProgressSink};
pub use types::{Segment, Transcript};

pub use tokio_util::sync::CancellationToken;

use tracing::{info, warn};

use crate::cleanup::TempFiles;
use crate::progress::{ProgressReporter, ProgressStrategy};

/// Transcribe `input` with the given engine.
///
/// This is the full pipeline; the other entry points are shorthands for it.
/// Progress reaches exactly 1.0 once a session has run, whatever its outcome.
/// Every temporary file created along the way is deleted before this returns.
pub async fn transcribe_with_engine(
    engine: &dyn SpeechEngine,
    input: &MediaInput,
    progress: &dyn ProgressSink,
    options: &TranscribeOptions,
    cancel: &CancellationToken,
) -> Result<Transcript> {
    let mut temp_files = TempFiles::in_dir(options.resolve_temp_dir());
    let result = run_pipeline(engine, input, progress, options, cancel, &mut temp_files).await;
    temp_files.cleanup();

    match &result {
        Ok(transcript) => info!(
            segments = transcript.segments.len(),
            chars = transcript.text().len(),
            "transcription complete"
        ),
        Err(e) => warn!(kind = %e.kind(), error = %e, "transcription failed"),
    }
    result
}

async fn run_pipeline(
    engine: &dyn SpeechEngine,
    input: &MediaInput,
    progress: &dyn ProgressSink,
    options: &TranscribeOptions,
    cancel: &CancellationToken,
    temp_files: &mut TempFiles,
) -> Result<Transcript> {
    let source = input.display_name();
    info!(
        kind = %input.kind(),
        source = source.as_deref().unwrap_or("<bytes>"),
        language = %options.language,
        "starting transcription"
    );

    let staged = input.stage(temp_files).await?;
    let audio = audio::normalize(&staged, input.kind(), &options.ffmpeg_path, temp_files).await?;

    let estimate = audio::estimate_duration(audio.path());
    let mut reporter = ProgressReporter::new(
        progress,
        ProgressStrategy::choose(estimate, options.segment_cap),
    );

    let describe = |transcript: &mut Transcript| {
        transcript.audio_duration = estimate.measured();
        transcript.source = source.clone();
    };

    match session::run_session(engine, &audio, options, &mut reporter, cancel).await {
        Ok(mut transcript) => {
            describe(&mut transcript);
            Ok(transcript)
        }
        Err(Error::EngineCanceled {
            reason,
            detail,
            mut partial,
        }) => {
            describe(partial.as_mut());
            Err(Error::EngineCanceled {
                reason,
                detail,
                partial,
            })
        }
        Err(e) => Err(e),
    }
}

/// Transcribe `input` with the Azure Speech service.
#[cfg(feature = "azure")]
pub async fn transcribe(
    input: &MediaInput,
    progress: &dyn ProgressSink,
    options: &TranscribeOptions,
    cancel: &CancellationToken,
) -> Result<Transcript> {
    let engine = AzureSpeechEngine::new()?;
    transcribe_with_engine(&engine, input, progress, options, cancel).await
}

/// Transcribe a local audio/video file.
#[cfg(feature = "azure")]
pub async fn transcribe_file(
    path: impl AsRef<std::path::Path>,
    progress: &dyn ProgressSink,
    options: &TranscribeOptions,
) -> Result<Transcript> {
    let input = MediaInput::from_path(path)?;
    transcribe(&input, progress, options, &CancellationToken::new()).await
}

/// Transcribe in-memory media. `file_name` is only used as an extension hint for
/// containers that cannot be recognized from their content.
#[cfg(feature = "azure")]
pub async fn transcribe_bytes(
    data: Vec<u8>,
    file_name: Option<&str>,
    progress: &dyn ProgressSink,
    options: &TranscribeOptions,
) -> Result<Transcript> {
    let input = MediaInput::from_bytes(data, file_name)?;
    transcribe(&input, progress, options, &CancellationToken::new()).await
}
