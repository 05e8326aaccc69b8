use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use streamscribe::{
    CancellationToken, Credentials, ErrorKind, MediaInput, MediaKind, ProgressSink, SegmentOrder,
    TranscribeOptions, Transcript,
};

#[derive(Parser)]
#[command(
    name = "streamscribe",
    about = "Transcribe audio/video files with a streaming speech-recognition service"
)]
struct Cli {
    /// Audio or video file to transcribe.
    #[arg(required_unless_present = "list_formats")]
    input: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Write output to file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Recognition language (BCP-47, e.g. "en-US", "de-DE").
    #[arg(short, long, default_value = "en-US")]
    language: String,

    /// Speech service subscription key.
    #[arg(long, env = "AZURE_SPEECH_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Speech service region, e.g. "westeurope".
    #[arg(long, env = "AZURE_SPEECH_REGION")]
    region: Option<String>,

    /// Custom websocket endpoint (e.g. a self-hosted speech container).
    #[arg(long)]
    endpoint: Option<String>,

    /// ffmpeg binary used to extract audio from video.
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// Order of segments in the transcript.
    #[arg(long, default_value = "arrival")]
    segment_order: Order,

    /// Connection attempts before giving up on transport errors.
    #[arg(long, default_value = "3")]
    connect_attempts: u32,

    /// Directory for temporary files (default: system temp dir).
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Hide the progress bar.
    #[arg(short, long)]
    quiet: bool,

    /// List supported input formats.
    #[arg(long)]
    list_formats: bool,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Srt,
    Vtt,
    Json,
}

#[derive(Clone, ValueEnum)]
enum Order {
    Arrival,
    Offset,
}

/// Progress bar fed with fractions from the library.
struct BarSink(ProgressBar);

impl ProgressSink for BarSink {
    fn report(&self, fraction: f32) {
        self.0.set_position((fraction.clamp(0.0, 1.0) * 100.0).round() as u64);
    }
}

#[tokio::main]
async fn main() {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("streamscribe=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.list_formats {
        list_formats(&cli.ffmpeg).await;
        return;
    }

    let input_path = cli.input.clone().unwrap();
    let opts = match build_options(&cli) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(exit_code(e.kind()));
        }
    };

    let input = match MediaInput::from_path(&input_path) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Use --list-formats to see supported inputs");
            std::process::exit(exit_code(e.kind()));
        }
    };

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCanceling...");
            on_ctrl_c.cancel();
        }
    });

    let bar = if cli.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos:>3}% {msg}")
                .unwrap(),
        );
        bar.set_message(format!("{} ({})", input_path.display(), input.kind()));
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    };
    let sink = BarSink(bar.clone());

    let result = streamscribe::transcribe(&input, &sink, &opts, &cancel).await;
    bar.finish_and_clear();

    let (transcript, failure) = settle(result);
    let Some(transcript) = transcript else {
        let code = failure.map_or(1, |e| {
            eprintln!("Error: {e}");
            exit_code(e.kind())
        });
        std::process::exit(code);
    };

    match &failure {
        None => {
            let duration = transcript
                .audio_duration
                .map(|d| format!("{d:.1}s"))
                .unwrap_or_else(|| "unknown length".into());
            eprintln!(
                "Transcription complete: {duration} of audio, {} segments, language: {}",
                transcript.segments.len(),
                transcript.language,
            );
            if transcript.is_empty() {
                eprintln!("No speech detected");
            }
        }
        Some(e) => {
            eprintln!("Error: {e}");
            eprintln!("Writing the {} segments recognized so far", transcript.segments.len());
        }
    }

    write_output(&transcript, &cli.format, cli.output.as_ref());

    if let Some(e) = failure {
        std::process::exit(exit_code(e.kind()));
    }
}

/// Split a transcription result into the transcript to write and the error to
/// report. A canceled session always yields its partial transcript, even an empty one.
fn settle(
    result: streamscribe::Result<Transcript>,
) -> (Option<Transcript>, Option<streamscribe::Error>) {
    match result {
        Ok(transcript) => (Some(transcript), None),
        Err(e) => (e.partial_transcript().cloned(), Some(e)),
    }
}

fn build_options(cli: &Cli) -> streamscribe::Result<TranscribeOptions> {
    let (Some(key), Some(region)) = (&cli.key, &cli.region) else {
        return Err(streamscribe::Error::Configuration(
            "missing credentials: pass --key and --region or set AZURE_SPEECH_KEY and AZURE_SPEECH_REGION".into(),
        ));
    };

    let order = match cli.segment_order {
        Order::Arrival => SegmentOrder::Arrival,
        Order::Offset => SegmentOrder::Offset,
    };

    let mut opts = TranscribeOptions::new()
        .credentials(Credentials::new(key.as_str(), region.as_str())?)
        .language(&cli.language)?
        .max_connect_attempts(cli.connect_attempts)?
        .ffmpeg_path(&cli.ffmpeg)
        .segment_order(order);

    if let Some(endpoint) = &cli.endpoint {
        opts = opts.endpoint(endpoint.as_str());
    }
    if let Some(dir) = &cli.temp_dir {
        opts = opts.temp_dir(dir.clone());
    }
    Ok(opts)
}

fn write_output(transcript: &Transcript, format: &OutputFormat, output: Option<&PathBuf>) {
    let output_text = match format {
        OutputFormat::Text => {
            let mut text = transcript.text();
            text.push('\n');
            text
        }
        OutputFormat::Srt => transcript.to_srt(),
        OutputFormat::Vtt => transcript.to_vtt(),
        OutputFormat::Json => match transcript.to_json_pretty() {
            Ok(j) => j,
            Err(e) => {
                eprintln!("JSON error: {e}");
                std::process::exit(1);
            }
        },
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, &output_text) {
                eprintln!("Error writing to {}: {e}", path.display());
                std::process::exit(1);
            }
            eprintln!("Written to {}", path.display());
        }
        None => print!("{output_text}"),
    }
}

async fn list_formats(ffmpeg: &std::path::Path) {
    let caps = streamscribe::audio::probe_capabilities(ffmpeg).await;
    println!("{:<6} {}", "FORMAT", "HANDLING");
    println!("{:<6} {}", "------", "--------");
    for kind in MediaKind::all() {
        let handling = if kind.is_canonical() {
            "streamed as is"
        } else if kind.is_video() {
            if caps.audio_extraction {
                "audio extracted with ffmpeg"
            } else {
                "unavailable (ffmpeg not found)"
            }
        } else {
            "decoded in-process"
        };
        println!("{:<6} {handling}", kind.name());
    }
}

fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::InvalidInputFormat
        | ErrorKind::ConversionFailure
        | ErrorKind::CapabilityUnavailable => 2,
        ErrorKind::AuthenticationFailure => 3,
        ErrorKind::TransportFailure => 4,
        ErrorKind::EngineCanceled => 5,
        ErrorKind::Configuration | ErrorKind::Io => 1,
    }
}
