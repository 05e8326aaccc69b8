//! Output a transcript as SRT, WebVTT, and JSON, with progress on stderr.
//!
//! Usage: AZURE_SPEECH_KEY=... AZURE_SPEECH_REGION=westeurope \
//!        cargo run --example formats -- path/to/video.mp4

use streamscribe::{Credentials, TranscribeOptions};

#[tokio::main]
async fn main() -> streamscribe::Result<()> {
    let path = std::env::args()
        .nth(1)
        .expect("usage: formats <media-file>");
    let key = std::env::var("AZURE_SPEECH_KEY").expect("AZURE_SPEECH_KEY not set");
    let region = std::env::var("AZURE_SPEECH_REGION").expect("AZURE_SPEECH_REGION not set");

    let opts = TranscribeOptions::new().credentials(Credentials::new(key, region)?);
    let progress = |p: f32| eprint!("\r{:>3.0}%", p * 100.0);
    let transcript = streamscribe::transcribe_file(&path, &progress, &opts).await?;
    eprintln!();

    println!("=== SRT ===\n{}", transcript.to_srt());
    println!("=== WebVTT ===\n{}", transcript.to_vtt());
    println!("=== JSON ===\n{}", transcript.to_json_pretty()?);

    Ok(())
}
