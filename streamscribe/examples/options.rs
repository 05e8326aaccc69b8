//! Transcribe German audio with offset ordering and a cancel timeout, keeping
//! whatever was recognized if the session ends early.
//!
//! Usage: AZURE_SPEECH_KEY=... AZURE_SPEECH_REGION=westeurope \
//!        cargo run --example options -- path/to/audio.wav

use std::time::Duration;

use streamscribe::{
    CancellationToken, Credentials, MediaInput, NoProgress, SegmentOrder, TranscribeOptions,
};

#[tokio::main]
async fn main() -> streamscribe::Result<()> {
    let path = std::env::args()
        .nth(1)
        .expect("usage: options <audio-file>");
    let key = std::env::var("AZURE_SPEECH_KEY").expect("AZURE_SPEECH_KEY not set");
    let region = std::env::var("AZURE_SPEECH_REGION").expect("AZURE_SPEECH_REGION not set");

    let opts = TranscribeOptions::new()
        .credentials(Credentials::new(key, region)?)
        .language("de-DE")?
        .segment_order(SegmentOrder::Offset)
        .max_connect_attempts(5)?;

    let cancel = CancellationToken::new();
    let timeout = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(120)).await;
        timeout.cancel();
    });

    let input = MediaInput::from_path(&path)?;
    let transcript = match streamscribe::transcribe(&input, &NoProgress, &opts, &cancel).await {
        Ok(t) => t,
        Err(e) => match e.partial_transcript() {
            Some(partial) => {
                eprintln!("stopped early: {e}");
                partial.clone()
            }
            None => return Err(e),
        },
    };

    for segment in &transcript.segments {
        match (segment.offset, segment.duration) {
            (Some(start), Some(len)) => {
                println!("[{:.1}s - {:.1}s] {}", start, start + len, segment.text.trim())
            }
            _ => println!("[--] {}", segment.text.trim()),
        }
    }

    Ok(())
}
