//! Transcribe a local audio file and print the text.
//!
//! Usage: AZURE_SPEECH_KEY=... AZURE_SPEECH_REGION=westeurope \
//!        cargo run --example basic -- path/to/audio.mp3

use streamscribe::{Credentials, NoProgress, TranscribeOptions};

#[tokio::main]
async fn main() -> streamscribe::Result<()> {
    let path = std::env::args()
        .nth(1)
        .expect("usage: basic <audio-file>");
    let key = std::env::var("AZURE_SPEECH_KEY").expect("AZURE_SPEECH_KEY not set");
    let region = std::env::var("AZURE_SPEECH_REGION").expect("AZURE_SPEECH_REGION not set");

    let opts = TranscribeOptions::new().credentials(Credentials::new(key, region)?);
    let transcript = streamscribe::transcribe_file(&path, &NoProgress, &opts).await?;

    println!("{}", transcript.text());

    Ok(())
}
