//! Azure Speech streaming recognition over the websocket protocol.
//!
//! The connection is authorized with a bearer token issued for the subscription
//! key, then receives a `speech.config` message followed by the audio as binary
//! `audio` frames. An empty audio frame ends the stream. The service answers with
//! text frames (`speech.phrase`, `turn.end`, ...) which are turned into
//! [`EngineEvent`]s by a reader task.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::engine::{CancelReason, EngineEvent, EngineSession, SessionConfig, SpeechEngine};
use crate::error::{Error, Result};

const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SUBSCRIPTION_KEY_HEADER: &str = "ocp-apim-subscription-key";
const CONNECTION_ID_HEADER: &str = "x-connectionid";

/// Offsets and durations in service payloads are 100 ns ticks.
const TICKS_PER_SECOND: f64 = 10_000_000.0;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Recognition engine backed by the Azure Speech service.
pub struct AzureSpeechEngine {
    http: reqwest::Client,
}

impl AzureSpeechEngine {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }

    /// Exchange the subscription key for a short-lived bearer token.
    async fn fetch_token(&self, config: &SessionConfig) -> Result<String> {
        let url = token_url(config.credentials.region());
        debug!(%url, "requesting access token");

        let response = self
            .http
            .post(&url)
            .header(SUBSCRIPTION_KEY_HEADER, config.credentials.key())
            .header(reqwest::header::CONTENT_LENGTH, "0")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_http_status(status.as_u16(), &body));
        }

        let token = response.text().await?;
        if token.trim().is_empty() {
            return Err(Error::AuthenticationFailure(
                "token endpoint returned an empty token".into(),
            ));
        }
        Ok(token.trim().to_string())
    }

    /// Build the websocket handshake. The default endpoint uses a bearer token; a
    /// custom endpoint is sent the subscription key directly.
    async fn handshake_request(
        &self,
        config: &SessionConfig,
        connection_id: &str,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
        let url = service_url(config);
        let mut request = url.as_str().into_client_request().map_err(Error::from_ws)?;

        let (name, value) = match config.endpoint {
            Some(_) => (
                HeaderName::from_static(SUBSCRIPTION_KEY_HEADER),
                config.credentials.key().to_string(),
            ),
            None => {
                let token = self.fetch_token(config).await?;
                (AUTHORIZATION, format!("Bearer {token}"))
            }
        };

        let headers = request.headers_mut();
        headers.insert(name, header_value(&value)?);
        headers.insert(
            HeaderName::from_static(CONNECTION_ID_HEADER),
            header_value(connection_id)?,
        );
        Ok(request)
    }
}

#[async_trait]
impl SpeechEngine for AzureSpeechEngine {
    fn name(&self) -> &str {
        "azure"
    }

    async fn connect(
        &self,
        config: &SessionConfig,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Box<dyn EngineSession>> {
        let connection_id = new_id();
        let request = self.handshake_request(config, &connection_id).await?;

        let (stream, _) = tokio::time::timeout(
            config.connect_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| {
            Error::TransportFailure(format!(
                "timed out after {:?} connecting to the speech service",
                config.connect_timeout
            ))
        })?
        .map_err(Error::from_ws)?;

        info!(
            region = config.credentials.region(),
            language = %config.language,
            %connection_id,
            "connected to speech service"
        );

        let (mut write, read) = stream.split();
        let request_id = new_id();
        write
            .send(Message::Text(speech_config_frame(&request_id).into()))
            .await
            .map_err(Error::from_ws)?;

        let reader = tokio::spawn(read_events(read, events));

        Ok(Box::new(AzureSession {
            write: Some(write),
            reader: Some(reader),
            request_id,
            audio_started: false,
        }))
    }
}

/// An open recognition connection.
struct AzureSession {
    write: Option<SplitSink<WsStream, Message>>,
    reader: Option<JoinHandle<()>>,
    request_id: String,
    audio_started: bool,
}

impl AzureSession {
    async fn send_audio(&mut self, payload: &[u8]) -> Result<()> {
        let first = !self.audio_started;
        let frame = audio_frame(&self.request_id, payload, first);
        let sink = self
            .write
            .as_mut()
            .ok_or_else(|| Error::TransportFailure("session already stopped".into()))?;
        sink.send(Message::Binary(frame.into()))
            .await
            .map_err(Error::from_ws)?;
        self.audio_started = true;
        Ok(())
    }
}

#[async_trait]
impl EngineSession for AzureSession {
    async fn write(&mut self, audio: &[u8]) -> Result<()> {
        if audio.is_empty() {
            return Ok(());
        }
        self.send_audio(audio).await
    }

    async fn finish(&mut self) -> Result<()> {
        self.send_audio(&[]).await?;
        if let Some(sink) = self.write.as_mut() {
            sink.flush().await.map_err(Error::from_ws)?;
        }
        debug!(request_id = %self.request_id, "end of audio sent");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(mut sink) = self.write.take() {
            // The service may already have closed its side.
            if let Err(e) = sink.close().await {
                debug!(error = %e, "closing websocket");
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        Ok(())
    }
}

impl Drop for AzureSession {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Forward service messages as events until a terminal one is sent or the
/// connection goes away.
async fn read_events(mut read: SplitStream<WsStream>, events: mpsc::UnboundedSender<EngineEvent>) {
    while let Some(frame) = read.next().await {
        let event = match frame {
            Ok(Message::Text(text)) => match parse_text_frame(&text) {
                Some((path, body)) => event_for(&path, body),
                None => {
                    warn!("ignoring service message without a path header");
                    None
                }
            },
            Ok(Message::Close(frame)) => Some(close_event(frame)),
            Ok(_) => None,
            Err(e) => Some(EngineEvent::canceled(CancelReason::Transport, e.to_string())),
        };

        if let Some(event) = event {
            let terminal = event.is_terminal();
            if events.send(event).is_err() || terminal {
                break;
            }
        }
    }
    debug!("service message reader finished");
}

fn token_url(region: &str) -> String {
    format!("https://{region}.api.cognitive.microsoft.com/sts/v1.0/issueToken")
}

fn service_url(config: &SessionConfig) -> String {
    let base = config.endpoint.clone().unwrap_or_else(|| {
        format!(
            "wss://{}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1",
            config.credentials.region()
        )
    });
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}language={}&format=simple", config.language.code())
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::Configuration("credentials contain characters not allowed in a header".into()))
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string().to_uppercase()
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn speech_config_frame(request_id: &str) -> String {
    let body = serde_json::json!({
        "context": {
            "system": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "build": "rust",
                "lang": "Rust",
            },
            "os": {
                "platform": std::env::consts::OS,
                "name": std::env::consts::FAMILY,
                "version": "",
            },
            "audio": {
                "source": { "type": "File" },
            },
        },
    });
    format!(
        "Path: speech.config\r\nX-RequestId: {request_id}\r\nX-Timestamp: {}\r\nContent-Type: application/json; charset=utf-8\r\n\r\n{body}",
        timestamp()
    )
}

/// Binary audio message: big-endian header length, headers, then the payload.
/// Content type is only announced on the first frame.
fn audio_frame(request_id: &str, payload: &[u8], first: bool) -> Vec<u8> {
    let mut header = format!(
        "Path: audio\r\nX-RequestId: {request_id}\r\nX-Timestamp: {}\r\n",
        timestamp()
    );
    if first {
        header.push_str("Content-Type: audio/x-wav\r\n");
    }

    let mut frame = Vec::with_capacity(2 + header.len() + payload.len());
    frame.extend_from_slice(&(header.len() as u16).to_be_bytes());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Split a service text message into its lowercased `Path` header and body.
fn parse_text_frame(frame: &str) -> Option<(String, &str)> {
    let (head, body) = frame.split_once("\r\n\r\n").unwrap_or((frame, ""));
    let path = head.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("path")
            .then(|| value.trim().to_ascii_lowercase())
    })?;
    Some((path, body))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SpeechPhrase {
    recognition_status: String,
    #[serde(default)]
    display_text: Option<String>,
    #[serde(default)]
    offset: Option<u64>,
    #[serde(default)]
    duration: Option<u64>,
}

fn event_for(path: &str, body: &str) -> Option<EngineEvent> {
    match path {
        "speech.phrase" => phrase_event(body),
        "turn.end" => Some(EngineEvent::SessionStopped),
        "turn.start" | "speech.startdetected" | "speech.enddetected" | "speech.hypothesis"
        | "speech.fragment" => {
            trace!(path, "service message");
            None
        }
        other => {
            debug!(path = other, "ignoring unknown service message");
            None
        }
    }
}

fn phrase_event(body: &str) -> Option<EngineEvent> {
    let phrase: SpeechPhrase = match serde_json::from_str(body) {
        Ok(phrase) => phrase,
        Err(e) => {
            let preview: String = body.chars().take(200).collect();
            return Some(EngineEvent::canceled(
                CancelReason::EngineError,
                format!("invalid speech.phrase payload: {e} (body: {preview})"),
            ));
        }
    };

    match phrase.recognition_status.as_str() {
        "Success" => {
            let text = phrase.display_text.unwrap_or_default();
            if text.trim().is_empty() {
                return None;
            }
            Some(EngineEvent::Recognized {
                text,
                offset: phrase.offset.map(|t| t as f64 / TICKS_PER_SECOND),
                duration: phrase.duration.map(|t| t as f64 / TICKS_PER_SECOND),
            })
        }
        "NoMatch" | "InitialSilenceTimeout" | "BabbleTimeout" => None,
        "EndOfDictation" => None,
        "Error" => Some(EngineEvent::canceled(
            CancelReason::EngineError,
            "service reported a recognition error",
        )),
        other => {
            debug!(status = other, "ignoring phrase status");
            None
        }
    }
}

/// A close from the service before `turn.end`.
fn close_event(frame: Option<CloseFrame<'_>>) -> EngineEvent {
    let Some(frame) = frame else {
        return EngineEvent::canceled(
            CancelReason::Transport,
            "connection closed before the session ended",
        );
    };

    let code = u16::from(frame.code);
    let reason = frame.reason.to_string();
    let lower = reason.to_ascii_lowercase();
    if lower.contains("auth") || lower.contains("subscription") || lower.contains("unauthorized") {
        return EngineEvent::canceled(CancelReason::Authentication, reason);
    }
    if code == 1000 {
        return EngineEvent::canceled(
            CancelReason::Transport,
            "connection closed before the session ended",
        );
    }
    EngineEvent::canceled(
        CancelReason::EngineError,
        format!("service closed the connection (code {code}): {reason}"),
    )
}
