use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::SessionConfig;
use crate::error::{Error, Result};

/// Subscription key and region of the speech service.
///
/// Passed explicitly with every call; nothing is read from or stored in global state.
/// `Debug` never prints the key.
#[derive(Clone)]
pub struct Credentials {
    key: String,
    region: String,
}

impl Credentials {
    pub fn new(key: impl Into<String>, region: impl Into<String>) -> Result<Self> {
        let key = key.into().trim().to_string();
        let region = region.into().trim().to_ascii_lowercase();

        if key.is_empty() {
            return Err(Error::Configuration("subscription key is empty".into()));
        }
        if region.is_empty() || !region.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Configuration(format!(
                "invalid region \"{region}\" (expected e.g. \"westeurope\")"
            )));
        }

        Ok(Self { key, region })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// A validated BCP-47 recognition locale such as `en-US` or `zh-Hans-CN`.
///
/// Casing is normalized: language lowercase, script titlecase, region uppercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language(String);

impl Language {
    pub fn new(tag: &str) -> Result<Self> {
        let invalid = || Error::Configuration(format!("invalid language tag \"{tag}\" (expected e.g. \"en-US\")"));

        let mut parts = tag.trim().split(['-', '_']);
        let primary = parts.next().filter(|p| {
            (2..=3).contains(&p.len()) && p.chars().all(|c| c.is_ascii_alphabetic())
        });
        let Some(primary) = primary else {
            return Err(invalid());
        };

        let mut normalized = primary.to_ascii_lowercase();
        for part in parts {
            if !(2..=8).contains(&part.len()) || !part.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(invalid());
            }
            normalized.push('-');
            match part.len() {
                2 if part.chars().all(|c| c.is_ascii_alphabetic()) => {
                    normalized.push_str(&part.to_ascii_uppercase());
                }
                4 => {
                    let (head, tail) = part.split_at(1);
                    normalized.push_str(&head.to_ascii_uppercase());
                    normalized.push_str(&tail.to_ascii_lowercase());
                }
                _ => normalized.push_str(part),
            }
        }

        Ok(Language(normalized))
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl Default for Language {
    fn default() -> Self {
        Language("en-US".into())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order of segments in the assembled transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentOrder {
    /// The order the service delivered them in.
    #[default]
    Arrival,
    /// Sorted by the audio offset the service reported; segments without an
    /// offset keep their arrival order after the timed ones.
    Offset,
}

/// Builder for transcription options.
#[derive(Debug, Clone)]
pub struct TranscribeOptions {
    pub credentials: Option<Credentials>,
    pub language: Language,
    pub endpoint: Option<String>,
    pub ffmpeg_path: PathBuf,
    pub temp_dir: Option<PathBuf>,
    pub progress_interval: Duration,
    pub segment_cap: usize,
    pub segment_order: SegmentOrder,
    pub max_connect_attempts: u32,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            credentials: None,
            language: Language::default(),
            endpoint: None,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            temp_dir: None,
            progress_interval: Duration::from_millis(500),
            segment_cap: 50,
            segment_order: SegmentOrder::Arrival,
            max_connect_attempts: 3,
            retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl TranscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the recognition locale, e.g. "en-US" or "de-DE".
    pub fn language(mut self, tag: &str) -> Result<Self> {
        self.language = Language::new(tag)?;
        Ok(self)
    }

    /// Use a custom websocket endpoint instead of the one derived from the region.
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    pub fn ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    pub fn temp_dir(mut self, dir: PathBuf) -> Self {
        self.temp_dir = Some(dir);
        self
    }

    pub fn progress_interval(mut self, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::Configuration("progress interval must be positive".into()));
        }
        self.progress_interval = interval;
        Ok(self)
    }

    /// Segment count treated as "done" when the audio duration is unknown.
    pub fn segment_cap(mut self, cap: usize) -> Result<Self> {
        if cap == 0 {
            return Err(Error::Configuration("segment cap must be at least 1".into()));
        }
        self.segment_cap = cap;
        Ok(self)
    }

    pub fn segment_order(mut self, order: SegmentOrder) -> Self {
        self.segment_order = order;
        self
    }

    /// Connection attempts made for transport failures (1 = no retry).
    pub fn max_connect_attempts(mut self, attempts: u32) -> Result<Self> {
        if !(1..=10).contains(&attempts) {
            return Err(Error::Configuration(format!(
                "connect attempts must be between 1 and 10, got {attempts}"
            )));
        }
        self.max_connect_attempts = attempts;
        Ok(self)
    }

    pub fn retry_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_delay = initial;
        self.max_retry_delay = max.max(initial);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Resolve the base directory for temporary files, defaulting to the system temp dir.
    pub fn resolve_temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Engine-facing view of these options. Fails when no credentials were set.
    pub fn session_config(&self) -> Result<SessionConfig> {
        let credentials = self.credentials.clone().ok_or_else(|| {
            Error::Configuration("speech service credentials are not configured".into())
        })?;
        Ok(SessionConfig {
            credentials,
            language: self.language.clone(),
            endpoint: self.endpoint.clone(),
            connect_timeout: self.connect_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_key() {
        let creds = Credentials::new("super-secret", "WestEurope").unwrap();
        let debug = format!("{creds:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("westeurope"));
        assert_eq!(creds.key(), "super-secret");
    }

    #[test]
    fn test_credentials_validation() {
        assert!(Credentials::new("", "westeurope").is_err());
        assert!(Credentials::new("key", "").is_err());
        assert!(Credentials::new("key", "west europe").is_err());
        assert!(Credentials::new("key", "evil.com/x").is_err());
    }

    #[test]
    fn test_language_normalization() {
        assert_eq!(Language::new("en-us").unwrap().code(), "en-US");
        assert_eq!(Language::new("DE_de").unwrap().code(), "de-DE");
        assert_eq!(Language::new("zh-hans-cn").unwrap().code(), "zh-Hans-CN");
        assert_eq!(Language::new("es-419").unwrap().code(), "es-419");
        assert_eq!(Language::new("fil").unwrap().code(), "fil");
    }

    #[test]
    fn test_language_rejects_garbage() {
        assert!(Language::new("").is_err());
        assert!(Language::new("english").is_err());
        assert!(Language::new("en-").is_err());
        assert!(Language::new("en-US&x=1").is_err());
    }

    #[test]
    fn test_default_options() {
        let opts = TranscribeOptions::default();
        assert_eq!(opts.language.code(), "en-US");
        assert_eq!(opts.progress_interval, Duration::from_millis(500));
        assert_eq!(opts.segment_order, SegmentOrder::Arrival);
        assert_eq!(opts.max_connect_attempts, 3);
        assert!(opts.credentials.is_none());
    }

    #[test]
    fn test_builder_validation() {
        assert!(TranscribeOptions::new().segment_cap(0).is_err());
        assert!(TranscribeOptions::new().max_connect_attempts(0).is_err());
        assert!(TranscribeOptions::new().max_connect_attempts(11).is_err());
        assert!(TranscribeOptions::new().progress_interval(Duration::ZERO).is_err());
        let opts = TranscribeOptions::new().language("fr-fr").unwrap();
        assert_eq!(opts.language.to_string(), "fr-FR");
    }

    #[test]
    fn test_session_config_requires_credentials() {
        let result = TranscribeOptions::new().session_config();
        assert!(matches!(result, Err(Error::Configuration(_))));

        let creds = Credentials::new("k", "eastus").unwrap();
        let cfg = TranscribeOptions::new()
            .credentials(creds)
            .endpoint("ws://127.0.0.1:9/speech")
            .session_config()
            .unwrap();
        assert_eq!(cfg.credentials.region(), "eastus");
        assert_eq!(cfg.endpoint.as_deref(), Some("ws://127.0.0.1:9/speech"));
    }

    #[test]
    fn test_retry_delay_max_not_below_initial() {
        let opts = TranscribeOptions::new()
            .retry_delay(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(opts.max_retry_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_resolve_temp_dir() {
        let opts = TranscribeOptions::new().temp_dir(PathBuf::from("/var/tmp/scribe"));
        assert_eq!(opts.resolve_temp_dir(), PathBuf::from("/var/tmp/scribe"));
    }
}
