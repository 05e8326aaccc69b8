use serde::{Deserialize, Serialize};

/// One unit of recognized text, in the order the engine delivered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Arrival index within the session, starting at 0.
    pub index: usize,
    pub text: String,
    /// Start of the phrase in the audio, in seconds, when the engine reports it.
    pub offset: Option<f64>,
    /// Length of the phrase in seconds, when the engine reports it.
    pub duration: Option<f64>,
}

impl Segment {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            offset: None,
            duration: None,
        }
    }

    pub fn with_timing(mut self, offset: f64, duration: f64) -> Self {
        self.offset = Some(offset);
        self.duration = Some(duration);
        self
    }
}

/// Complete transcription result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub segments: Vec<Segment>,
    pub language: String,
    /// Duration of the normalized audio, if it could be measured.
    pub audio_duration: Option<f64>,
    /// File name the transcript was produced from.
    pub source: Option<String>,
}

impl Transcript {
    /// Full text of the transcript.
    ///
    /// Each segment's text is trimmed of leading and trailing whitespace, segments
    /// that are blank after trimming are skipped, and the rest are joined with a
    /// single space. Whitespace inside a segment is kept as the service sent it.
    /// [`Segment::text`] itself is never modified.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// True when nothing was recognized (e.g. the audio held no speech).
    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.text.trim().is_empty())
    }

    /// Format as SRT subtitles.
    pub fn to_srt(&self) -> String {
        let mut out = String::new();
        for (i, (seg, start, end)) in self.cues().enumerate() {
            out.push_str(&format!("{}\n", i + 1));
            out.push_str(&format!(
                "{} --> {}\n",
                format_srt_time(start),
                format_srt_time(end)
            ));
            out.push_str(seg.text.trim());
            out.push_str("\n\n");
        }
        out
    }

    /// Format as WebVTT subtitles.
    pub fn to_vtt(&self) -> String {
        let mut out = String::from("WEBVTT\n\n");
        for (seg, start, end) in self.cues() {
            out.push_str(&format!(
                "{} --> {}\n",
                format_vtt_time(start),
                format_vtt_time(end)
            ));
            out.push_str(seg.text.trim());
            out.push_str("\n\n");
        }
        out
    }

    /// Format as JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Format as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Non-blank segments with resolved (start, end) times. Segments without an
    /// offset start where the previous cue ended.
    fn cues(&self) -> impl Iterator<Item = (&Segment, f64, f64)> {
        let mut cursor = 0.0f64;
        self.segments
            .iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(move |seg| {
                let start = seg.offset.unwrap_or(cursor);
                let end = start + seg.duration.unwrap_or(0.0);
                cursor = end;
                (seg, start, end)
            })
    }
}

/// Format seconds as SRT timestamp: HH:MM:SS,mmm
fn format_srt_time(seconds: f64) -> String {
    let (h, m, s, ms) = split_time(seconds);
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

/// Format seconds as VTT timestamp: HH:MM:SS.mmm
fn format_vtt_time(seconds: f64) -> String {
    let (h, m, s, ms) = split_time(seconds);
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}

fn split_time(seconds: f64) -> (u64, u64, u64, u64) {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    (
        total_ms / 3_600_000,
        (total_ms % 3_600_000) / 60_000,
        (total_ms % 60_000) / 1_000,
        total_ms % 1_000,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript(segments: Vec<Segment>) -> Transcript {
        Transcript {
            segments,
            language: "en-US".into(),
            ..Transcript::default()
        }
    }

    #[test]
    fn test_text_joins_with_single_spaces() {
        let t = transcript(vec![Segment::new(0, "hello"), Segment::new(1, " world ")]);
        assert_eq!(t.text(), "hello world");
    }

    #[test]
    fn test_text_skips_blank_segments() {
        let t = transcript(vec![
            Segment::new(0, "one"),
            Segment::new(1, "   "),
            Segment::new(2, "two"),
        ]);
        assert_eq!(t.text(), "one two");
    }

    #[test]
    fn test_text_trims_only_segment_edges() {
        let t = transcript(vec![
            Segment::new(0, "\tNew  York\n"),
            Segment::new(1, ""),
            Segment::new(2, " is big. "),
        ]);
        assert_eq!(t.text(), "New  York is big.");
        assert_eq!(t.segments[0].text, "\tNew  York\n");
    }

    #[test]
    fn test_empty_transcript() {
        let t = transcript(vec![]);
        assert!(t.is_empty());
        assert_eq!(t.text(), "");
        assert_eq!(t.to_srt(), "");
        assert_eq!(t.to_vtt(), "WEBVTT\n\n");
    }

    #[test]
    fn test_srt_uses_engine_offsets() {
        let t = transcript(vec![
            Segment::new(0, "Hello there.").with_timing(0.5, 1.25),
            Segment::new(1, "General Kenobi.").with_timing(3_661.0, 2.0),
        ]);
        let srt = t.to_srt();
        assert!(srt.starts_with("1\n00:00:00,500 --> 00:00:01,750\nHello there.\n\n"));
        assert!(srt.contains("2\n01:01:01,000 --> 01:01:03,000\nGeneral Kenobi.\n\n"));
    }

    #[test]
    fn test_vtt_without_offsets_is_sequential() {
        let t = transcript(vec![
            Segment::new(0, "a").with_timing(1.0, 2.0),
            Segment::new(1, "b"),
        ]);
        let vtt = t.to_vtt();
        assert!(vtt.contains("00:00:01.000 --> 00:00:03.000\na"));
        assert!(vtt.contains("00:00:03.000 --> 00:00:03.000\nb"));
    }

    #[test]
    fn test_json_roundtrip_keeps_segments() {
        let t = transcript(vec![Segment::new(0, "hi").with_timing(0.0, 0.4)]);
        let json = t.to_json().unwrap();
        let back: Transcript = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_split_time_clamps_negative() {
        assert_eq!(format_srt_time(-3.0), "00:00:00,000");
    }
}
