use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

use crate::cleanup::TempFiles;
use crate::error::{Error, Result};
use crate::format::MediaKind;

/// Sample rate of canonical audio sent to the recognition service.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Duration assumed for progress scaling when the real one cannot be measured.
pub const ASSUMED_DURATION_SECS: f64 = 300.0;

/// Maximum audio duration in seconds (8 hours).
/// Prevents unbounded memory allocation from very long audio files.
const MAX_AUDIO_DURATION_SECS: f64 = 8.0 * 3600.0;

/// Longest ffmpeg stderr excerpt kept in an error message.
const MAX_STDERR_CHARS: usize = 1000;

/// Canonical PCM WAV ready for streaming.
#[derive(Debug, Clone)]
pub struct NormalizedAudio {
    path: PathBuf,
    converted: bool,
}

impl NormalizedAudio {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the file was produced by conversion and is owned by the temp registry.
    pub fn is_converted(&self) -> bool {
        self.converted
    }
}

/// Optional runtime capabilities the normalizer depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// An ffmpeg executable is available to pull audio out of video containers.
    pub audio_extraction: bool,
}

/// Check which optional capabilities are usable, by running `ffmpeg -version`.
pub async fn probe_capabilities(ffmpeg: &Path) -> Capabilities {
    let audio_extraction = match tokio::process::Command::new(ffmpeg)
        .arg("-version")
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(e) => {
            debug!(ffmpeg = %ffmpeg.display(), error = %e, "ffmpeg not usable");
            false
        }
    };
    Capabilities { audio_extraction }
}

/// Turn `source` into canonical WAV.
///
/// WAV passes through untouched. Compressed audio is decoded in-process; video
/// containers need ffmpeg, and are rejected with [`Error::CapabilityUnavailable`]
/// before anything is written when it is missing. Every produced file is tracked by
/// `temp_files`.
pub async fn normalize(
    source: &Path,
    kind: MediaKind,
    ffmpeg: &Path,
    temp_files: &mut TempFiles,
) -> Result<NormalizedAudio> {
    match kind {
        MediaKind::Wav => {
            debug!(path = %source.display(), "input already canonical");
            Ok(NormalizedAudio {
                path: source.to_path_buf(),
                converted: false,
            })
        }
        MediaKind::Mp3 | MediaKind::M4a | MediaKind::Flac | MediaKind::Ogg => {
            let dest = temp_files.create("normalized.wav")?;
            let src = source.to_path_buf();
            let out = dest.clone();
            let duration = tokio::task::spawn_blocking(move || transcode_to_wav(&src, kind, &out))
                .await
                .map_err(|e| Error::ConversionFailure(format!("transcoder task failed: {e}")))??;
            info!(%kind, duration_secs = format!("{duration:.1}"), "audio converted");
            Ok(NormalizedAudio {
                path: dest,
                converted: true,
            })
        }
        MediaKind::Mp4 => {
            if !probe_capabilities(ffmpeg).await.audio_extraction {
                return Err(Error::CapabilityUnavailable(format!(
                    "extracting audio from {kind} requires ffmpeg ({} not found); install it with: apt install ffmpeg",
                    ffmpeg.display()
                )));
            }
            let dest = temp_files.create("extracted.wav")?;
            extract_audio_track(source, &dest, ffmpeg).await?;
            Ok(NormalizedAudio {
                path: dest,
                converted: true,
            })
        }
    }
}

/// Decode any symphonia-supported file and write it as 16 kHz mono 16-bit WAV.
/// Returns the duration of the written audio in seconds.
pub fn transcode_to_wav(source: &Path, kind: MediaKind, dest: &Path) -> Result<f64> {
    let samples = decode_to_mono(source, kind)?;

    let duration = samples.len() as f64 / TARGET_SAMPLE_RATE as f64;
    if duration > MAX_AUDIO_DURATION_SECS {
        return Err(Error::ConversionFailure(format!(
            "audio too long ({:.0}s), maximum supported duration is {:.0}s",
            duration, MAX_AUDIO_DURATION_SECS
        )));
    }

    write_wav(dest, &samples)?;
    Ok(duration)
}

/// Extract the first audio track of a video container to canonical WAV via ffmpeg.
pub async fn extract_audio_track(video: &Path, dest: &Path, ffmpeg: &Path) -> Result<()> {
    info!(path = %video.display(), "extracting audio track");

    let output = tokio::process::Command::new(ffmpeg)
        .args(["-nostdin", "-y", "-i"])
        .arg(video)
        .args([
            "-vn",
            "-ac",
            "1",
            "-ar",
            &TARGET_SAMPLE_RATE.to_string(),
            "-acodec",
            "pcm_s16le",
            "-f",
            "wav",
        ])
        .arg(dest)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::CapabilityUnavailable(format!("ffmpeg not found at {}", ffmpeg.display()))
            } else {
                Error::ConversionFailure(format!("failed to run ffmpeg: {e}"))
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let excerpt: String = stderr.chars().take(MAX_STDERR_CHARS).collect();
        return Err(Error::ConversionFailure(format!("ffmpeg failed: {excerpt}")));
    }

    let written = tokio::fs::metadata(dest).await.map(|m| m.len()).unwrap_or(0);
    if written <= 44 {
        return Err(Error::ConversionFailure(
            "ffmpeg produced no audio (does the file have an audio track?)".into(),
        ));
    }

    Ok(())
}

/// Result of measuring the normalized audio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DurationEstimate {
    Measured(f64),
    /// Measurement failed; a conservative ceiling is used instead.
    Assumed(f64),
}

impl DurationEstimate {
    pub fn seconds(&self) -> f64 {
        match self {
            DurationEstimate::Measured(s) | DurationEstimate::Assumed(s) => *s,
        }
    }

    pub fn measured(&self) -> Option<f64> {
        match self {
            DurationEstimate::Measured(s) => Some(*s),
            DurationEstimate::Assumed(_) => None,
        }
    }
}

/// Playable duration of a WAV file. Never fails: an unreadable header yields
/// [`ASSUMED_DURATION_SECS`].
pub fn estimate_duration(path: &Path) -> DurationEstimate {
    match hound::WavReader::open(path) {
        Ok(reader) => {
            let spec = reader.spec();
            if spec.sample_rate == 0 {
                warn!(path = %path.display(), "WAV header has zero sample rate");
                return DurationEstimate::Assumed(ASSUMED_DURATION_SECS);
            }
            let secs = reader.duration() as f64 / spec.sample_rate as f64;
            debug!(duration_secs = format!("{secs:.1}"), "measured audio duration");
            DurationEstimate::Measured(secs)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not measure duration, assuming ceiling");
            DurationEstimate::Assumed(ASSUMED_DURATION_SECS)
        }
    }
}

fn decode_to_mono(source: &Path, kind: MediaKind) -> Result<Vec<f32>> {
    let file = File::open(source)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(kind.name());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::ConversionFailure(format!("unrecognized {kind} stream: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| Error::ConversionFailure("no audio track found".into()))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let source_rate = codec_params
        .sample_rate
        .ok_or_else(|| Error::ConversionFailure("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| Error::ConversionFailure(format!("unsupported codec: {e}")))?;

    let mut mono: Vec<f32> = Vec::new();
    let mut channels = 0;
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(Error::ConversionFailure(format!("read failed: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(error = %e, "skipping corrupt audio frame");
                continue;
            }
            Err(e) => return Err(Error::ConversionFailure(format!("decode failed: {e}"))),
        };

        let frames = decoded.frames();
        if frames == 0 {
            continue;
        }

        // The container's channel layout is optional; the decoded packet's is not.
        let spec = *decoded.spec();
        channels = spec.channels.count().max(1);
        let mut buf = SampleBuffer::<f32>::new(frames as u64, spec);
        buf.copy_interleaved_ref(decoded);
        if channels > 1 {
            mono.extend(
                buf.samples()
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        } else {
            mono.extend_from_slice(buf.samples());
        }
    }

    if mono.is_empty() {
        return Err(Error::ConversionFailure("no audio samples decoded".into()));
    }

    debug!(
        samples = mono.len(),
        source_rate,
        channels,
        "decoded audio"
    );

    if source_rate != TARGET_SAMPLE_RATE {
        mono = resample(&mono, source_rate, TARGET_SAMPLE_RATE)?;
    }
    Ok(mono)
}

fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    const CHUNK: usize = 1024;

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = to_rate as f64 / from_rate as f64;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK, 1)
        .map_err(|e| Error::ConversionFailure(format!("resampler init: {e}")))?;

    let expected = (samples.len() as f64 * ratio) as usize;
    let mut out = Vec::with_capacity(expected + CHUNK);

    for chunk in samples.chunks(CHUNK) {
        let mut input = chunk.to_vec();
        input.resize(CHUNK, 0.0);
        let frames = resampler
            .process(&[input], None)
            .map_err(|e| Error::ConversionFailure(format!("resample: {e}")))?;
        if let Some(channel) = frames.first() {
            out.extend_from_slice(channel);
        }
    }

    out.truncate(expected);
    Ok(out)
}

fn write_wav(dest: &Path, samples: &[f32]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_err = |e: hound::Error| Error::ConversionFailure(format!("writing WAV: {e}"));

    let mut writer = hound::WavWriter::create(dest, spec).map_err(wav_err)?;
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        writer
            .write_sample((clamped * i16::MAX as f32) as i16)
            .map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sine(path: &Path, sample_rate: u32, channels: u16, secs: f32) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let frames = (sample_rate as f32 * secs) as u32;
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let v = ((t * 440.0 * std::f32::consts::TAU).sin() * 0.5 * i16::MAX as f32) as i16;
            for _ in 0..channels {
                writer.write_sample(v).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[tokio::test]
    async fn test_wav_is_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        write_sine(&path, 16_000, 1, 1.0);
        let before = std::fs::read(&path).unwrap();

        let mut temp = TempFiles::in_dir(dir.path());
        let audio = normalize(&path, MediaKind::Wav, Path::new("ffmpeg"), &mut temp)
            .await
            .unwrap();

        assert_eq!(audio.path(), path);
        assert!(!audio.is_converted());
        assert!(temp.tracked().is_empty());
        assert_eq!(std::fs::read(audio.path()).unwrap(), before);
    }

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
    }

    fn read_mono(path: &Path) -> (hound::WavSpec, Vec<i16>) {
        let mut reader = hound::WavReader::open(path).unwrap();
        let spec = reader.spec();
        let samples = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        (spec, samples)
    }

    #[tokio::test]
    async fn test_flac_decoded_to_canonical_wav() {
        // 1 s of 44.1 kHz stereo: 440 Hz at 0.37 full scale on the left, silence on the right
        let src = fixtures_dir().join("tone.flac");
        assert_eq!(crate::format::detect_file(&src).unwrap(), MediaKind::Flac);

        let dir = tempfile::tempdir().unwrap();
        let mut temp = TempFiles::in_dir(dir.path().join("scratch"));
        let audio = normalize(&src, MediaKind::Flac, Path::new("ffmpeg"), &mut temp)
            .await
            .unwrap();
        assert!(audio.is_converted());
        assert!(temp.contains(audio.path()));

        let (spec, samples) = read_mono(audio.path());
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, TARGET_SAMPLE_RATE);
        assert_eq!(spec.bits_per_sample, 16);
        let secs = samples.len() as f64 / TARGET_SAMPLE_RATE as f64;
        assert!((secs - 1.0).abs() < 0.05, "duration {secs}");

        // both channels averaged: the peak is half the left channel's
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap() as f32 / i16::MAX as f32;
        assert!((0.14..0.23).contains(&peak), "peak {peak}");

        temp.cleanup();
        assert!(!audio.path().exists());
    }

    #[test]
    fn test_mp3_decoded_to_canonical_wav() {
        // 40 silent MPEG-1 layer III frames, 44.1 kHz stereo
        let src = fixtures_dir().join("silence.mp3");
        assert_eq!(crate::format::detect_file(&src).unwrap(), MediaKind::Mp3);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.wav");
        let duration = transcode_to_wav(&src, MediaKind::Mp3, &dest).unwrap();
        let expected = 40.0 * 1152.0 / 44_100.0;
        assert!((duration - expected).abs() < 0.1, "duration {duration}");

        let (spec, samples) = read_mono(&dest);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, TARGET_SAMPLE_RATE);
        let secs = samples.len() as f64 / TARGET_SAMPLE_RATE as f64;
        assert!((secs - expected).abs() < 0.1, "written duration {secs}");
        assert!(samples.iter().all(|s| s.unsigned_abs() < 64));
    }

    #[test]
    fn test_transcode_resamples_pcm_input() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("stereo_44k.wav");
        let dest = dir.path().join("out.wav");
        write_sine(&src, 44_100, 2, 2.0);

        let duration = transcode_to_wav(&src, MediaKind::Wav, &dest).unwrap();
        assert!((duration - 2.0).abs() < 0.1, "duration {duration}");

        let reader = hound::WavReader::open(&dest).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, TARGET_SAMPLE_RATE);
        assert_eq!(spec.bits_per_sample, 16);
        let secs = reader.duration() as f64 / spec.sample_rate as f64;
        assert!((secs - 2.0).abs() < 0.1, "written duration {secs}");
    }

    #[tokio::test]
    async fn test_corrupt_mp3_is_conversion_failure() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("broken.mp3");
        let mut bytes = b"ID3\x04\x00\x00\x00\x00\x00\x00".to_vec();
        bytes.extend((0..4096u32).map(|i| (i * 7 % 13) as u8));
        std::fs::write(&src, bytes).unwrap();

        let mut temp = TempFiles::in_dir(dir.path());
        let result = normalize(&src, MediaKind::Mp3, Path::new("ffmpeg"), &mut temp).await;
        assert!(matches!(result, Err(Error::ConversionFailure(_))), "{result:?}");

        temp.cleanup();
        assert!(!temp.dir().exists());
    }

    #[tokio::test]
    async fn test_mp4_without_ffmpeg_is_capability_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("talk.mp4");
        std::fs::write(&src, b"\x00\x00\x00\x18ftypmp42").unwrap();

        let mut temp = TempFiles::in_dir(dir.path());
        let result = normalize(
            &src,
            MediaKind::Mp4,
            Path::new("/nonexistent/bin/ffmpeg"),
            &mut temp,
        )
        .await;

        assert!(matches!(result, Err(Error::CapabilityUnavailable(_))));
        assert!(temp.tracked().is_empty());
        assert!(!temp.dir().exists());
    }

    #[tokio::test]
    async fn test_probe_missing_ffmpeg() {
        let caps = probe_capabilities(Path::new("/nonexistent/bin/ffmpeg")).await;
        assert!(!caps.audio_extraction);
    }

    #[tokio::test]
    async fn test_extract_fails_on_non_video() {
        let ffmpeg = Path::new("ffmpeg");
        if !probe_capabilities(ffmpeg).await.audio_extraction {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("fake.mp4");
        std::fs::write(&src, b"this is not a video").unwrap();
        let result = extract_audio_track(&src, &dir.path().join("out.wav"), ffmpeg).await;
        assert!(matches!(result, Err(Error::ConversionFailure(_))));
    }

    #[test]
    fn test_estimate_duration_measures_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ten.wav");
        write_sine(&path, 8_000, 2, 10.0);
        let estimate = estimate_duration(&path);
        let secs = estimate.measured().unwrap();
        assert!((secs - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_estimate_duration_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"not a wav file at all").unwrap();
        let estimate = estimate_duration(&path);
        assert_eq!(estimate, DurationEstimate::Assumed(ASSUMED_DURATION_SECS));
        assert_eq!(estimate.seconds(), ASSUMED_DURATION_SECS);
        assert!(estimate.measured().is_none());
    }

    #[test]
    fn test_write_wav_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loud.wav");
        write_wav(&path, &[2.0, -2.0, 0.0]).unwrap();
        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![i16::MAX, -i16::MAX, 0]);
    }
}
