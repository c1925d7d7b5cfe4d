//! Audio-capture collaborator contract.
//!
//! Capture itself is external to the trainer: an [`AudioSource`] hands over
//! finished WAV clips plus their duration. The shipped implementation reads
//! pre-recorded clip files in order (the `--clip` CLI flag); tests use the
//! synthesized [`MockAudioSource`]. Retention cleanup keeps the clip
//! directory from growing without bound.

use async_trait::async_trait;
use sprechpfad_core::transcribe::AudioClip;
use std::collections::VecDeque;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("audio capture cancelled")]
    Cancelled,
    #[error("audio source unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

/// Contract for anything that can produce the next recording.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Produces one clip, blocking up to roughly `max_seconds`. Cancellation
    /// surfaces as [`AudioError::Cancelled`]; the caller leaves the session
    /// open and relies on the sweep.
    async fn capture(&self, max_seconds: f64) -> Result<AudioClip, AudioError>;
}

/// An `AudioSource` that consumes pre-recorded WAV files in the given order.
pub struct FileAudioSource {
    queue: Mutex<VecDeque<PathBuf>>,
}

impl FileAudioSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            queue: Mutex::new(paths.into()),
        }
    }
}

#[async_trait]
impl AudioSource for FileAudioSource {
    async fn capture(&self, _max_seconds: f64) -> Result<AudioClip, AudioError> {
        let path = self
            .queue
            .lock()
            .expect("clip queue lock")
            .pop_front()
            .ok_or_else(|| {
                AudioError::Unavailable("no clip left; pass more --clip files".to_string())
            })?;

        let wav = std::fs::read(&path)?;
        let reader = hound::WavReader::new(Cursor::new(&wav))?;
        let spec = reader.spec();
        let duration = reader.duration() as f64 / spec.sample_rate as f64;

        debug!(path = %path.display(), duration, "clip loaded");
        Ok(AudioClip {
            wav,
            duration_seconds: Some(duration),
            file_name: path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("clip.wav")
                .to_string(),
        })
    }
}

/// Synthesizes silent clips of a fixed duration; test collaborator.
pub struct MockAudioSource {
    duration_seconds: f64,
    cancelled: Mutex<Option<usize>>,
}

impl MockAudioSource {
    pub fn new(duration_seconds: f64) -> Self {
        Self {
            duration_seconds,
            cancelled: Mutex::new(None),
        }
    }

    /// Makes the `n`-th capture (0-based) report cancellation.
    pub fn cancel_at(self, n: usize) -> Self {
        *self.cancelled.lock().expect("cancel lock") = Some(n + 1);
        self
    }

    fn silent_wav(duration_seconds: f64) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer =
                hound::WavWriter::new(&mut cursor, spec).expect("in-memory wav writer");
            let samples = (duration_seconds * spec.sample_rate as f64) as usize;
            for _ in 0..samples {
                writer.write_sample(0i16).expect("write sample");
            }
            writer.finalize().expect("finalize wav");
        }
        cursor.into_inner()
    }
}

#[async_trait]
impl AudioSource for MockAudioSource {
    async fn capture(&self, _max_seconds: f64) -> Result<AudioClip, AudioError> {
        let mut remaining = self.cancelled.lock().expect("cancel lock");
        if let Some(n) = remaining.as_mut() {
            *n -= 1;
            if *n == 0 {
                *remaining = None;
                return Err(AudioError::Cancelled);
            }
        }
        drop(remaining);

        Ok(AudioClip {
            wav: Self::silent_wav(self.duration_seconds),
            duration_seconds: Some(self.duration_seconds),
            file_name: "mock.wav".into(),
        })
    }
}

/// Deletes old clips: keeps at most `keep_last` newest files, and drops
/// anything older than `keep_days` days (0 disables the age check). Errors
/// on individual files are logged and skipped; cleanup is best-effort.
pub fn cleanup_retention(audio_dir: &Path, keep_last: usize, keep_days: u32) {
    if !audio_dir.is_dir() {
        return;
    }

    let mut files: Vec<(PathBuf, SystemTime)> = match std::fs::read_dir(audio_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("wav"))
            .filter_map(|p| {
                let modified = p.metadata().and_then(|m| m.modified()).ok()?;
                Some((p, modified))
            })
            .collect(),
        Err(e) => {
            warn!(dir = %audio_dir.display(), error = %e, "retention scan failed");
            return;
        }
    };
    files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut doomed: Vec<&PathBuf> = Vec::new();
    if keep_last > 0 {
        doomed.extend(files.iter().skip(keep_last).map(|(p, _)| p));
    }
    if keep_days > 0 {
        let cutoff = SystemTime::now() - Duration::from_secs(u64::from(keep_days) * 86_400);
        doomed.extend(
            files
                .iter()
                .filter(|(_, modified)| *modified < cutoff)
                .map(|(p, _)| p),
        );
    }

    for path in doomed {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "could not delete clip");
        }
    }
}
