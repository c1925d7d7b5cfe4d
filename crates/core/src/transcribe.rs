//! Speech-to-text collaborator contract.
//!
//! The trainer never processes audio itself; a [`Transcriber`] turns a
//! captured clip into a transcript string. The shipped implementation calls
//! the OpenAI Whisper API; the mock keeps exercises runnable offline and
//! drives the tests.

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{AudioInput, CreateTranscriptionRequestArgs},
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

/// One captured recording, as handed over by the audio collaborator.
#[derive(Debug, Clone)]
pub struct AudioClip {
    /// Complete WAV file contents.
    pub wav: Vec<u8>,
    /// Clip length in seconds when the capture side knows it.
    pub duration_seconds: Option<f64>,
    /// File name hint forwarded to the transcription backend.
    pub file_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    #[error("transcription failed: {0}")]
    Failed(String),
}

/// Contract for any service that can transcribe a clip.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, TranscribeError>;
}

/// A `Transcriber` backed by the OpenAI Whisper API.
pub struct WhisperApiTranscriber {
    client: Client<OpenAIConfig>,
    model: String,
    language: String,
}

impl WhisperApiTranscriber {
    /// # Arguments
    ///
    /// * `config` - OpenAI API configuration (API key, base URL, etc.).
    /// * `model` - Transcription model identifier (e.g. "whisper-1").
    /// * `language` - ISO language hint for the recognizer (e.g. "de").
    pub fn new(config: OpenAIConfig, model: String, language: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            language,
        }
    }
}

#[async_trait]
impl Transcriber for WhisperApiTranscriber {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, TranscribeError> {
        let input = AudioInput::from_vec_u8(clip.file_name.clone(), clip.wav.clone());

        let request = CreateTranscriptionRequestArgs::default()
            .file(input)
            .model(&self.model)
            .language(&self.language)
            .build()
            .map_err(|e| TranscribeError::Failed(e.to_string()))?;

        let response = self
            .client
            .audio()
            .transcribe(request)
            .await
            .map_err(|e| TranscribeError::Failed(e.to_string()))?;

        debug!(chars = response.text.len(), "transcription received");
        Ok(response.text.trim().to_string())
    }
}

/// A scripted `Transcriber` for development and tests.
///
/// Returns the queued transcripts in order and repeats the last one once the
/// queue is exhausted. `failing()` builds one that always errors.
pub struct MockTranscriber {
    queue: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    fail: bool,
}

impl MockTranscriber {
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue: VecDeque<String> = responses.into_iter().map(Into::into).collect();
        let last = queue.back().cloned().unwrap_or_default();
        Self {
            queue: Mutex::new(queue),
            last: Mutex::new(last),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            last: Mutex::new(String::new()),
            fail: true,
        }
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _clip: &AudioClip) -> Result<String, TranscribeError> {
        if self.fail {
            return Err(TranscribeError::Failed("mock transcriber offline".into()));
        }
        let mut queue = self.queue.lock().expect("mock queue lock");
        match queue.pop_front() {
            Some(text) => {
                *self.last.lock().expect("mock last lock") = text.clone();
                Ok(text)
            }
            None => Ok(self.last.lock().expect("mock last lock").clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip() -> AudioClip {
        AudioClip {
            wav: vec![0; 16],
            duration_seconds: Some(1.0),
            file_name: "clip.wav".into(),
        }
    }

    #[tokio::test]
    async fn mock_returns_responses_in_order_then_repeats() {
        let t = MockTranscriber::with_responses(["eins", "zwei"]);
        assert_eq!(t.transcribe(&clip()).await.unwrap(), "eins");
        assert_eq!(t.transcribe(&clip()).await.unwrap(), "zwei");
        assert_eq!(t.transcribe(&clip()).await.unwrap(), "zwei");
    }

    #[tokio::test]
    async fn failing_mock_errors() {
        let t = MockTranscriber::failing();
        let err = t.transcribe(&clip()).await.unwrap_err();
        assert!(matches!(err, TranscribeError::Failed(_)));
    }
}
