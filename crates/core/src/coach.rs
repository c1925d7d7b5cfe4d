//! Feedback coach collaborator.
//!
//! After each recording the trainer asks a [`CoachBackend`] for short,
//! structured commentary on the answer. The backend is interchangeable
//! (LLM-backed or mock, selected by configuration), and a backend failure
//! must never take the exercise bookkeeping down with it: callers map any
//! [`CoachError`] to [`fallback_feedback`] and carry on.

use crate::quality::{ExerciseMode, QualityFlags};
use crate::stats::TermUsage;
use anyhow::Context;
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

/// Everything the coach needs to judge one answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachRequest {
    pub mode: ExerciseMode,
    pub topic: String,
    pub source_text: Option<String>,
    pub transcript: String,
    pub flags: Option<QualityFlags>,
}

/// Structured commentary from the coach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachReply {
    pub feedback_text: String,
    pub model: Option<String>,
    pub latency_ms: u64,
}

/// Failure modes of the feedback backend. All of them are recoverable from
/// the caller's point of view: show [`fallback_feedback`] instead.
#[derive(Debug, thiserror::Error)]
pub enum CoachError {
    #[error("feedback backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("feedback backend rate limited")]
    RateLimited,
    #[error("feedback backend timed out")]
    Timeout,
}

impl CoachError {
    fn from_openai(err: OpenAIError) -> Self {
        match &err {
            OpenAIError::Reqwest(e) if e.is_timeout() => CoachError::Timeout,
            OpenAIError::ApiError(api) => {
                let msg = api.message.to_lowercase();
                if msg.contains("rate limit") {
                    CoachError::RateLimited
                } else {
                    CoachError::BackendUnavailable(api.message.clone())
                }
            }
            _ => CoachError::BackendUnavailable(err.to_string()),
        }
    }
}

/// Contract for any service that can generate coach feedback.
#[async_trait]
pub trait CoachBackend: Send + Sync {
    async fn generate(&self, req: &CoachRequest) -> Result<CoachReply, CoachError>;
}

/// A `CoachBackend` backed by an OpenAI-compatible chat completion API.
pub struct LLMCoachBackend {
    client: Client<OpenAIConfig>,
    model: String,
}

impl LLMCoachBackend {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }

    fn build_prompt(req: &CoachRequest) -> String {
        let mut prompt = format!(
            "Modus: {}\nThema: {}\n\nAntwort des Lernenden:\n{}\n",
            req.mode.tag(),
            req.topic,
            req.transcript.trim()
        );
        if let Some(source) = &req.source_text {
            prompt.push_str("\nVorlage:\n");
            prompt.push_str(source.trim());
            prompt.push('\n');
        }
        if let Some(flags) = &req.flags {
            // Compact signal block; the model should weigh unreliable ASR.
            prompt.push_str(&format!(
                "\nSignale: asr_empty={} suspected_silence={} hallucination_hit={} low_quality={}\n",
                flags.asr_empty, flags.suspected_silence, flags.hallucination_hit, flags.low_quality
            ));
        }
        prompt.push_str(
            "\nGib kurzes Coach-Feedback auf Deutsch: 1 Zeile Struktur, 1 Zeile Wortschatz, \
             1 Zeile konkreter nächster Schritt. Keine Floskeln, maximal 4 Zeilen.",
        );
        prompt
    }
}

#[async_trait]
impl CoachBackend for LLMCoachBackend {
    async fn generate(&self, req: &CoachRequest) -> Result<CoachReply, CoachError> {
        let start = Instant::now();

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(
                        "Du bist ein knapper, konkreter Sprachcoach für Deutsch als Fremdsprache.",
                    )
                    .build()
                    .map_err(CoachError::from_openai)?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(Self::build_prompt(req))
                    .build()
                    .map_err(CoachError::from_openai)?
                    .into(),
            ])
            .build()
            .map_err(CoachError::from_openai)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(CoachError::from_openai)?;

        let text = response
            .choices
            .first()
            .context("no response choice from coach backend")
            .and_then(|choice| {
                choice
                    .message
                    .content
                    .clone()
                    .context("empty content in coach response")
            })
            .map_err(|e| CoachError::BackendUnavailable(e.to_string()))?;

        let latency_ms = start.elapsed().as_millis() as u64;
        info!(mode = %req.mode.tag(), latency_ms, "coach feedback generated");

        Ok(CoachReply {
            feedback_text: text.trim().to_string(),
            model: Some(response.model),
            latency_ms,
        })
    }
}

/// A deterministic `CoachBackend` for development and tests.
pub struct MockCoachBackend;

#[async_trait]
impl CoachBackend for MockCoachBackend {
    async fn generate(&self, req: &CoachRequest) -> Result<CoachReply, CoachError> {
        Ok(CoachReply {
            feedback_text: format!(
                "(MOCK) Feedback für {}: Antwort ist verständlich. \
                 Achte auf Kürze und klare Struktur.",
                req.mode.tag()
            ),
            model: None,
            latency_ms: 0,
        })
    }
}

/// A `CoachBackend` that always fails; used to exercise the fallback path.
pub struct UnavailableCoachBackend;

#[async_trait]
impl CoachBackend for UnavailableCoachBackend {
    async fn generate(&self, _req: &CoachRequest) -> Result<CoachReply, CoachError> {
        Err(CoachError::BackendUnavailable("disabled".into()))
    }
}

/// Local feedback used when the backend fails or is disabled. Built only
/// from the quality flags, so it works entirely offline.
pub fn fallback_feedback(flags: Option<&QualityFlags>) -> String {
    let mut notes: Vec<&str> = Vec::new();
    if let Some(f) = flags {
        if f.asr_empty || f.suspected_silence {
            notes.push("Ich habe dich kaum gehört. Sprich näher ins Mikro und etwas lauter.");
        }
        if f.too_short || f.retell_empty {
            notes.push("Die Antwort war sehr kurz. Versuche 1-2 klare Sätze mehr.");
        }
        if f.hallucination_hit {
            notes.push("Der Text wirkt unzuverlässig. Wiederhole langsam und deutlich.");
        }
    }
    if notes.is_empty() {
        notes.push("Gut. Beim nächsten Versuch: klarer strukturieren und ein kurzes Beispiel nennen.");
    }
    notes.join(" ")
}

/// Rule-based feedback for the cause/effect question: checks for a causal
/// marker and reports bonus-term usage.
pub fn causal_feedback(transcript: &str, bonus_usage: Option<&TermUsage>) -> (bool, String) {
    let lower = transcript.to_lowercase();
    let has_causal = lower.contains("weil") || lower.contains("deshalb");

    let mut lines = Vec::new();
    if has_causal {
        lines.push("- Struktur: Begründung erkennbar (Kausalmarker vorhanden).".to_string());
    } else {
        lines.push(
            "- Struktur: Es fehlt ein klarer Kausalmarker (z.B. \"weil/deshalb\").".to_string(),
        );
    }

    match bonus_usage {
        Some(usage) if !usage.used.is_empty() => {
            lines.push(format!(
                "- Bonus: Gut genutzt ({} Treffer: {}).",
                usage.used.len(),
                usage.used.join(", ")
            ));
        }
        _ => {
            lines.push("- Bonus: Nicht genutzt (baue 1 Bonus-Begriff bewusst ein).".to_string());
        }
    }
    lines.push("Nächstes Mal: Starte mit \"..., weil ... deshalb ... Punkt.\"".to_string());

    (has_causal, format!("Feedback Q3:\n{}", lines.join("\n")))
}
