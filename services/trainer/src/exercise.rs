//! The step executor.
//!
//! Dispatches a materialized step to its concrete exercise flow and reports
//! completion back through the session ledger. All blocking collaborator
//! work (capture, transcription, coach) happens here, outside any storage
//! transaction: the session is opened in one short transaction before, and
//! completion is recorded in a second one after. A collaborator failure or a
//! cancellation leaves the session discoverably open for the sweep; a coach
//! failure is absorbed locally and the session still completes.

use crate::audio::{AudioError, AudioSource};
use crate::models::{AnswerRecord, Session, SessionOutcome};
use crate::path::PathError;
use crate::path::run_manager::{MaterializedStep, RunManager};
use crate::path::vocab::VocabMeta;
use sprechpfad_core::LearnerContext;
use sprechpfad_core::coach::{CoachBackend, CoachRequest, fallback_feedback};
use sprechpfad_core::quality::{ExerciseMode, QualityConfig, QualityFlags, evaluate, warning};
use sprechpfad_core::stats::{Stats, compute_stats, suggest_bonus_terms, suggest_target_terms, terms_used};
use sprechpfad_core::template::StepKind;
use sprechpfad_core::text::{cut_at_punkt, normalize_text};
use sprechpfad_core::transcribe::Transcriber;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Terminal interaction seam, so the flows are drivable from tests.
pub trait Prompter: Send + Sync {
    fn say(&self, line: &str);
    fn read_line(&self, prompt: &str) -> std::io::Result<String>;
}

/// Prompter over stdout/stdin.
pub struct StdPrompter;

impl Prompter for StdPrompter {
    fn say(&self, line: &str) {
        println!("{line}");
    }

    fn read_line(&self, prompt: &str) -> std::io::Result<String> {
        use std::io::Write;
        print!("{prompt}");
        std::io::stdout().flush()?;
        let mut buf = String::new();
        std::io::stdin().read_line(&mut buf)?;
        Ok(buf.trim().to_string())
    }
}

/// Prompter with scripted answers; collects everything said.
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    pub said: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            said: Mutex::new(Vec::new()),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn say(&self, line: &str) {
        self.said.lock().expect("said lock").push(line.to_string());
    }

    fn read_line(&self, _prompt: &str) -> std::io::Result<String> {
        Ok(self
            .answers
            .lock()
            .expect("answers lock")
            .pop_front()
            .unwrap_or_default())
    }
}

/// Tunables of the exercise flows, derived from the application config.
#[derive(Clone)]
pub struct ExerciseSettings {
    pub questions: u8,
    pub cut_punkt: bool,
    pub retell_seconds: f64,
    pub question_seconds: f64,
    pub quality: QualityConfig,
}

impl Default for ExerciseSettings {
    fn default() -> Self {
        Self {
            questions: 3,
            cut_punkt: false,
            retell_seconds: 60.0,
            question_seconds: 25.0,
            quality: QualityConfig::default(),
        }
    }
}

/// How a step execution ended.
#[derive(Debug)]
pub enum StepResult {
    /// The session was completed with a full outcome.
    Completed(Session),
    /// A collaborator failed or the learner aborted; the session stays open
    /// and the sweep will mark it abandoned.
    LeftOpen { reason: String },
}

/// One processed recording.
struct RecordedAnswer {
    transcript: String,
    stats: Stats,
    flags: QualityFlags,
    duration_seconds: Option<f64>,
    wpm: Option<f64>,
}

const QUESTIONS_DE: [&str; 3] = [
    "Frage 1 (These): Formuliere die Kernaussage in genau 1 Satz.",
    "Frage 2 (Argument): Nenne 2 konkrete Aussagen/Fakten aus dem Abschnitt.",
    "Frage 3 (Begründung): Warum ist die Deutung plausibel? Nutze 'weil/deshalb'.",
];

pub struct StepExecutor {
    transcriber: Arc<dyn Transcriber>,
    coach: Arc<dyn CoachBackend>,
    audio: Arc<dyn AudioSource>,
    prompter: Arc<dyn Prompter>,
    settings: ExerciseSettings,
}

impl StepExecutor {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        coach: Arc<dyn CoachBackend>,
        audio: Arc<dyn AudioSource>,
        prompter: Arc<dyn Prompter>,
        settings: ExerciseSettings,
    ) -> Self {
        Self {
            transcriber,
            coach,
            audio,
            prompter,
            settings,
        }
    }

    /// Runs the exercise flow for one materialized step.
    pub async fn execute(
        &self,
        manager: &RunManager,
        ctx: &LearnerContext,
        step: &MaterializedStep,
    ) -> Result<StepResult, PathError> {
        match &step.kind {
            StepKind::ReadRespond { .. } => self.read_respond(manager, ctx, step).await,
            StepKind::VocabDrill => self.vocab_drill(manager, step).await,
            StepKind::Review { .. } => self.review(manager, step).await,
        }
    }

    /// Captures and transcribes one answer, evaluates it and shows at most
    /// one warning block. `Err` carries the reason the attempt could not be
    /// brought to a transcript; the caller leaves the session open then.
    async fn record_answer(
        &self,
        mode: ExerciseMode,
        max_seconds: f64,
    ) -> Result<RecordedAnswer, String> {
        let clip = match self.audio.capture(max_seconds).await {
            Ok(clip) => clip,
            Err(AudioError::Cancelled) => return Err("capture cancelled".to_string()),
            Err(e) => return Err(format!("audio capture failed: {e}")),
        };

        let raw = match self.transcriber.transcribe(&clip).await {
            Ok(text) => text,
            Err(e) => return Err(format!("transcription failed: {e}")),
        };

        let transcript = if self.settings.cut_punkt {
            cut_at_punkt(&raw)
        } else {
            normalize_text(&raw)
        };

        let stats = compute_stats(&transcript);
        let flags = evaluate(
            mode,
            &transcript,
            &stats,
            clip.duration_seconds,
            &self.settings.quality,
        );

        if let Some(w) = warning(&flags, &self.settings.quality) {
            self.prompter.say(&format!("WARNUNG: {}", w.headline));
            for hint in &w.hints {
                self.prompter.say(&format!("- {hint}"));
            }
        }

        let wpm = clip.duration_seconds.and_then(|dur| {
            (dur > 0.0).then(|| (stats.word_count as f64 / (dur / 60.0) * 10.0).round() / 10.0)
        });

        self.prompter.say(&format!("Transkript: {transcript}"));
        Ok(RecordedAnswer {
            transcript,
            stats,
            flags,
            duration_seconds: clip.duration_seconds,
            wpm,
        })
    }

    /// Asks the coach, falling back to local feedback on any backend error.
    /// The session is completed either way.
    async fn coach_or_fallback(&self, req: &CoachRequest) -> String {
        match self.coach.generate(req).await {
            Ok(reply) => reply.feedback_text,
            Err(e) => {
                warn!(error = %e, "coach backend failed; using local fallback");
                fallback_feedback(req.flags.as_ref())
            }
        }
    }

    async fn read_respond(
        &self,
        manager: &RunManager,
        ctx: &LearnerContext,
        step: &MaterializedStep,
    ) -> Result<StepResult, PathError> {
        let text = step.text.as_ref().expect("read step carries a text");

        self.prompter.say(&format!("== {} ==", text.title));
        self.prompter.say(&text.content);

        let bonus_terms = suggest_bonus_terms(&text.content, 5);
        self.prompter.say(&format!(
            "Wiedergabe in eigenen Worten. Bonus-Begriffe (optional): {}",
            bonus_terms.join(", ")
        ));

        let retell = match self
            .record_answer(ExerciseMode::Retell, self.settings.retell_seconds)
            .await
        {
            Ok(answer) => answer,
            Err(reason) => return Ok(StepResult::LeftOpen { reason }),
        };

        let target_terms = suggest_target_terms(&text.content, Some(&retell.transcript), 8);
        let target_usage = terms_used(&target_terms, &retell.transcript);
        let bonus_usage = terms_used(&bonus_terms, &retell.transcript);

        let mut questions = Vec::new();
        for (i, question) in QUESTIONS_DE
            .iter()
            .take(usize::from(self.settings.questions))
            .enumerate()
        {
            let number = (i + 1) as u8;
            self.prompter.say(question);

            let answer = match self
                .record_answer(ExerciseMode::Question(number), self.settings.question_seconds)
                .await
            {
                Ok(answer) => answer,
                Err(reason) => return Ok(StepResult::LeftOpen { reason }),
            };

            let has_causal = if number == 3 {
                let (ok, feedback) = sprechpfad_core::coach::causal_feedback(
                    &answer.transcript,
                    Some(&bonus_usage),
                );
                self.prompter.say(&feedback);
                Some(ok)
            } else {
                None
            };

            questions.push(AnswerRecord {
                mode: ExerciseMode::Question(number).tag(),
                transcript: answer.transcript,
                low_quality: answer.flags.low_quality,
                has_causal,
            });
        }

        let coach_request = CoachRequest {
            mode: ExerciseMode::Retell,
            topic: text.title.clone(),
            source_text: Some(text.content.clone()),
            transcript: retell.transcript.clone(),
            flags: Some(retell.flags.clone()),
        };
        let feedback = self.coach_or_fallback(&coach_request).await;
        self.prompter.say("--- COACH-FEEDBACK ---");
        self.prompter.say(&feedback);

        // Vocabulary selection: the learner keeps words for the next steps.
        match self
            .prompter
            .read_line("Begriffe übernehmen (Komma-getrennt, leer = keine): ")
        {
            Ok(line) => {
                for term in line.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                    manager
                        .vocab()
                        .record_selection(ctx, step.session.id, term, VocabMeta::default())
                        .await?;
                }
            }
            Err(e) => warn!(error = %e, "vocabulary selection skipped"),
        }

        let outcome = SessionOutcome {
            transcript: Some(retell.transcript),
            duration_seconds: retell.duration_seconds,
            wpm: retell.wpm,
            stats: Some(retell.stats),
            flags: Some(retell.flags),
            coach_feedback: Some(feedback),
            target_usage: Some(target_usage),
            bonus_usage: Some(bonus_usage),
            questions,
            ..SessionOutcome::default()
        };
        let session = manager
            .ledger()
            .complete_session(step.session.id, outcome)
            .await?;
        Ok(StepResult::Completed(session))
    }

    async fn vocab_drill(
        &self,
        manager: &RunManager,
        step: &MaterializedStep,
    ) -> Result<StepResult, PathError> {
        if step.vocab.is_empty() {
            self.prompter
                .say("Keine Vokabeln aus dem letzten Schritt; Drill übersprungen.");
            let session = manager
                .ledger()
                .complete_session(step.session.id, SessionOutcome::default())
                .await?;
            return Ok(StepResult::Completed(session));
        }

        let mut practiced = Vec::new();
        for item in &step.vocab {
            self.prompter.say(&format!(
                "Begriff: {} — {}",
                item.term,
                item.definition.as_deref().unwrap_or("(keine Definition)")
            ));
            self.prompter
                .say("Erkläre das Wort in eigenen Worten und gib ein Beispiel.");

            let answer = match self
                .record_answer(ExerciseMode::Define, self.settings.question_seconds)
                .await
            {
                Ok(answer) => answer,
                Err(reason) => return Ok(StepResult::LeftOpen { reason }),
            };

            let usage = terms_used(std::slice::from_ref(&item.term), &answer.transcript);
            if usage.used.is_empty() {
                self.prompter
                    .say("Hinweis: Verwende den Begriff selbst in deiner Erklärung.");
            }

            let coach_request = CoachRequest {
                mode: ExerciseMode::Define,
                topic: item.term.clone(),
                source_text: item.definition.clone(),
                transcript: answer.transcript.clone(),
                flags: Some(answer.flags.clone()),
            };
            let feedback = self.coach_or_fallback(&coach_request).await;
            self.prompter.say(&feedback);

            manager.vocab().mark_practiced(item.id).await?;
            practiced.push(item.term.clone());
        }

        let outcome = SessionOutcome {
            practiced_terms: practiced,
            ..SessionOutcome::default()
        };
        let session = manager
            .ledger()
            .complete_session(step.session.id, outcome)
            .await?;
        info!(session_id = %session.id, "vocabulary drill finished");
        Ok(StepResult::Completed(session))
    }

    async fn review(
        &self,
        manager: &RunManager,
        step: &MaterializedStep,
    ) -> Result<StepResult, PathError> {
        let mut practiced = Vec::new();
        for item in &step.vocab {
            self.prompter.say(&format!(
                "Review: Erzähle in 2-3 Sätzen etwas mit '{}'.",
                item.term
            ));

            let answer = match self
                .record_answer(ExerciseMode::Define, self.settings.retell_seconds)
                .await
            {
                Ok(answer) => answer,
                Err(reason) => return Ok(StepResult::LeftOpen { reason }),
            };

            let usage = terms_used(std::slice::from_ref(&item.term), &answer.transcript);
            if usage.used.is_empty() {
                self.prompter.say(&format!(
                    "Der Begriff '{}' kam nicht vor; versuche ihn beim nächsten Mal einzubauen.",
                    item.term
                ));
            }

            manager.vocab().mark_practiced(item.id).await?;
            practiced.push(item.term.clone());
        }

        let outcome = SessionOutcome {
            practiced_terms: practiced,
            ..SessionOutcome::default()
        };
        let session = manager
            .ledger()
            .complete_session(step.session.id, outcome)
            .await?;
        info!(session_id = %session.id, "review finished");
        Ok(StepResult::Completed(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MockAudioSource;
    use crate::db::Db;
    use crate::models::SessionStatus;
    use crate::path::texts::TextProvider;
    use sprechpfad_core::coach::{MockCoachBackend, UnavailableCoachBackend};
    use sprechpfad_core::template::TemplateStore;
    use sprechpfad_core::transcribe::MockTranscriber;

    const RETELL: &str = "die regierung hat gestern ein neues gesetz beschlossen das viele \
                          bürger direkt betrifft und deshalb kontrovers diskutiert wird";

    struct Fixture {
        manager: RunManager,
        _guard: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let news = dir.path().join("news");
        std::fs::create_dir_all(&news).unwrap();
        std::fs::write(
            news.join("artikel.txt"),
            "die regierung plant ein gesetz zur strategie der energiewende \
             und will damit die versorgung sichern",
        )
        .unwrap();

        let db = Db::in_memory().await.unwrap();
        let texts = TextProvider::new(
            db.clone(),
            news,
            dir.path().join("book"),
            220,
        );
        let manager =
            RunManager::new(db, TemplateStore::with_defaults(), texts).with_review_seed(7);
        Fixture {
            manager,
            _guard: dir,
        }
    }

    fn executor(
        coach: Arc<dyn CoachBackend>,
        audio: Arc<dyn AudioSource>,
        prompter: Arc<ScriptedPrompter>,
        transcripts: Vec<&str>,
    ) -> StepExecutor {
        StepExecutor::new(
            Arc::new(MockTranscriber::with_responses(transcripts)),
            coach,
            audio,
            prompter,
            ExerciseSettings {
                questions: 1,
                ..ExerciseSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn read_step_completes_and_records_selected_vocabulary() {
        let f = fixture().await;
        let ctx = LearnerContext::new("anna");
        let (_run, step) = f.manager.start_run(&ctx, "daily-news").await.unwrap();

        let prompter = Arc::new(ScriptedPrompter::new(["strategie, versorgung"]));
        let exec = executor(
            Arc::new(MockCoachBackend),
            Arc::new(MockAudioSource::new(20.0)),
            prompter.clone(),
            vec![RETELL, "die kernaussage ist dass das gesetz kommt weil es nötig ist"],
        );

        let result = exec.execute(&f.manager, &ctx, &step).await.unwrap();
        let session = match result {
            StepResult::Completed(session) => session,
            other => panic!("expected completion, got {other:?}"),
        };
        assert_eq!(session.status, SessionStatus::Completed);

        let outcome = session.outcome.as_ref().unwrap();
        assert!(outcome.0.transcript.is_some());
        assert!(outcome.0.wpm.is_some());
        assert_eq!(outcome.0.questions.len(), 1);

        let items = f.manager.vocab().list_items(&ctx).await.unwrap();
        let terms: Vec<&str> = items.iter().map(|i| i.term.as_str()).collect();
        assert_eq!(terms, vec!["strategie", "versorgung"]);
    }

    #[tokio::test]
    async fn coach_failure_still_completes_the_session() {
        let f = fixture().await;
        let ctx = LearnerContext::new("anna");
        let (_run, step) = f.manager.start_run(&ctx, "daily-news").await.unwrap();

        let prompter = Arc::new(ScriptedPrompter::new([""]));
        let exec = executor(
            Arc::new(UnavailableCoachBackend),
            Arc::new(MockAudioSource::new(20.0)),
            prompter.clone(),
            vec![RETELL, "die kernaussage in einem satz weil es wichtig ist"],
        );

        let result = exec.execute(&f.manager, &ctx, &step).await.unwrap();
        let session = match result {
            StepResult::Completed(session) => session,
            other => panic!("expected completion, got {other:?}"),
        };
        // the local fallback went into the outcome instead of nothing
        let feedback = session.outcome.unwrap().0.coach_feedback.unwrap();
        assert!(!feedback.is_empty());
        assert_eq!(
            f.manager.ledger().open_session_count(session.run_id).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn cancellation_leaves_the_session_open() {
        let f = fixture().await;
        let ctx = LearnerContext::new("anna");
        let (run, step) = f.manager.start_run(&ctx, "daily-news").await.unwrap();

        let prompter = Arc::new(ScriptedPrompter::new([""]));
        let exec = executor(
            Arc::new(MockCoachBackend),
            Arc::new(MockAudioSource::new(20.0).cancel_at(0)),
            prompter.clone(),
            vec![RETELL],
        );

        let result = exec.execute(&f.manager, &ctx, &step).await.unwrap();
        assert!(matches!(result, StepResult::LeftOpen { .. }));
        assert_eq!(
            f.manager.ledger().open_session_count(run.id).await.unwrap(),
            1,
            "session must stay discoverably open"
        );

        // the sweep heals it
        f.manager
            .ledger()
            .close_stray_open_sessions(&ctx)
            .await
            .unwrap();
        assert_eq!(
            f.manager.ledger().open_session_count(run.id).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn transcriber_failure_leaves_the_session_open() {
        let f = fixture().await;
        let ctx = LearnerContext::new("anna");
        let (run, step) = f.manager.start_run(&ctx, "daily-news").await.unwrap();

        let exec = StepExecutor::new(
            Arc::new(MockTranscriber::failing()),
            Arc::new(MockCoachBackend),
            Arc::new(MockAudioSource::new(20.0)),
            Arc::new(ScriptedPrompter::new([""])),
            ExerciseSettings::default(),
        );

        let result = exec.execute(&f.manager, &ctx, &step).await.unwrap();
        match result {
            StepResult::LeftOpen { reason } => assert!(reason.contains("transcription")),
            other => panic!("expected left-open, got {other:?}"),
        }
        assert_eq!(
            f.manager.ledger().open_session_count(run.id).await.unwrap(),
            1
        );
    }
}
