//! Main entrypoint for the sprechpfad trainer.
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Opening the database and running migrations.
//! 4. Sweeping stray open sessions left by a previous ungraceful exit.
//! 5. Wiring the collaborators for the configured provider.
//! 6. Dispatching the command.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use clap::Parser;
use sprechpfad_core::LearnerContext;
use sprechpfad_core::coach::{CoachBackend, LLMCoachBackend, MockCoachBackend};
use sprechpfad_core::template::TemplateStore;
use sprechpfad_core::transcribe::{MockTranscriber, Transcriber, WhisperApiTranscriber};
use sprechpfad_trainer::audio::{FileAudioSource, cleanup_retention};
use sprechpfad_trainer::cli::{Cli, Command, PathCmd, VocabCmd};
use sprechpfad_trainer::config::{Config, Provider};
use sprechpfad_trainer::db::Db;
use sprechpfad_trainer::exercise::{ExerciseSettings, StdPrompter, StepExecutor, StepResult};
use sprechpfad_trainer::path::PathError;
use sprechpfad_trainer::path::run_manager::{MaterializedStep, RunManager};
use sprechpfad_trainer::path::texts::TextProvider;
use sprechpfad_trainer::path::vocab::VocabMeta;
use sprechpfad_trainer::report;
use sprechpfad_trainer::state::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    let learner = cli.learner.clone().unwrap_or_else(|| config.learner.clone());
    let ctx = LearnerContext::new(learner);

    // --- 3. Initialize Database ---
    let db = Db::connect(&config.db_path)
        .await
        .context("Failed to open database")?;
    info!(db = %config.db_path.display(), "database ready");

    // --- 4. Wire the orchestration core ---
    let texts = TextProvider::new(
        db.clone(),
        config.news_dir.clone(),
        config.book_dir.clone(),
        config.words_per_chunk,
    );
    let manager = Arc::new(RunManager::new(
        db.clone(),
        TemplateStore::with_defaults(),
        texts,
    ));

    // --- 5. Startup sweep: heal sessions an interrupted process left open ---
    let swept = manager.ledger().close_stray_open_sessions(&ctx).await?;
    if swept > 0 {
        info!(swept, "recovered stray open sessions from a previous process");
    }

    // --- 6. Wire collaborators for the configured provider ---
    let (transcriber, coach): (Arc<dyn Transcriber>, Arc<dyn CoachBackend>) =
        match &config.provider {
            Provider::OpenAI => {
                info!(model = %config.chat_model, "using OpenAI provider");
                let api_key = config.openai_api_key.as_ref().unwrap();
                let openai_config = OpenAIConfig::new().with_api_key(api_key);
                (
                    Arc::new(WhisperApiTranscriber::new(
                        openai_config.clone(),
                        config.asr_model.clone(),
                        config.asr_language.clone(),
                    )),
                    Arc::new(LLMCoachBackend::new(
                        openai_config,
                        config.chat_model.clone(),
                    )),
                )
            }
            Provider::Mock => {
                info!("using mock provider");
                (
                    Arc::new(MockTranscriber::with_responses([
                        "das ist eine beispielantwort für den mock-betrieb punkt",
                    ])),
                    Arc::new(MockCoachBackend),
                )
            }
        };

    let state = AppState {
        config: Arc::new(config),
        db,
        manager,
        transcriber,
        coach,
    };

    // --- 7. Dispatch ---
    match cli.command {
        Command::Path { cmd } => handle_path(&state, &ctx, cmd).await,
        Command::Vocab { cmd } => handle_vocab(&state, &ctx, cmd).await,
        Command::Report {
            last,
            kind,
            csv,
            summary,
            progress,
        } => handle_report(&state, &ctx, last, kind.as_deref(), csv, summary, progress).await,
        Command::Templates => {
            for template in state.manager.templates().list() {
                println!(
                    "{}  [{}]  {} ({} steps)",
                    template.id,
                    template.level,
                    template.name,
                    template.step_count()
                );
            }
            Ok(())
        }
    }
}

fn build_executor(state: &AppState, clips: Vec<PathBuf>) -> StepExecutor {
    StepExecutor::new(
        state.transcriber.clone(),
        state.coach.clone(),
        Arc::new(FileAudioSource::new(clips)),
        Arc::new(StdPrompter),
        ExerciseSettings {
            questions: state.config.questions,
            cut_punkt: state.config.cut_punkt,
            quality: state.config.quality.clone(),
            ..ExerciseSettings::default()
        },
    )
}

/// Runs one materialized step and reports how it ended.
async fn run_step(
    state: &AppState,
    ctx: &LearnerContext,
    executor: &StepExecutor,
    step: &MaterializedStep,
) -> anyhow::Result<()> {
    println!(
        "\n--- Schritt {} ({}) ---",
        step.index + 1,
        step.kind.tag()
    );
    match executor.execute(&state.manager, ctx, step).await? {
        StepResult::Completed(session) => {
            println!("Session abgeschlossen: {}", session.id);
            println!("Weiter mit: sprechpfad path next");
        }
        StepResult::LeftOpen { reason } => {
            println!("Schritt nicht abgeschlossen ({reason}).");
            println!("Die Session bleibt offen; 'sprechpfad path resume' versucht es erneut.");
        }
    }
    cleanup_retention(
        &state.config.audio_dir,
        state.config.keep_last_audios,
        state.config.keep_days,
    );
    Ok(())
}

async fn handle_path(state: &AppState, ctx: &LearnerContext, cmd: PathCmd) -> anyhow::Result<()> {
    match cmd {
        PathCmd::Start { template, clip } => {
            let executor = build_executor(state, clip);
            let (run, step) = state.manager.start_run(ctx, &template).await?;
            println!("Run gestartet: {} (Vorlage '{}')", run.id, run.template_id);
            run_step(state, ctx, &executor, &step).await
        }
        PathCmd::Next { clip } => {
            let Some(run) = state.manager.get_active_run(ctx).await? else {
                println!("Kein aktiver Run. Starte mit: sprechpfad path start --template <id>");
                return Ok(());
            };
            let executor = build_executor(state, clip);
            match state.manager.advance_run(ctx, run.id).await {
                Ok(Some(step)) => run_step(state, ctx, &executor, &step).await,
                Ok(None) => {
                    println!("Run abgeschlossen. Gut gemacht!");
                    Ok(())
                }
                Err(PathError::SessionStillOpen) => {
                    println!(
                        "Der aktuelle Schritt ist noch nicht abgeschlossen. \
                         'sprechpfad path resume' setzt ihn fort."
                    );
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }
        PathCmd::Resume { clip } => {
            let Some(run) = state.manager.get_active_run(ctx).await? else {
                println!("Kein aktiver Run.");
                return Ok(());
            };
            // a previous abort may have left the session open; sweep first
            state.manager.ledger().close_stray_open_sessions(ctx).await?;
            let executor = build_executor(state, clip);
            let step = state.manager.resume_step(ctx, run.id).await?;
            run_step(state, ctx, &executor, &step).await
        }
        PathCmd::Status => {
            match state.manager.get_active_run(ctx).await? {
                Some(run) => {
                    let template = state
                        .manager
                        .templates()
                        .get(&run.template_id)
                        .map(|t| t.step_count())
                        .unwrap_or_default();
                    println!(
                        "Aktiver Run {} | Vorlage '{}' | Schritt {}/{} | gestartet {}",
                        run.id,
                        run.template_id,
                        run.step_index + 1,
                        template,
                        run.started_at.format("%Y-%m-%d %H:%M")
                    );
                }
                None => println!("Kein aktiver Run."),
            }
            Ok(())
        }
    }
}

async fn handle_vocab(state: &AppState, ctx: &LearnerContext, cmd: VocabCmd) -> anyhow::Result<()> {
    match cmd {
        VocabCmd::Add {
            term,
            definition,
            example1,
            example2,
        } => {
            let item = state
                .manager
                .vocab()
                .add_item(
                    ctx,
                    &term,
                    VocabMeta {
                        definition,
                        example_1: example1,
                        example_2: example2,
                    },
                )
                .await?;
            println!("Vokabel gespeichert: {} ({})", item.term, item.id);
            Ok(())
        }
        VocabCmd::List => {
            let items = state.manager.vocab().list_items(ctx).await?;
            if items.is_empty() {
                println!("Keine Vokabeln gespeichert.");
                return Ok(());
            }
            for item in items {
                println!(
                    "- {} — {} (geübt: {}x)",
                    item.term,
                    item.definition.as_deref().unwrap_or("(keine Definition)"),
                    item.practice_count
                );
            }
            Ok(())
        }
    }
}

async fn handle_report(
    state: &AppState,
    ctx: &LearnerContext,
    last: i64,
    kind: Option<&str>,
    csv: Option<PathBuf>,
    summary: bool,
    progress: bool,
) -> anyhow::Result<()> {
    let rows = report::fetch_last_sessions(&state.db, ctx, last, kind).await?;

    if progress {
        println!("{}", report::render_progress(&rows));
    } else if summary {
        println!("{}", report::render_summary(&rows));
    } else {
        println!("{}", report::render_table(&rows));
    }

    if let Some(path) = csv {
        report::write_csv(&rows, &path).context("writing CSV")?;
        println!("CSV geschrieben: {}", path.display());
    }
    Ok(())
}
