//! Application configuration, loaded from the environment at startup.

use sprechpfad_core::quality::QualityConfig;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which feedback/transcription provider to wire up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    Mock,
    OpenAI,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub db_path: PathBuf,
    pub learner: String,
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub chat_model: String,
    pub asr_model: String,
    pub asr_language: String,
    pub log_level: Level,
    pub audio_dir: PathBuf,
    pub keep_last_audios: usize,
    pub keep_days: u32,
    pub news_dir: PathBuf,
    pub book_dir: PathBuf,
    pub words_per_chunk: usize,
    pub questions: u8,
    pub cut_punkt: bool,
    pub quality: QualityConfig,
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let db_path = std::env::var("SPRECHPFAD_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/sprechpfad.sqlite3"));

        let learner = std::env::var("SPRECHPFAD_LEARNER").unwrap_or_else(|_| "local".to_string());

        let provider_str = std::env::var("COACH_BACKEND").unwrap_or_else(|_| "mock".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            _ => Provider::Mock,
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        if provider == Provider::OpenAI && openai_api_key.is_none() {
            return Err(ConfigError::MissingVar(
                "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
            ));
        }

        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4.1-mini".to_string());
        let asr_model = std::env::var("ASR_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        let asr_language = std::env::var("ASR_LANGUAGE").unwrap_or_else(|_| "de".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let audio_dir = std::env::var("AUDIO_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/audio"));
        let keep_last_audios = parse_var("KEEP_LAST_AUDIOS", 10usize)?;
        let keep_days = parse_var("KEEP_DAYS", 0u32)?;

        let news_dir = std::env::var("NEWS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/news"));
        let book_dir = std::env::var("BOOK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/book"));
        let words_per_chunk = parse_var("WORDS_PER_CHUNK", 220usize)?;

        let questions = parse_var("QUESTIONS", 3u8)?;
        if questions > 3 {
            return Err(ConfigError::InvalidValue(
                "QUESTIONS".to_string(),
                format!("{questions} (at most 3 questions are supported)"),
            ));
        }
        let cut_punkt = parse_var("CUT_PUNKT", false)?;

        let mut quality = QualityConfig::default();
        quality.repetition_threshold = parse_var(
            "QUALITY_REPETITION_THRESHOLD",
            quality.repetition_threshold,
        )?;
        quality.repetition_inclusive = parse_var(
            "QUALITY_REPETITION_INCLUSIVE",
            quality.repetition_inclusive,
        )?;

        Ok(Self {
            db_path,
            learner,
            provider,
            openai_api_key,
            chat_model,
            asr_model,
            asr_language,
            log_level,
            audio_dir,
            keep_last_audios,
            keep_days,
            news_dir,
            book_dir,
            words_per_chunk,
            questions,
            cut_punkt,
            quality,
        })
    }
}
