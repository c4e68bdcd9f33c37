use anyhow::{bail, Context, Result};
use config::{Config, Environment};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "HORARIOS";

const DEFAULT_INGEST_URL: &str = "https://mongo-api-fawn.vercel.app/api/upload-tables";
const DEFAULT_DB_PATH: &str = "data/horarios.sqlite";
const DEFAULT_STUDENT_BATCH: u64 = 50;
const DEFAULT_SCHEDULE_BATCH: u64 = 100;

/// Runtime settings, read from `HORARIOS_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub ingest_url: String,
    pub api_key: Option<String>,
    pub student_batch_size: usize,
    pub schedule_batch_size: usize,
    pub db_path: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::load_from(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
    }

    fn load_from(env: Environment) -> Result<Self> {
        let settings: Settings = Config::builder()
            .set_default("ingest_url", DEFAULT_INGEST_URL)?
            .set_default("student_batch_size", DEFAULT_STUDENT_BATCH)?
            .set_default("schedule_batch_size", DEFAULT_SCHEDULE_BATCH)?
            .set_default("db_path", DEFAULT_DB_PATH)?
            .add_source(env)
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        if settings.student_batch_size == 0 || settings.schedule_batch_size == 0 {
            bail!("Batch sizes must be greater than zero");
        }
        Ok(settings)
    }

    /// The API key, which only an actual upload needs.
    pub fn require_api_key(&self) -> Result<&str> {
        match self.api_key.as_deref() {
            Some(k) if !k.trim().is_empty() => Ok(k),
            _ => bail!("{}_API_KEY environment variable must be set", ENV_PREFIX),
        }
    }
}
