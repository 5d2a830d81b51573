use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use anyhow::Context;
use hy_core::OrchestratorConfig;

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub worker_url: String,
    pub worker_timeout: Duration,
    pub output_dir: PathBuf,
    pub low_vram: bool,
    pub max_upload_bytes: usize,
}

fn var_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

impl BackendConfig {
    pub fn load() -> anyhow::Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(e).context("failed to read .env");
            }
        }

        let worker_timeout_secs: u64 = var_or("WORKER_TIMEOUT_SECS", 600)?;
        let max_upload_mb: usize = var_or("MAX_UPLOAD_MB", 32)?;

        Ok(Self {
            host: var_or("HOST", "0.0.0.0".to_string())?,
            port: var_or("PORT", 8081)?,
            worker_url: var_or("MODEL_WORKER_URL", "http://127.0.0.1:5000".to_string())?,
            worker_timeout: Duration::from_secs(worker_timeout_secs),
            output_dir: var_or("OUTPUT_DIR", PathBuf::from("outputs"))?,
            low_vram: var_or("LOW_VRAM_MODE", true)?,
            max_upload_bytes: max_upload_mb * 1024 * 1024,
        })
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            output_dir: self.output_dir.clone(),
            low_vram: self.low_vram,
            ..Default::default()
        }
    }
}
