use std::io;
use std::path::{Path, PathBuf};
use serde::Serialize;
use uuid::Uuid;
use crate::params::OutputFormat;

const RUNS_DIR: &str = "runs";

/// Exported model kept on disk after a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelArtifact {
    pub path: PathBuf,
    pub format: OutputFormat,
    pub size_bytes: u64,
}

impl ModelArtifact {
    pub async fn read(&self) -> io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

/// Owns the on-disk area for intermediate and final run artifacts.
#[derive(Debug, Clone)]
pub struct FileManager {
    root: PathBuf,
}

impl FileManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the directory for a new run and drops every older one. The
    /// previous run's artifact is unreachable once the status is reset.
    pub async fn prepare(&self, run_id: Uuid) -> io::Result<RunFiles> {
        let runs = self.root.join(RUNS_DIR);
        tokio::fs::create_dir_all(&runs).await?;

        let mut entries = tokio::fs::read_dir(&runs).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Err(e) = tokio::fs::remove_dir_all(entry.path()).await {
                tracing::warn!(path = %entry.path().display(), error = %e, "Failed to remove stale run directory");
            }
        }

        let dir = runs.join(run_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        Ok(RunFiles { dir, model: None })
    }
}

/// Files belonging to one run.
#[derive(Debug)]
pub struct RunFiles {
    dir: PathBuf,
    model: Option<PathBuf>,
}

impl RunFiles {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn temp_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub async fn write_temp(&self, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.temp_path(name);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    pub async fn save_model(&mut self, bytes: &[u8], format: OutputFormat) -> io::Result<ModelArtifact> {
        let path = self.temp_path(&format!("model.{}", format.extension()));
        tokio::fs::write(&path, bytes).await?;
        self.model = Some(path.clone());

        Ok(ModelArtifact {
            path,
            format,
            size_bytes: bytes.len() as u64,
        })
    }

    /// Removes intermediate files. The exported model survives only when
    /// `keep_model` is set.
    pub async fn cleanup(&self, keep_model: bool) -> io::Result<()> {
        if !keep_model {
            return match tokio::fs::remove_dir_all(&self.dir).await {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            };
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if self.model.as_deref() == Some(path.as_path()) {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cleanup_keeps_model_on_success() {
        let root = tempfile::tempdir().unwrap();
        let files = FileManager::new(root.path());
        let mut run = files.prepare(Uuid::new_v4()).await.unwrap();

        let input = run.write_temp("input_front.png", b"png").await.unwrap();
        let artifact = run.save_model(b"glTF", OutputFormat::Glb).await.unwrap();
        run.cleanup(true).await.unwrap();

        assert!(!input.exists());
        assert_eq!(artifact.read().await.unwrap(), b"glTF");
        assert_eq!(artifact.size_bytes, 4);
    }

    #[tokio::test]
    async fn test_cleanup_removes_everything_on_failure() {
        let root = tempfile::tempdir().unwrap();
        let files = FileManager::new(root.path());
        let mut run = files.prepare(Uuid::new_v4()).await.unwrap();

        let artifact = run.save_model(b"o mesh", OutputFormat::Obj).await.unwrap();
        run.cleanup(false).await.unwrap();

        assert!(!artifact.path.exists());
        assert!(!run.dir().exists());
        // Idempotent.
        run.cleanup(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_prepare_drops_previous_runs() {
        let root = tempfile::tempdir().unwrap();
        let files = FileManager::new(root.path());

        let mut first = files.prepare(Uuid::new_v4()).await.unwrap();
        let old = first.save_model(b"glTF", OutputFormat::Glb).await.unwrap();
        first.cleanup(true).await.unwrap();

        let second = files.prepare(Uuid::new_v4()).await.unwrap();
        assert!(!old.path.exists());
        assert!(second.dir().exists());
    }
}
