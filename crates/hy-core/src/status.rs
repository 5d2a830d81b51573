use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;
use crate::files::ModelArtifact;

pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationStatus {
    Processing,
    /// Part of the status vocabulary, never entered by this pipeline.
    PreviewReady,
    Complete,
    Failed,
}

impl GenerationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Processing => "PROCESSING",
            Self::PreviewReady => "PREVIEW_READY",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        }
    }
}

/// Status record of the active or most recently finished run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GenerationState {
    pub run_id: Option<Uuid>,
    pub status: GenerationStatus,
    pub progress: u8,
    pub message: String,
    pub artifact: Option<ModelArtifact>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl GenerationState {
    fn idle() -> Self {
        Self {
            run_id: None,
            status: GenerationStatus::Complete,
            progress: 0,
            message: "Ready".into(),
            artifact: None,
            started_at: None,
            updated_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Status record shared between the running pipeline and readers.
///
/// Writers replace the record under the channel's lock, so every
/// [`snapshot`](Self::snapshot) is a whole, consistent copy.
#[derive(Debug)]
pub struct StateMachine {
    tx: watch::Sender<GenerationState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GenerationState::idle());
        Self { tx }
    }

    pub fn snapshot(&self) -> GenerationState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GenerationState> {
        self.tx.subscribe()
    }

    pub fn reset(&self, run_id: Uuid) {
        let now = Utc::now();
        self.tx.send_replace(GenerationState {
            run_id: Some(run_id),
            status: GenerationStatus::Processing,
            progress: 0,
            message: "Starting generation".into(),
            artifact: None,
            started_at: Some(now),
            updated_at: now,
            finished_at: None,
        });
    }

    /// Records stage progress. Ignored unless a run is processing; progress
    /// never moves backwards within a run.
    pub fn update(&self, progress: u8, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_if_modified(|state| {
            if state.status != GenerationStatus::Processing {
                tracing::warn!(status = state.status.as_str(), %message, "Ignoring progress update on finished run");
                return false;
            }
            state.progress = state.progress.max(progress.min(100));
            state.message = message;
            state.updated_at = Utc::now();
            true
        });
    }

    /// Changes the message only, for stages that report no progress of their own.
    pub fn set_message(&self, message: impl Into<String>) {
        let progress = self.tx.borrow().progress;
        self.update(progress, message);
    }

    pub fn complete(&self, artifact: ModelArtifact) {
        self.finish(GenerationStatus::Complete, 100, "Generation complete".into(), Some(artifact));
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.finish(GenerationStatus::Failed, 0, message.into(), None);
    }

    pub fn cancelled(&self) {
        self.fail(CANCELLED_MESSAGE);
    }

    fn finish(&self, status: GenerationStatus, progress: u8, message: String, artifact: Option<ModelArtifact>) {
        self.tx.send_if_modified(|state| {
            if state.status != GenerationStatus::Processing {
                tracing::warn!(from = state.status.as_str(), to = status.as_str(), "Ignoring transition out of a finished run");
                return false;
            }
            let now = Utc::now();
            state.status = status;
            state.progress = progress;
            state.message = message;
            state.artifact = artifact;
            state.updated_at = now;
            state.finished_at = Some(now);
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use super::*;
    use crate::params::OutputFormat;

    fn artifact() -> ModelArtifact {
        ModelArtifact {
            path: PathBuf::from("outputs/model.glb"),
            format: OutputFormat::Glb,
            size_bytes: 42,
        }
    }

    #[test]
    fn test_reset_enters_processing() {
        let sm = StateMachine::new();
        let run_id = Uuid::new_v4();
        sm.reset(run_id);

        let state = sm.snapshot();
        assert_eq!(state.status, GenerationStatus::Processing);
        assert_eq!(state.progress, 0);
        assert_eq!(state.run_id, Some(run_id));
        assert!(state.artifact.is_none());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let sm = StateMachine::new();
        sm.reset(Uuid::new_v4());
        sm.update(50, "Extracting mesh...");
        sm.update(10, "late update");

        let state = sm.snapshot();
        assert_eq!(state.progress, 50);
        assert_eq!(state.message, "late update");
    }

    #[test]
    fn test_complete_forces_progress() {
        let sm = StateMachine::new();
        sm.reset(Uuid::new_v4());
        sm.update(70, "Post-processing mesh...");
        sm.complete(artifact());

        let state = sm.snapshot();
        assert_eq!(state.status, GenerationStatus::Complete);
        assert_eq!(state.progress, 100);
        assert_eq!(state.artifact, Some(artifact()));
        assert!(state.finished_at.is_some());
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let sm = StateMachine::new();
        sm.reset(Uuid::new_v4());
        sm.update(50, "Extracting mesh...");
        sm.cancelled();

        sm.update(90, "Exporting model...");
        sm.complete(artifact());

        let state = sm.snapshot();
        assert_eq!(state.status, GenerationStatus::Failed);
        assert_eq!(state.progress, 0);
        assert_eq!(state.message, CANCELLED_MESSAGE);
        assert!(state.artifact.is_none());
    }

    #[test]
    fn test_reset_supersedes_finished_run() {
        let sm = StateMachine::new();
        sm.reset(Uuid::new_v4());
        sm.complete(artifact());

        sm.reset(Uuid::new_v4());
        let state = sm.snapshot();
        assert_eq!(state.status, GenerationStatus::Processing);
        assert!(state.artifact.is_none());
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        let json = serde_json::to_string(&GenerationStatus::PreviewReady).unwrap();
        assert_eq!(json, "\"PREVIEW_READY\"");
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let sm = StateMachine::new();
        let mut rx = sm.subscribe();
        sm.reset(Uuid::new_v4());

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status, GenerationStatus::Processing);
    }
}
