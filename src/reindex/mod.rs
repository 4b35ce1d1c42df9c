//! Background reindexing with zero-downtime collection swap
//!
//! A job rebuilds every document of a knowledge base into a temporary
//! collection while searches keep hitting production. Once the rebuild
//! finishes, production is deleted and the temporary collection is renamed
//! into its place under an exclusive swap gate. Uploads are rejected with
//! `KnowledgeBaseBusy` while a job is in progress.

mod job;
mod orchestrator;

pub use job::{ReindexJob, ReindexPhase, ReindexState, ReindexStatus};
pub use orchestrator::{MutationGuard, ReindexOrchestrator, Reindexer, StartOutcome};

/// Result of a start request
pub struct ReindexHandle {
    /// Status at the time of the request
    pub status: ReindexStatus,
    /// Worker task; `None` when a job was already running
    pub task: Option<tokio::task::JoinHandle<ReindexStatus>>,
}

impl ReindexHandle {
    pub fn started(&self) -> bool {
        self.task.is_some()
    }

    /// Wait for the worker to finish. Returns the request-time status when
    /// no worker was spawned.
    pub async fn wait(self) -> crate::error::Result<ReindexStatus> {
        match self.task {
            Some(task) => task
                .await
                .map_err(|e| crate::error::KbError::Other(anyhow::anyhow!("reindex task failed: {}", e))),
            None => Ok(self.status),
        }
    }
}
