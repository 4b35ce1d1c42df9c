/// Reindex job status and cancellation state
use crate::error::{KbError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReindexState {
    Idle,
    InProgress,
    Completed,
    Cancelled,
    Error,
}

impl ReindexState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReindexState::Completed | ReindexState::Cancelled | ReindexState::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReindexState::Idle => "idle",
            ReindexState::InProgress => "in_progress",
            ReindexState::Completed => "completed",
            ReindexState::Cancelled => "cancelled",
            ReindexState::Error => "error",
        }
    }
}

/// Where an in-progress job is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReindexPhase {
    /// Waiting for in-flight uploads to finish
    Preparing,
    /// Building the temporary collection
    Rebuilding,
    /// Replacing the production collection; no longer cancellable
    Swapping,
    Finished,
}

/// Snapshot of a reindex job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexStatus {
    pub kb_id: String,
    pub state: ReindexState,
    pub phase: ReindexPhase,
    pub total_documents: usize,
    pub processed_documents: usize,
    pub successful_documents: usize,
    pub failed_documents: usize,
    pub current_file: Option<String>,
    /// Progress within the current file, 0 to 100
    pub current_file_progress: f32,
    /// `round(100 × processed / total, 1)`
    pub percentage: f32,
    pub passages_indexed: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ReindexStatus {
    pub fn idle(kb_id: &str) -> Self {
        Self {
            kb_id: kb_id.to_string(),
            state: ReindexState::Idle,
            phase: ReindexPhase::Finished,
            total_documents: 0,
            processed_documents: 0,
            successful_documents: 0,
            failed_documents: 0,
            current_file: None,
            current_file_progress: 0.0,
            percentage: 0.0,
            passages_indexed: 0,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    fn refresh_percentage(&mut self) {
        self.percentage = if self.total_documents == 0 {
            if self.state == ReindexState::Completed {
                100.0
            } else {
                0.0
            }
        } else {
            let raw = 100.0 * self.processed_documents as f32 / self.total_documents as f32;
            (raw * 10.0).round() / 10.0
        };
    }
}

/// One reindex run. Shared between the worker and status/cancel callers.
pub struct ReindexJob {
    status: Mutex<ReindexStatus>,
    cancel: AtomicBool,
}

impl ReindexJob {
    pub(crate) fn start(kb_id: &str, total_documents: usize) -> Self {
        let mut status = ReindexStatus::idle(kb_id);
        status.state = ReindexState::InProgress;
        status.phase = ReindexPhase::Preparing;
        status.total_documents = total_documents;
        status.started_at = Some(Utc::now());
        Self {
            status: Mutex::new(status),
            cancel: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> ReindexStatus {
        match self.status.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn state(&self) -> ReindexState {
        self.snapshot().state
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn update<T>(&self, f: impl FnOnce(&mut ReindexStatus) -> T) -> Result<T> {
        let mut status = self
            .status
            .lock()
            .map_err(|_| KbError::poisoned("reindex status"))?;
        let out = f(&mut status);
        status.refresh_percentage();
        Ok(out)
    }

    /// Ask the job to stop at the next document boundary.
    ///
    /// Returns false once the job is terminal or has begun swapping.
    pub fn request_cancel(&self) -> bool {
        self.update(|status| {
            if status.state != ReindexState::InProgress || status.phase == ReindexPhase::Swapping {
                return false;
            }
            self.cancel.store(true, Ordering::SeqCst);
            true
        })
        .unwrap_or(false)
    }

    pub(crate) fn begin_rebuild(&self, total_documents: usize) -> Result<()> {
        self.update(|status| {
            status.phase = ReindexPhase::Rebuilding;
            status.total_documents = total_documents;
        })
    }

    pub(crate) fn begin_document(&self, filename: &str) -> Result<()> {
        self.update(|status| {
            status.current_file = Some(filename.to_string());
            status.current_file_progress = 0.0;
        })
    }

    pub(crate) fn set_file_progress(&self, pct: f32) {
        let _ = self.update(|status| status.current_file_progress = pct.clamp(0.0, 100.0));
    }

    pub(crate) fn finish_document(&self, passages: Option<usize>) -> Result<()> {
        self.update(|status| {
            status.processed_documents += 1;
            match passages {
                Some(n) => {
                    status.successful_documents += 1;
                    status.passages_indexed += n;
                }
                None => status.failed_documents += 1,
            }
            status.current_file_progress = 0.0;
        })
    }

    /// Enter the swap phase unless a cancel arrived first.
    ///
    /// Checked under the status lock, so a cancel either lands before this
    /// returns true or is refused.
    pub(crate) fn begin_swap(&self) -> Result<bool> {
        self.update(|status| {
            if self.cancel.load(Ordering::SeqCst) {
                return false;
            }
            status.phase = ReindexPhase::Swapping;
            status.current_file = None;
            true
        })
    }

    pub(crate) fn finish(&self, state: ReindexState, error: Option<String>) -> ReindexStatus {
        let update = self.update(|status| {
            status.state = state;
            status.phase = ReindexPhase::Finished;
            status.current_file = None;
            status.current_file_progress = 0.0;
            status.completed_at = Some(Utc::now());
            status.error = error.clone();
        });
        if update.is_err() {
            // Poisoned: force the terminal state so the lock is released
            if let Err(poisoned) = self.status.lock() {
                let mut status = poisoned.into_inner();
                status.state = state;
                status.phase = ReindexPhase::Finished;
                status.error = error;
            }
        }
        self.snapshot()
    }
}
