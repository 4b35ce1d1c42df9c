/// Zero-downtime reindex: rebuild into a temporary collection, then swap
use super::job::{ReindexJob, ReindexPhase, ReindexState, ReindexStatus};
use crate::error::{KbError, Result};
use crate::indexer::Indexer;
use crate::knowledge_base::Catalog;
use ahash::AHashMap;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct KbSlot {
    job: Option<Arc<ReindexJob>>,
    /// Uploads and other writes currently running against the knowledge base
    active_mutations: usize,
    /// Searches hold this shared; the delete-then-rename swap holds it exclusively
    swap_gate: Arc<RwLock<()>>,
}

impl KbSlot {
    fn is_locked(&self) -> bool {
        self.job
            .as_ref()
            .map(|job| job.state() == ReindexState::InProgress)
            .unwrap_or(false)
    }
}

/// Outcome of a start request
pub enum StartOutcome {
    Started(Arc<ReindexJob>),
    /// A job is already in progress; its current status
    AlreadyRunning(ReindexStatus),
}

/// Held for the duration of a write to a knowledge base
pub struct MutationGuard<'a> {
    orchestrator: &'a ReindexOrchestrator,
    kb_id: String,
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.end_mutation(&self.kb_id);
    }
}

/// Per-knowledge-base reindex jobs, write locks and swap gates
#[derive(Default)]
pub struct ReindexOrchestrator {
    slots: Mutex<AHashMap<String, KbSlot>>,
    mutations_drained: Condvar,
}

impl ReindexOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> Result<std::sync::MutexGuard<'_, AHashMap<String, KbSlot>>> {
        self.slots
            .lock()
            .map_err(|_| KbError::poisoned("reindex registry"))
    }

    /// Register a write against a knowledge base, or fail with
    /// `KnowledgeBaseBusy` while a reindex holds its lock.
    pub fn begin_mutation(&self, kb_id: &str) -> Result<MutationGuard<'_>> {
        let mut slots = self.slots()?;
        let slot = slots.entry(kb_id.to_string()).or_default();
        if slot.is_locked() {
            return Err(KbError::KnowledgeBaseBusy {
                id: kb_id.to_string(),
            });
        }
        slot.active_mutations += 1;
        Ok(MutationGuard {
            orchestrator: self,
            kb_id: kb_id.to_string(),
        })
    }

    fn end_mutation(&self, kb_id: &str) {
        let mut slots = match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(slot) = slots.get_mut(kb_id) {
            slot.active_mutations = slot.active_mutations.saturating_sub(1);
        }
        self.mutations_drained.notify_all();
    }

    /// Block until no write against the knowledge base is running
    fn wait_for_mutations(&self, kb_id: &str) -> Result<()> {
        let slots = self.slots()?;
        let _slots = self
            .mutations_drained
            .wait_while(slots, |slots| {
                slots
                    .get(kb_id)
                    .map(|slot| slot.active_mutations > 0)
                    .unwrap_or(false)
            })
            .map_err(|_| KbError::poisoned("reindex registry"))?;
        Ok(())
    }

    /// Whether a reindex currently holds the knowledge base lock
    pub fn is_locked(&self, kb_id: &str) -> bool {
        self.slots()
            .map(|slots| slots.get(kb_id).map(KbSlot::is_locked).unwrap_or(false))
            .unwrap_or(false)
    }

    /// Gate shared by searches and the swap step
    pub fn swap_gate(&self, kb_id: &str) -> Result<Arc<RwLock<()>>> {
        let mut slots = self.slots()?;
        Ok(slots
            .entry(kb_id.to_string())
            .or_default()
            .swap_gate
            .clone())
    }

    /// Start a job unless one is already in progress.
    ///
    /// A terminal job record is replaced by the new one.
    pub fn try_start(&self, kb_id: &str, total_documents: usize) -> Result<StartOutcome> {
        let mut slots = self.slots()?;
        let slot = slots.entry(kb_id.to_string()).or_default();

        if let Some(job) = &slot.job {
            if job.state() == ReindexState::InProgress {
                return Ok(StartOutcome::AlreadyRunning(job.snapshot()));
            }
        }

        let job = Arc::new(ReindexJob::start(kb_id, total_documents));
        slot.job = Some(job.clone());
        info!("Reindex started for knowledge base {}", kb_id);
        Ok(StartOutcome::Started(job))
    }

    /// Status of the current or most recent job; `idle` if none ran
    pub fn status(&self, kb_id: &str) -> ReindexStatus {
        self.slots()
            .ok()
            .and_then(|slots| {
                slots
                    .get(kb_id)
                    .and_then(|slot| slot.job.as_ref().map(|job| job.snapshot()))
            })
            .unwrap_or_else(|| ReindexStatus::idle(kb_id))
    }

    /// Request cancellation. False if no job is running or the swap began.
    pub fn cancel(&self, kb_id: &str) -> bool {
        let job = self.slots().ok().and_then(|slots| {
            slots.get(kb_id).and_then(|slot| slot.job.clone())
        });
        match job {
            Some(job) => {
                let accepted = job.request_cancel();
                if accepted {
                    info!("Cancellation requested for reindex of {}", kb_id);
                } else {
                    debug!("Cancellation refused for reindex of {}", kb_id);
                }
                accepted
            }
            None => false,
        }
    }

    /// Drop all state for a deleted knowledge base
    pub fn forget(&self, kb_id: &str) {
        if let Ok(mut slots) = self.slots() {
            let idle = slots
                .get(kb_id)
                .map(|slot| !slot.is_locked() && slot.active_mutations == 0)
                .unwrap_or(false);
            if idle {
                slots.remove(kb_id);
            }
        }
    }
}

/// Everything a reindex run touches
pub struct Reindexer<'a> {
    pub orchestrator: &'a ReindexOrchestrator,
    pub catalog: &'a Catalog,
    pub indexer: &'a Indexer,
}

impl Reindexer<'_> {
    /// Run a started job to a terminal state.
    ///
    /// A panic in a collaborator (extractor, embedding model) ends the job in
    /// [`ReindexState::Error`] so the knowledge base is unlocked again.
    pub fn run(&self, kb_id: &str, job: &ReindexJob) -> ReindexStatus {
        let temp = self.indexer.collections().temp_name(kb_id);

        match panic::catch_unwind(AssertUnwindSafe(|| self.run_inner(kb_id, &temp, job))) {
            Ok(status) => status,
            Err(payload) => {
                let message = format!(
                    "reindex worker panicked: {}",
                    panic_message(payload.as_ref())
                );
                error!("Reindex of {}: {}", kb_id, message);
                if job.snapshot().phase == ReindexPhase::Swapping {
                    // Production may already be gone; the temporary copy is all that is left
                    warn!("Keeping {} after a panic during the swap", temp);
                } else {
                    self.discard_temp(&temp);
                }
                job.finish(ReindexState::Error, Some(message))
            }
        }
    }

    fn run_inner(&self, kb_id: &str, temp: &str, job: &ReindexJob) -> ReindexStatus {
        match self.rebuild(kb_id, temp, job) {
            Ok(RebuildOutcome::Swapped { catalog_error: None }) => {
                let status = job.finish(ReindexState::Completed, None);
                info!(
                    "Reindex of {} completed: {}/{} documents, {} passages",
                    kb_id,
                    status.successful_documents,
                    status.total_documents,
                    status.passages_indexed
                );
                status
            }
            Ok(RebuildOutcome::Swapped {
                catalog_error: Some(e),
            }) => {
                // The temporary collection is already gone
                error!(
                    "Reindex of {} swapped the collection but the catalog update failed: {}",
                    kb_id, e
                );
                job.finish(
                    ReindexState::Error,
                    Some(format!(
                        "collection swapped but catalog update failed: {}; reindex again to repair",
                        e
                    )),
                )
            }
            Ok(RebuildOutcome::Cancelled) => {
                self.discard_temp(temp);
                let status = job.finish(ReindexState::Cancelled, None);
                info!(
                    "Reindex of {} cancelled after {} documents",
                    kb_id, status.processed_documents
                );
                status
            }
            Err(e @ KbError::SwapFailure { .. }) => {
                error!("{}", e);
                job.finish(ReindexState::Error, Some(e.to_string()))
            }
            Err(e) => {
                warn!("Reindex of {} failed: {}", kb_id, e);
                self.discard_temp(temp);
                job.finish(ReindexState::Error, Some(e.to_string()))
            }
        }
    }

    fn discard_temp(&self, temp: &str) {
        if let Err(e) = self.indexer.collections().delete(temp) {
            warn!("Failed to delete temporary collection {}: {}", temp, e);
        }
    }

    fn rebuild(&self, kb_id: &str, temp: &str, job: &ReindexJob) -> Result<RebuildOutcome> {
        self.orchestrator.wait_for_mutations(kb_id)?;

        let kb = self.catalog.get_kb(kb_id)?;
        // Oldest first so passages land in upload order
        let mut documents = self.catalog.list_documents(kb_id)?;
        documents.reverse();
        job.begin_rebuild(documents.len())?;

        let collections = self.indexer.collections();
        if collections.delete(temp)? {
            warn!("Removed stale temporary collection {}", temp);
        }
        collections.create(temp)?;

        let model = kb.config.embedding_model.as_str();
        let params = kb.config.chunking;
        let mut chunk_counts = Vec::with_capacity(documents.len());

        for doc in &documents {
            if job.is_cancel_requested() {
                return Ok(RebuildOutcome::Cancelled);
            }

            job.begin_document(&doc.filename)?;
            let report: &dyn Fn(f32) = &|pct| job.set_file_progress(pct);
            match self
                .indexer
                .index_document(temp, doc, &params, model, Some(report))
            {
                Ok(passages) => {
                    debug!("Reindexed {} ({} passages)", doc.filename, passages);
                    chunk_counts.push((doc.id.clone(), passages));
                    job.finish_document(Some(passages))?;
                }
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    warn!("Skipping {} during reindex: {}", doc.filename, e);
                    if let Err(cleanup) = collections.remove_by_document(temp, &doc.id) {
                        debug!("Cleanup of {} in {} failed: {}", doc.id, temp, cleanup);
                    }
                    chunk_counts.push((doc.id.clone(), 0));
                    job.finish_document(None)?;
                }
            }
        }

        if !job.begin_swap()? {
            return Ok(RebuildOutcome::Cancelled);
        }

        let catalog_error = self
            .swap(kb_id, temp, model, &chunk_counts)?
            .err()
            .map(|e| e.to_string());
        Ok(RebuildOutcome::Swapped { catalog_error })
    }

    /// Delete production and rename the temporary collection into its place
    /// while holding the swap gate exclusively.
    ///
    /// The outer error means the collections were not swapped. The inner one
    /// is a catalog failure after the swap went through.
    fn swap(
        &self,
        kb_id: &str,
        temp: &str,
        model: &str,
        chunk_counts: &[(String, usize)],
    ) -> Result<Result<()>> {
        let collections = self.indexer.collections();
        let production = collections.production_name(kb_id);
        let gate = self.orchestrator.swap_gate(kb_id)?;
        let _exclusive = gate.write().unwrap_or_else(PoisonError::into_inner);

        info!("Swapping {} into {}", temp, production);
        collections.delete(&production)?;

        if let Err(e) = collections.copy_all(temp, &production) {
            // A partial production would make startup recovery drop the rebuild
            if let Err(cleanup) = collections.delete(&production) {
                warn!("Failed to drop partial {}: {}", production, cleanup);
            }
            return Err(KbError::SwapFailure {
                kb_id: kb_id.to_string(),
                temp_collection: temp.to_string(),
                message: e.to_string(),
            });
        }
        self.indexer.lexical().invalidate(kb_id);

        Ok(self
            .catalog
            .set_indexed_model(kb_id, model)
            .and_then(|()| self.catalog.set_chunk_counts(chunk_counts)))
    }
}

enum RebuildOutcome {
    Swapped { catalog_error: Option<String> },
    Cancelled,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Failures that make every remaining document fail too
fn is_fatal(err: &KbError) -> bool {
    matches!(
        err,
        KbError::CollectionMissing { .. }
            | KbError::DimensionMismatch { .. }
            | KbError::ModelResolution { .. }
            | KbError::Database(_)
            | KbError::Pool(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutations_rejected_while_locked() {
        let orchestrator = ReindexOrchestrator::new();
        {
            let _guard = orchestrator.begin_mutation("kb").unwrap();
        }

        let job = match orchestrator.try_start("kb", 2).unwrap() {
            StartOutcome::Started(job) => job,
            StartOutcome::AlreadyRunning(_) => panic!("expected a new job"),
        };
        assert!(orchestrator.is_locked("kb"));
        assert!(matches!(
            orchestrator.begin_mutation("kb"),
            Err(KbError::KnowledgeBaseBusy { .. })
        ));
        // Other knowledge bases are unaffected
        assert!(orchestrator.begin_mutation("other").is_ok());

        job.finish(ReindexState::Completed, None);
        assert!(!orchestrator.is_locked("kb"));
        assert!(orchestrator.begin_mutation("kb").is_ok());
    }

    #[test]
    fn test_duplicate_start_returns_existing_status() {
        let orchestrator = ReindexOrchestrator::new();
        let first = match orchestrator.try_start("kb", 5).unwrap() {
            StartOutcome::Started(job) => job,
            StartOutcome::AlreadyRunning(_) => panic!("expected a new job"),
        };

        match orchestrator.try_start("kb", 5).unwrap() {
            StartOutcome::AlreadyRunning(status) => {
                assert_eq!(status.state, ReindexState::InProgress);
                assert_eq!(status.total_documents, 5);
            }
            StartOutcome::Started(_) => panic!("second job must not start"),
        }

        first.finish(ReindexState::Error, Some("boom".to_string()));
        assert!(matches!(
            orchestrator.try_start("kb", 5).unwrap(),
            StartOutcome::Started(_)
        ));
    }

    #[test]
    fn test_panic_message_from_payload() {
        let payload = std::panic::catch_unwind(|| panic!("plain")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "plain");

        let payload = std::panic::catch_unwind(|| panic!("formatted {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 7");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(42_u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_status_and_cancel_without_job() {
        let orchestrator = ReindexOrchestrator::new();
        assert_eq!(orchestrator.status("kb").state, ReindexState::Idle);
        assert!(!orchestrator.cancel("kb"));
    }

    #[test]
    fn test_wait_for_mutations_returns_after_guard_drop() {
        let orchestrator = Arc::new(ReindexOrchestrator::new());
        let guard_holder = orchestrator.clone();

        let (tx, rx) = std::sync::mpsc::channel();
        let writer = std::thread::spawn(move || {
            let _guard = guard_holder.begin_mutation("kb").unwrap();
            tx.send(()).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(50));
        });

        rx.recv().unwrap();
        orchestrator.wait_for_mutations("kb").unwrap();
        writer.join().unwrap();
    }

    #[test]
    fn test_fatal_classification() {
        assert!(is_fatal(&KbError::CollectionMissing {
            name: "kb_x".to_string()
        }));
        assert!(!is_fatal(&KbError::ExtractionEmpty {
            file: "a.txt".to_string()
        }));
        assert!(!is_fatal(&KbError::UnsupportedFormat {
            file: "a.pdf".to_string(),
            file_type: "pdf".to_string()
        }));
    }
}
