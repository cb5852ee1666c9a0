use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::task::AbortHandle;
use tracing::debug;
use uuid::Uuid;

use crate::models::job::{Job, JobPatch, PatchError};

struct Entry {
    seq: u64,
    job: Job,
}

/// Outcome of [`Ledger::settle`].
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    /// The tracked job was updated.
    Applied(Job),
    /// The job is no longer tracked; the patch was applied to the caller's copy only.
    Untracked(Job),
    /// The job had already reached a terminal state; this is its current copy.
    Discarded(Job),
}

impl Settled {
    pub fn job(&self) -> &Job {
        match self {
            Self::Applied(job) | Self::Untracked(job) | Self::Discarded(job) => job,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            Self::Applied(job) | Self::Untracked(job) | Self::Discarded(job) => job,
        }
    }

    /// Whether this outcome is a new transition that should be recorded.
    pub fn is_transition(&self) -> bool {
        !matches!(self, Self::Discarded(_))
    }
}

/// The visible set of tracked jobs.
///
/// All writes go through [`Ledger::update`], which merges a patch field by field
/// and refuses to touch terminal jobs. Removing a job aborts its local poll task
/// but cannot stop work already running on the backend.
#[derive(Default)]
pub struct Ledger {
    jobs: DashMap<Uuid, Entry>,
    polls: DashMap<Uuid, AbortHandle>,
    next_seq: AtomicU64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a job. Replaces nothing: an id already present is kept.
    pub fn add(&self, job: Job) -> Uuid {
        let id = job.id;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.jobs.entry(id).or_insert(Entry { seq, job });
        id
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.get(&id).map(|entry| entry.job.clone())
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.jobs.contains_key(&id)
    }

    /// Merge a patch into a tracked job and return the updated copy.
    pub fn update(&self, id: Uuid, patch: JobPatch) -> Result<Job, LedgerError> {
        let job = {
            let mut entry = self.jobs.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
            entry.job.apply(patch).map_err(|e| LedgerError::Rejected(id, e))?;
            entry.job.clone()
        };

        if job.status.is_terminal() {
            self.polls.remove(&id);
        }
        Ok(job)
    }

    /// Apply a patch, falling back to `snapshot` when the job was removed.
    ///
    /// Never re-adds a removed job.
    pub fn settle(&self, snapshot: &Job, patch: JobPatch) -> Settled {
        match self.update(snapshot.id, patch.clone()) {
            Ok(job) => Settled::Applied(job),
            Err(LedgerError::NotFound(_)) => {
                let mut job = snapshot.clone();
                match job.apply(patch) {
                    Ok(()) => Settled::Untracked(job),
                    Err(_) => Settled::Discarded(snapshot.clone()),
                }
            }
            Err(LedgerError::Rejected(id, reason)) => {
                debug!(job_id = %id, reason = %reason, "Discarded late job update");
                Settled::Discarded(self.get(id).unwrap_or_else(|| snapshot.clone()))
            }
        }
    }

    /// Stop tracking a job, aborting its poll task if one is registered.
    pub fn remove(&self, id: Uuid) -> Option<Job> {
        if let Some((_, poll)) = self.polls.remove(&id) {
            poll.abort();
            debug!(job_id = %id, "Aborted poll task for removed job");
        }
        self.jobs.remove(&id).map(|(_, entry)| entry.job)
    }

    /// Tracked jobs, most recently added first.
    pub fn list(&self) -> Vec<Job> {
        let mut entries: Vec<(u64, Job)> = self
            .jobs
            .iter()
            .map(|entry| (entry.seq, entry.job.clone()))
            .collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        entries.into_iter().map(|(_, job)| job).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Register the poll task resolving a job so removal can cancel it.
    ///
    /// A task for a job that is gone is aborted at once; one for a job that
    /// already finished is not kept.
    pub fn attach_poll(&self, id: Uuid, poll: AbortHandle) {
        match self.jobs.get(&id) {
            None => poll.abort(),
            Some(entry) if entry.job.status.is_terminal() => {}
            Some(_) => {
                self.polls.insert(id, poll);
            }
        }
    }

    pub fn active_polls(&self) -> usize {
        self.polls.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("job {0} is not tracked")]
    NotFound(Uuid),

    #[error("update to job {0} rejected: {1}")]
    Rejected(Uuid, PatchError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::failure::FailureRecord;
    use crate::models::job::{Artifact, JobStatus, MediaType};

    fn job(media_type: MediaType) -> Job {
        Job::new(Uuid::new_v4(), media_type, "model")
    }

    #[test]
    fn test_list_is_most_recent_first() {
        let ledger = Ledger::new();
        let first = ledger.add(job(MediaType::Image));
        let second = ledger.add(job(MediaType::Video));
        let third = ledger.add(job(MediaType::Text));

        let ids: Vec<Uuid> = ledger.list().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![third, second, first]);
    }

    #[test]
    fn test_update_merges_fields() {
        let ledger = Ledger::new();
        let id = ledger.add(job(MediaType::Video));

        let updated = ledger.update(id, JobPatch::polling("handle-1")).unwrap();
        assert_eq!(updated.status, JobStatus::Processing);
        assert_eq!(updated.backend_handle.as_deref(), Some("handle-1"));
        assert_eq!(ledger.get(id).unwrap(), updated);
    }

    #[test]
    fn test_terminal_state_is_final() {
        let ledger = Ledger::new();
        let id = ledger.add(job(MediaType::Video));
        ledger
            .update(id, JobPatch::failed(FailureRecord::timeout(30)))
            .unwrap();

        let artifact = Artifact::inline(MediaType::Video, vec![0], "v.mp4", "video/mp4");
        let err = ledger.update(id, JobPatch::completed(artifact)).unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(_, PatchError::Terminal(JobStatus::Failed))));
        assert_eq!(ledger.get(id).unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn test_update_after_remove_is_not_found() {
        let ledger = Ledger::new();
        let id = ledger.add(job(MediaType::Video));
        assert!(ledger.remove(id).is_some());

        let err = ledger
            .update(id, JobPatch::failed(FailureRecord::timeout(30)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert!(ledger.get(id).is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_settle_on_removed_job_does_not_resurrect() {
        let ledger = Ledger::new();
        let snapshot = job(MediaType::Image);
        let id = ledger.add(snapshot.clone());
        ledger.remove(id);

        let settled = ledger.settle(&snapshot, JobPatch::failed(FailureRecord::unknown("boom")));
        assert!(matches!(settled, Settled::Untracked(_)));
        assert_eq!(settled.job().status, JobStatus::Failed);
        assert!(!ledger.contains(id));
    }

    #[test]
    fn test_settle_discards_after_terminal() {
        let ledger = Ledger::new();
        let snapshot = job(MediaType::Video);
        let id = ledger.add(snapshot.clone());
        ledger
            .update(id, JobPatch::failed(FailureRecord::timeout(30)))
            .unwrap();

        let artifact = Artifact::inline(MediaType::Video, vec![0], "v.mp4", "video/mp4");
        let settled = ledger.settle(&snapshot, JobPatch::completed(artifact));
        assert!(!settled.is_transition());
        assert_eq!(settled.job().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_remove_aborts_poll_task() {
        let ledger = Ledger::new();
        let id = ledger.add(job(MediaType::Video));
        let task = tokio::spawn(std::future::pending::<()>());
        ledger.attach_poll(id, task.abort_handle());
        assert_eq!(ledger.active_polls(), 1);

        ledger.remove(id);
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(ledger.active_polls(), 0);
    }

    #[tokio::test]
    async fn test_attach_poll_for_missing_job_aborts() {
        let ledger = Ledger::new();
        let task = tokio::spawn(std::future::pending::<()>());
        ledger.attach_poll(Uuid::new_v4(), task.abort_handle());
        assert!(task.await.unwrap_err().is_cancelled());
    }
}
