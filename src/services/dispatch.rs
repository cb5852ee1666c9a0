use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::models::job::{Job, JobStatus, MediaType};
use crate::services::adapter::PreparedInvocation;
use crate::services::async_path::AsyncPath;
use crate::services::gateway::ArtifactTarget;
use crate::services::poller::StatusPoller;
use crate::services::sync_path::SyncPath;

/// A job handed to one of the execution paths.
#[derive(Debug)]
pub struct Dispatched {
    /// The job as it stood when the path returned: terminal for sync media,
    /// Processing (or Failed) for video.
    pub job: Job,
    /// Poll task still resolving the job, if any.
    pub poll: Option<JoinHandle<Option<Job>>>,
}

impl Dispatched {
    pub fn settled(job: Job) -> Self {
        Self { job, poll: None }
    }

    /// Wait for the poll task, if any, and return the job's final copy.
    pub async fn finish(self) -> Job {
        match self.poll {
            Some(poll) => match poll.await {
                Ok(Some(job)) => job,
                _ => self.job,
            },
            None => self.job,
        }
    }
}

/// Runs jobs directly against the backend, bypassing the workflow engine.
pub struct DirectDispatcher {
    sync_path: SyncPath,
    async_path: AsyncPath,
    poller: Arc<StatusPoller>,
}

impl DirectDispatcher {
    pub fn new(sync_path: SyncPath, async_path: AsyncPath, poller: Arc<StatusPoller>) -> Self {
        Self {
            sync_path,
            async_path,
            poller,
        }
    }

    pub async fn dispatch(
        &self,
        job: &Job,
        invocation: &PreparedInvocation,
        target: &ArtifactTarget,
    ) -> Dispatched {
        match invocation.media_type {
            MediaType::Image | MediaType::Text => Dispatched::settled(
                self.sync_path.execute(job, invocation, target).await,
            ),
            MediaType::Video => {
                let started = self.async_path.start(job, invocation).await;
                let poll = (started.status == JobStatus::Processing
                    && started.backend_handle.is_some())
                .then(|| {
                    self.poller
                        .spawn(started.clone(), target.clone())
                });
                Dispatched { job: started, poll }
            }
        }
    }
}
