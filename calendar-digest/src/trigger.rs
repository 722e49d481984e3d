//! Hand-off for triggered single-user runs.
//!
//! A caller submits a job and gets a [`JobHandle`] back straight away; one
//! worker task drains the queue and runs the jobs in order.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::pipeline::RunOrchestrator;
use crate::state::UserRunReport;
use crate::types::{DigestError, Result};

struct Job {
    id: Uuid,
    user: String,
    source: Option<String>,
    reply: oneshot::Sender<Result<UserRunReport>>,
}

pub struct JobHandle {
    id: Uuid,
    receiver: oneshot::Receiver<Result<UserRunReport>>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Report of the finished run (rendered rich content and artifact
    /// paths), or the run's error.
    pub async fn wait(self) -> Result<UserRunReport> {
        let id = self.id;
        self.receiver
            .await
            .map_err(|_| DigestError::Worker(format!("job {} was dropped", id)))?
    }
}

pub struct RunQueue {
    sender: mpsc::UnboundedSender<Job>,
    worker: JoinHandle<()>,
}

impl RunQueue {
    pub fn start(orchestrator: RunOrchestrator) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        let worker = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                let Job {
                    id,
                    user,
                    source,
                    reply,
                } = job;
                info!(job = %id, user = %user, "Starting triggered run");

                let run = orchestrator.clone();
                let outcome = tokio::spawn(async move {
                    run.execute_user(&user, source.as_deref()).await
                })
                .await
                .unwrap_or_else(|e| Err(DigestError::Worker(format!("run aborted: {}", e))));

                if let Err(ref e) = outcome {
                    error!(job = %id, "Triggered run failed: {}", e);
                }
                if reply.send(outcome).is_err() {
                    debug!(job = %id, "Job handle dropped before completion");
                }
            }
            debug!("Run queue closed");
        });

        Self { sender, worker }
    }

    pub fn submit(&self, user: impl Into<String>, source: Option<String>) -> Result<JobHandle> {
        let id = Uuid::new_v4();
        let (reply, receiver) = oneshot::channel();
        let job = Job {
            id,
            user: user.into(),
            source,
            reply,
        };
        self.sender
            .send(job)
            .map_err(|_| DigestError::Worker("run queue is closed".to_string()))?;
        Ok(JobHandle { id, receiver })
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(e) = self.worker.await {
            error!("Run queue worker ended abnormally: {}", e);
        }
    }
}
