//! Background worker applying admits/updates after responses are sent

use crate::error::{CacheError, Result};
use crate::store::SlotStore;
use crate::types::{ellipsis, DiagramType};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Default bound on queued write-back jobs
pub const DEFAULT_WRITE_BACK_QUEUE: usize = 256;

enum Job {
    /// A hit: bump the stats of the record found in `slot`
    Touch {
        diagram_type: DiagramType,
        expression: String,
        slot: usize,
    },
    /// A miss: store freshly rendered bytes
    Admit {
        diagram_type: DiagramType,
        expression: String,
        data: Vec<u8>,
    },
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Handle to the write-back task. Jobs are applied one at a time, in order.
///
/// The queue is bounded; when it is full new touches and admits are dropped
/// rather than blocking the request path.
pub(crate) struct WriteBack {
    tx: mpsc::Sender<Job>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WriteBack {
    /// Spawn the worker on the current tokio runtime
    pub fn spawn(store: Arc<SlotStore>, queue_limit: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_limit.max(1));
        let worker = tokio::spawn(run(store, rx));
        Self {
            tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn touch(&self, diagram_type: DiagramType, expression: &str, slot: usize) -> Result<()> {
        self.try_submit(Job::Touch {
            diagram_type,
            expression: expression.to_string(),
            slot,
        })
    }

    pub fn admit(&self, diagram_type: DiagramType, expression: &str, data: Vec<u8>) -> Result<()> {
        self.try_submit(Job::Admit {
            diagram_type,
            expression: expression.to_string(),
            data,
        })
    }

    fn try_submit(&self, job: Job) -> Result<()> {
        self.tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => CacheError::WriteBackFull,
            TrySendError::Closed(_) => CacheError::WriteBackClosed,
        })
    }

    /// Wait until every job submitted before this call has been applied
    pub async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Job::Flush(done_tx))
            .await
            .map_err(|_| CacheError::WriteBackClosed)?;
        done_rx.await.map_err(|_| CacheError::WriteBackClosed)
    }

    /// Stop accepting jobs, apply the ones already queued and join the worker
    pub async fn shutdown(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };
        let _ = self.tx.send(Job::Shutdown).await;
        if let Err(e) = worker.await {
            error!(error = %e, "Cache write-back worker panicked");
        }
    }
}

async fn run(store: Arc<SlotStore>, mut rx: mpsc::Receiver<Job>) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Touch {
                diagram_type,
                expression,
                slot,
            } => {
                let result = store.touch(diagram_type, &expression, slot).await;
                report(diagram_type, &expression, result);
            }
            Job::Admit {
                diagram_type,
                expression,
                data,
            } => {
                let result = store.put(diagram_type, &expression, &data, None).await;
                report(diagram_type, &expression, result);
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
            Job::Shutdown => rx.close(),
        }
    }
    debug!("Cache write-back worker stopped");
}

fn report<T: std::fmt::Debug>(diagram_type: DiagramType, expression: &str, result: Result<T>) {
    match result {
        Ok(admission) => debug!(?admission, "Cache write-back applied"),
        Err(e) => warn!(
            diagram_type = %diagram_type,
            expression = %ellipsis(expression, 10),
            error = %e,
            "Cache write-back failed"
        ),
    }
}
