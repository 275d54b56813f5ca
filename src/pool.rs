use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::orchestrator::CrawlOrchestrator;

/// One unit of crawl work. `task_id` is set when the run belongs to a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlJob {
    pub task_id: Option<String>,
    pub source: String,
    pub keyword: String,
    pub city: String,
}

/// Fire-and-forget crawl execution with at most `workers` crawls (and so at
/// most `workers` browsers) alive at once. Submitted jobs always run to the
/// end; there is no way to cancel one.
pub struct CrawlPool {
    runtime: Runtime,
    orchestrator: Arc<CrawlOrchestrator>,
    permits: Arc<Semaphore>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl CrawlPool {
    pub fn new(orchestrator: Arc<CrawlOrchestrator>, workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers)
            .thread_name("crawl-worker")
            .enable_all()
            .build()
            .context("Failed to start crawl worker pool")?;

        Ok(Self {
            runtime,
            orchestrator,
            permits: Arc::new(Semaphore::new(workers)),
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Queues `job` and returns immediately.
    pub fn submit(&self, job: CrawlJob) {
        let orchestrator = self.orchestrator.clone();
        let permits = self.permits.clone();

        let handle = self.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            debug!(source = %job.source, keyword = %job.keyword, "Crawl worker picked up job");

            let task_id = job.task_id.clone();
            let worker = orchestrator.clone();
            let run = tokio::task::spawn_blocking(move || {
                worker.run_crawl(job.task_id.as_deref(), &job.source, &job.keyword, &job.city)
            });
            let Err(e) = run.await else {
                return;
            };
            error!(task_id = task_id.as_deref().unwrap_or("-"), error = %e, "Crawl worker aborted");

            if let Some(id) = task_id {
                let reason = format!("crawl worker aborted: {}", e);
                let record = tokio::task::spawn_blocking(move || orchestrator.record_aborted(&id, &reason));
                if let Err(e) = record.await {
                    error!(error = %e, "Could not record aborted crawl");
                }
            }
        });

        match self.pending.lock() {
            Ok(mut pending) => {
                pending.retain(|h| !h.is_finished());
                pending.push(handle);
            }
            Err(_) => error!("Crawl pool bookkeeping lock poisoned"),
        }
    }

    /// Blocks until every job submitted so far has finished. Must not be
    /// called from inside an async context.
    pub fn wait_idle(&self) {
        loop {
            let handles = match self.pending.lock() {
                Ok(mut pending) => std::mem::take(&mut *pending),
                Err(_) => return,
            };
            if handles.is_empty() {
                return;
            }
            self.runtime.block_on(async {
                for handle in handles {
                    if let Err(e) = handle.await {
                        error!(error = %e, "Crawl job panicked");
                    }
                }
            });
        }
    }
}
