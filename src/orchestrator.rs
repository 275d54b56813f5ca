use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::db::{JobStore, TaskStore};
use crate::error::CrawlError;
use crate::models::{ExecutionState, Frequency, TaskStatus, format_timestamp, now_local};
use crate::sites::CrawlerRegistry;

/// How one `run_crawl` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// No crawler is registered for the source; nothing ran.
    Skipped,
    Completed { saved: usize },
    Failed { reason: String },
}

pub struct CrawlOrchestrator {
    registry: Arc<CrawlerRegistry>,
    jobs: Arc<dyn JobStore>,
    tasks: Arc<dyn TaskStore>,
}

impl CrawlOrchestrator {
    pub fn new(registry: Arc<CrawlerRegistry>, jobs: Arc<dyn JobStore>, tasks: Arc<dyn TaskStore>) -> Self {
        Self { registry, jobs, tasks }
    }

    pub fn registry(&self) -> &CrawlerRegistry {
        &self.registry
    }

    /// Crawls `source` for `keyword` in `city`, stores what comes back and,
    /// when `task_id` is given, records the execution on that task.
    ///
    /// Never returns an error: every failure ends up in the outcome and in the
    /// task row.
    pub fn run_crawl(&self, task_id: Option<&str>, source: &str, keyword: &str, city: &str) -> CrawlOutcome {
        let Some(crawler) = self.registry.get(source) else {
            warn!(source, "No crawler registered for source, skipping");
            return CrawlOutcome::Skipped;
        };

        info!(source = crawler.name(), keyword, city, task_id = task_id.unwrap_or("-"), "Starting crawl");
        let outcome = match crawler.crawl(keyword, city) {
            Ok(postings) if postings.is_empty() => {
                info!(source = crawler.name(), "Crawl returned no postings");
                CrawlOutcome::Completed { saved: 0 }
            }
            Ok(postings) => match self.jobs.save_jobs(&postings) {
                Ok(saved) => {
                    info!(source = crawler.name(), count = saved, "Saved postings");
                    CrawlOutcome::Completed { saved }
                }
                Err(e) => {
                    let err = CrawlError::persistence(format!("{:#}", e));
                    error!(source = crawler.name(), error = %err, "Could not save postings");
                    CrawlOutcome::Failed { reason: err.to_string() }
                }
            },
            Err(e) => {
                error!(source = crawler.name(), error = %e, "Crawl failed");
                CrawlOutcome::Failed { reason: e.to_string() }
            }
        };

        if let Some(id) = task_id {
            self.record_execution(id, &outcome, now_local());
        }
        outcome
    }

    /// Marks a task Failed after its run died without producing an outcome.
    pub fn record_aborted(&self, task_id: &str, reason: &str) {
        let outcome = CrawlOutcome::Failed { reason: reason.to_string() };
        self.record_execution(task_id, &outcome, now_local());
    }

    fn record_execution(&self, task_id: &str, outcome: &CrawlOutcome, now: NaiveDateTime) {
        let task = match self.tasks.find_task(task_id) {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!(task_id, "Task vanished before its run finished");
                return;
            }
            Err(e) => {
                error!(task_id, error = %format!("{:#}", e), "Could not load task");
                return;
            }
        };

        let frequency = Frequency::parse(&task.frequency).unwrap_or_else(|| {
            warn!(task_id, frequency = %task.frequency, "Unrecognized frequency, scheduling one day out");
            Frequency::DEFAULT
        });

        let (status, result_count) = match outcome {
            CrawlOutcome::Completed { saved } => (TaskStatus::Completed, *saved as i64),
            _ => (TaskStatus::Failed, 0),
        };
        let next_run = now.checked_add_signed(frequency.interval()).unwrap_or_else(|| {
            warn!(task_id, frequency = %task.frequency, "Frequency interval out of range, scheduling one day out");
            now + Frequency::DEFAULT.interval()
        });
        let state = ExecutionState {
            status,
            last_run: format_timestamp(now),
            next_run: format_timestamp(next_run),
            result_count,
        };

        match self.tasks.update_execution_state(task_id, &state) {
            Ok(true) => info!(task_id, status = %state.status, next_run = %state.next_run, "Task updated"),
            Ok(false) => warn!(task_id, "Task vanished before its run finished"),
            Err(e) => error!(task_id, error = %format!("{:#}", e), "Could not update task"),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Store doubles for exercising the orchestrator without SQLite.

    use super::*;
    use crate::models::{CrawlTask, JobPosting, NewJobPosting};
    use anyhow::{anyhow, Result};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryJobs {
        pub saved: Mutex<Vec<NewJobPosting>>,
        pub fail: bool,
    }

    impl MemoryJobs {
        pub fn saved(&self) -> usize {
            self.saved.lock().unwrap().len()
        }
    }

    impl JobStore for MemoryJobs {
        fn save_jobs(&self, jobs: &[NewJobPosting]) -> Result<usize> {
            if self.fail {
                return Err(anyhow!("disk full"));
            }
            self.saved.lock().unwrap().extend_from_slice(jobs);
            Ok(jobs.len())
        }

        fn search_jobs(&self, _: Option<&str>, _: Option<&str>, _: usize, _: usize) -> Result<Vec<JobPosting>> {
            Ok(Vec::new())
        }

        fn count_jobs(&self, _: Option<&str>, _: Option<&str>) -> Result<usize> {
            Ok(self.saved())
        }
    }

    #[derive(Default)]
    pub struct MemoryTasks {
        pub tasks: Mutex<HashMap<String, CrawlTask>>,
        pub updates: Mutex<Vec<(String, ExecutionState)>>,
    }

    impl MemoryTasks {
        pub fn with(tasks: &[CrawlTask]) -> Self {
            let store = Self::default();
            for task in tasks {
                store.tasks.lock().unwrap().insert(task.id.clone(), task.clone());
            }
            store
        }

        pub fn get(&self, id: &str) -> Option<CrawlTask> {
            self.tasks.lock().unwrap().get(id).cloned()
        }

        pub fn update_count(&self) -> usize {
            self.updates.lock().unwrap().len()
        }
    }

    impl TaskStore for MemoryTasks {
        fn create_task(&self, task: &CrawlTask) -> Result<()> {
            self.tasks.lock().unwrap().insert(task.id.clone(), task.clone());
            Ok(())
        }

        fn find_task(&self, id: &str) -> Result<Option<CrawlTask>> {
            Ok(self.get(id))
        }

        fn list_tasks(&self) -> Result<Vec<CrawlTask>> {
            Ok(self.tasks.lock().unwrap().values().cloned().collect())
        }

        fn delete_task(&self, id: &str) -> Result<bool> {
            Ok(self.tasks.lock().unwrap().remove(id).is_some())
        }

        fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<bool> {
            Ok(match self.tasks.lock().unwrap().get_mut(id) {
                Some(task) => {
                    task.status = status;
                    true
                }
                None => false,
            })
        }

        fn update_execution_state(&self, id: &str, state: &ExecutionState) -> Result<bool> {
            self.updates.lock().unwrap().push((id.to_string(), state.clone()));
            Ok(match self.tasks.lock().unwrap().get_mut(id) {
                Some(task) => {
                    task.status = state.status;
                    task.last_run = Some(state.last_run.clone());
                    task.next_run = state.next_run.clone();
                    task.last_result_count = state.result_count;
                    true
                }
                None => false,
            })
        }
    }
}
