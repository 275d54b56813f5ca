use anyhow::{bail, Result};
use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::db::TaskStore;
use crate::models::{format_timestamp, now_local, CrawlTask, TaskStatus, NEXT_RUN_PENDING};
use crate::pool::{CrawlJob, CrawlPool};

/// Operator-facing task management. Every execution goes through the pool,
/// so none of these calls wait for a crawl to finish.
pub struct TaskService {
    tasks: Arc<dyn TaskStore>,
    pool: Arc<CrawlPool>,
    default_city: String,
}

impl TaskService {
    pub fn new(tasks: Arc<dyn TaskStore>, pool: Arc<CrawlPool>, default_city: impl Into<String>) -> Self {
        Self {
            tasks,
            pool,
            default_city: default_city.into(),
        }
    }

    pub fn pool(&self) -> &CrawlPool {
        &self.pool
    }

    /// Stores a new Active task and immediately queues its first run.
    pub fn create_task(
        &self,
        query: &str,
        source: &str,
        frequency: &str,
        city: Option<&str>,
    ) -> Result<CrawlTask> {
        let query = query.trim();
        let source = source.trim();
        if query.is_empty() {
            bail!("Task query must not be empty");
        }
        if source.is_empty() {
            bail!("Task source must not be empty");
        }

        let task = CrawlTask {
            id: Uuid::new_v4().to_string(),
            query: query.to_string(),
            source: source.to_string(),
            city: city.map(str::trim).filter(|c| !c.is_empty()).map(str::to_string),
            frequency: frequency.trim().to_string(),
            last_run: None,
            next_run: NEXT_RUN_PENDING.to_string(),
            status: TaskStatus::Active,
            last_result_count: 0,
            created_at: format_timestamp(now_local()),
        };
        self.tasks.create_task(&task)?;
        info!(task_id = %task.id, source = %task.source, query = %task.query, "Task created");

        self.launch(&task);
        Ok(task)
    }

    pub fn list_tasks(&self) -> Result<Vec<CrawlTask>> {
        self.tasks.list_tasks()
    }

    pub fn find_task(&self, id: &str) -> Result<Option<CrawlTask>> {
        self.tasks.find_task(id)
    }

    pub fn delete_task(&self, id: &str) -> Result<bool> {
        self.tasks.delete_task(id)
    }

    /// Only Active and Paused may be set by hand; the other states are
    /// written by executions.
    pub fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<bool> {
        if !status.is_operator_state() {
            bail!("Status '{}' is set by task runs and cannot be assigned", status);
        }
        self.tasks.set_task_status(id, status)
    }

    /// Queues one run of `id` now, regardless of its schedule.
    pub fn run_task(&self, id: &str) -> Result<bool> {
        match self.tasks.find_task(id)? {
            Some(task) => {
                self.launch(&task);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Queues every task that is due at `now` and returns their ids.
    pub fn run_due(&self, now: NaiveDateTime) -> Result<Vec<String>> {
        let due: Vec<CrawlTask> = self
            .tasks
            .list_tasks()?
            .into_iter()
            .filter(|t| t.is_due(now))
            .collect();

        for task in &due {
            self.launch(task);
        }
        Ok(due.into_iter().map(|t| t.id).collect())
    }

    fn launch(&self, task: &CrawlTask) {
        self.pool.submit(CrawlJob {
            task_id: Some(task.id.clone()),
            source: task.source.clone(),
            keyword: task.query.clone(),
            city: task.city.clone().unwrap_or_else(|| self.default_city.clone()),
        });
    }
}
