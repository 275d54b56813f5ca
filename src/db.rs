use anyhow::{anyhow, Context, Result};
use chrono::{Duration, NaiveDate};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use url::Url;

use crate::models::{CrawlTask, ExecutionState, JobPosting, NewJobPosting, TaskStatus};

/// Where crawled postings go and how they are queried back.
pub trait JobStore: Send + Sync {
    /// Inserts every posting in one transaction; returns how many were stored.
    fn save_jobs(&self, jobs: &[NewJobPosting]) -> Result<usize>;

    /// Newest first. `keywords` matches a substring of title, company or
    /// description; `city` a substring of location. Blank filters are ignored.
    fn search_jobs(
        &self,
        keywords: Option<&str>,
        city: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<JobPosting>>;

    fn count_jobs(&self, keywords: Option<&str>, city: Option<&str>) -> Result<usize>;
}

/// Persistent crawl tasks. Methods taking an id return `false` when no such
/// task exists.
pub trait TaskStore: Send + Sync {
    fn create_task(&self, task: &CrawlTask) -> Result<()>;
    fn find_task(&self, id: &str) -> Result<Option<CrawlTask>>;
    fn list_tasks(&self) -> Result<Vec<CrawlTask>>;
    fn delete_task(&self, id: &str) -> Result<bool>;
    fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<bool>;
    fn update_execution_state(&self, id: &str, state: &ExecutionState) -> Result<bool>;
}

pub struct Database {
    conn: Mutex<Connection>,
    path: PathBuf,
}

const JOB_COLUMNS: &str =
    "id, title, company, description, location, salary, source_url, crawl_time";

const TASK_COLUMNS: &str =
    "id, query, source, city, frequency, last_run, next_run, status, last_result_count, created_at";

impl Database {
    /// Opens `path`, or the per-user data file when none is given.
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path(),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobcrawl") {
            proj_dirs.data_dir().join("jobcrawl.db")
        } else {
            PathBuf::from("jobcrawl.db")
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))
    }

    pub fn init(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS job_postings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                company TEXT NOT NULL,
                description TEXT,
                location TEXT NOT NULL,
                salary TEXT NOT NULL,
                source_url TEXT,
                crawl_time TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS crawl_tasks (
                id TEXT PRIMARY KEY,
                query TEXT NOT NULL,
                source TEXT NOT NULL,
                city TEXT,
                frequency TEXT NOT NULL,
                last_run TEXT,
                next_run TEXT NOT NULL DEFAULT 'Pending',
                status TEXT NOT NULL DEFAULT 'Active' CHECK (status IN ('Active', 'Paused', 'Completed', 'Failed')),
                last_result_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_postings_crawl_time ON job_postings(crawl_time);
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON crawl_tasks(status);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('job_postings', 'crawl_tasks')",
            [],
            |row| row.get(0),
        )?;
        if tables < 2 {
            return Err(anyhow!("Database not initialized. Run 'jobcrawl init' first."));
        }
        Ok(())
    }

    // --- Posting administration ---

    pub fn list_jobs(&self, offset: usize, limit: usize) -> Result<Vec<JobPosting>> {
        self.search_jobs(None, None, offset, limit)
    }

    pub fn get_job(&self, id: i64) -> Result<Option<JobPosting>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            &format!("SELECT {} FROM job_postings WHERE id = ?1", JOB_COLUMNS),
            [id],
            Self::row_to_job,
        );
        match result {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete_job(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM job_postings WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    /// Postings crawled on each of the seven days ending `today`, oldest
    /// first. Days without postings are included with a zero count.
    pub fn crawl_trend(&self, today: NaiveDate) -> Result<Vec<(NaiveDate, usize)>> {
        let first = today - Duration::days(6);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT substr(crawl_time, 1, 10) AS day, COUNT(*)
             FROM job_postings
             WHERE substr(crawl_time, 1, 10) BETWEEN ?1 AND ?2
             GROUP BY day",
        )?;
        let rows = stmt.query_map(
            params![first.format("%Y-%m-%d").to_string(), today.format("%Y-%m-%d").to_string()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?;

        let mut per_day = HashMap::new();
        for row in rows {
            let (day, count) = row?;
            per_day.insert(day, count as usize);
        }

        Ok(first
            .iter_days()
            .take(7)
            .map(|day| {
                let key = day.format("%Y-%m-%d").to_string();
                (day, per_day.get(&key).copied().unwrap_or(0))
            })
            .collect())
    }

    /// The five hosts contributing the most postings, most first.
    pub fn source_distribution(&self) -> Result<Vec<(String, usize)>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT source_url FROM job_postings WHERE source_url IS NOT NULL")?;
        let urls = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut per_host: HashMap<String, usize> = HashMap::new();
        for url in urls {
            let url = url?;
            let host = Url::parse(&url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string());
            *per_host.entry(host).or_default() += 1;
        }

        let mut hosts: Vec<_> = per_host.into_iter().collect();
        hosts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hosts.truncate(5);
        Ok(hosts)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobPosting> {
        Ok(JobPosting {
            id: row.get(0)?,
            title: row.get(1)?,
            company: row.get(2)?,
            description: row.get(3)?,
            location: row.get(4)?,
            salary: row.get(5)?,
            source_url: row.get(6)?,
            crawl_time: row.get(7)?,
        })
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<CrawlTask> {
        let status: String = row.get(7)?;
        let status = status
            .parse::<TaskStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, e.into()))?;
        Ok(CrawlTask {
            id: row.get(0)?,
            query: row.get(1)?,
            source: row.get(2)?,
            city: row.get(3)?,
            frequency: row.get(4)?,
            last_run: row.get(5)?,
            next_run: row.get(6)?,
            status,
            last_result_count: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}

/// WHERE clause and bound values for the optional posting filters.
fn job_filter(keywords: Option<&str>, city: Option<&str>) -> (String, Vec<Value>) {
    let mut sql = String::from(" WHERE 1=1");
    let mut values = Vec::new();

    if let Some(kw) = keywords.map(str::trim).filter(|k| !k.is_empty()) {
        values.push(Value::Text(kw.to_string()));
        sql.push_str(&format!(
            " AND instr(lower(title || ' ' || company || ' ' || COALESCE(description, '')), lower(?{})) > 0",
            values.len()
        ));
    }

    if let Some(city) = city.map(str::trim).filter(|c| !c.is_empty()) {
        values.push(Value::Text(city.to_string()));
        sql.push_str(&format!(" AND instr(location, ?{}) > 0", values.len()));
    }

    (sql, values)
}

impl JobStore for Database {
    fn save_jobs(&self, jobs: &[NewJobPosting]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO job_postings (title, company, description, location, salary, source_url, crawl_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for job in jobs {
                stmt.execute(params![
                    job.title,
                    job.company,
                    job.description,
                    job.location,
                    job.salary,
                    job.source_url,
                    job.crawl_time,
                ])?;
            }
        }
        tx.commit().context("Failed to save postings")?;
        Ok(jobs.len())
    }

    fn search_jobs(
        &self,
        keywords: Option<&str>,
        city: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<JobPosting>> {
        let (filter, mut values) = job_filter(keywords, city);
        let sql = format!(
            "SELECT {} FROM job_postings{} ORDER BY id DESC LIMIT ?{} OFFSET ?{}",
            JOB_COLUMNS,
            filter,
            values.len() + 1,
            values.len() + 2
        );
        values.push(Value::Integer(limit as i64));
        values.push(Value::Integer(offset as i64));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), Self::row_to_job)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to search postings")
    }

    fn count_jobs(&self, keywords: Option<&str>, city: Option<&str>) -> Result<usize> {
        let (filter, values) = job_filter(keywords, city);
        let sql = format!("SELECT COUNT(*) FROM job_postings{}", filter);
        let count: i64 = self
            .conn()?
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl TaskStore for Database {
    fn create_task(&self, task: &CrawlTask) -> Result<()> {
        self.conn()?
            .execute(
                &format!(
                    "INSERT INTO crawl_tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    TASK_COLUMNS
                ),
                params![
                    task.id,
                    task.query,
                    task.source,
                    task.city,
                    task.frequency,
                    task.last_run,
                    task.next_run,
                    task.status.as_str(),
                    task.last_result_count,
                    task.created_at,
                ],
            )
            .context("Failed to create task")?;
        Ok(())
    }

    fn find_task(&self, id: &str) -> Result<Option<CrawlTask>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            &format!("SELECT {} FROM crawl_tasks WHERE id = ?1", TASK_COLUMNS),
            [id],
            Self::row_to_task,
        );
        match result {
            Ok(task) => Ok(Some(task)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_tasks(&self) -> Result<Vec<CrawlTask>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM crawl_tasks ORDER BY created_at DESC, rowid DESC",
            TASK_COLUMNS
        ))?;
        let rows = stmt.query_map([], Self::row_to_task)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list tasks")
    }

    fn delete_task(&self, id: &str) -> Result<bool> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM crawl_tasks WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<bool> {
        let updated = self.conn()?.execute(
            "UPDATE crawl_tasks SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(updated > 0)
    }

    fn update_execution_state(&self, id: &str, state: &ExecutionState) -> Result<bool> {
        let updated = self.conn()?.execute(
            "UPDATE crawl_tasks
             SET status = ?1, last_run = ?2, next_run = ?3, last_result_count = ?4
             WHERE id = ?5",
            params![
                state.status.as_str(),
                state.last_run,
                state.next_run,
                state.result_count,
                id
            ],
        )?;
        Ok(updated > 0)
    }
}
