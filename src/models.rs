use chrono::{Duration, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Placeholder stored in `next_run` until a task has executed once.
pub const NEXT_RUN_PENDING: &str = "Pending";

/// A stored job posting. Rows are never updated; a re-crawl inserts new rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: i64,
    pub title: String,
    pub company: String,
    pub description: Option<String>,
    pub location: String,
    pub salary: String,
    pub source_url: Option<String>,
    pub crawl_time: String,
}

/// A posting assembled by a crawler, before storage assigns it an id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewJobPosting {
    pub title: String,
    pub company: String,
    pub description: Option<String>,
    pub location: String,
    pub salary: String,
    pub source_url: Option<String>,
    pub crawl_time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "Active",
            TaskStatus::Paused => "Paused",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
        }
    }

    /// Active and Paused are set by operators; Completed and Failed only by a run.
    pub fn is_operator_state(&self) -> bool {
        matches!(self, TaskStatus::Active | TaskStatus::Paused)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(TaskStatus::Active),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(anyhow::anyhow!("Unknown task status '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlTask {
    pub id: String,
    pub query: String,
    pub source: String,
    pub city: Option<String>,
    pub frequency: String, // "Every 6 Hours", "Daily", ...
    pub last_run: Option<String>,
    pub next_run: String,
    pub status: TaskStatus,
    pub last_result_count: i64,
    pub created_at: String,
}

impl CrawlTask {
    /// A task is due when it is not paused and its scheduled time has passed.
    /// "Pending" tasks are launched at creation and are not picked up here.
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        if self.status == TaskStatus::Paused {
            return false;
        }
        match parse_timestamp(&self.next_run) {
            Some(next) => next <= now,
            None => false,
        }
    }
}

/// What a finished execution writes back to its task row.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionState {
    pub status: TaskStatus,
    pub last_run: String,
    pub next_run: String,
    pub result_count: i64,
}

/// How often a task repeats, parsed from its free-form frequency label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Minutes(u32),
    Hours(u32),
    Days(u32),
    Weeks(u32),
}

impl Frequency {
    pub const DEFAULT: Frequency = Frequency::Days(1);

    /// Parses labels like "Hourly", "Daily", "Weekly" or "Every 6 Hours".
    pub fn parse(label: &str) -> Option<Frequency> {
        let label = label.trim().to_lowercase();
        match label.as_str() {
            "hourly" => return Some(Frequency::Hours(1)),
            "daily" => return Some(Frequency::Days(1)),
            "weekly" => return Some(Frequency::Weeks(1)),
            _ => {}
        }

        let rest = label.strip_prefix("every")?.trim();
        let mut parts = rest.split_whitespace();
        let (count, unit) = match (parts.next(), parts.next()) {
            (Some(n), Some(unit)) => (n.parse::<u32>().ok()?, unit),
            // "Every Hour", "Every Day"
            (Some(unit), None) => (1, unit),
            _ => return None,
        };
        if parts.next().is_some() || count == 0 {
            return None;
        }

        match unit.trim_end_matches('s') {
            "minute" | "min" => Some(Frequency::Minutes(count)),
            "hour" => Some(Frequency::Hours(count)),
            "day" => Some(Frequency::Days(count)),
            "week" => Some(Frequency::Weeks(count)),
            _ => None,
        }
    }

    pub fn interval(&self) -> Duration {
        match *self {
            Frequency::Minutes(n) => Duration::minutes(n as i64),
            Frequency::Hours(n) => Duration::hours(n as i64),
            Frequency::Days(n) => Duration::days(n as i64),
            Frequency::Weeks(n) => Duration::weeks(n as i64),
        }
    }
}

pub fn now_local() -> NaiveDateTime {
    Local::now().naive_local()
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(status: TaskStatus, next_run: &str) -> CrawlTask {
        CrawlTask {
            id: "t1".to_string(),
            query: "java".to_string(),
            source: "shixiseng".to_string(),
            city: None,
            frequency: "Daily".to_string(),
            last_run: None,
            next_run: next_run.to_string(),
            status,
            last_result_count: 0,
            created_at: "2026-01-01T00:00:00".to_string(),
        }
    }

    #[test]
    fn test_frequency_named_labels() {
        assert_eq!(Frequency::parse("Hourly"), Some(Frequency::Hours(1)));
        assert_eq!(Frequency::parse("daily"), Some(Frequency::Days(1)));
        assert_eq!(Frequency::parse(" Weekly "), Some(Frequency::Weeks(1)));
    }

    #[test]
    fn test_frequency_every_n_units() {
        assert_eq!(Frequency::parse("Every 6 Hours"), Some(Frequency::Hours(6)));
        assert_eq!(Frequency::parse("every 30 minutes"), Some(Frequency::Minutes(30)));
        assert_eq!(Frequency::parse("Every 2 Days"), Some(Frequency::Days(2)));
        assert_eq!(Frequency::parse("Every Week"), Some(Frequency::Weeks(1)));
        assert_eq!(Frequency::parse("Every 1 Hour"), Some(Frequency::Hours(1)));
    }

    #[test]
    fn test_frequency_rejects_garbage() {
        assert_eq!(Frequency::parse("sometimes"), None);
        assert_eq!(Frequency::parse("Every 0 Hours"), None);
        assert_eq!(Frequency::parse("Every x Hours"), None);
        assert_eq!(Frequency::parse("Every 6 Fortnights"), None);
        assert_eq!(Frequency::parse(""), None);
    }

    #[test]
    fn test_frequency_interval() {
        assert_eq!(Frequency::Hours(6).interval(), Duration::hours(6));
        assert_eq!(Frequency::DEFAULT.interval(), Duration::days(1));
    }

    #[test]
    fn test_task_status_round_trips_through_str() {
        for status in [TaskStatus::Active, TaskStatus::Paused, TaskStatus::Completed, TaskStatus::Failed] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("running".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_task_is_due() {
        let now = parse_timestamp("2026-03-01T12:00:00").unwrap();
        assert!(task(TaskStatus::Completed, "2026-03-01T11:59:59").is_due(now));
        assert!(task(TaskStatus::Failed, "2026-03-01T12:00:00").is_due(now));
        assert!(!task(TaskStatus::Active, "2026-03-01T12:00:01").is_due(now));
        assert!(!task(TaskStatus::Paused, "2026-02-01T00:00:00").is_due(now));
        assert!(!task(TaskStatus::Active, NEXT_RUN_PENDING).is_due(now));
    }
}
