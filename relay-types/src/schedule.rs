use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Fires a saved workflow at user-declared times without holding a live
/// user session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub workflow_id: String,
    #[serde(default)]
    pub workflow_name: String,
    pub session_id: String,
    #[serde(flatten)]
    pub spec: ScheduleSpec,
    /// IANA timezone name; UTC when absent.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub run_count: u32,
    #[serde(default)]
    pub max_runs: Option<u32>,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    #[serde(default)]
    pub retry_on_failure: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_s() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "schedule_type", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Fires once at `run_at` (UTC), then self-disables.
    Once { run_at: DateTime<Utc> },
    Interval { interval_minutes: u32 },
    Daily { time_of_day: NaiveTime },
    Weekly {
        time_of_day: NaiveTime,
        days_of_week: Vec<Weekday>,
    },
    Monthly {
        time_of_day: NaiveTime,
        day_of_month: u32,
    },
    /// POSIX-style cron expression, evaluated in the schedule's timezone.
    Cron { expression: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
    Timeout,
    Canceled,
    /// The previous run was still in flight at the tick; nothing fired.
    SkippedOverlap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub schedule_id: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    #[serde(default)]
    pub execution_time_s: f64,
    #[serde(default)]
    pub result_excerpt: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
