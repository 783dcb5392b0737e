use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use relay_stores::{ScheduleRepo, WorkflowRepo};
use relay_types::{HostError, RunRecord, RunStatus, Schedule, ScheduleSpec};
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::executor::{ExecuteOptions, WorkflowExecutor};

/// Scheduled runs never exceed this regardless of the configured timeout.
pub const SCHEDULED_RUN_TIMEOUT_CAP: Duration = Duration::from_secs(120);
const TICK: Duration = Duration::from_secs(30);

/// Fires saved workflows at their declared times inside synthesized
/// `scheduler::<id>::<nonce>` sessions, so no user session is ever held.
pub struct Scheduler {
    repo: Arc<dyn ScheduleRepo>,
    workflows: Arc<dyn WorkflowRepo>,
    executor: Arc<WorkflowExecutor>,
    bus: EventBus,
    running: DashMap<String, ()>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        repo: Arc<dyn ScheduleRepo>,
        workflows: Arc<dyn WorkflowRepo>,
        executor: Arc<WorkflowExecutor>,
        bus: EventBus,
    ) -> Self {
        Scheduler {
            repo,
            workflows,
            executor,
            bus,
            running: DashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Background tick loop; runs until the cancellation token fires.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick_once(Utc::now()).await;
                    }
                }
            }
        })
    }

    /// One scheduler pass: fire everything due at `now`. Runs execute in
    /// the background; an overlapping tick is consumed and recorded.
    pub async fn tick_once(self: &Arc<Self>, now: DateTime<Utc>) {
        let schedules = match self.repo.list().await {
            Ok(schedules) => schedules,
            Err(err) => {
                tracing::error!("failed to list schedules: {err}");
                return;
            }
        };

        for schedule in schedules {
            if !schedule.enabled || !is_due(&schedule, now) {
                continue;
            }

            if self.running.contains_key(&schedule.id) {
                tracing::info!(
                    "schedule {} still running, skipping tick",
                    schedule.id
                );
                let _ = self
                    .repo
                    .record_run(RunRecord {
                        schedule_id: schedule.id.clone(),
                        session_id: schedule.session_id.clone(),
                        started_at: now,
                        completed_at: Some(now),
                        status: RunStatus::SkippedOverlap,
                        execution_time_s: 0.0,
                        result_excerpt: None,
                        error: None,
                    })
                    .await;
                // Consume the tick so the skip is recorded once, not on
                // every pass until the run finishes.
                let mut consumed = schedule.clone();
                consumed.last_run_at = Some(now);
                let _ = self.repo.update(consumed).await;
                continue;
            }

            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.execute_schedule(schedule, now).await;
            });
        }
    }

    /// Fire a schedule immediately, bypassing its timing but not its
    /// overlap guard.
    pub async fn run_now(self: &Arc<Self>, schedule_id: &str) -> Result<(), HostError> {
        let schedule = self
            .repo
            .get(schedule_id)
            .await
            .map_err(|e| HostError::Store(e.to_string()))?
            .ok_or_else(|| HostError::NotFound(format!("unknown schedule {schedule_id}")))?;
        if self.running.contains_key(&schedule.id) {
            return Err(HostError::Conflict(format!(
                "schedule {schedule_id} is already running"
            )));
        }
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.execute_schedule(schedule, Utc::now()).await;
        });
        Ok(())
    }

    /// Next fire times across all enabled schedules, soonest first.
    pub async fn upcoming(&self, limit: usize) -> Result<Vec<(Schedule, DateTime<Utc>)>, HostError> {
        let now = Utc::now();
        let mut upcoming: Vec<(Schedule, DateTime<Utc>)> = self
            .repo
            .list()
            .await
            .map_err(|e| HostError::Store(e.to_string()))?
            .into_iter()
            .filter(|s| s.enabled)
            .filter_map(|s| next_fire(&s, now).map(|at| (s, at)))
            .collect();
        upcoming.sort_by_key(|(_, at)| *at);
        upcoming.truncate(limit);
        Ok(upcoming)
    }

    async fn execute_schedule(&self, schedule: Schedule, fired_at: DateTime<Utc>) {
        self.running.insert(schedule.id.clone(), ());
        let _guard = RunningGuard {
            running: &self.running,
            id: schedule.id.clone(),
        };

        let run_nonce = uuid::Uuid::new_v4().to_string();
        let run_session = format!("scheduler::{}::{}", schedule.id, &run_nonce[..8]);
        let timeout = Duration::from_secs(schedule.timeout_s).min(SCHEDULED_RUN_TIMEOUT_CAP);
        let started_at = Utc::now();

        let workflow = match self.workflows.get(&schedule.workflow_id).await {
            Ok(Some(workflow)) => workflow,
            Ok(None) => {
                self.finish_run(
                    &schedule,
                    fired_at,
                    started_at,
                    RunStatus::Failed,
                    None,
                    Some(format!("workflow {} not found", schedule.workflow_id)),
                )
                .await;
                return;
            }
            Err(err) => {
                self.finish_run(
                    &schedule,
                    fired_at,
                    started_at,
                    RunStatus::Failed,
                    None,
                    Some(err.to_string()),
                )
                .await;
                return;
            }
        };

        let attempts = if schedule.retry_on_failure {
            schedule.max_retries.max(1)
        } else {
            1
        };

        let mut status = RunStatus::Failed;
        let mut excerpt = None;
        let mut error = None;
        for attempt in 1..=attempts {
            let opts = ExecuteOptions {
                user_message: format!("Run the scheduled workflow: {}", workflow.name),
                timeout,
                scheduled: true,
                ..ExecuteOptions::default()
            };
            match self.executor.execute(&workflow, &run_session, opts).await {
                Ok(result) if result.success => {
                    status = RunStatus::Success;
                    excerpt = Some(truncate(&result.final_text, 500));
                    error = None;
                    break;
                }
                Ok(result) => {
                    status = RunStatus::Failed;
                    excerpt = Some(truncate(&result.final_text, 500));
                    error = Some(
                        result
                            .steps
                            .iter()
                            .filter(|s| s.status == crate::executor::StepStatus::Failed)
                            .map(|s| format!("step {} ({})", s.label, s.agent_name))
                            .collect::<Vec<_>>()
                            .join(", "),
                    );
                }
                Err(HostError::Timeout(detail)) => {
                    status = RunStatus::Timeout;
                    error = Some(detail);
                }
                Err(err) => {
                    status = RunStatus::Failed;
                    error = Some(err.user_message());
                }
            }
            if attempt < attempts {
                tracing::warn!(
                    "scheduled run of {} failed (attempt {attempt}/{attempts}), retrying",
                    schedule.id
                );
            }
        }

        self.finish_run(&schedule, fired_at, started_at, status, excerpt, error)
            .await;

        // The synthesized session exists only for this run.
        self.executor_sessions().drop_session(&run_session);
        self.bus.close(&run_session);
    }

    fn executor_sessions(&self) -> &Arc<crate::registry::SessionRegistry> {
        self.executor_orchestrator().sessions()
    }

    fn executor_orchestrator(&self) -> &Arc<crate::orchestrator::HostOrchestrator> {
        self.executor.orchestrator()
    }

    async fn finish_run(
        &self,
        schedule: &Schedule,
        fired_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
        status: RunStatus,
        result_excerpt: Option<String>,
        error: Option<String>,
    ) {
        let completed_at = Utc::now();
        let record = RunRecord {
            schedule_id: schedule.id.clone(),
            session_id: schedule.session_id.clone(),
            started_at,
            completed_at: Some(completed_at),
            status,
            execution_time_s: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            result_excerpt,
            error,
        };
        if let Err(err) = self.repo.record_run(record).await {
            tracing::error!("failed to record run for {}: {err}", schedule.id);
        }

        let mut updated = schedule.clone();
        updated.run_count += 1;
        updated.last_run_at = Some(fired_at);
        if matches!(updated.spec, ScheduleSpec::Once { .. }) {
            updated.enabled = false;
        }
        if let Some(max_runs) = updated.max_runs {
            if updated.run_count >= max_runs {
                updated.enabled = false;
            }
        }
        if let Err(err) = self.repo.update(updated).await {
            tracing::error!("failed to update schedule {}: {err}", schedule.id);
        }
    }
}

struct RunningGuard<'a> {
    running: &'a DashMap<String, ()>,
    id: String,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.remove(&self.id);
    }
}

pub fn is_due(schedule: &Schedule, now: DateTime<Utc>) -> bool {
    match &schedule.spec {
        ScheduleSpec::Once { run_at } => schedule.run_count == 0 && *run_at <= now,
        _ => next_fire_after(schedule, anchor(schedule))
            .map(|at| at <= now)
            .unwrap_or(false),
    }
}

/// Next fire time strictly after `after`, in UTC.
pub fn next_fire(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match &schedule.spec {
        ScheduleSpec::Once { run_at } => {
            (schedule.run_count == 0 && *run_at > after).then_some(*run_at)
        }
        _ => next_fire_after(schedule, after.max(anchor(schedule))),
    }
}

/// Baseline the recurrence counts from: the last run, or creation.
fn anchor(schedule: &Schedule) -> DateTime<Utc> {
    schedule.last_run_at.unwrap_or(schedule.created_at)
}

fn next_fire_after(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let tz: Tz = schedule.timezone.parse().unwrap_or(chrono_tz::UTC);
    match &schedule.spec {
        ScheduleSpec::Once { run_at } => Some(*run_at),
        ScheduleSpec::Interval { interval_minutes } => {
            Some(after + chrono::Duration::minutes(i64::from(*interval_minutes)))
        }
        ScheduleSpec::Daily { time_of_day } => {
            let local = after.with_timezone(&tz);
            let mut date = local.date_naive();
            loop {
                if let Some(candidate) = localize(&tz, date, *time_of_day) {
                    if candidate > after {
                        return Some(candidate);
                    }
                }
                date = date.succ_opt()?;
            }
        }
        ScheduleSpec::Weekly {
            time_of_day,
            days_of_week,
        } => {
            if days_of_week.is_empty() {
                return None;
            }
            let local = after.with_timezone(&tz);
            let mut date = local.date_naive();
            for _ in 0..8 {
                if days_of_week.contains(&date.weekday()) {
                    if let Some(candidate) = localize(&tz, date, *time_of_day) {
                        if candidate > after {
                            return Some(candidate);
                        }
                    }
                }
                date = date.succ_opt()?;
            }
            None
        }
        ScheduleSpec::Monthly {
            time_of_day,
            day_of_month,
        } => {
            let local = after.with_timezone(&tz);
            let mut year = local.year();
            let mut month = local.month();
            for _ in 0..13 {
                let day = (*day_of_month).min(days_in_month(year, month));
                if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                    if let Some(candidate) = localize(&tz, date, *time_of_day) {
                        if candidate > after {
                            return Some(candidate);
                        }
                    }
                }
                month += 1;
                if month > 12 {
                    month = 1;
                    year += 1;
                }
            }
            None
        }
        ScheduleSpec::Cron { expression } => {
            let normalized = normalize_cron(expression);
            let parsed = cron::Schedule::from_str(&normalized).ok()?;
            parsed
                .after(&after.with_timezone(&tz))
                .next()
                .map(|at| at.with_timezone(&Utc))
        }
    }
}

fn localize(tz: &Tz, date: NaiveDate, time: chrono::NaiveTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|at| at.with_timezone(&Utc))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// The cron crate wants a seconds field; POSIX five-field expressions get
/// one prepended.
fn normalize_cron(expression: &str) -> String {
    let fields = expression.split_whitespace().count();
    if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        text.chars().take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};

    fn schedule(spec: ScheduleSpec) -> Schedule {
        Schedule {
            id: "sch1".into(),
            workflow_id: "wf1".into(),
            workflow_name: "wf".into(),
            session_id: "user_1".into(),
            spec,
            timezone: "UTC".into(),
            enabled: true,
            run_count: 0,
            max_runs: None,
            timeout_s: 120,
            retry_on_failure: false,
            max_retries: 3,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            last_run_at: None,
        }
    }

    #[test]
    fn once_fires_exactly_once() {
        let run_at = Utc.with_ymd_and_hms(2026, 1, 2, 9, 0, 0).unwrap();
        let mut s = schedule(ScheduleSpec::Once { run_at });

        assert!(!is_due(&s, run_at - chrono::Duration::minutes(1)));
        assert!(is_due(&s, run_at));
        s.run_count = 1;
        assert!(!is_due(&s, run_at + chrono::Duration::hours(1)));
        assert_eq!(next_fire(&s, run_at - chrono::Duration::hours(1)), None);
    }

    #[test]
    fn interval_counts_from_last_run() {
        let mut s = schedule(ScheduleSpec::Interval {
            interval_minutes: 5,
        });
        let created = s.created_at;
        assert!(!is_due(&s, created + chrono::Duration::minutes(4)));
        assert!(is_due(&s, created + chrono::Duration::minutes(5)));

        s.last_run_at = Some(created + chrono::Duration::minutes(5));
        assert!(!is_due(&s, created + chrono::Duration::minutes(9)));
        assert!(is_due(&s, created + chrono::Duration::minutes(10)));
    }

    #[test]
    fn daily_respects_timezone() {
        let mut s = schedule(ScheduleSpec::Daily {
            time_of_day: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        });
        s.timezone = "America/New_York".into();

        // 9am New York in January is 14:00 UTC.
        let after = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        let fire = next_fire(&s, after).unwrap();
        assert_eq!(fire, Utc.with_ymd_and_hms(2026, 1, 5, 14, 0, 0).unwrap());
    }

    #[test]
    fn weekly_picks_next_selected_day() {
        let s = schedule(ScheduleSpec::Weekly {
            time_of_day: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            days_of_week: vec![Weekday::Mon, Weekday::Fri],
        });
        // 2026-01-01 is a Thursday, so Friday the 2nd comes first.
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let fire = next_fire(&s, after).unwrap();
        assert_eq!(fire, Utc.with_ymd_and_hms(2026, 1, 2, 8, 0, 0).unwrap());
    }

    #[test]
    fn monthly_clamps_day_to_month_length() {
        let s = schedule(ScheduleSpec::Monthly {
            time_of_day: NaiveTime::from_hms_opt(0, 30, 0).unwrap(),
            day_of_month: 31,
        });
        let after = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let fire = next_fire(&s, after).unwrap();
        // February 2026 has 28 days.
        assert_eq!(fire, Utc.with_ymd_and_hms(2026, 2, 28, 0, 30, 0).unwrap());
    }

    #[test]
    fn five_field_cron_is_accepted() {
        let s = schedule(ScheduleSpec::Cron {
            expression: "0 9 * * *".into(),
        });
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let fire = next_fire(&s, after).unwrap();
        assert_eq!(fire, Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap());
    }

    #[test]
    fn upcoming_sorts_soonest_first() {
        let a = schedule(ScheduleSpec::Interval {
            interval_minutes: 60,
        });
        let mut b = schedule(ScheduleSpec::Interval {
            interval_minutes: 5,
        });
        b.id = "sch2".into();
        let now = a.created_at;
        let fire_a = next_fire(&a, now).unwrap();
        let fire_b = next_fire(&b, now).unwrap();
        assert!(fire_b < fire_a);
    }
}
