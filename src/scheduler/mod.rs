//! Time-based workflow activation.
//!
//! Each active workflow owns one scheduler job, identified by a UUID that
//! is persisted on the workflow row (so a restart can re-arm the same job
//! id). A job is a tokio task that computes its next fire time from the
//! local wall clock, sleeps until then, and invokes the orchestrator —
//! whose single-flight lock guards against a slow execution overlapping
//! the next tick.
//!
//! `once` schedules interpret a naive `executeAt` timestamp in the
//! system's local timezone.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, NaiveTime, TimeZone, Weekday};
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::graph::WorkflowGraph;
use crate::runtimes::store::StoreError;
use crate::runtimes::Engine;
use crate::utils::clock::parse_naive_time;

#[derive(Debug, Error, Diagnostic)]
pub enum ScheduleError {
    #[error("unknown schedule type: {kind}")]
    #[diagnostic(code(tradeweave::schedule::kind))]
    UnknownKind { kind: String },

    #[error("weekly schedule has no days selected")]
    #[diagnostic(code(tradeweave::schedule::days))]
    EmptyDays,

    #[error("interval must be positive")]
    #[diagnostic(code(tradeweave::schedule::interval))]
    NonPositiveInterval,

    #[error("once schedule requires a valid executeAt timestamp, got {raw:?}")]
    #[diagnostic(
        code(tradeweave::schedule::execute_at),
        help("Use RFC 3339 or YYYY-MM-DDTHH:MM[:SS]; naive times are system-local.")
    )]
    InvalidExecuteAt { raw: String },
}

#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    #[error("workflow not found: {id}")]
    #[diagnostic(code(tradeweave::scheduler::workflow_not_found))]
    WorkflowNotFound { id: i64 },

    #[error("no start node found")]
    #[diagnostic(code(tradeweave::scheduler::no_start))]
    NoStartNode,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

/// A parsed schedule, decoded from the start node's data bag.
#[derive(Clone, Debug, PartialEq)]
pub enum Schedule {
    Daily { time: NaiveTime },
    Weekly { time: NaiveTime, days: Vec<Weekday> },
    Interval { every: ChronoDuration },
    Once { at: DateTime<Local> },
}

fn parse_weekday(raw: &str) -> Option<Weekday> {
    match raw.trim().to_lowercase().as_str() {
        "mon" | "monday" => Some(Weekday::Mon),
        "tue" | "tuesday" => Some(Weekday::Tue),
        "wed" | "wednesday" => Some(Weekday::Wed),
        "thu" | "thursday" => Some(Weekday::Thu),
        "fri" | "friday" => Some(Weekday::Fri),
        "sat" | "saturday" => Some(Weekday::Sat),
        "sun" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

fn parse_execute_at(raw: &str) -> Option<DateTime<Local>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Local));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, format) {
            return Local.from_local_datetime(&naive).earliest();
        }
    }
    None
}

/// Resolve a local date+time, skewing forward out of DST gaps.
fn local_datetime(date: chrono::NaiveDate, time: NaiveTime) -> Option<DateTime<Local>> {
    let naive = date.and_time(time);
    Local
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| Local.from_local_datetime(&(naive + ChronoDuration::hours(1))).earliest())
}

impl Schedule {
    /// Decode the schedule configuration carried by a workflow's start
    /// node. Time strings are parsed defensively; structural problems
    /// (unknown kind, empty weekly days, non-positive interval) are
    /// errors that fail activation.
    pub fn from_start_data(data: &Map<String, Value>) -> Result<Self, ScheduleError> {
        let kind = data
            .get("scheduleType")
            .and_then(Value::as_str)
            .unwrap_or("daily");
        let time_str = data.get("time").and_then(Value::as_str).unwrap_or("09:15");

        match kind {
            "daily" => Ok(Schedule::Daily {
                time: parse_naive_time(time_str, 9, 15),
            }),
            "weekly" => {
                let days: Vec<Weekday> = data
                    .get("days")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .filter_map(Value::as_str)
                            .filter_map(parse_weekday)
                            .collect()
                    })
                    .unwrap_or_default();
                if days.is_empty() {
                    return Err(ScheduleError::EmptyDays);
                }
                Ok(Schedule::Weekly {
                    time: parse_naive_time(time_str, 9, 15),
                    days,
                })
            }
            "interval" => {
                // New format: intervalValue + intervalUnit; legacy graphs
                // carry intervalMinutes.
                let (value, unit) = match data.get("intervalValue").and_then(Value::as_i64) {
                    Some(value) => (
                        value,
                        data.get("intervalUnit")
                            .and_then(Value::as_str)
                            .unwrap_or("minutes")
                            .to_string(),
                    ),
                    None => (
                        data.get("intervalMinutes").and_then(Value::as_i64).unwrap_or(1),
                        "minutes".to_string(),
                    ),
                };
                if value <= 0 {
                    return Err(ScheduleError::NonPositiveInterval);
                }
                let every = match unit.as_str() {
                    "seconds" => ChronoDuration::seconds(value),
                    "hours" => ChronoDuration::hours(value),
                    _ => ChronoDuration::minutes(value),
                };
                Ok(Schedule::Interval { every })
            }
            "once" => {
                let raw = data
                    .get("executeAt")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                parse_execute_at(&raw)
                    .map(|at| Schedule::Once { at })
                    .ok_or(ScheduleError::InvalidExecuteAt { raw })
            }
            other => Err(ScheduleError::UnknownKind {
                kind: other.to_string(),
            }),
        }
    }

    /// The next fire time strictly after `after`; `None` when the
    /// schedule is exhausted (a `once` in the past).
    #[must_use]
    pub fn next_fire(&self, after: DateTime<Local>) -> Option<DateTime<Local>> {
        match self {
            Schedule::Daily { time } => {
                let today = local_datetime(after.date_naive(), *time)?;
                if today > after {
                    Some(today)
                } else {
                    local_datetime(after.date_naive() + ChronoDuration::days(1), *time)
                }
            }
            Schedule::Weekly { time, days } => {
                for offset in 0..=7 {
                    let date = after.date_naive() + ChronoDuration::days(offset);
                    if !days.contains(&date.weekday()) {
                        continue;
                    }
                    if let Some(candidate) = local_datetime(date, *time) {
                        if candidate > after {
                            return Some(candidate);
                        }
                    }
                }
                None
            }
            Schedule::Interval { every } => Some(after + *every),
            Schedule::Once { at } => (*at > after).then_some(*at),
        }
    }
}

struct Job {
    workflow_id: i64,
    handle: JoinHandle<()>,
    next_run: Arc<Mutex<Option<DateTime<Local>>>>,
}

/// Owns the scheduled jobs and drives them against the engine.
pub struct WorkflowScheduler {
    engine: Arc<Engine>,
    jobs: Mutex<FxHashMap<String, Job>>,
}

impl WorkflowScheduler {
    #[must_use]
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            jobs: Mutex::new(FxHashMap::default()),
        }
    }

    /// Insert a job under a fresh UUID. Returns the id and the first fire
    /// time.
    pub fn add_job(&self, workflow_id: i64, schedule: Schedule) -> (String, Option<DateTime<Local>>) {
        let job_id = Uuid::new_v4().to_string();
        let next = self.add_job_with_id(job_id.clone(), workflow_id, schedule);
        (job_id, next)
    }

    /// Insert a job under a caller-supplied id — used on startup to
    /// re-arm persisted jobs under their durable identifiers.
    pub fn add_job_with_id(
        &self,
        job_id: String,
        workflow_id: i64,
        schedule: Schedule,
    ) -> Option<DateTime<Local>> {
        let first = schedule.next_fire(Local::now());
        let next_run = Arc::new(Mutex::new(first));

        let engine = Arc::clone(&self.engine);
        let task_next = Arc::clone(&next_run);
        let task_schedule = schedule.clone();
        let handle = tokio::spawn(async move {
            loop {
                let now = Local::now();
                let Some(next) = task_schedule.next_fire(now) else {
                    *task_next.lock() = None;
                    break;
                };
                *task_next.lock() = Some(next);
                let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(delay).await;

                debug!(workflow_id, "schedule fired");
                let outcome = engine.execute_workflow(workflow_id, None).await;
                if !outcome.ok && !outcome.already_running {
                    warn!(workflow_id, message = %outcome.message, "scheduled execution failed");
                }
                if matches!(task_schedule, Schedule::Once { .. }) {
                    *task_next.lock() = None;
                    break;
                }
            }
        });

        self.jobs.lock().insert(
            job_id,
            Job {
                workflow_id,
                handle,
                next_run,
            },
        );
        first
    }

    /// Abort and drop a job. `false` when the id is unknown.
    pub fn remove_job(&self, job_id: &str) -> bool {
        match self.jobs.lock().remove(job_id) {
            Some(job) => {
                job.handle.abort();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn next_run_time(&self, job_id: &str) -> Option<DateTime<Local>> {
        self.jobs.lock().get(job_id).and_then(|job| *job.next_run.lock())
    }

    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Activate a workflow: decode the start node's schedule, insert a
    /// job, and persist its id on the workflow row.
    pub async fn activate_workflow(
        &self,
        workflow_id: i64,
    ) -> Result<(String, Option<DateTime<Local>>), SchedulerError> {
        let store = self.engine.store();
        let workflow = store
            .get_workflow(workflow_id)
            .await?
            .ok_or(SchedulerError::WorkflowNotFound { id: workflow_id })?;
        let graph = WorkflowGraph::from_json(&workflow.nodes, &workflow.edges)
            .map_err(|_| SchedulerError::NoStartNode)?;
        let start = graph.start_node().ok_or(SchedulerError::NoStartNode)?;
        let schedule = Schedule::from_start_data(&start.data)?;

        // Re-activation replaces any previous job.
        if let Some(old_id) = workflow.schedule_job_id.as_deref() {
            self.remove_job(old_id);
        }
        let (job_id, next) = self.add_job(workflow_id, schedule);
        store
            .set_workflow_activation(workflow_id, true, Some(&job_id))
            .await?;
        info!(workflow_id, %job_id, "workflow activated");
        Ok((job_id, next))
    }

    /// Deactivate a workflow and remove its job.
    pub async fn deactivate_workflow(&self, workflow_id: i64) -> Result<(), SchedulerError> {
        let store = self.engine.store();
        let workflow = store
            .get_workflow(workflow_id)
            .await?
            .ok_or(SchedulerError::WorkflowNotFound { id: workflow_id })?;
        if let Some(job_id) = workflow.schedule_job_id.as_deref() {
            self.remove_job(job_id);
        }
        store.set_workflow_activation(workflow_id, false, None).await?;
        info!(workflow_id, "workflow deactivated");
        Ok(())
    }

    /// Re-arm jobs for workflows that were active when the process last
    /// stopped, keeping their persisted job ids.
    pub async fn restore(&self) -> Result<usize, SchedulerError> {
        let workflows = self.engine.store().active_workflows().await?;
        let mut restored = 0;
        for workflow in workflows {
            let Ok(graph) = WorkflowGraph::from_json(&workflow.nodes, &workflow.edges) else {
                warn!(workflow_id = workflow.id, "skipping restore: invalid graph");
                continue;
            };
            let Some(start) = graph.start_node() else {
                warn!(workflow_id = workflow.id, "skipping restore: no start node");
                continue;
            };
            let schedule = match Schedule::from_start_data(&start.data) {
                Ok(schedule) => schedule,
                Err(err) => {
                    warn!(workflow_id = workflow.id, error = %err, "skipping restore");
                    continue;
                }
            };
            let job_id = workflow
                .schedule_job_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            self.add_job_with_id(job_id.clone(), workflow.id, schedule);
            self.engine
                .store()
                .set_workflow_activation(workflow.id, true, Some(&job_id))
                .await?;
            restored += 1;
        }
        Ok(restored)
    }

    /// Abort every job; used on shutdown.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock();
        for (_, job) in jobs.drain() {
            debug!(workflow_id = job.workflow_id, "aborting scheduled job");
            job.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventHub;
    use crate::runtimes::Store;
    use crate::secret;
    use serde_json::json;

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .expect("unambiguous test time")
    }

    #[test]
    fn decodes_daily_with_defaults() {
        let schedule = Schedule::from_start_data(&data(json!({}))).unwrap();
        assert_eq!(
            schedule,
            Schedule::Daily {
                time: NaiveTime::from_hms_opt(9, 15, 0).unwrap()
            }
        );
    }

    #[test]
    fn decodes_weekly_days() {
        let schedule = Schedule::from_start_data(&data(json!({
            "scheduleType": "weekly",
            "time": "10:00",
            "days": ["Monday", "fri", "nonsense"],
        })))
        .unwrap();
        assert_eq!(
            schedule,
            Schedule::Weekly {
                time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                days: vec![Weekday::Mon, Weekday::Fri],
            }
        );

        assert!(matches!(
            Schedule::from_start_data(&data(json!({"scheduleType": "weekly", "days": []}))),
            Err(ScheduleError::EmptyDays)
        ));
    }

    #[test]
    fn decodes_interval_with_legacy_fallback() {
        let schedule = Schedule::from_start_data(&data(json!({
            "scheduleType": "interval", "intervalValue": 30, "intervalUnit": "seconds",
        })))
        .unwrap();
        assert_eq!(
            schedule,
            Schedule::Interval {
                every: ChronoDuration::seconds(30)
            }
        );

        let legacy = Schedule::from_start_data(&data(json!({
            "scheduleType": "interval", "intervalMinutes": 5,
        })))
        .unwrap();
        assert_eq!(
            legacy,
            Schedule::Interval {
                every: ChronoDuration::minutes(5)
            }
        );

        assert!(matches!(
            Schedule::from_start_data(&data(json!({
                "scheduleType": "interval", "intervalValue": 0,
            }))),
            Err(ScheduleError::NonPositiveInterval)
        ));
    }

    #[test]
    fn decodes_once_in_local_time() {
        let schedule = Schedule::from_start_data(&data(json!({
            "scheduleType": "once", "executeAt": "2030-06-01T09:30:00",
        })))
        .unwrap();
        assert_eq!(schedule, Schedule::Once { at: at(2030, 6, 1, 9, 30) });

        assert!(matches!(
            Schedule::from_start_data(&data(json!({"scheduleType": "once"}))),
            Err(ScheduleError::InvalidExecuteAt { .. })
        ));
    }

    #[test]
    fn unknown_kind_is_an_error() {
        assert!(matches!(
            Schedule::from_start_data(&data(json!({"scheduleType": "lunar"}))),
            Err(ScheduleError::UnknownKind { .. })
        ));
    }

    #[test]
    fn daily_next_fire_rolls_to_tomorrow() {
        let schedule = Schedule::Daily {
            time: NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
        };
        let before = at(2030, 6, 3, 8, 0);
        assert_eq!(schedule.next_fire(before), Some(at(2030, 6, 3, 9, 15)));
        let after = at(2030, 6, 3, 10, 0);
        assert_eq!(schedule.next_fire(after), Some(at(2030, 6, 4, 9, 15)));
    }

    #[test]
    fn weekly_next_fire_scans_days() {
        let schedule = Schedule::Weekly {
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            days: vec![Weekday::Mon],
        };
        // 2030-06-03 is a Monday.
        let tuesday = at(2030, 6, 4, 12, 0);
        assert_eq!(schedule.next_fire(tuesday), Some(at(2030, 6, 10, 9, 0)));
        let monday_early = at(2030, 6, 3, 8, 0);
        assert_eq!(schedule.next_fire(monday_early), Some(at(2030, 6, 3, 9, 0)));
    }

    #[test]
    fn interval_and_once_next_fire() {
        let interval = Schedule::Interval {
            every: ChronoDuration::minutes(10),
        };
        let now = at(2030, 1, 1, 0, 0);
        assert_eq!(interval.next_fire(now), Some(at(2030, 1, 1, 0, 10)));

        let future = Schedule::Once { at: at(2030, 1, 2, 0, 0) };
        assert_eq!(future.next_fire(now), Some(at(2030, 1, 2, 0, 0)));
        let past = Schedule::Once { at: at(2020, 1, 1, 0, 0) };
        assert_eq!(past.next_fire(now), None);
    }

    async fn scheduler_fixture() -> (Arc<Engine>, WorkflowScheduler, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let store = Store::connect(&url).await.unwrap();
        store
            .update_gateway_settings(
                Some(&secret::seal("k")),
                "http://127.0.0.1:1",
                "ws://127.0.0.1:1",
            )
            .await
            .unwrap();
        let engine = Arc::new(Engine::new(store, EventHub::default()));
        let scheduler = WorkflowScheduler::new(Arc::clone(&engine));
        (engine, scheduler, dir)
    }

    fn schedule_once_graph(execute_at: &str) -> (Value, Value) {
        (
            json!([
                {"id": "1", "type": "start",
                 "data": {"scheduleType": "once", "executeAt": execute_at}},
                {"id": "2", "type": "log", "data": {"message": "tick"}},
            ]),
            json!([{"source": "1", "target": "2"}]),
        )
    }

    #[tokio::test]
    async fn activate_then_deactivate_round_trip() {
        let (engine, scheduler, _dir) = scheduler_fixture().await;
        let execute_at = (Local::now() + ChronoDuration::hours(1))
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string();
        let (nodes, edges) = schedule_once_graph(&execute_at);
        let workflow = engine
            .store()
            .create_workflow("scheduled", None, &nodes, &edges)
            .await
            .unwrap();

        let (job_id, next) = scheduler.activate_workflow(workflow.id).await.unwrap();
        assert!(next.is_some());
        assert_eq!(scheduler.job_count(), 1);
        assert_eq!(scheduler.next_run_time(&job_id), next);

        let stored = engine.store().get_workflow(workflow.id).await.unwrap().unwrap();
        assert!(stored.is_active);
        assert_eq!(stored.schedule_job_id.as_deref(), Some(job_id.as_str()));

        scheduler.deactivate_workflow(workflow.id).await.unwrap();
        assert_eq!(scheduler.job_count(), 0);
        let stored = engine.store().get_workflow(workflow.id).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.schedule_job_id, None);
    }

    #[tokio::test]
    async fn once_job_fires_and_executes() {
        let (engine, scheduler, _dir) = scheduler_fixture().await;
        let execute_at = (Local::now() + ChronoDuration::milliseconds(300))
            .format("%Y-%m-%dT%H:%M:%S%.3f")
            .to_string();
        let (nodes, edges) = schedule_once_graph(&execute_at);
        let workflow = engine
            .store()
            .create_workflow("fire-once", None, &nodes, &edges)
            .await
            .unwrap();

        let (job_id, _) = scheduler.activate_workflow(workflow.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let executions = engine.store().list_executions(workflow.id, 10).await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(
            executions[0].status,
            crate::runtimes::records::ExecutionStatus::Completed
        );
        // A once job is exhausted after its single fire.
        assert_eq!(scheduler.next_run_time(&job_id), None);
    }

    #[tokio::test]
    async fn restore_rearms_active_workflows_under_stored_ids() {
        let (engine, scheduler, _dir) = scheduler_fixture().await;
        let execute_at = (Local::now() + ChronoDuration::hours(1))
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string();
        let (nodes, edges) = schedule_once_graph(&execute_at);
        let workflow = engine
            .store()
            .create_workflow("restorable", None, &nodes, &edges)
            .await
            .unwrap();
        engine
            .store()
            .set_workflow_activation(workflow.id, true, Some("durable-job-id"))
            .await
            .unwrap();

        let restored = scheduler.restore().await.unwrap();
        assert_eq!(restored, 1);
        assert!(scheduler.next_run_time("durable-job-id").is_some());
    }
}
