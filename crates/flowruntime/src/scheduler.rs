use crate::runtime::FlowRuntime;
use crate::trigger::TriggerRequest;
use chrono::{DateTime, Utc};
use cron::Schedule;
use flowcore::{EngineError, FlowError, TriggerConfig, Workflow, WorkflowId};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Parses a cron expression. Classic five-field expressions get an implied
/// `0` seconds field and numeric weekdays in the usual 0-7 (Sunday) range.
/// Six and seven field expressions are passed through unchanged.
pub fn parse(expression: &str) -> Result<Schedule, EngineError> {
    Schedule::from_str(&normalize(expression)).map_err(|e| EngineError::InvalidSchedule {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

pub fn normalize(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return fields.join(" ");
    }
    format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3],
        weekday_names(fields[4])
    )
}

fn weekday_names(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            let range = range
                .split('-')
                .map(|day| match day.parse::<usize>() {
                    Ok(n) if n <= 7 => DAY_NAMES[n % 7].to_string(),
                    _ => day.to_string(),
                })
                .collect::<Vec<_>>()
                .join("-");
            match step {
                Some(step) => format!("{}/{}", range, step),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// First tick strictly after `after`. Ticks before `after` are never
/// returned, so missed ticks are not backfilled.
pub fn next_tick(expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, EngineError> {
    parse(expression)?
        .after(&after)
        .next()
        .ok_or_else(|| EngineError::InvalidSchedule {
            expression: expression.to_string(),
            reason: "expression never fires".to_string(),
        })
}

pub fn upcoming(
    expression: &str,
    after: DateTime<Utc>,
    count: usize,
) -> Result<Vec<DateTime<Utc>>, EngineError> {
    Ok(parse(expression)?.after(&after).take(count).collect())
}

/// Cron timers for scheduled workflows, one background task per workflow
#[derive(Clone)]
pub struct Scheduler {
    runtime: FlowRuntime,
    jobs: Arc<Mutex<HashMap<WorkflowId, JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new(runtime: FlowRuntime) -> Self {
        Self {
            runtime,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts (or restarts) the timer for a workflow. Workflows that are
    /// inactive or not schedule-triggered lose any existing timer.
    pub async fn schedule(&self, workflow: &Workflow) -> Result<bool, EngineError> {
        let cron = match &workflow.trigger {
            TriggerConfig::Schedule { cron } if workflow.is_active => cron,
            _ => {
                self.unschedule(workflow.id).await;
                return Ok(false);
            }
        };
        let schedule = parse(cron)?;

        let mut jobs = self.jobs.lock().await;
        if let Some(previous) = jobs.remove(&workflow.id) {
            previous.abort();
        }

        tracing::info!("Scheduling workflow {} with '{}'", workflow.id, cron);
        let handle = tokio::spawn(run_job(self.runtime.clone(), workflow.id, schedule));
        jobs.insert(workflow.id, handle);
        Ok(true)
    }

    pub async fn unschedule(&self, workflow_id: WorkflowId) -> bool {
        match self.jobs.lock().await.remove(&workflow_id) {
            Some(handle) => {
                tracing::info!("Unscheduling workflow {}", workflow_id);
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub async fn is_scheduled(&self, workflow_id: WorkflowId) -> bool {
        self.jobs.lock().await.contains_key(&workflow_id)
    }

    /// Registers every active schedule-triggered workflow. Returns how many
    /// timers were started.
    pub async fn load_active(&self) -> Result<usize, FlowError> {
        let mut started = 0;
        for workflow in self.runtime.list_workflows().await? {
            match self.schedule(&workflow).await {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("Workflow {} not scheduled: {}", workflow.id, e),
            }
        }
        tracing::info!("Loaded {} scheduled workflows", started);
        Ok(started)
    }

    pub async fn shutdown(&self) {
        for (_, handle) in self.jobs.lock().await.drain() {
            handle.abort();
        }
    }
}

async fn run_job(runtime: FlowRuntime, workflow_id: WorkflowId, schedule: Schedule) {
    loop {
        let now = Utc::now();
        let Some(next) = schedule.after(&now).next() else {
            tracing::info!("Schedule for workflow {} has no further ticks", workflow_id);
            return;
        };
        tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;

        match runtime.submit(TriggerRequest::schedule(workflow_id, next)).await {
            Ok(execution_id) => {
                tracing::info!("Scheduled run {} of workflow {}", execution_id, workflow_id)
            }
            Err(FlowError::Engine(EngineError::WorkflowNotFound(_))) => {
                tracing::warn!("Workflow {} is gone, stopping its schedule", workflow_id);
                return;
            }
            Err(e) => tracing::warn!("Scheduled run of workflow {} rejected: {}", workflow_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_expressions_gain_seconds() {
        assert_eq!(normalize("*/15 * * * *"), "0 */15 * * * *");
        assert_eq!(normalize("0 8 * * 1-5"), "0 0 8 * * Mon-Fri");
        assert_eq!(normalize("0 0 8 * * Mon *"), "0 0 8 * * Mon *");
    }

    #[test]
    fn weekday_numbers_map_to_names() {
        assert_eq!(weekday_names("0,7"), "Sun,Sun");
        assert_eq!(weekday_names("*/2"), "*/2");
        assert_eq!(weekday_names("MON"), "MON");
    }

    #[test]
    fn next_tick_is_strictly_after() {
        let at = Utc.with_ymd_and_hms(2024, 9, 2, 10, 7, 0).unwrap();
        let next = next_tick("*/15 * * * *", at).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 9, 2, 10, 15, 0).unwrap());

        let on_tick = Utc.with_ymd_and_hms(2024, 9, 2, 10, 15, 0).unwrap();
        assert_eq!(
            next_tick("*/15 * * * *", on_tick).unwrap(),
            Utc.with_ymd_and_hms(2024, 9, 2, 10, 30, 0).unwrap()
        );
    }

    #[test]
    fn weekday_schedule_skips_weekend() {
        // 2024-09-06 is a Friday
        let friday_evening = Utc.with_ymd_and_hms(2024, 9, 6, 18, 0, 0).unwrap();
        let next = next_tick("0 8 * * 1-5", friday_evening).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 9, 9, 8, 0, 0).unwrap());
    }

    #[test]
    fn invalid_expressions_are_rejected() {
        assert!(matches!(
            parse("every monday"),
            Err(EngineError::InvalidSchedule { .. })
        ));
    }
}
