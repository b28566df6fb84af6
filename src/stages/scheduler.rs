//! Auto-digest scheduler
//!
//! Dispatches a daily digest task for owners whose scheduled local time falls
//! inside the tolerance band, at most once per local calendar day.

use super::digest::local_date;
use super::{orchestrator, resolve_quota};
use crate::context::PipelineContext;
use crate::db::models::{TaskType, UserScheduleConfig};
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Window used by scheduled tasks
const SCHEDULED_TIME_RANGE: &str = "today";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleAction {
    Dispatched,
    NotDue,
    AlreadyRan,
    NotAllowed,
    Conflict,
    Invalid,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleDecision {
    pub owner_id: String,
    pub action: ScheduleAction,
    pub task_id: Option<i64>,
    pub detail: Option<String>,
}

impl ScheduleDecision {
    fn new(owner_id: &str, action: ScheduleAction) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            action,
            task_id: None,
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerReport {
    pub checked: usize,
    pub dispatched: usize,
    pub decisions: Vec<ScheduleDecision>,
}

/// One scheduler pass at the current time
pub async fn tick(ctx: &PipelineContext) -> Result<SchedulerReport> {
    tick_at(ctx, Utc::now()).await
}

/// One scheduler pass as if the clock read `now`
pub async fn tick_at(ctx: &PipelineContext, now: DateTime<Utc>) -> Result<SchedulerReport> {
    let schedules = ctx.store.enabled_schedules().await?;
    let mut report = SchedulerReport::default();

    for schedule in &schedules {
        report.checked += 1;
        let decision = evaluate(ctx, schedule, now).await;
        if decision.action == ScheduleAction::Dispatched {
            report.dispatched += 1;
        }
        report.decisions.push(decision);
    }

    if report.dispatched > 0 {
        info!(
            "Scheduler dispatched {} of {} enabled schedule(s)",
            report.dispatched, report.checked
        );
    } else {
        debug!("Scheduler checked {} schedule(s), none due", report.checked);
    }

    Ok(report)
}

async fn evaluate(
    ctx: &PipelineContext,
    schedule: &UserScheduleConfig,
    now: DateTime<Utc>,
) -> ScheduleDecision {
    let owner_id = schedule.owner_id.as_str();

    let tz = match parse_timezone(schedule.timezone.as_deref()) {
        Ok(tz) => tz,
        Err(e) => {
            warn!("Skipping schedule for {}: {}", owner_id, e);
            return ScheduleDecision::new(owner_id, ScheduleAction::Invalid).with_detail(e.to_string());
        }
    };

    let Some(scheduled_minutes) = parse_minutes_of_day(&schedule.scheduled_time) else {
        warn!(
            "Skipping schedule for {}: invalid time '{}'",
            owner_id, schedule.scheduled_time
        );
        return ScheduleDecision::new(owner_id, ScheduleAction::Invalid)
            .with_detail(format!("invalid scheduled time '{}'", schedule.scheduled_time));
    };

    let local_now = now.with_timezone(&tz);
    let current_minutes = i64::from(local_now.hour() * 60 + local_now.minute());
    if (current_minutes - scheduled_minutes).abs() > ctx.config.schedule_tolerance_minutes {
        return ScheduleDecision::new(owner_id, ScheduleAction::NotDue);
    }

    let today = local_now.date_naive();
    if schedule
        .last_run_at
        .is_some_and(|last| local_date(last, tz) == today)
    {
        return ScheduleDecision::new(owner_id, ScheduleAction::AlreadyRan);
    }

    match resolve_quota(ctx, owner_id).await {
        Ok(quota) if !quota.can_schedule => {
            return ScheduleDecision::new(owner_id, ScheduleAction::NotAllowed)
                .with_detail("plan does not include scheduled digests");
        }
        Ok(_) => {}
        Err(e) => {
            error!("Could not load quota for {}: {}", owner_id, e);
            return ScheduleDecision::new(owner_id, ScheduleAction::Failed).with_detail(e.to_string());
        }
    }

    let task = match orchestrator::submit_task(ctx, owner_id, SCHEDULED_TIME_RANGE, TaskType::ScheduledDigest).await {
        Ok(task) => task,
        Err(PipelineError::Conflict {
            existing_task_id, ..
        }) => {
            info!(
                "Skipping scheduled digest for {}: task {} still active",
                owner_id, existing_task_id
            );
            let mut decision = ScheduleDecision::new(owner_id, ScheduleAction::Conflict);
            decision.task_id = Some(existing_task_id);
            return decision;
        }
        Err(e) => {
            error!("Scheduled dispatch for {} failed: {}", owner_id, e);
            return ScheduleDecision::new(owner_id, ScheduleAction::Failed).with_detail(e.to_string());
        }
    };

    // Last run is recorded only once the dispatch went through
    if let Err(e) = ctx.store.record_schedule_run(owner_id, now).await {
        error!("Could not record schedule run for {}: {}", owner_id, e);
    }

    info!(
        "Dispatched scheduled digest task {} for {} at {} ({})",
        task.id,
        owner_id,
        local_now.format("%H:%M"),
        tz.name()
    );

    let mut decision = ScheduleDecision::new(owner_id, ScheduleAction::Dispatched);
    decision.task_id = Some(task.id);
    decision
}

fn parse_timezone(name: Option<&str>) -> Result<Tz> {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| PipelineError::InvalidTimezone(name.to_string())),
        None => Ok(Tz::UTC),
    }
}

/// Minutes since local midnight for `HH:MM` (seconds are ignored)
fn parse_minutes_of_day(value: &str) -> Option<i64> {
    let mut parts = value.trim().split(':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    Some(hours * 60 + minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_time_parsing() {
        assert_eq!(parse_minutes_of_day("08:30"), Some(510));
        assert_eq!(parse_minutes_of_day("23:59:00"), Some(1439));
        assert_eq!(parse_minutes_of_day("24:00"), None);
        assert_eq!(parse_minutes_of_day("8"), None);
        assert_eq!(parse_minutes_of_day("ab:cd"), None);
    }

    #[test]
    fn timezone_parsing_rejects_unknown_zones() {
        assert_eq!(parse_timezone(None).unwrap(), Tz::UTC);
        assert_eq!(
            parse_timezone(Some("America/New_York")).unwrap(),
            chrono_tz::America::New_York
        );
        assert!(matches!(
            parse_timezone(Some("Mars/Olympus")),
            Err(PipelineError::InvalidTimezone(_))
        ));
    }
}
