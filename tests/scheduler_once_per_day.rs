//! Auto-digest scheduling across local days and DST changes

mod common;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;
use common::*;
use digest_pipeline::db::models::{OwnerQuota, TaskStatus, TaskType, UserScheduleConfig};
use digest_pipeline::stages::{self, ScheduleAction};
use digest_pipeline::{MemoryStore, PipelineContext, PipelineStore};
use std::sync::Arc;

const OWNER: &str = "dana";

fn schedule(time: &str, timezone: Option<&str>) -> UserScheduleConfig {
    UserScheduleConfig {
        owner_id: OWNER.to_string(),
        enabled: true,
        scheduled_time: time.to_string(),
        timezone: timezone.map(str::to_string),
        last_run_at: None,
    }
}

fn setup(schedule_config: UserScheduleConfig) -> (Arc<MemoryStore>, PipelineContext) {
    let store = Arc::new(MemoryStore::new());
    store.set_quota(paid_quota(OWNER));
    store.add_source(OWNER, "Tech", "https://tech.test/feed.xml");
    store.upsert_schedule(schedule_config);
    let ctx = context(store.clone(), FakePages::new(), FakeFeeds::new(), FakeCompletions::new());
    (store, ctx)
}

fn local(tz: Tz, date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    tz.from_local_datetime(&date.and_hms_opt(hour, minute, 0).unwrap())
        .single()
        .unwrap()
        .with_timezone(&Utc)
}

#[tokio::test]
async fn dispatches_once_per_local_day_across_dst() {
    let (store, ctx) = setup(schedule("08:00", Some("America/New_York")));

    // US clocks spring forward on 2026-03-08
    let first_day = NaiveDate::from_ymd_opt(2026, 3, 6).unwrap();
    let mut dispatch_times = Vec::new();

    for offset in 0..5 {
        let day = first_day + Duration::days(offset);
        let mut dispatched_today = 0;

        // Tick every minute from 07:40 to 08:20 local
        let start = local(New_York, day, 7, 40);
        for minute in 0..=40 {
            let now = start + Duration::minutes(minute);
            let report = stages::tick_at(&ctx, now).await.unwrap();
            assert_eq!(report.checked, 1);
            if report.dispatched == 1 {
                dispatched_today += 1;
                dispatch_times.push(now);
            }
        }
        assert_eq!(dispatched_today, 1, "day {}", day);

        // Let the day's task finish so tomorrow's dispatch is not a conflict
        store
            .fail_tasks_with_status(&TaskStatus::ACTIVE, "test day over")
            .await
            .unwrap();
    }

    for at in &dispatch_times {
        let local_time = at.with_timezone(&New_York);
        assert_eq!((local_time.hour(), local_time.minute()), (7, 55));
    }
    // 07:55 is 12:55 UTC before the change and 11:55 UTC after it
    assert_eq!(dispatch_times[0].hour(), 12);
    assert_eq!(dispatch_times[4].hour(), 11);

    let tasks = store.tasks();
    assert_eq!(tasks.len(), 5);
    assert!(tasks
        .iter()
        .all(|t| t.task_type == TaskType::ScheduledDigest.as_str() && t.time_range() == "today"));
}

#[tokio::test]
async fn scheduled_dispatch_enqueues_execution_and_records_run() {
    let (store, ctx) = setup(schedule("06:30", None));
    let now = Utc.with_ymd_and_hms(2026, 4, 2, 6, 33, 0).unwrap();

    let report = stages::tick_at(&ctx, now).await.unwrap();
    assert_eq!(report.dispatched, 1);
    let task_id = report.decisions[0].task_id.unwrap();

    let messages = store.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].dedupe_key, format!("execute_task:{}", task_id));
    assert_eq!(store.schedule_for(OWNER).unwrap().last_run_at, Some(now));
}

#[tokio::test]
async fn times_outside_tolerance_are_not_due() {
    let (store, ctx) = setup(schedule("23:58", None));

    // No wrap-around past midnight
    let just_after_midnight = Utc.with_ymd_and_hms(2026, 4, 2, 0, 1, 0).unwrap();
    let report = stages::tick_at(&ctx, just_after_midnight).await.unwrap();
    assert_eq!(report.decisions[0].action, ScheduleAction::NotDue);

    let six_minutes_early = Utc.with_ymd_and_hms(2026, 4, 2, 23, 52, 0).unwrap();
    let report = stages::tick_at(&ctx, six_minutes_early).await.unwrap();
    assert_eq!(report.decisions[0].action, ScheduleAction::NotDue);
    assert!(store.tasks().is_empty());
}

#[tokio::test]
async fn owners_without_scheduling_plan_are_skipped() {
    let (store, ctx) = setup(schedule("09:00", None));
    store.set_quota(OwnerQuota {
        owner_id: OWNER.to_string(),
        max_sources: 3,
        can_schedule: false,
    });

    let now = Utc.with_ymd_and_hms(2026, 4, 2, 9, 0, 0).unwrap();
    let report = stages::tick_at(&ctx, now).await.unwrap();
    assert_eq!(report.decisions[0].action, ScheduleAction::NotAllowed);
    assert!(store.tasks().is_empty());
    assert!(store.schedule_for(OWNER).unwrap().last_run_at.is_none());
}

#[tokio::test]
async fn invalid_timezone_is_reported() {
    let (store, ctx) = setup(schedule("09:00", Some("Atlantis/Capital")));

    let now = Utc.with_ymd_and_hms(2026, 4, 2, 9, 0, 0).unwrap();
    let report = stages::tick_at(&ctx, now).await.unwrap();
    assert_eq!(report.decisions[0].action, ScheduleAction::Invalid);
    assert!(report.decisions[0]
        .detail
        .as_deref()
        .unwrap()
        .contains("Atlantis/Capital"));
    assert!(store.tasks().is_empty());
}

#[tokio::test]
async fn active_task_conflict_leaves_last_run_untouched() {
    let (store, ctx) = setup(schedule("09:00", None));
    let active = stages::start_task(&ctx, OWNER, "week", TaskType::Digest)
        .await
        .unwrap();

    let now = Utc.with_ymd_and_hms(2026, 4, 2, 9, 2, 0).unwrap();
    let report = stages::tick_at(&ctx, now).await.unwrap();
    assert_eq!(report.decisions[0].action, ScheduleAction::Conflict);
    assert_eq!(report.decisions[0].task_id, Some(active.id));
    assert!(store.schedule_for(OWNER).unwrap().last_run_at.is_none());

    // Once the task is done the next tick inside the window dispatches
    store
        .update_task(
            active.id,
            &digest_pipeline::db::models::TaskUpdate::status(TaskStatus::Completed),
        )
        .await
        .unwrap();
    let later = now + Duration::minutes(1);
    let report = stages::tick_at(&ctx, later).await.unwrap();
    assert_eq!(report.decisions[0].action, ScheduleAction::Dispatched);
}
