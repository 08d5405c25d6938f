use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};

use blot_sync::clock::ManualClock;
use blot_sync::scheduler::{FireCallback, SchedulerRegistry};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn counting(counter: &Arc<AtomicUsize>) -> FireCallback {
    let counter = counter.clone();
    Box::new(move || {
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    })
}

#[tokio::test(start_paused = true)]
async fn test_reregistering_replaces_job_and_fires_once() {
    let clock = Arc::new(ManualClock::new(start()));
    let scheduler = SchedulerRegistry::new(clock.clone());
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    assert!(scheduler.register("blog1", "/a.md", start() + Duration::seconds(10), counting(&first)));
    assert!(scheduler.register("blog1", "/A.md", start() + Duration::seconds(20), counting(&second)));
    assert_eq!(scheduler.len(), 1);
    assert_eq!(
        scheduler.fire_at("blog1", "/a.md"),
        Some(start() + Duration::seconds(20))
    );

    clock.advance(Duration::seconds(30));
    tokio::time::sleep(StdDuration::from_secs(30)).await;

    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert!(scheduler.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_past_dates_leave_no_job() {
    let clock = Arc::new(ManualClock::new(start()));
    let scheduler = SchedulerRegistry::new(clock);
    let fired = Arc::new(AtomicUsize::new(0));

    scheduler.register("blog1", "/a.md", start() + Duration::hours(1), counting(&fired));
    let registered = scheduler.register("blog1", "/a.md", start(), counting(&fired));

    assert!(!registered);
    assert!(scheduler.is_empty(), "the earlier job is cancelled too");
    tokio::time::sleep(StdDuration::from_secs(7200)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_is_idempotent() {
    let clock = Arc::new(ManualClock::new(start()));
    let scheduler = SchedulerRegistry::new(clock);
    let fired = Arc::new(AtomicUsize::new(0));

    scheduler.register("blog1", "/a.md", start() + Duration::seconds(5), counting(&fired));
    assert!(scheduler.cancel("blog1", "/a.md"));
    assert!(!scheduler.cancel("blog1", "/a.md"));
    assert!(!scheduler.cancel("blog2", "/never.md"));

    tokio::time::sleep(StdDuration::from_secs(10)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_jobs_for_different_blogs_are_independent() {
    let clock = Arc::new(ManualClock::new(start()));
    let scheduler = SchedulerRegistry::new(clock);
    let fired = Arc::new(AtomicUsize::new(0));

    scheduler.register("blog1", "/a.md", start() + Duration::seconds(5), counting(&fired));
    scheduler.register("blog2", "/a.md", start() + Duration::seconds(5), counting(&fired));
    assert_eq!(scheduler.len(), 2);

    scheduler.cancel("blog1", "/a.md");
    tokio::time::sleep(StdDuration::from_secs(10)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_register_without_runtime_is_refused() {
    let clock = Arc::new(ManualClock::new(start()));
    let scheduler = SchedulerRegistry::new(clock);
    let fired = Arc::new(AtomicUsize::new(0));

    assert!(!scheduler.register("blog1", "/a.md", start() + Duration::seconds(5), counting(&fired)));
    assert!(scheduler.is_empty());
}
