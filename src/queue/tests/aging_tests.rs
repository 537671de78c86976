//! Unit tests for wait-based priority aging.

use crate::pipeline::domain::{PipelineStage, TaskId};
use crate::queue::domain::{AGING_INTERVAL_MINUTES, Priority, QueueItem, QueueItemStatus};
use crate::testing::FixedClock;
use chrono::Duration;
use mockable::Clock;
use rstest::rstest;
use serde_json::json;

fn queued_item(priority: Priority, clock: &FixedClock) -> QueueItem {
    QueueItem::new(
        TaskId::new(),
        PipelineStage::Implement,
        json!({}),
        priority,
        "created",
        clock,
    )
}

#[rstest]
fn aged_target_is_none_before_one_interval() {
    let clock = FixedClock::epoch();
    let item = queued_item(Priority::MIN, &clock);
    let now = item.enqueued_at + Duration::minutes(AGING_INTERVAL_MINUTES - 1);

    assert_eq!(item.aged_target(now), None);
}

#[rstest]
#[case(1, 2)]
#[case(2, 3)]
#[case(4, 5)]
#[case(9, 10)]
#[case(20, 10)]
fn aged_target_is_min_plus_intervals_capped_at_max(
    #[case] intervals: i64,
    #[case] expected: u8,
) {
    let clock = FixedClock::epoch();
    let item = queued_item(Priority::MIN, &clock);
    let now = item.enqueued_at + Duration::minutes(intervals * AGING_INTERVAL_MINUTES);

    assert_eq!(item.aged_target(now), Some(Priority::clamped(i64::from(expected))));
}

#[rstest]
fn aged_target_never_lowers_a_manual_boost() {
    let clock = FixedClock::epoch();
    let item = queued_item(Priority::clamped(8), &clock);
    // Two intervals would only reach priority 3.
    let now = item.enqueued_at + Duration::minutes(2 * AGING_INTERVAL_MINUTES);

    assert_eq!(item.aged_target(now), None);
}

#[rstest]
fn aged_target_is_monotone_in_wait_time() {
    let clock = FixedClock::epoch();
    let item = queued_item(Priority::MIN, &clock);

    let mut previous = item.priority;
    for intervals in 1..=12 {
        let now = item.enqueued_at + Duration::minutes(intervals * AGING_INTERVAL_MINUTES);
        let target = item.aged_target(now).unwrap_or(previous);
        assert!(target >= previous, "aging never lowers priority");
        previous = target;
    }
    assert_eq!(previous, Priority::MAX);
}

#[rstest]
fn claimed_items_do_not_age() {
    let clock = FixedClock::epoch();
    let mut item = queued_item(Priority::MIN, &clock);
    item.status = QueueItemStatus::Processing;
    item.started_at = Some(clock.utc());
    let now = item.enqueued_at + Duration::minutes(5 * AGING_INTERVAL_MINUTES);

    assert_eq!(item.aged_target(now), None);
}
