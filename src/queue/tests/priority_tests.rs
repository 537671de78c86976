//! Unit tests for priority clamping and arithmetic.

use crate::queue::domain::Priority;
use rstest::rstest;

#[rstest]
#[case(-5, 1)]
#[case(0, 1)]
#[case(1, 1)]
#[case(5, 5)]
#[case(10, 10)]
#[case(11, 10)]
#[case(i64::MAX, 10)]
#[case(i64::MIN, 1)]
fn clamped_keeps_values_in_band(#[case] input: i64, #[case] expected: u8) {
    assert_eq!(Priority::clamped(input).value(), expected);
}

#[rstest]
fn named_constants_bound_the_band() {
    assert_eq!(Priority::MIN.value(), 1);
    assert_eq!(Priority::MAX.value(), 10);
    assert_eq!(Priority::DEFAULT.value(), 5);
    assert!(Priority::MIN < Priority::DEFAULT);
    assert!(Priority::DEFAULT < Priority::MAX);
}

#[rstest]
#[case(5, 2, 7)]
#[case(9, 1, 10)]
#[case(9, 5, 10)]
#[case(10, 1, 10)]
fn boosted_by_saturates_at_the_maximum(
    #[case] start: i64,
    #[case] delta: u8,
    #[case] expected: u8,
) {
    assert_eq!(Priority::clamped(start).boosted_by(delta).value(), expected);
}

#[rstest]
fn max_with_picks_the_higher_priority() {
    let low = Priority::clamped(3);
    let high = Priority::clamped(8);

    assert_eq!(low.max_with(high), high);
    assert_eq!(high.max_with(low), high);
}
