//! 端到端整链验证：典型流水线从源到收尾的全程行为。
//!
//! # 说明
//! - `try_filter` 用例的谓词在零值上抛错；零值排在偶数之后，
//!   确保失败抵达前能观察到通过闸门的值。

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ripple_core::{
    BoxError, Demand, Publisher, PublisherExt, SchedulerStride, just, sequence,
};
use ripple_testkit::{ManualPublisher, TestSubscriber, VirtualScheduler, VirtualStride};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("除数为零")]
struct DivisionByZeroError;

/// `sequence | try_last_where | catch(just)` → `[-1]`。
#[test]
fn try_last_where_failure_recovers_with_catch() {
    let subscriber: TestSubscriber<i32, Infallible> = TestSubscriber::unlimited();
    sequence(vec![5, 4, 3, 2, 1, 0, 9, 8, 7, 6])
        .try_last_where(|value| {
            if *value == 0 {
                Err(DivisionByZeroError)
            } else {
                Ok(*value != 0)
            }
        })
        .catch(|_error| just(-1))
        .subscribe(subscriber.clone());

    assert_eq!(subscriber.values(), vec![-1]);
    assert!(subscriber.is_finished());
    assert!(subscriber.violations().is_empty());
}

/// `sequence | map(伪随机) | share`：两个订阅者看到同一组值。
#[test]
fn share_fans_out_one_upstream_drain() {
    // 确定性伪随机：线性同余步进，证明上游只被排水一次。
    let state = Arc::new(AtomicU64::new(0x2545_F491));
    let shared = sequence(1..=3)
        .map(move |_| {
            let next = state
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |value| {
                    Some(value.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407))
                })
                .expect("fetch_update 的闭包永远返回 Some");
            next
        })
        .share();

    let first: TestSubscriber<u64, Infallible> = TestSubscriber::unlimited();
    let second: TestSubscriber<u64, Infallible> = TestSubscriber::unlimited();
    shared.subscribe(first.clone());
    shared.subscribe(second.clone());

    shared.connect();

    assert_eq!(first.values().len(), 3);
    assert_eq!(first.values(), second.values());
    assert!(first.is_finished());
    assert!(second.is_finished());
}

/// `just(DiceRoll) | map3` → `[(2,4,3)]`。
#[test]
fn three_field_projection_builds_a_tuple() {
    #[derive(Clone)]
    struct DiceRoll {
        die1: u8,
        die2: u8,
        die3: u8,
    }

    let subscriber: TestSubscriber<(u8, u8, u8), Infallible> = TestSubscriber::unlimited();
    just(DiceRoll {
        die1: 2,
        die2: 4,
        die3: 3,
    })
    .map3(|roll| roll.die1, |roll| roll.die2, |roll| roll.die3)
    .subscribe(subscriber.clone());

    assert_eq!(subscriber.values(), vec![(2, 4, 3)]);
    assert!(subscriber.is_finished());
}

/// `throttle(10s, latest)`，值到达于 t=13..17 → `[1, 5]`。
#[test]
fn throttle_timeline_keeps_head_and_latest() {
    let scheduler = VirtualScheduler::new();
    let probe: ManualPublisher<i32, Infallible> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, Infallible> = TestSubscriber::unlimited();
    probe
        .clone()
        .throttle(VirtualStride::seconds(10), scheduler.clone(), true)
        .subscribe(subscriber.clone());

    scheduler.advance(VirtualStride::seconds(13));
    probe.send(1);
    for value in 2..=5 {
        scheduler.advance(VirtualStride::seconds(1));
        probe.send(value);
    }
    // 收集窗口拉满，兑现挂起的最新值。
    scheduler.advance(VirtualStride::seconds(20));

    assert_eq!(subscriber.values(), vec![1, 5]);
}

/// `sequence 0..=10 | collect_by_count(5)` → 两满批一残批。
#[test]
fn collect_by_count_batches_of_five() {
    let subscriber: TestSubscriber<Vec<i32>, Infallible> = TestSubscriber::unlimited();
    sequence(0..=10).collect_by_count(5).subscribe(subscriber.clone());

    assert_eq!(
        subscriber.values(),
        vec![vec![0, 1, 2, 3, 4], vec![5, 6, 7, 8, 9], vec![10]]
    );
    assert!(subscriber.is_finished());
}

/// `try_filter`（零值抛错）→ 值 `[2, 4]`，终结 `Failed(DivisionByZeroError)`。
#[test]
fn try_filter_emits_evens_then_fails() {
    let subscriber: TestSubscriber<i32, BoxError> = TestSubscriber::unlimited();
    sequence(vec![1, 2, 3, 4, 5, 0, 6])
        .try_filter(|value| {
            if *value == 0 {
                Err(DivisionByZeroError)
            } else {
                Ok(*value % 2 == 0)
            }
        })
        .subscribe(subscriber.clone());

    assert_eq!(subscriber.values(), vec![2, 4]);
    assert_eq!(subscriber.failure_text(), Some("除数为零".to_string()));
}

/// 需求守恒贯穿整条链：上游只看见下游声明过的需求。
#[test]
fn demand_conservation_across_a_chain() {
    let probe: ManualPublisher<i32, DivisionByZeroError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, DivisionByZeroError> =
        TestSubscriber::new(Demand::finite(2), Demand::NONE);
    probe
        .clone()
        .filter(|value| value % 2 == 0)
        .map(|value| value * 2)
        .subscribe(subscriber.clone());

    assert_eq!(probe.total_requested(), Demand::finite(2));
    probe.send(2);
    assert_eq!(probe.send(3), Demand::finite(1));
    probe.send(4);

    // 投递计数（2）不超过下游累计需求（2 + 补拉不计入下游需求）。
    assert_eq!(subscriber.values(), vec![4, 8]);
}
