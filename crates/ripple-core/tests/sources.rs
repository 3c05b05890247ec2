//! 源阶段行为验证：标量三件套、空源与序列源的需求纪律。

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ripple_core::{
    Completion, Demand, Publisher, PublisherExt, empty, from_optional, from_result, just, never,
    sequence,
};
use ripple_testkit::{Record, TestSubscriber};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("源错误")]
struct SourceError;

/// `just`：首个正需求换来值与 `Finished`。
#[test]
fn just_delivers_value_then_finishes() {
    let subscriber: TestSubscriber<i32, Infallible> = TestSubscriber::unlimited();
    just(42).subscribe(subscriber.clone());

    assert_eq!(subscriber.values(), vec![42]);
    assert!(subscriber.is_finished());
    assert!(subscriber.violations().is_empty());
}

/// `just`：没有需求就没有投递。
#[test]
fn just_withholds_value_until_requested() {
    let subscriber: TestSubscriber<i32, Infallible> = TestSubscriber::passive();
    just(42).subscribe(subscriber.clone());

    assert_eq!(subscriber.values(), Vec::<i32>::new());
    assert!(!subscriber.is_terminated());

    subscriber.request(Demand::finite(1));
    assert_eq!(subscriber.values(), vec![42]);
    assert!(subscriber.is_finished());
}

/// `from_result` 失败分支：订阅先行，失败立即到达。
#[test]
fn result_error_fails_without_demand() {
    let subscriber: TestSubscriber<i32, SourceError> = TestSubscriber::passive();
    from_result(Err::<i32, _>(SourceError)).subscribe(subscriber.clone());

    assert_eq!(
        subscriber.records(),
        vec![
            Record::Subscription,
            Record::Completion(Completion::Failed(SourceError))
        ]
    );
}

/// `from_result` 成功分支等同 `just`。
#[test]
fn result_value_behaves_like_just() {
    let subscriber: TestSubscriber<i32, SourceError> = TestSubscriber::unlimited();
    from_result(Ok::<_, SourceError>(5)).subscribe(subscriber.clone());

    assert_eq!(subscriber.values(), vec![5]);
    assert!(subscriber.is_finished());
}

/// `from_optional`：`None` 立即正常结束。
#[test]
fn optional_none_finishes_immediately() {
    let subscriber: TestSubscriber<i32, Infallible> = TestSubscriber::passive();
    from_optional(None::<i32>).subscribe(subscriber.clone());

    assert!(subscriber.is_finished());
    assert_eq!(subscriber.values(), Vec::<i32>::new());
}

/// `empty` 立即结束；`never` 永不发声。
#[test]
fn empty_and_never_termination() {
    let finished: TestSubscriber<i32, Infallible> = TestSubscriber::unlimited();
    empty::<i32>().subscribe(finished.clone());
    assert!(finished.is_finished());

    let silent: TestSubscriber<i32, Infallible> = TestSubscriber::unlimited();
    never::<i32>().subscribe(silent.clone());
    assert!(!silent.is_terminated());
    assert_eq!(
        silent.records(),
        vec![Record::Subscription]
    );
}

/// 序列源：投递严格受需求约束，逐次补拉。
#[test]
fn sequence_respects_demand() {
    let subscriber: TestSubscriber<i32, Infallible> = TestSubscriber::passive();
    sequence(vec![1, 2, 3, 4]).subscribe(subscriber.clone());

    subscriber.request(Demand::finite(2));
    assert_eq!(subscriber.values(), vec![1, 2]);
    assert!(!subscriber.is_terminated());

    subscriber.request(Demand::finite(5));
    assert_eq!(subscriber.values(), vec![1, 2, 3, 4]);
    assert!(subscriber.is_finished());
}

/// 序列源：`receive_value` 内部的递归 `request` 并入在途排水循环。
#[test]
fn sequence_coalesces_reentrant_requests() {
    struct Reentrant {
        seen: Arc<AtomicU64>,
        subscription: std::sync::Mutex<Option<ripple_core::SharedSubscription>>,
    }

    impl ripple_core::Subscriber for Reentrant {
        type Input = u64;
        type Failure = Infallible;

        fn receive_subscription(&self, subscription: ripple_core::SharedSubscription) {
            *self.subscription.lock().unwrap() = Some(subscription.clone());
            subscription.request(Demand::finite(1));
        }

        fn receive_value(&self, _value: u64) -> Demand {
            let seen = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
            if seen < 5 {
                // 投递回调内再请求：必须被并入在途循环而非递归展开。
                let subscription = self.subscription.lock().unwrap().clone();
                if let Some(subscription) = subscription {
                    subscription.request(Demand::finite(1));
                }
            }
            Demand::NONE
        }

        fn receive_completion(&self, _completion: Completion<Infallible>) {}
    }

    let seen = Arc::new(AtomicU64::new(0));
    sequence(0u64..).subscribe(Reentrant {
        seen: Arc::clone(&seen),
        subscription: std::sync::Mutex::new(None),
    });
    assert_eq!(seen.load(Ordering::SeqCst), 5);
}

/// 序列源：取消后不再投递（无限序列不会失控）。
#[test]
fn sequence_cancel_stops_delivery() {
    let subscriber: TestSubscriber<u64, Infallible> = TestSubscriber::passive();
    sequence(0u64..).subscribe(subscriber.clone());

    subscriber.request(Demand::finite(3));
    assert_eq!(subscriber.values(), vec![0, 1, 2]);

    subscriber.cancel();
    subscriber.request(Demand::finite(3));
    assert_eq!(subscriber.values(), vec![0, 1, 2]);
    assert!(!subscriber.is_terminated());
}

/// 源 + 折叠族冒烟：`count` / `first` 在序列源上的端到端。
#[test]
fn sequence_feeds_reduction_family() {
    let counted: TestSubscriber<u64, Infallible> = TestSubscriber::unlimited();
    sequence(vec![9, 9, 9]).count().subscribe(counted.clone());
    assert_eq!(counted.values(), vec![3]);
    assert!(counted.is_finished());

    let first: TestSubscriber<i32, Infallible> = TestSubscriber::unlimited();
    sequence(vec![7, 8, 9]).first().subscribe(first.clone());
    assert_eq!(first.values(), vec![7]);
    assert!(first.is_finished());
}
