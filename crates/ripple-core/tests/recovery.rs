//! 换血族验证：catch / try_catch / concatenate / retry 的状态机与需求重放。

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ripple_core::{
    BoxError, Completion, Demand, Publisher, PublisherExt, from_result, just, sequence,
};
use ripple_testkit::{ManualPublisher, TestSubscriber};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("恢复测试错误")]
struct RecoverError;

/// `catch`：前段失败换入替换流，下游全程只握手一次。
#[test]
fn catch_swaps_in_the_replacement() {
    let probe: ManualPublisher<i32, RecoverError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, Infallible> = TestSubscriber::unlimited();
    probe
        .clone()
        .catch(|_error| sequence(vec![100, 101]))
        .subscribe(subscriber.clone());

    probe.send(1);
    probe.complete(Completion::Failed(RecoverError));

    assert_eq!(subscriber.values(), vec![1, 100, 101]);
    assert!(subscriber.is_finished());
    assert!(subscriber.violations().is_empty());
}

/// `catch`：前段正常结束不触发处理器。
#[test]
fn catch_is_inert_on_finished() {
    let called = Arc::new(AtomicU64::new(0));
    let handler_called = Arc::clone(&called);
    let subscriber: TestSubscriber<i32, Infallible> = TestSubscriber::unlimited();
    sequence(vec![1, 2])
        .map_error(|_: Infallible| RecoverError)
        .catch(move |_| {
            handler_called.fetch_add(1, Ordering::SeqCst);
            just(0)
        })
        .subscribe(subscriber.clone());

    assert_eq!(subscriber.values(), vec![1, 2]);
    assert_eq!(called.load(Ordering::SeqCst), 0);
}

/// `catch` 需求重放：前段失败瞬间的未满足需求原样交给替换上游。
#[test]
fn catch_replays_outstanding_demand_to_the_replacement() {
    let pre: ManualPublisher<i32, RecoverError> = ManualPublisher::new();
    let post: ManualPublisher<i32, RecoverError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, RecoverError> =
        TestSubscriber::new(Demand::finite(5), Demand::NONE);
    let replacement = post.clone();
    pre.clone()
        .catch(move |_| replacement.clone())
        .subscribe(subscriber.clone());

    assert_eq!(pre.requests(), vec![Demand::finite(5)]);
    pre.send(1);
    pre.send(2);
    pre.complete(Completion::Failed(RecoverError));

    // 5 - 2 = 3：替换上游在握手时收到重放需求。
    assert_eq!(post.requests(), vec![Demand::finite(3)]);
    post.send(10);
    post.complete(Completion::Finished);
    assert_eq!(subscriber.values(), vec![1, 2, 10]);
    assert!(subscriber.is_finished());
}

/// `try_catch`：处理器自身失败立即成为下游失败。
#[test]
fn try_catch_handler_failure_fails_downstream() {
    let probe: ManualPublisher<i32, RecoverError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, BoxError> = TestSubscriber::unlimited();
    probe
        .clone()
        .try_catch(|_error| Err::<ripple_core::Just<i32>, _>(RecoverError))
        .subscribe(subscriber.clone());

    probe.complete(Completion::Failed(RecoverError));
    assert!(subscriber.is_failed());
    assert_eq!(subscriber.failure_text(), Some("恢复测试错误".to_string()));
}

/// `concatenate`：前缀尽后接后缀，剩余需求重放。
#[test]
fn concatenate_runs_prefix_then_suffix() {
    let prefix: ManualPublisher<i32, RecoverError> = ManualPublisher::new();
    let suffix: ManualPublisher<i32, RecoverError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, RecoverError> =
        TestSubscriber::new(Demand::finite(4), Demand::NONE);
    prefix
        .clone()
        .concatenate(suffix.clone())
        .subscribe(subscriber.clone());

    prefix.send(1);
    prefix.complete(Completion::Finished);
    assert!(!subscriber.is_terminated());

    assert_eq!(suffix.requests(), vec![Demand::finite(3)]);
    suffix.send(2);
    suffix.complete(Completion::Finished);

    assert_eq!(subscriber.values(), vec![1, 2]);
    assert!(subscriber.is_finished());
    assert!(subscriber.violations().is_empty());
}

/// `concatenate`：前缀失败原样转发，后缀永不被订阅。
#[test]
fn concatenate_prefix_failure_skips_suffix() {
    let prefix: ManualPublisher<i32, RecoverError> = ManualPublisher::new();
    let suffix: ManualPublisher<i32, RecoverError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, RecoverError> = TestSubscriber::unlimited();
    prefix
        .clone()
        .concatenate(suffix.clone())
        .subscribe(subscriber.clone());

    prefix.complete(Completion::Failed(RecoverError));
    assert_eq!(subscriber.completion(), Some(Completion::Failed(RecoverError)));
    assert_eq!(suffix.subscriber_count(), 0);
}

/// `retry`：失败后对同一上游重订，存活需求被重放。
#[test]
fn retry_replays_live_demand_on_reattach() {
    let probe: ManualPublisher<i32, RecoverError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, RecoverError> =
        TestSubscriber::new(Demand::finite(6), Demand::NONE);
    probe.clone().retry(2).subscribe(subscriber.clone());

    assert_eq!(probe.requests(), vec![Demand::finite(6)]);
    probe.send(1);
    probe.send(2);
    probe.complete(Completion::Failed(RecoverError));

    // 重订形成第二条订阅边：6 - 2 = 4 被重放。
    assert_eq!(probe.subscriber_count(), 2);
    assert_eq!(probe.requests_of(1), vec![Demand::finite(4)]);
    assert!(subscriber.violations().is_empty(), "下游不得见到第二次握手");
    probe.send(3);
    probe.complete(Completion::Finished);
    assert_eq!(subscriber.values(), vec![1, 2, 3]);
    assert!(subscriber.is_finished());
}

/// `retry`：额度耗尽后失败原样下发。
#[test]
fn retry_exhaustion_forwards_the_failure() {
    let subscriber: TestSubscriber<i32, RecoverError> = TestSubscriber::unlimited();
    from_result(Err::<i32, _>(RecoverError)).retry(3).subscribe(subscriber.clone());

    // 同步失败的上游在 subscribe 调用栈内触发重订递归，坍缩为循环后耗尽额度。
    assert_eq!(subscriber.completion(), Some(Completion::Failed(RecoverError)));
    assert!(subscriber.violations().is_empty());
}

/// `retry` + `catch`：重试后仍失败可继续被恢复。
#[test]
fn retry_composes_with_catch() {
    let subscriber: TestSubscriber<i32, Infallible> = TestSubscriber::unlimited();
    from_result(Err::<i32, _>(RecoverError))
        .retry(1)
        .catch(|_| just(-7))
        .subscribe(subscriber.clone());

    assert_eq!(subscriber.values(), vec![-7]);
    assert!(subscriber.is_finished());
}
