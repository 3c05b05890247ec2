//! 嵌套族验证：switch_to_latest 的世代纪律与 flat_map 的并发仲裁。

use ripple_core::{Completion, Demand, Publisher, PublisherExt, sequence};
use ripple_testkit::{ManualPublisher, TestSubscriber};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("嵌套测试错误")]
struct NestError;

type Inner = ManualPublisher<i32, NestError>;

/// 新内层到来后，旧内层被取消，其迟到的值一律丢弃。
#[test]
fn switch_discards_stale_inner_signals() {
    let outer: ManualPublisher<Inner, NestError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, NestError> = TestSubscriber::unlimited();
    outer.clone().switch_to_latest().subscribe(subscriber.clone());

    // 外层以 Unlimited 吸入内层发布者。
    assert_eq!(outer.requests(), vec![Demand::UNLIMITED]);

    let first: Inner = ManualPublisher::new();
    outer.send(first.clone());
    first.send(1);

    let second: Inner = ManualPublisher::new();
    outer.send(second.clone());
    assert!(first.is_cancelled());

    // 旧世代迟到的值与终结都不可见。
    first.send(99);
    first.complete(Completion::Failed(NestError));
    second.send(2);

    assert_eq!(subscriber.values(), vec![1, 2]);
    assert!(!subscriber.is_terminated());
    assert!(subscriber.violations().is_empty());
}

/// 外层尽而内层仍活：等内层结束才收尾。
#[test]
fn switch_waits_for_the_running_inner() {
    let outer: ManualPublisher<Inner, NestError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, NestError> = TestSubscriber::unlimited();
    outer.clone().switch_to_latest().subscribe(subscriber.clone());

    let inner: Inner = ManualPublisher::new();
    outer.send(inner.clone());
    outer.complete(Completion::Finished);
    assert!(!subscriber.is_terminated());

    inner.send(5);
    inner.complete(Completion::Finished);
    assert_eq!(subscriber.values(), vec![5]);
    assert!(subscriber.is_finished());
}

/// 外层尽且无内层：立即收尾。
#[test]
fn switch_finishes_immediately_without_inner() {
    let outer: ManualPublisher<Inner, NestError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, NestError> = TestSubscriber::unlimited();
    outer.clone().switch_to_latest().subscribe(subscriber.clone());

    outer.complete(Completion::Finished);
    assert!(subscriber.is_finished());
}

/// 内层失败立即终结并取消外层。
#[test]
fn switch_inner_failure_cancels_the_outer() {
    let outer: ManualPublisher<Inner, NestError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, NestError> = TestSubscriber::unlimited();
    outer.clone().switch_to_latest().subscribe(subscriber.clone());

    let inner: Inner = ManualPublisher::new();
    outer.send(inner.clone());
    inner.complete(Completion::Failed(NestError));

    assert!(outer.is_cancelled());
    assert_eq!(subscriber.completion(), Some(Completion::Failed(NestError)));
}

/// switch 的需求记账全局共享：跨内层投递逐个扣减，新内层握手时重放。
#[test]
fn switch_demand_survives_the_swap() {
    let outer: ManualPublisher<Inner, NestError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, NestError> =
        TestSubscriber::new(Demand::finite(5), Demand::NONE);
    outer.clone().switch_to_latest().subscribe(subscriber.clone());

    let first: Inner = ManualPublisher::new();
    outer.send(first.clone());
    assert_eq!(first.requests(), vec![Demand::finite(5)]);
    first.send(1);
    first.send(2);

    let second: Inner = ManualPublisher::new();
    outer.send(second.clone());
    // 5 - 2 = 3 重放给新内层。
    assert_eq!(second.requests(), vec![Demand::finite(3)]);
}

/// flat_map：外层按 max_publishers 吸入；零需求时值入缓冲，需求到来排水。
#[test]
fn flat_map_buffers_until_demand_arrives() {
    let outer: ManualPublisher<i32, NestError> = ManualPublisher::new();
    let first: Inner = ManualPublisher::new();
    let second: Inner = ManualPublisher::new();
    let inners = vec![first.clone(), second.clone()];
    let subscriber: TestSubscriber<i32, NestError> = TestSubscriber::passive();
    outer
        .clone()
        .flat_map(Demand::finite(2), move |index: i32| {
            inners[index as usize].clone()
        })
        .subscribe(subscriber.clone());

    assert_eq!(outer.requests(), vec![Demand::finite(2)]);
    outer.send(0);
    outer.send(1);
    // 每条内层初始各拉一个。
    assert_eq!(first.requests(), vec![Demand::finite(1)]);
    assert_eq!(second.requests(), vec![Demand::finite(1)]);

    first.send(10);
    second.send(20);
    assert_eq!(subscriber.values(), Vec::<i32>::new());

    subscriber.request(Demand::finite(2));
    assert_eq!(subscriber.values(), vec![10, 20]);
    // 排水后按一换一补拉。
    assert_eq!(first.requests(), vec![Demand::finite(1), Demand::finite(1)]);
    assert_eq!(second.requests(), vec![Demand::finite(1), Demand::finite(1)]);
}

/// flat_map：内层结束向外层补拉一个新的发布者。
#[test]
fn flat_map_tops_up_the_outer_when_an_inner_finishes() {
    let outer: ManualPublisher<i32, NestError> = ManualPublisher::new();
    let inner: Inner = ManualPublisher::new();
    let template = inner.clone();
    let subscriber: TestSubscriber<i32, NestError> = TestSubscriber::unlimited();
    outer
        .clone()
        .flat_map(Demand::finite(1), move |_| template.clone())
        .subscribe(subscriber.clone());

    assert_eq!(outer.requests(), vec![Demand::finite(1)]);
    outer.send(0);
    inner.complete(Completion::Finished);
    assert_eq!(
        outer.requests(),
        vec![Demand::finite(1), Demand::finite(1)]
    );
}

/// flat_map：任一内层失败终结全局并取消兄弟。
#[test]
fn flat_map_failure_tears_down_siblings() {
    let outer: ManualPublisher<i32, NestError> = ManualPublisher::new();
    let first: Inner = ManualPublisher::new();
    let second: Inner = ManualPublisher::new();
    let inners = vec![first.clone(), second.clone()];
    let subscriber: TestSubscriber<i32, NestError> = TestSubscriber::unlimited();
    outer
        .clone()
        .flat_map(Demand::UNLIMITED, move |index: i32| {
            inners[index as usize].clone()
        })
        .subscribe(subscriber.clone());

    outer.send(0);
    outer.send(1);
    first.complete(Completion::Failed(NestError));

    assert!(outer.is_cancelled());
    assert!(second.is_cancelled());
    assert_eq!(subscriber.completion(), Some(Completion::Failed(NestError)));
}

/// flat_map 与序列源的端到端：展开-排水-收尾。
#[test]
fn flat_map_end_to_end_with_sequences() {
    let subscriber: TestSubscriber<i32, std::convert::Infallible> = TestSubscriber::unlimited();
    sequence(vec![10, 20])
        .flat_map(Demand::UNLIMITED, |base| sequence(vec![base + 1, base + 2]))
        .subscribe(subscriber.clone());

    let mut values = subscriber.values();
    values.sort_unstable();
    assert_eq!(values, vec![11, 12, 21, 22]);
    assert!(subscriber.is_finished());
}
