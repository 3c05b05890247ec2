//! 扇入族验证：zip 的按序对齐、终结与需求转发。

use std::convert::Infallible;

use ripple_core::{Completion, Demand, Publisher, PublisherExt, sequence};
use ripple_testkit::{ManualPublisher, TestSubscriber};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("配对测试错误")]
struct ZipError;

/// 按序对齐：第 k 个元组恰由各子流第 k 个值构成。
#[test]
fn zip_aligns_by_arrival_order() {
    let left: ManualPublisher<i32, ZipError> = ManualPublisher::new();
    let right: ManualPublisher<&'static str, ZipError> = ManualPublisher::new();
    let subscriber: TestSubscriber<(i32, &'static str), ZipError> = TestSubscriber::unlimited();
    left.clone().zip(right.clone()).subscribe(subscriber.clone());

    left.send(1);
    left.send(2);
    right.send("a");
    left.send(3);
    right.send("b");
    right.send("c");

    assert_eq!(subscriber.values(), vec![(1, "a"), (2, "b"), (3, "c")]);
    assert!(subscriber.violations().is_empty());
}

/// 下游请求原样转发给每个子流。
#[test]
fn zip_forwards_requests_to_every_child() {
    let left: ManualPublisher<i32, ZipError> = ManualPublisher::new();
    let right: ManualPublisher<i32, ZipError> = ManualPublisher::new();
    let subscriber: TestSubscriber<(i32, i32), ZipError> =
        TestSubscriber::new(Demand::finite(4), Demand::NONE);
    left.clone().zip(right.clone()).subscribe(subscriber.clone());

    assert_eq!(left.requests(), vec![Demand::finite(4)]);
    assert_eq!(right.requests(), vec![Demand::finite(4)]);
}

/// 子流结束且队列为空 ⇒ 立即收尾并取消兄弟。
#[test]
fn zip_finishes_when_an_empty_child_finishes() {
    let left: ManualPublisher<i32, ZipError> = ManualPublisher::new();
    let right: ManualPublisher<i32, ZipError> = ManualPublisher::new();
    let subscriber: TestSubscriber<(i32, i32), ZipError> = TestSubscriber::unlimited();
    left.clone().zip(right.clone()).subscribe(subscriber.clone());

    left.complete(Completion::Finished);
    assert!(subscriber.is_finished());
    assert!(right.is_cancelled());
}

/// 子流结束但仍有存货 ⇒ 存货配完才收尾。
#[test]
fn zip_drains_queued_values_of_a_finished_child() {
    let left: ManualPublisher<i32, ZipError> = ManualPublisher::new();
    let right: ManualPublisher<i32, ZipError> = ManualPublisher::new();
    let subscriber: TestSubscriber<(i32, i32), ZipError> = TestSubscriber::unlimited();
    left.clone().zip(right.clone()).subscribe(subscriber.clone());

    left.send(1);
    left.send(2);
    left.complete(Completion::Finished);
    assert!(!subscriber.is_terminated());

    right.send(10);
    assert_eq!(subscriber.values(), vec![(1, 10)]);
    right.send(20);
    assert_eq!(subscriber.values(), vec![(1, 10), (2, 20)]);
    assert!(subscriber.is_finished());
}

/// 任一子流失败 ⇒ 失败下发并取消兄弟。
#[test]
fn zip_failure_cancels_the_siblings() {
    let left: ManualPublisher<i32, ZipError> = ManualPublisher::new();
    let right: ManualPublisher<i32, ZipError> = ManualPublisher::new();
    let subscriber: TestSubscriber<(i32, i32), ZipError> = TestSubscriber::unlimited();
    left.clone().zip(right.clone()).subscribe(subscriber.clone());

    left.send(1);
    right.complete(Completion::Failed(ZipError));

    assert_eq!(subscriber.completion(), Some(Completion::Failed(ZipError)));
    assert!(left.is_cancelled());
}

/// 投递受需求约束：子流全就绪但需求为零时不投递。
#[test]
fn zip_withholds_tuples_without_demand() {
    let left: ManualPublisher<i32, ZipError> = ManualPublisher::new();
    let right: ManualPublisher<i32, ZipError> = ManualPublisher::new();
    let subscriber: TestSubscriber<(i32, i32), ZipError> = TestSubscriber::passive();
    left.clone().zip(right.clone()).subscribe(subscriber.clone());

    left.send(1);
    right.send(2);
    assert_eq!(subscriber.values(), Vec::<(i32, i32)>::new());

    subscriber.request(Demand::finite(1));
    assert_eq!(subscriber.values(), vec![(1, 2)]);
}

/// 三元与四元：摊平组合与序列源的端到端。
#[test]
fn zip3_and_zip4_flatten_tuples() {
    let three: TestSubscriber<(i32, i32, i32), Infallible> = TestSubscriber::unlimited();
    sequence(vec![1, 2])
        .zip3(sequence(vec![10, 20]), sequence(vec![100, 200]))
        .subscribe(three.clone());
    assert_eq!(three.values(), vec![(1, 10, 100), (2, 20, 200)]);
    assert!(three.is_finished());

    let four: TestSubscriber<(i32, i32, i32, i32), Infallible> = TestSubscriber::unlimited();
    sequence(vec![1])
        .zip4(sequence(vec![2]), sequence(vec![3]), sequence(vec![4]))
        .subscribe(four.clone());
    assert_eq!(four.values(), vec![(1, 2, 3, 4)]);
    assert!(four.is_finished());
}
