//! 时间族验证：debounce 的世代作废、throttle 的窗口取舍、buffer 的补拉记账。

use ripple_core::{
    BufferingStrategy, Completion, Demand, PrefetchStrategy, Publisher, PublisherExt,
    SchedulerStride,
};
use ripple_testkit::{ManualPublisher, TestSubscriber, VirtualScheduler, VirtualStride};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("时间测试错误")]
struct TimeError;

fn seconds(value: u64) -> VirtualStride {
    VirtualStride::seconds(value)
}

/// debounce：连续值互相作废，只有静默满期的最新值存活。
#[test]
fn debounce_emits_only_after_quiescence() {
    let scheduler = VirtualScheduler::new();
    let probe: ManualPublisher<i32, TimeError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, TimeError> = TestSubscriber::unlimited();
    probe
        .clone()
        .debounce(seconds(5), scheduler.clone(), None)
        .subscribe(subscriber.clone());

    // 上游被无限吸入。
    assert_eq!(probe.requests(), vec![Demand::UNLIMITED]);

    probe.send(1);
    scheduler.advance(seconds(2));
    probe.send(2);
    scheduler.advance(seconds(2));
    probe.send(3);
    assert_eq!(subscriber.values(), Vec::<i32>::new());

    scheduler.advance(seconds(5));
    assert_eq!(subscriber.values(), vec![3]);

    probe.send(4);
    scheduler.advance(seconds(5));
    assert_eq!(subscriber.values(), vec![3, 4]);
}

/// debounce：终结经调度器转发；取消作废在途动作。
#[test]
fn debounce_completion_and_cancel() {
    let scheduler = VirtualScheduler::new();
    let probe: ManualPublisher<i32, TimeError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, TimeError> = TestSubscriber::unlimited();
    probe
        .clone()
        .debounce(seconds(5), scheduler.clone(), None)
        .subscribe(subscriber.clone());

    probe.send(1);
    probe.complete(Completion::Finished);
    assert!(subscriber.is_finished());

    // 终结后在途的投递动作触发也不再发声。
    scheduler.advance(seconds(10));
    assert_eq!(subscriber.values(), Vec::<i32>::new());
    assert!(subscriber.violations().is_empty());
}

/// debounce：需求为零时触发不投递，最新值保留到被替换。
#[test]
fn debounce_respects_downstream_demand() {
    let scheduler = VirtualScheduler::new();
    let probe: ManualPublisher<i32, TimeError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, TimeError> = TestSubscriber::passive();
    probe
        .clone()
        .debounce(seconds(1), scheduler.clone(), None)
        .subscribe(subscriber.clone());

    probe.send(7);
    scheduler.advance(seconds(2));
    assert_eq!(subscriber.values(), Vec::<i32>::new());

    // 迟到的需求不补投旧值；新值在需求在手时正常投递。
    subscriber.request(Demand::finite(1));
    assert_eq!(subscriber.values(), Vec::<i32>::new());
    probe.send(8);
    scheduler.advance(seconds(1));
    assert_eq!(subscriber.values(), vec![8]);
}

/// throttle：首值立即发射；窗口内 latest=true 保留最新。
#[test]
fn throttle_latest_emits_head_then_latest() {
    let scheduler = VirtualScheduler::new();
    let probe: ManualPublisher<i32, TimeError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, TimeError> = TestSubscriber::unlimited();
    probe
        .clone()
        .throttle(seconds(10), scheduler.clone(), true)
        .subscribe(subscriber.clone());

    scheduler.advance(seconds(13));
    probe.send(1);
    assert_eq!(subscriber.values(), vec![1]);

    scheduler.advance(seconds(1));
    probe.send(2);
    scheduler.advance(seconds(1));
    probe.send(3);
    scheduler.advance(seconds(1));
    probe.send(4);
    scheduler.advance(seconds(1));
    probe.send(5);
    assert_eq!(subscriber.values(), vec![1]);

    // 窗口在上次发射 + 间隔（t=23）关闭，兑现最新值。
    scheduler.advance(seconds(10));
    assert_eq!(subscriber.values(), vec![1, 5]);
}

/// throttle：latest=false 时窗口保留最早值。
#[test]
fn throttle_earliest_keeps_the_first_pending() {
    let scheduler = VirtualScheduler::new();
    let probe: ManualPublisher<i32, TimeError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, TimeError> = TestSubscriber::unlimited();
    probe
        .clone()
        .throttle(seconds(10), scheduler.clone(), false)
        .subscribe(subscriber.clone());

    probe.send(1);
    probe.send(2);
    probe.send(3);
    scheduler.advance(seconds(10));
    assert_eq!(subscriber.values(), vec![1, 2]);
}

/// throttle：在途发射期间到达的终结挂起，随发射兑现。
#[test]
fn throttle_defers_completion_behind_a_pending_emission() {
    let scheduler = VirtualScheduler::new();
    let probe: ManualPublisher<i32, TimeError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, TimeError> = TestSubscriber::unlimited();
    probe
        .clone()
        .throttle(seconds(10), scheduler.clone(), true)
        .subscribe(subscriber.clone());

    probe.send(1);
    probe.send(2);
    probe.complete(Completion::Finished);
    assert!(!subscriber.is_terminated());

    scheduler.advance(seconds(10));
    assert_eq!(subscriber.values(), vec![1, 2]);
    assert!(subscriber.is_finished());
}

/// buffer(KeepFull)：初始请求 = 容量，投递一个补拉一个。
#[test]
fn buffer_keep_full_refills_per_delivery() {
    let probe: ManualPublisher<i32, TimeError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, TimeError> = TestSubscriber::passive();
    probe
        .clone()
        .buffer(3, PrefetchStrategy::KeepFull, BufferingStrategy::DropOldest)
        .subscribe(subscriber.clone());

    assert_eq!(probe.requests(), vec![Demand::finite(3)]);
    probe.send(1);
    probe.send(2);

    subscriber.request(Demand::finite(1));
    assert_eq!(subscriber.values(), vec![1]);
    assert_eq!(
        probe.requests(),
        vec![Demand::finite(3), Demand::finite(1)]
    );
}

/// buffer(ByRequest)：不做预取记账，上游被无限吸入。
#[test]
fn buffer_by_request_asks_for_unlimited() {
    let probe: ManualPublisher<i32, TimeError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, TimeError> = TestSubscriber::passive();
    probe
        .clone()
        .buffer(2, PrefetchStrategy::ByRequest, BufferingStrategy::DropNewest)
        .subscribe(subscriber.clone());

    assert_eq!(probe.requests(), vec![Demand::UNLIMITED]);
}

/// 满缓冲：DropNewest 丢新、DropOldest 丢头。
#[test]
fn buffer_overflow_strategies() {
    let drop_newest: ManualPublisher<i32, TimeError> = ManualPublisher::new();
    let newest_sub: TestSubscriber<i32, TimeError> = TestSubscriber::passive();
    drop_newest
        .clone()
        .buffer(2, PrefetchStrategy::ByRequest, BufferingStrategy::DropNewest)
        .subscribe(newest_sub.clone());
    drop_newest.send(1);
    drop_newest.send(2);
    drop_newest.send(3);
    newest_sub.request(Demand::UNLIMITED);
    assert_eq!(newest_sub.values(), vec![1, 2]);

    let drop_oldest: ManualPublisher<i32, TimeError> = ManualPublisher::new();
    let oldest_sub: TestSubscriber<i32, TimeError> = TestSubscriber::passive();
    drop_oldest
        .clone()
        .buffer(2, PrefetchStrategy::ByRequest, BufferingStrategy::DropOldest)
        .subscribe(oldest_sub.clone());
    drop_oldest.send(1);
    drop_oldest.send(2);
    drop_oldest.send(3);
    oldest_sub.request(Demand::UNLIMITED);
    assert_eq!(oldest_sub.values(), vec![2, 3]);
}

/// 满缓冲：CustomError 以用户错误终止并取消上游。
#[test]
fn buffer_custom_error_fails_on_overflow() {
    let probe: ManualPublisher<i32, TimeError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, TimeError> = TestSubscriber::passive();
    probe
        .clone()
        .buffer(
            1,
            PrefetchStrategy::ByRequest,
            BufferingStrategy::CustomError(std::sync::Arc::new(|| TimeError)),
        )
        .subscribe(subscriber.clone());

    probe.send(1);
    probe.send(2);
    assert!(probe.is_cancelled());
    assert_eq!(subscriber.completion(), Some(Completion::Failed(TimeError)));
}

/// buffer：上游尽而缓冲未空 ⇒ 排空后才收尾。
#[test]
fn buffer_drains_before_finishing() {
    let probe: ManualPublisher<i32, TimeError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, TimeError> = TestSubscriber::passive();
    probe
        .clone()
        .buffer(4, PrefetchStrategy::ByRequest, BufferingStrategy::DropNewest)
        .subscribe(subscriber.clone());

    probe.send(1);
    probe.send(2);
    probe.complete(Completion::Finished);
    assert!(!subscriber.is_terminated());

    subscriber.request(Demand::finite(2));
    assert_eq!(subscriber.values(), vec![1, 2]);
    assert!(subscriber.is_finished());
}
