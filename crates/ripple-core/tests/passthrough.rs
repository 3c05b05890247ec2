//! 直通族验证：订阅句柄转发身份、拒绝补拉与信号观察。

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use ripple_core::{
    Completion, Demand, EventHooks, LogLevel, Logger, Publisher, PublisherExt, SignalEvent,
    SignalKind, just, sequence,
};
use ripple_testkit::{ManualPublisher, TestSubscriber};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("直通测试错误")]
struct PassError;

/// `map` 转发给下游的订阅就是上游交来的那一个（`Arc` 同一性）。
#[test]
fn map_forwards_the_upstream_subscription_itself() {
    let probe: ManualPublisher<i32, PassError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, PassError> = TestSubscriber::passive();
    probe.clone().map(|value| value + 1).subscribe(subscriber.clone());

    let upstream_handle = probe.first_subscription().expect("探针必有订阅边");
    let downstream_handle = subscriber.subscription().expect("下游必已握手");
    assert!(Arc::ptr_eq(&upstream_handle, &downstream_handle));
}

/// `map` 语义与需求返回直通。
#[test]
fn map_transforms_values() {
    let subscriber: TestSubscriber<i32, Infallible> = TestSubscriber::unlimited();
    sequence(vec![1, 2, 3]).map(|value| value * 10).subscribe(subscriber.clone());
    assert_eq!(subscriber.values(), vec![10, 20, 30]);
    assert!(subscriber.is_finished());
}

/// `filter` 拒绝路径返回需求一：上游观察到的逐次请求里出现补拉。
#[test]
fn filter_rejections_pull_replacements() {
    let probe: ManualPublisher<i32, PassError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, PassError> = TestSubscriber::new(Demand::finite(2), Demand::NONE);
    probe.clone().filter(|value| value % 2 == 0).subscribe(subscriber.clone());

    assert_eq!(probe.requests(), vec![Demand::finite(2)]);
    // 奇数被闸掉：receive_value 返回 1，探针据此观察到补拉语义。
    assert_eq!(probe.send(1), Demand::finite(1));
    assert_eq!(probe.send(2), Demand::NONE);
    assert_eq!(subscriber.values(), vec![2]);
}

/// `compact_map`：投影与拒绝一体。
#[test]
fn compact_map_projects_and_rejects() {
    let subscriber: TestSubscriber<i32, Infallible> = TestSubscriber::unlimited();
    sequence(vec!["1", "x", "3"])
        .compact_map(|text| text.parse::<i32>().ok())
        .subscribe(subscriber.clone());
    assert_eq!(subscriber.values(), vec![1, 3]);
    assert!(subscriber.is_finished());
}

/// `remove_duplicates_by`：相邻重复被闸掉并补拉。
#[test]
fn remove_duplicates_gates_adjacent_repeats() {
    let subscriber: TestSubscriber<i32, Infallible> = TestSubscriber::unlimited();
    sequence(vec![1, 1, 2, 2, 2, 3, 1])
        .remove_duplicates_by(|prev, next| prev == next)
        .subscribe(subscriber.clone());
    assert_eq!(subscriber.values(), vec![1, 2, 3, 1]);
}

/// `scan`：累加值逐步投递。
#[test]
fn scan_emits_running_accumulation() {
    let subscriber: TestSubscriber<i32, Infallible> = TestSubscriber::unlimited();
    sequence(vec![1, 2, 3, 4])
        .scan(0, |acc, value| acc + value)
        .subscribe(subscriber.clone());
    assert_eq!(subscriber.values(), vec![1, 3, 6, 10]);
}

/// `map_error`：值直通、错误映射。
#[test]
fn map_error_transforms_the_failure_only() {
    let probe: ManualPublisher<i32, PassError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, String> = TestSubscriber::unlimited();
    probe
        .clone()
        .map_error(|error: PassError| error.to_string())
        .subscribe(subscriber.clone());

    probe.send(9);
    probe.complete(Completion::Failed(PassError));
    assert_eq!(subscriber.values(), vec![9]);
    assert_eq!(
        subscriber.completion(),
        Some(Completion::Failed("直通测试错误".to_string()))
    );
}

/// `handle_events`：五类回调逐一触发，终态后清除。
#[test]
fn handle_events_observes_all_signals() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let push = |log: &Arc<Mutex<Vec<String>>>, entry: String| log.lock().unwrap().push(entry);

    let hooks = EventHooks::new()
        .on_subscription({
            let log = Arc::clone(&log);
            move |_| push(&log, "订阅".into())
        })
        .on_value({
            let log = Arc::clone(&log);
            move |value: &i32| push(&log, format!("值 {value}"))
        })
        .on_request({
            let log = Arc::clone(&log);
            move |demand| push(&log, format!("请求 {demand}"))
        })
        .on_completion({
            let log = Arc::clone(&log);
            move |_: &Completion<Infallible>| push(&log, "终结".into())
        });

    let subscriber: TestSubscriber<i32, Infallible> = TestSubscriber::unlimited();
    sequence(vec![5]).handle_events(hooks).subscribe(subscriber.clone());

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "订阅".to_string(),
            "请求 unlimited".to_string(),
            "值 5".to_string(),
            "终结".to_string()
        ]
    );
}

/// `log_events`：结构化信号进入注入的日志契约。
#[test]
fn log_events_feeds_the_logger_contract() {
    struct RecordingLogger {
        kinds: Mutex<Vec<(LogLevel, SignalKind)>>,
    }

    impl Logger for RecordingLogger {
        fn log(&self, level: LogLevel, event: &SignalEvent) {
            assert_eq!(event.label, "pipeline.probe");
            self.kinds.lock().unwrap().push((level, event.kind));
        }
    }

    let logger = Arc::new(RecordingLogger {
        kinds: Mutex::new(Vec::new()),
    });
    let subscriber: TestSubscriber<i32, Infallible> = TestSubscriber::unlimited();
    sequence(vec![1, 2])
        .log_events("pipeline.probe", logger.clone())
        .subscribe(subscriber.clone());

    let kinds = logger.kinds.lock().unwrap().clone();
    assert_eq!(
        kinds,
        vec![
            (LogLevel::Trace, SignalKind::Subscription),
            (LogLevel::Trace, SignalKind::Request),
            (LogLevel::Trace, SignalKind::Value),
            (LogLevel::Trace, SignalKind::Value),
            (LogLevel::Trace, SignalKind::Completion),
        ]
    );
    assert_eq!(subscriber.values(), vec![1, 2]);
}

/// `assert_no_failure`：失败终结触发进程级诊断。
#[test]
#[should_panic(expected = "protocol.unexpected_failure")]
fn assert_no_failure_aborts_on_failure() {
    let probe: ManualPublisher<i32, PassError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, Infallible> = TestSubscriber::unlimited();
    probe.clone().assert_no_failure().subscribe(subscriber.clone());
    probe.complete(Completion::Failed(PassError));
}

/// `map2`/`map3`：多投影产出元组。
#[test]
fn projection_maps_build_tuples() {
    #[derive(Clone)]
    struct DiceRoll {
        die1: u8,
        die2: u8,
    }

    let subscriber: TestSubscriber<(u8, u8), Infallible> = TestSubscriber::unlimited();
    just(DiceRoll { die1: 2, die2: 4 })
        .map2(|roll| roll.die1, |roll| roll.die2)
        .subscribe(subscriber.clone());
    assert_eq!(subscriber.values(), vec![(2, 4)]);
}

/// 直通链不放大也不吞需求：上游收到的恰是下游声明的。
#[test]
fn passthrough_chain_preserves_demand() {
    let probe: ManualPublisher<i32, PassError> = ManualPublisher::new();
    let subscriber: TestSubscriber<i32, PassError> = TestSubscriber::new(Demand::finite(3), Demand::NONE);
    probe
        .clone()
        .map(|value| value)
        .map_error(|error| error)
        .subscribe(subscriber.clone());

    assert_eq!(probe.total_requested(), Demand::finite(3));
    for value in 0..3 {
        probe.send(value);
    }
    assert_eq!(subscriber.values(), vec![0, 1, 2]);
}
