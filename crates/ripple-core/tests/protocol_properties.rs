//! 阶段协议性质验证：握手唯一性、终结单调性、取消幂等
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：自插入阶段必须把**不守规矩的上游**挡在下游之外：
//!   终结之后的值、重复的终结、重复的订阅握手都不得泄漏；
//!   取消必须幂等且静默。
//! - **设计手法 (How)**：`ManualPublisher` 允许注入任意（含违规）信号序列，
//!   Proptest 生成随机敌意脚本驱动 `try_map` 阶段，
//!   `TestSubscriber` 在下游核对不变量——探针不 panic，
//!   违规以字符串积累，断言其为空。
//! - **边界 (What)**：直通族（map/filter）按约定依赖上游守规，
//!   其协议面在 `passthrough` 套件中以合规脚本覆盖。

use proptest::prelude::*;
use ripple_core::{BoxError, Completion, Publisher, PublisherExt};
use ripple_testkit::{ManualPublisher, TestSubscriber};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("测试错误")]
struct ScriptError;

/// 敌意脚本中的一步。
#[derive(Clone, Debug)]
enum Step {
    Value(i64),
    Finish,
    Fail,
}

fn any_script() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        prop_oneof![
            5 => any::<i64>().prop_map(Step::Value),
            1 => Just(Step::Finish),
            1 => Just(Step::Fail),
        ],
        0..24,
    )
}

proptest! {
    /// 任意敌意脚本穿过 `try_map`，下游至多一次订阅、至多一次终结、
    /// 终结后无值。
    #[test]
    fn hostile_upstream_cannot_break_the_handshake(script in any_script()) {
        let probe: ManualPublisher<i64, ScriptError> = ManualPublisher::new();
        let subscriber: TestSubscriber<i64, BoxError> = TestSubscriber::unlimited();
        probe
            .clone()
            .try_map(|value| Ok::<_, ScriptError>(value.wrapping_mul(2)))
            .subscribe(subscriber.clone());

        let mut first_terminal_at: Option<usize> = None;
        let mut expected = Vec::new();
        for (index, step) in script.iter().enumerate() {
            match step {
                Step::Value(value) => {
                    if first_terminal_at.is_none() {
                        expected.push(value.wrapping_mul(2));
                    }
                    probe.send(*value);
                }
                Step::Finish => {
                    first_terminal_at.get_or_insert(index);
                    probe.complete(Completion::Finished);
                }
                Step::Fail => {
                    first_terminal_at.get_or_insert(index);
                    probe.complete(Completion::Failed(ScriptError));
                }
            }
        }

        prop_assert!(subscriber.violations().is_empty(), "{:?}", subscriber.violations());
        prop_assert_eq!(subscriber.values(), expected);
        prop_assert!(subscriber.completion_count() <= 1);
    }
}

/// 重复取消与取消后信号皆为空操作。
#[test]
fn cancel_is_idempotent_and_silent() {
    let probe: ManualPublisher<u32, ScriptError> = ManualPublisher::new();
    let subscriber: TestSubscriber<u32, BoxError> = TestSubscriber::passive();
    probe
        .clone()
        .try_map(|value| Ok::<_, ScriptError>(value))
        .subscribe(subscriber.clone());

    subscriber.cancel();
    subscriber.cancel();
    assert!(probe.is_cancelled());

    // 取消后的上游信号不得泄漏到下游。
    probe.send(7);
    probe.complete(Completion::Finished);
    assert_eq!(subscriber.values(), Vec::<u32>::new());
    assert!(!subscriber.is_terminated());
    assert!(subscriber.violations().is_empty());
}

/// 多余的上游订阅被立即取消，下游只见一次握手。
#[test]
fn duplicate_upstream_subscription_is_cancelled() {
    let probe: ManualPublisher<u32, ScriptError> = ManualPublisher::new();
    let subscriber: TestSubscriber<u32, BoxError> = TestSubscriber::unlimited();
    probe
        .clone()
        .try_map(|value| Ok::<_, ScriptError>(value))
        .subscribe(subscriber.clone());

    assert!(probe.inject_duplicate_subscription());
    assert!(subscriber.violations().is_empty());
}

/// 终结后上游被释放：失败路径还须取消上游（用户闭包失败）。
#[test]
fn closure_failure_cancels_upstream_and_fails_downstream() {
    let probe: ManualPublisher<u32, ScriptError> = ManualPublisher::new();
    let subscriber: TestSubscriber<u32, BoxError> = TestSubscriber::unlimited();
    probe
        .clone()
        .try_map(|value| {
            if value == 13 {
                Err(ScriptError)
            } else {
                Ok(value)
            }
        })
        .subscribe(subscriber.clone());

    probe.send(1);
    probe.send(13);
    probe.send(2);

    assert!(probe.is_cancelled());
    assert_eq!(subscriber.values(), vec![1]);
    assert!(subscriber.is_failed());
    assert!(subscriber.violations().is_empty());
}
