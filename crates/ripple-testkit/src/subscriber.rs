//! 订阅者探针：记录协议信号并核对握手不变量。
//!
//! # 契约说明（What）
//! - 探针按到达顺序记录订阅、值、终结三类信号；
//! - 协议违规（重复订阅、终结后的值、重复终结）不 panic，
//!   而是积累在 `violations()` 中由测试断言为空；
//! - 需求策略：握手时请求 `initial`，每个值返回 `per_value`。

use std::sync::{Arc, Mutex};

use ripple_core::{Completion, Demand, SharedSubscription, Subscriber};

/// 一条被记录的协议信号。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record<V, E> {
    /// 订阅握手。
    Subscription,
    /// 值投递。
    Value(V),
    /// 终结信号。
    Completion(Completion<E>),
}

struct ProbeState<V, E> {
    records: Vec<Record<V, E>>,
    subscription: Option<SharedSubscription>,
    violations: Vec<&'static str>,
    terminated: bool,
}

/// 记录型订阅者探针；克隆共享同一记录。
pub struct TestSubscriber<V, E> {
    initial: Demand,
    per_value: Demand,
    state: Arc<Mutex<ProbeState<V, E>>>,
}

impl<V, E> Clone for TestSubscriber<V, E> {
    fn clone(&self) -> Self {
        TestSubscriber {
            initial: self.initial,
            per_value: self.per_value,
            state: Arc::clone(&self.state),
        }
    }
}

impl<V, E> TestSubscriber<V, E> {
    /// 指定握手需求与每值追加需求的探针。
    pub fn new(initial: Demand, per_value: Demand) -> Self {
        TestSubscriber {
            initial,
            per_value,
            state: Arc::new(Mutex::new(ProbeState {
                records: Vec::new(),
                subscription: None,
                violations: Vec::new(),
                terminated: false,
            })),
        }
    }

    /// 握手即请求 `Unlimited` 的收集型探针。
    pub fn unlimited() -> Self {
        Self::new(Demand::UNLIMITED, Demand::NONE)
    }

    /// 握手不请求任何需求的惰性探针。
    pub fn passive() -> Self {
        Self::new(Demand::NONE, Demand::NONE)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProbeState<V, E>> {
        self.state.lock().expect("订阅者探针状态锁中毒")
    }

    /// 全部记录的快照。
    pub fn records(&self) -> Vec<Record<V, E>>
    where
        V: Clone,
        E: Clone,
    {
        self.lock().records.clone()
    }

    /// 仅值序列。
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.lock()
            .records
            .iter()
            .filter_map(|record| match record {
                Record::Value(value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    /// 终结信号（若已到达）。
    pub fn completion(&self) -> Option<Completion<E>>
    where
        E: Clone,
    {
        self.lock().records.iter().rev().find_map(|record| {
            match record {
                Record::Completion(completion) => Some(completion.clone()),
                _ => None,
            }
        })
    }

    /// 是否已观察到终结。
    pub fn is_terminated(&self) -> bool {
        self.lock().terminated
    }

    /// 已记录的终结信号条数（不要求信号可克隆）。
    pub fn completion_count(&self) -> usize {
        self.lock()
            .records
            .iter()
            .filter(|record| matches!(record, Record::Completion(_)))
            .count()
    }

    /// 是否以 `Finished` 收尾。
    pub fn is_finished(&self) -> bool {
        self.lock()
            .records
            .iter()
            .any(|record| matches!(record, Record::Completion(Completion::Finished)))
    }

    /// 是否以 `Failed` 收尾。
    pub fn is_failed(&self) -> bool {
        self.lock()
            .records
            .iter()
            .any(|record| matches!(record, Record::Completion(Completion::Failed(_))))
    }

    /// 失败错误的人类可读文本（适配不可克隆的错误类型）。
    pub fn failure_text(&self) -> Option<String>
    where
        E: std::fmt::Display,
    {
        self.lock().records.iter().find_map(|record| match record {
            Record::Completion(Completion::Failed(error)) => Some(error.to_string()),
            _ => None,
        })
    }

    /// 被记录的协议违规。
    pub fn violations(&self) -> Vec<&'static str> {
        self.lock().violations.clone()
    }

    /// 收到的订阅句柄（用于转发判定与主动施压）。
    pub fn subscription(&self) -> Option<SharedSubscription> {
        self.lock().subscription.clone()
    }

    /// 通过持有的订阅追加需求。
    pub fn request(&self, demand: Demand) {
        let subscription = self.subscription();
        if let Some(subscription) = subscription {
            subscription.request(demand);
        }
    }

    /// 通过持有的订阅取消。
    pub fn cancel(&self) {
        let subscription = self.subscription();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }
}

impl<V, E> Subscriber for TestSubscriber<V, E>
where
    V: Send + 'static,
    E: Send + 'static,
{
    type Input = V;
    type Failure = E;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        {
            let mut state = self.lock();
            if state.subscription.is_some() {
                state.violations.push("duplicate_subscription");
            }
            state.subscription = Some(subscription.clone());
            state.records.push(Record::Subscription);
        }
        if self.initial.is_positive() {
            subscription.request(self.initial);
        }
    }

    fn receive_value(&self, value: V) -> Demand {
        {
            let mut state = self.lock();
            if state.terminated {
                state.violations.push("value_after_completion");
            }
            if state.subscription.is_none() {
                state.violations.push("value_before_subscription");
            }
            state.records.push(Record::Value(value));
        }
        self.per_value
    }

    fn receive_completion(&self, completion: Completion<E>) {
        let mut state = self.lock();
        if state.terminated {
            state.violations.push("duplicate_completion");
        }
        if state.subscription.is_none() {
            state.violations.push("completion_before_subscription");
        }
        state.terminated = true;
        state.records.push(Record::Completion(completion));
    }
}
