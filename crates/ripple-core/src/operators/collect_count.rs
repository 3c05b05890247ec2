//! `collect_by_count`：按固定批量聚集值的自插入算子。
//!
//! # 契约说明（What）
//! - 缓冲达到 `count` 即整批下发并清空；批量投递返回的需求按 `count`
//!   倍数换算回上游（下游要一批 ⇔ 上游要 `count` 个）；
//! - 上游正常结束时，非空的残批先行下发，再转发 `Finished`；
//! - 失败终结丢弃缓冲原样转发；
//! - 下游 `request(d)` 对上游放大为 `d × count`。

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber, Subscription};
use crate::demand::Demand;
use crate::error::{codes, protocol_violation};
use crate::stage::UpstreamState;

/// 批量聚集描述符。
#[derive(Clone)]
pub struct CollectByCount<P> {
    upstream: P,
    count: usize,
}

impl<P> CollectByCount<P> {
    pub(crate) fn new(upstream: P, count: usize) -> Self {
        assert!(count > 0, "collect_by_count 的批量必须为正");
        CollectByCount { upstream, count }
    }
}

impl<P> Publisher for CollectByCount<P>
where
    P: Publisher,
    P::Output: Send + 'static,
    P::Failure: 'static,
{
    type Output = Vec<P::Output>;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = Vec<P::Output>, Failure = P::Failure> + 'static,
    {
        let stage = Arc::new_cyclic(|weak: &Weak<CollectStage<P::Output, S>>| CollectStage {
            weak: weak.clone(),
            count: self.count,
            state: Mutex::new(CollectState {
                upstream: UpstreamState::Awaiting,
                buffer: Vec::with_capacity(self.count),
            }),
            downstream: subscriber,
        });
        self.upstream.subscribe(stage);
    }
}

struct CollectState<V> {
    upstream: UpstreamState,
    buffer: Vec<V>,
}

struct CollectStage<V, Down> {
    weak: Weak<Self>,
    count: usize,
    state: Mutex<CollectState<V>>,
    downstream: Down,
}

impl<V, Down> CollectStage<V, Down>
where
    V: Send + 'static,
    Down: Subscriber<Input = Vec<V>> + 'static,
{
    fn shared(&self) -> SharedSubscription {
        self.weak.upgrade().expect("阶段在回调期间必然存活")
    }
}

impl<V, Down> Subscriber for CollectStage<V, Down>
where
    V: Send + 'static,
    Down: Subscriber<Input = Vec<V>> + 'static,
{
    type Input = V;
    type Failure = Down::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        let adopted = self.state.lock().upstream.try_adopt(subscription.clone());
        if adopted {
            self.downstream.receive_subscription(self.shared());
        } else {
            subscription.cancel();
        }
    }

    fn receive_value(&self, value: V) -> Demand {
        let batch = {
            let mut state = self.state.lock();
            if state.upstream.is_terminal() {
                return Demand::NONE;
            }
            state.buffer.push(value);
            if state.buffer.len() == self.count {
                core::mem::replace(&mut state.buffer, Vec::with_capacity(self.count))
            } else {
                return Demand::NONE;
            }
        };
        let extra = self.downstream.receive_value(batch);
        extra * self.count as u64
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        let partial = {
            let mut state = self.state.lock();
            if state.upstream.is_terminal() {
                return;
            }
            let _ = state.upstream.terminate();
            let buffer = core::mem::take(&mut state.buffer);
            match &completion {
                Completion::Finished => buffer,
                // 失败：残批直接丢弃。
                Completion::Failed(_) => Vec::new(),
            }
        };
        if !partial.is_empty() {
            let _ = self.downstream.receive_value(partial);
        }
        self.downstream.receive_completion(completion);
    }
}

impl<V, Down> Subscription for CollectStage<V, Down>
where
    V: Send + 'static,
    Down: Subscriber<Input = Vec<V>> + 'static,
{
    fn request(&self, demand: Demand) {
        let demand = demand.expect_nonzero();
        let upstream = {
            let state = self.state.lock();
            if state.upstream.is_terminal() {
                return;
            }
            match state.upstream.active() {
                Some(upstream) => upstream,
                None => protocol_violation(
                    codes::REQUEST_BEFORE_SUBSCRIPTION,
                    "订阅握手完成前收到 request",
                ),
            }
        };
        upstream.request(demand * self.count as u64);
    }

    fn cancel(&self) {
        let upstream = {
            let mut state = self.state.lock();
            state.buffer.clear();
            state.upstream.terminate()
        };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}
