//! `switch_to_latest`：外层流发射内层发布者，始终只追随最新的内层。
//!
//! # 设计背景（Why）
//! - 每个内层订阅者携带出生时的世代号；阶段只认等于 `current_index`
//!   的信号，旧世代的一切信号直接丢弃。世代号 64 位单调递增，
//!   永不回绕。
//! - 外层以 `Unlimited` 吸入——“切换”语义由世代纪律实现，不靠背压；
//!   下游需求是全局的：无论值来自哪个内层，投递即扣减；
//!   新内层握手时一次性重放累计需求。
//!
//! # 完成规则（What）
//! - 外层 `Finished` 且无存活/待握手内层 ⇒ 下游 `Finished`；
//! - 外层 `Finished` 但内层仍在运行 ⇒ 等内层结束；
//! - 任何一侧 `Failed` ⇒ 立即终结并取消另一侧。

use alloc::sync::{Arc, Weak};
use core::marker::PhantomData;

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber, Subscription};
use crate::demand::Demand;
use crate::error::{codes, protocol_violation};

/// 追随最新内层的描述符；上游的输出必须本身是发布者。
#[derive(Clone)]
pub struct SwitchToLatest<P> {
    upstream: P,
}

impl<P> SwitchToLatest<P> {
    pub(crate) fn new(upstream: P) -> Self {
        SwitchToLatest { upstream }
    }
}

impl<P, Inner> Publisher for SwitchToLatest<P>
where
    P: Publisher<Output = Inner>,
    Inner: Publisher<Failure = P::Failure> + Send + Sync + 'static,
    Inner::Output: Send + 'static,
    P::Failure: Send + 'static,
{
    type Output = Inner::Output;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = Inner::Output, Failure = P::Failure> + 'static,
    {
        let core = Arc::new_cyclic(|weak: &Weak<SwitchCore<S>>| SwitchCore {
            weak: weak.clone(),
            state: Mutex::new(SwitchMachine {
                outer: OuterState::Awaiting,
                current: None,
                current_index: 0,
                awaiting_inner: false,
                demand: Demand::NONE,
                terminal: false,
            }),
            downstream: subscriber,
        });
        self.upstream.subscribe(OuterSubscriber {
            core,
            _marker: PhantomData,
        });
    }
}

enum OuterState {
    Awaiting,
    Active(SharedSubscription),
    Finished,
    Gone,
}

struct SwitchMachine {
    outer: OuterState,
    current: Option<SharedSubscription>,
    current_index: u64,
    /// 最新内层已订阅但尚未握手。
    awaiting_inner: bool,
    demand: Demand,
    terminal: bool,
}

struct SwitchCore<Down> {
    weak: Weak<Self>,
    state: Mutex<SwitchMachine>,
    downstream: Down,
}

impl<Down> SwitchCore<Down>
where
    Down: Subscriber + 'static,
    Down::Input: Send + 'static,
    Down::Failure: Send + 'static,
{
    fn shared(&self) -> SharedSubscription {
        self.weak.upgrade().expect("阶段在回调期间必然存活")
    }

    /// 失败快路径：终结自身并取消两侧。
    fn fail(&self, error: Down::Failure) {
        let (outer, inner) = {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            state.terminal = true;
            let outer = match core::mem::replace(&mut state.outer, OuterState::Gone) {
                OuterState::Active(subscription) => Some(subscription),
                _ => None,
            };
            (outer, state.current.take())
        };
        if let Some(outer) = outer {
            outer.cancel();
        }
        if let Some(inner) = inner {
            inner.cancel();
        }
        self.downstream.receive_completion(Completion::Failed(error));
    }

    /// 外层已尽且内层全清时向下游收尾。
    fn finish_if_drained(&self) {
        let finish = {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            let drained = matches!(state.outer, OuterState::Finished)
                && state.current.is_none()
                && !state.awaiting_inner;
            if drained {
                state.terminal = true;
            }
            drained
        };
        if finish {
            self.downstream.receive_completion(Completion::Finished);
        }
    }
}

struct OuterSubscriber<Inner, Down> {
    core: Arc<SwitchCore<Down>>,
    _marker: PhantomData<fn(Inner)>,
}

impl<Inner, Down> Subscriber for OuterSubscriber<Inner, Down>
where
    Inner: Publisher<Output = Down::Input, Failure = Down::Failure> + Send + Sync + 'static,
    Down: Subscriber + 'static,
    Down::Input: Send + 'static,
    Down::Failure: Send + 'static,
{
    type Input = Inner;
    type Failure = Down::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        let adopted = {
            let mut state = self.core.state.lock();
            match state.outer {
                OuterState::Awaiting if !state.terminal => {
                    state.outer = OuterState::Active(subscription.clone());
                    true
                }
                _ => false,
            }
        };
        if !adopted {
            subscription.cancel();
            return;
        }
        self.core
            .downstream
            .receive_subscription(self.core.shared());
        // 切换语义不依赖外层背压：无限吸入内层发布者。
        subscription.request(Demand::UNLIMITED);
    }

    fn receive_value(&self, inner: Inner) -> Demand {
        let (stale, index) = {
            let mut state = self.core.state.lock();
            if state.terminal {
                return Demand::NONE;
            }
            state.current_index += 1;
            state.awaiting_inner = true;
            (state.current.take(), state.current_index)
        };
        if let Some(stale) = stale {
            stale.cancel();
        }
        inner.subscribe(InnerSubscriber {
            core: Arc::clone(&self.core),
            index,
        });
        Demand::NONE
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        match completion {
            Completion::Finished => {
                {
                    let mut state = self.core.state.lock();
                    if state.terminal || matches!(state.outer, OuterState::Gone) {
                        return;
                    }
                    state.outer = OuterState::Finished;
                }
                self.core.finish_if_drained();
            }
            Completion::Failed(error) => self.core.fail(error),
        }
    }
}

struct InnerSubscriber<Down> {
    core: Arc<SwitchCore<Down>>,
    index: u64,
}

impl<Down> Subscriber for InnerSubscriber<Down>
where
    Down: Subscriber + 'static,
    Down::Input: Send + 'static,
    Down::Failure: Send + 'static,
{
    type Input = Down::Input;
    type Failure = Down::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        let replay = {
            let mut state = self.core.state.lock();
            if state.terminal || self.index != state.current_index {
                // 旧世代或已终结：立即取消。
                drop(state);
                subscription.cancel();
                return;
            }
            state.current = Some(subscription.clone());
            state.awaiting_inner = false;
            state.demand
        };
        if replay.is_positive() {
            subscription.request(replay);
        }
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        {
            let mut state = self.core.state.lock();
            if state.terminal || self.index != state.current_index {
                return Demand::NONE;
            }
            state.demand -= Demand::finite(1);
        }
        let extra = self.core.downstream.receive_value(value);
        if !extra.is_none() {
            self.core.state.lock().demand += extra;
        }
        extra
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        {
            let state = self.core.state.lock();
            if state.terminal || self.index != state.current_index {
                return;
            }
        }
        match completion {
            Completion::Finished => {
                {
                    let mut state = self.core.state.lock();
                    if self.index != state.current_index {
                        return;
                    }
                    state.current = None;
                    state.awaiting_inner = false;
                }
                self.core.finish_if_drained();
            }
            Completion::Failed(error) => self.core.fail(error),
        }
    }
}

impl<Down> Subscription for SwitchCore<Down>
where
    Down: Subscriber + 'static,
    Down::Input: Send + 'static,
    Down::Failure: Send + 'static,
{
    fn request(&self, demand: Demand) {
        let demand = demand.expect_nonzero();
        let current = {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            if matches!(state.outer, OuterState::Awaiting) {
                protocol_violation(
                    codes::REQUEST_BEFORE_SUBSCRIPTION,
                    "订阅握手完成前收到 request",
                );
            }
            state.demand += demand;
            state.current.clone()
        };
        if let Some(current) = current {
            current.request(demand);
        }
    }

    fn cancel(&self) {
        let (outer, inner) = {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            state.terminal = true;
            // 世代前进一格，令尚未握手的内层在到达时即作废。
            state.current_index += 1;
            let outer = match core::mem::replace(&mut state.outer, OuterState::Gone) {
                OuterState::Active(subscription) => Some(subscription),
                _ => None,
            };
            (outer, state.current.take())
        };
        if let Some(outer) = outer {
            outer.cancel();
        }
        if let Some(inner) = inner {
            inner.cancel();
        }
    }
}
