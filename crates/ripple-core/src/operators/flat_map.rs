//! `flat_map(max_publishers)`：并发展开内层流并在全局需求下仲裁投递。
//!
//! # 设计背景（Why）
//! - 与 `switch_to_latest` 同形但并发：至多 `max_publishers` 条内层流共存，
//!   各自持有唯一索引；外层以 `max_publishers` 为需求吸入。
//! - 下游需求为零时，内层到达的值进入共享 `(索引, 值)` 缓冲；
//!   需求恢复后先排空缓冲，每投递一个就向来源内层补拉一个。
//! - 排水权由旗标独占（下游投递与内层补拉之间的重入由它隔离）；
//!   任何一侧失败立即终结全局并取消所有兄弟内层。
//!
//! # 契约说明（What）
//! - 内层 `Finished`：移除其订阅并向外层补拉一个新的发布者；
//! - 完成条件：外层已尽、无待握手内层、无存活内层、缓冲已空。

use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::{Arc, Weak};

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber, Subscription};
use crate::demand::Demand;
use crate::error::{codes, protocol_violation};

/// 并发展开描述符：`f` 把上游值映射为内层发布者。
pub struct FlatMap<P, F> {
    upstream: P,
    max_publishers: Demand,
    transform: Arc<F>,
}

impl<P, F> FlatMap<P, F> {
    pub(crate) fn new(upstream: P, max_publishers: Demand, transform: F) -> Self {
        FlatMap {
            upstream,
            max_publishers: max_publishers.expect_nonzero(),
            transform: Arc::new(transform),
        }
    }
}

impl<P: Clone, F> Clone for FlatMap<P, F> {
    fn clone(&self) -> Self {
        FlatMap {
            upstream: self.upstream.clone(),
            max_publishers: self.max_publishers,
            transform: Arc::clone(&self.transform),
        }
    }
}

impl<P, F, Inner> Publisher for FlatMap<P, F>
where
    P: Publisher,
    F: Fn(P::Output) -> Inner + Send + Sync + 'static,
    Inner: Publisher<Failure = P::Failure> + Send + Sync + 'static,
    Inner::Output: Send + 'static,
    P::Failure: Send + 'static,
    P::Output: 'static,
{
    type Output = Inner::Output;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = Inner::Output, Failure = P::Failure> + 'static,
    {
        let core = Arc::new_cyclic(|weak: &Weak<FlatMapCore<S>>| FlatMapCore {
            weak: weak.clone(),
            max_publishers: self.max_publishers,
            state: Mutex::new(FlatMapMachine {
                outer: OuterState::Awaiting,
                inners: BTreeMap::new(),
                pending_inners: 0,
                next_index: 0,
                buffer: VecDeque::new(),
                demand: Demand::NONE,
                outer_finished: false,
                draining: false,
                terminal: false,
            }),
            downstream: subscriber,
        });
        self.upstream.subscribe(OuterSubscriber {
            core,
            transform: Arc::clone(&self.transform),
            _marker: core::marker::PhantomData,
        });
    }
}

enum OuterState {
    Awaiting,
    Active(SharedSubscription),
    Gone,
}

struct FlatMapMachine<V> {
    outer: OuterState,
    inners: BTreeMap<u64, SharedSubscription>,
    /// 已订阅但尚未握手的内层数。
    pending_inners: usize,
    next_index: u64,
    buffer: VecDeque<(u64, V)>,
    demand: Demand,
    outer_finished: bool,
    draining: bool,
    terminal: bool,
}

struct FlatMapCore<Down: Subscriber> {
    weak: Weak<Self>,
    max_publishers: Demand,
    state: Mutex<FlatMapMachine<<Down as Subscriber>::Input>>,
    downstream: Down,
}

impl<Down> FlatMapCore<Down>
where
    Down: Subscriber + 'static,
    Down::Input: Send + 'static,
    Down::Failure: Send + 'static,
{
    fn shared(&self) -> SharedSubscription {
        self.weak.upgrade().expect("阶段在回调期间必然存活")
    }

    /// 终结全局：取消外层与全部内层，按需向下游发失败。
    fn fail(&self, error: Down::Failure) {
        let (outer, inners) = {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            state.terminal = true;
            state.buffer.clear();
            let outer = match core::mem::replace(&mut state.outer, OuterState::Gone) {
                OuterState::Active(subscription) => Some(subscription),
                _ => None,
            };
            let inners: alloc::vec::Vec<_> =
                core::mem::take(&mut state.inners).into_values().collect();
            (outer, inners)
        };
        if let Some(outer) = outer {
            outer.cancel();
        }
        for inner in inners {
            inner.cancel();
        }
        self.downstream.receive_completion(Completion::Failed(error));
    }

    /// 完成判定：外层已尽且一切内层与缓冲排空。
    fn finish_if_drained(&self) {
        let finish = {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            let drained = state.outer_finished
                && state.inners.is_empty()
                && state.pending_inners == 0
                && state.buffer.is_empty();
            if drained {
                state.terminal = true;
            }
            drained
        };
        if finish {
            self.downstream.receive_completion(Completion::Finished);
        }
    }

    /// 缓冲排水：独占推进，逐个投递并向来源内层补拉。
    fn drain(&self) {
        {
            let mut state = self.state.lock();
            if state.terminal || state.draining {
                return;
            }
            state.draining = true;
        }
        loop {
            let (origin, value) = {
                let mut state = self.state.lock();
                if state.terminal {
                    state.draining = false;
                    return;
                }
                if !state.demand.is_positive() || state.buffer.is_empty() {
                    state.draining = false;
                    break;
                }
                let (index, value) = state
                    .buffer
                    .pop_front()
                    .expect("缓冲非空判定后必有队头元素");
                state.demand -= Demand::finite(1);
                (state.inners.get(&index).cloned(), value)
            };
            let extra = self.downstream.receive_value(value);
            if !extra.is_none() {
                self.state.lock().demand += extra;
            }
            if let Some(origin) = origin {
                origin.request(Demand::finite(1));
            }
        }
        self.finish_if_drained();
    }
}

struct OuterSubscriber<In, Down: Subscriber, F> {
    core: Arc<FlatMapCore<Down>>,
    transform: Arc<F>,
    _marker: core::marker::PhantomData<fn(In)>,
}

impl<Down, F, In, Inner> Subscriber for OuterSubscriber<In, Down, F>
where
    Down: Subscriber + 'static,
    Down::Input: Send + 'static,
    Down::Failure: Send + 'static,
    F: Fn(In) -> Inner + Send + Sync + 'static,
    Inner: Publisher<Output = Down::Input, Failure = Down::Failure> + Send + Sync + 'static,
    In: 'static,
{
    type Input = In;
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
        subscription.request(self.core.max_publishers);
    }

    fn receive_value(&self, value: In) -> Demand {
        let index = {
            let mut state = self.core.state.lock();
            if state.terminal {
                return Demand::NONE;
            }
            state.next_index += 1;
            state.pending_inners += 1;
            state.next_index
        };
        let inner = (self.transform)(value);
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
                    state.outer = OuterState::Gone;
                    state.outer_finished = true;
                }
                self.core.finish_if_drained();
            }
            Completion::Failed(error) => self.core.fail(error),
        }
    }
}

struct InnerSubscriber<Down: Subscriber> {
    core: Arc<FlatMapCore<Down>>,
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
        {
            let mut state = self.core.state.lock();
            if state.terminal {
                drop(state);
                subscription.cancel();
                return;
            }
            state.pending_inners = state.pending_inners.saturating_sub(1);
            state.inners.insert(self.index, subscription.clone());
        }
        // 每条内层先拉一个，投递后按一换一补拉。
        subscription.request(Demand::finite(1));
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        let direct = {
            let mut state = self.core.state.lock();
            if state.terminal {
                return Demand::NONE;
            }
            if state.demand.is_positive() && state.buffer.is_empty() && !state.draining {
                state.demand -= Demand::finite(1);
                true
            } else {
                false
            }
        };
        if direct {
            let extra = self.core.downstream.receive_value(value);
            if !extra.is_none() {
                self.core.state.lock().demand += extra;
                self.core.drain();
            }
            // 一换一：直接投递后向本内层补拉一个。
            Demand::finite(1)
        } else {
            let mut state = self.core.state.lock();
            if state.terminal {
                return Demand::NONE;
            }
            state.buffer.push_back((self.index, value));
            Demand::NONE
        }
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        match completion {
            Completion::Finished => {
                let outer = {
                    let mut state = self.core.state.lock();
                    if state.terminal {
                        return;
                    }
                    state.inners.remove(&self.index);
                    match &state.outer {
                        // 内层让位：向外层补拉一个新的发布者。
                        OuterState::Active(subscription) => Some(subscription.clone()),
                        _ => None,
                    }
                };
                if let Some(outer) = outer {
                    outer.request(Demand::finite(1));
                }
                self.core.finish_if_drained();
            }
            Completion::Failed(error) => self.core.fail(error),
        }
    }
}

impl<Down> Subscription for FlatMapCore<Down>
where
    Down: Subscriber + 'static,
    Down::Input: Send + 'static,
    Down::Failure: Send + 'static,
{
    fn request(&self, demand: Demand) {
        let demand = demand.expect_nonzero();
        {
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
        }
        self.drain();
    }

    fn cancel(&self) {
        let (outer, inners) = {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            state.terminal = true;
            state.buffer.clear();
            let outer = match core::mem::replace(&mut state.outer, OuterState::Gone) {
                OuterState::Active(subscription) => Some(subscription),
                _ => None,
            };
            let inners: alloc::vec::Vec<_> =
                core::mem::take(&mut state.inners).into_values().collect();
            (outer, inners)
        };
        if let Some(outer) = outer {
            outer.cancel();
        }
        for inner in inners {
            inner.cancel();
        }
    }
}
