//! `zip`：多路扇入，按序配对成元组下发。
//!
//! # 设计背景（Why）
//! - 每个子流配一把先进先出队列与独立状态；只有当所有队列都非空时
//!   才各出队一个、组装元组投递：第 k 个元组恰由各子流的第 k 个值构成。
//! - 下游的 `request(d)` 原样转发给每个子流（子流各自拉取自己的上游），
//!   内部的元组计数确保投递不超过 `d`。
//! - 三元/四元变体由二元组合而成（`zip(zip(a,b),c)` 再投影摊平）：
//!   配对语义可结合，逐层转发保持"原样转发到每个子流"的需求契约。
//!
//! # 终结规则（What）
//! - 任一子流 `Failed(e)` ⇒ 下游 `Failed(e)`，其余子流全部取消；
//! - 某子流 `Finished` 且其队列为空 ⇒ 再无元组可产，下游 `Finished`，
//!   其余子流取消（该检查在子流终结时与每次出队后都会执行）；
//! - 下游订阅在**所有**子流完成握手后才交付。

use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber, Subscription};
use crate::demand::Demand;
use crate::error::{codes, protocol_violation};
use crate::operators::map::Map;

/// 二元配对描述符。
#[derive(Clone)]
pub struct Zip<PA, PB> {
    first: PA,
    second: PB,
}

impl<PA, PB> Zip<PA, PB> {
    pub(crate) fn new(first: PA, second: PB) -> Self {
        Zip { first, second }
    }
}

impl<PA, PB> Publisher for Zip<PA, PB>
where
    PA: Publisher,
    PB: Publisher<Failure = PA::Failure>,
    PA::Output: Send + 'static,
    PB::Output: Send + 'static,
    PA::Failure: Send + 'static,
{
    type Output = (PA::Output, PB::Output);
    type Failure = PA::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = (PA::Output, PB::Output), Failure = PA::Failure> + 'static,
    {
        let core = Arc::new_cyclic(|weak: &Weak<ZipCore<PA::Output, PB::Output, S>>| ZipCore {
            weak: weak.clone(),
            state: Mutex::new(ZipMachine {
                first: ChildLink::new(),
                second: ChildLink::new(),
                queue_first: VecDeque::new(),
                queue_second: VecDeque::new(),
                demand: Demand::NONE,
                delivered_subscription: false,
                draining: false,
                terminal: false,
            }),
            downstream: subscriber,
        });
        self.first.subscribe(FirstChild {
            core: Arc::clone(&core),
        });
        self.second.subscribe(SecondChild { core });
    }
}

/// 子流生命周期。
enum ChildState {
    AwaitingSubscription,
    Active,
    Finished,
    Failed,
    Cancelled,
}

struct ChildLink {
    subscription: Option<SharedSubscription>,
    state: ChildState,
}

impl ChildLink {
    fn new() -> Self {
        ChildLink {
            subscription: None,
            state: ChildState::AwaitingSubscription,
        }
    }

    /// 握手：仅首个订阅被接纳。
    fn adopt(&mut self, subscription: &SharedSubscription) -> bool {
        if matches!(self.state, ChildState::AwaitingSubscription) && self.subscription.is_none() {
            self.subscription = Some(subscription.clone());
            self.state = ChildState::Active;
            true
        } else {
            false
        }
    }

    fn take_for_teardown(&mut self) -> Option<SharedSubscription> {
        self.state = ChildState::Cancelled;
        self.subscription.take()
    }
}

struct ZipMachine<A, B> {
    first: ChildLink,
    second: ChildLink,
    queue_first: VecDeque<A>,
    queue_second: VecDeque<B>,
    demand: Demand,
    delivered_subscription: bool,
    draining: bool,
    terminal: bool,
}

impl<A, B> ZipMachine<A, B> {
    /// 是否已无法再产出元组：某侧已终结且队列为空。
    fn exhausted(&self) -> bool {
        (matches!(self.first.state, ChildState::Finished) && self.queue_first.is_empty())
            || (matches!(self.second.state, ChildState::Finished) && self.queue_second.is_empty())
    }
}

struct ZipCore<A, B, Down> {
    weak: Weak<Self>,
    state: Mutex<ZipMachine<A, B>>,
    downstream: Down,
}

impl<A, B, Down> ZipCore<A, B, Down>
where
    A: Send + 'static,
    B: Send + 'static,
    Down: Subscriber<Input = (A, B)> + 'static,
    Down::Failure: Send + 'static,
{
    fn shared(&self) -> SharedSubscription {
        self.weak.upgrade().expect("阶段在回调期间必然存活")
    }

    /// 握手登记；所有子流就位后交付下游订阅。
    fn child_subscription(&self, which: ChildIndex, subscription: SharedSubscription) {
        let deliver = {
            let mut state = self.state.lock();
            if state.terminal {
                drop(state);
                subscription.cancel();
                return;
            }
            let adopted = match which {
                ChildIndex::First => state.first.adopt(&subscription),
                ChildIndex::Second => state.second.adopt(&subscription),
            };
            if !adopted {
                drop(state);
                subscription.cancel();
                return;
            }
            let all_ready = matches!(state.first.state, ChildState::Active)
                && matches!(state.second.state, ChildState::Active);
            if all_ready && !state.delivered_subscription {
                state.delivered_subscription = true;
                true
            } else {
                false
            }
        };
        if deliver {
            self.downstream.receive_subscription(self.shared());
        }
    }

    /// 失败：终结全局、取消兄弟、下发失败。
    fn fail(&self, which: ChildIndex, error: Down::Failure) {
        let (siblings, handshake_first) = {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            state.terminal = true;
            match which {
                ChildIndex::First => state.first.state = ChildState::Failed,
                ChildIndex::Second => state.second.state = ChildState::Failed,
            }
            state.queue_first.clear();
            state.queue_second.clear();
            let handshake_first = !state.delivered_subscription;
            state.delivered_subscription = true;
            let mut siblings = Vec::new();
            siblings.extend(state.first.take_for_teardown());
            siblings.extend(state.second.take_for_teardown());
            (siblings, handshake_first)
        };
        for sibling in siblings {
            sibling.cancel();
        }
        // 子流在全员握手前同步失败：先补上订阅交付再终结，保住握手次序。
        if handshake_first {
            self.downstream.receive_subscription(self.shared());
        }
        self.downstream.receive_completion(Completion::Failed(error));
    }

    fn child_finished(&self, which: ChildIndex) {
        {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            let link = match which {
                ChildIndex::First => &mut state.first,
                ChildIndex::Second => &mut state.second,
            };
            if !matches!(link.state, ChildState::Active) {
                return;
            }
            link.state = ChildState::Finished;
            link.subscription = None;
        }
        self.drain();
    }

    /// 配对排水：独占出队组装元组，出口处统一做枯竭判定。
    fn drain(&self) {
        {
            let mut state = self.state.lock();
            if state.terminal || state.draining {
                return;
            }
            state.draining = true;
        }
        loop {
            let pair = {
                let mut state = self.state.lock();
                if state.terminal {
                    state.draining = false;
                    return;
                }
                if !state.demand.is_positive()
                    || state.queue_first.is_empty()
                    || state.queue_second.is_empty()
                {
                    state.draining = false;
                    break;
                }
                state.demand -= Demand::finite(1);
                let a = state
                    .queue_first
                    .pop_front()
                    .expect("队列非空判定后必有队头元素");
                let b = state
                    .queue_second
                    .pop_front()
                    .expect("队列非空判定后必有队头元素");
                (a, b)
            };
            let extra = self.downstream.receive_value(pair);
            if !extra.is_none() {
                let targets = {
                    let mut state = self.state.lock();
                    state.demand += extra;
                    child_subscriptions(&state)
                };
                // 追加需求同样原样转发到每个子流。
                for target in targets {
                    target.request(extra);
                }
            }
        }
        self.finish_if_exhausted();
    }

    fn finish_if_exhausted(&self) {
        let (siblings, handshake_first) = {
            let mut state = self.state.lock();
            if state.terminal || !state.exhausted() {
                return;
            }
            state.terminal = true;
            let handshake_first = !state.delivered_subscription;
            state.delivered_subscription = true;
            let mut siblings = Vec::new();
            siblings.extend(state.first.take_for_teardown());
            siblings.extend(state.second.take_for_teardown());
            (siblings, handshake_first)
        };
        for sibling in siblings {
            sibling.cancel();
        }
        if handshake_first {
            self.downstream.receive_subscription(self.shared());
        }
        self.downstream.receive_completion(Completion::Finished);
    }
}

fn child_subscriptions<A, B>(state: &ZipMachine<A, B>) -> Vec<SharedSubscription> {
    let mut subscriptions = Vec::new();
    if let Some(subscription) = &state.first.subscription {
        subscriptions.push(subscription.clone());
    }
    if let Some(subscription) = &state.second.subscription {
        subscriptions.push(subscription.clone());
    }
    subscriptions
}

#[derive(Clone, Copy)]
enum ChildIndex {
    First,
    Second,
}

struct FirstChild<A, B, Down> {
    core: Arc<ZipCore<A, B, Down>>,
}

impl<A, B, Down> Subscriber for FirstChild<A, B, Down>
where
    A: Send + 'static,
    B: Send + 'static,
    Down: Subscriber<Input = (A, B)> + 'static,
    Down::Failure: Send + 'static,
{
    type Input = A;
    type Failure = Down::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        self.core
            .child_subscription(ChildIndex::First, subscription);
    }

    fn receive_value(&self, value: A) -> Demand {
        {
            let mut state = self.core.state.lock();
            if state.terminal {
                return Demand::NONE;
            }
            state.queue_first.push_back(value);
        }
        self.core.drain();
        Demand::NONE
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        match completion {
            Completion::Finished => self.core.child_finished(ChildIndex::First),
            Completion::Failed(error) => self.core.fail(ChildIndex::First, error),
        }
    }
}

struct SecondChild<A, B, Down> {
    core: Arc<ZipCore<A, B, Down>>,
}

impl<A, B, Down> Subscriber for SecondChild<A, B, Down>
where
    A: Send + 'static,
    B: Send + 'static,
    Down: Subscriber<Input = (A, B)> + 'static,
    Down::Failure: Send + 'static,
{
    type Input = B;
    type Failure = Down::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        self.core
            .child_subscription(ChildIndex::Second, subscription);
    }

    fn receive_value(&self, value: B) -> Demand {
        {
            let mut state = self.core.state.lock();
            if state.terminal {
                return Demand::NONE;
            }
            state.queue_second.push_back(value);
        }
        self.core.drain();
        Demand::NONE
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        match completion {
            Completion::Finished => self.core.child_finished(ChildIndex::Second),
            Completion::Failed(error) => self.core.fail(ChildIndex::Second, error),
        }
    }
}

impl<A, B, Down> Subscription for ZipCore<A, B, Down>
where
    A: Send + 'static,
    B: Send + 'static,
    Down: Subscriber<Input = (A, B)> + 'static,
    Down::Failure: Send + 'static,
{
    fn request(&self, demand: Demand) {
        let demand = demand.expect_nonzero();
        let targets = {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            if !state.delivered_subscription {
                protocol_violation(
                    codes::REQUEST_BEFORE_SUBSCRIPTION,
                    "订阅握手完成前收到 request",
                );
            }
            state.demand += demand;
            child_subscriptions(&state)
        };
        for target in targets {
            target.request(demand);
        }
        self.drain();
    }

    fn cancel(&self) {
        let siblings = {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            state.terminal = true;
            state.queue_first.clear();
            state.queue_second.clear();
            let mut siblings = Vec::new();
            siblings.extend(state.first.take_for_teardown());
            siblings.extend(state.second.take_for_teardown());
            siblings
        };
        for sibling in siblings {
            sibling.cancel();
        }
    }
}

type Flatten3<A, B, C> = fn(((A, B), C)) -> (A, B, C);
type Flatten4<A, B, C, D> = fn(((A, B), (C, D))) -> (A, B, C, D);

fn flatten3<A, B, C>(((a, b), c): ((A, B), C)) -> (A, B, C) {
    (a, b, c)
}

fn flatten4<A, B, C, D>(((a, b), (c, d)): ((A, B), (C, D))) -> (A, B, C, D) {
    (a, b, c, d)
}

/// 三元配对描述符：`zip(zip(a,b),c)` 的摊平组合。
#[derive(Clone)]
pub struct Zip3<PA, PB, PC>
where
    PA: Publisher,
    PB: Publisher,
    PC: Publisher,
{
    inner: Map<Zip<Zip<PA, PB>, PC>, Flatten3<PA::Output, PB::Output, PC::Output>>,
}

impl<PA, PB, PC> Zip3<PA, PB, PC>
where
    PA: Publisher,
    PB: Publisher,
    PC: Publisher,
{
    pub(crate) fn new(first: PA, second: PB, third: PC) -> Self {
        Zip3 {
            inner: Map::new(
                Zip::new(Zip::new(first, second), third),
                flatten3 as Flatten3<PA::Output, PB::Output, PC::Output>,
            ),
        }
    }
}

impl<PA, PB, PC> Publisher for Zip3<PA, PB, PC>
where
    PA: Publisher,
    PB: Publisher<Failure = PA::Failure>,
    PC: Publisher<Failure = PA::Failure>,
    PA::Output: Send + 'static,
    PB::Output: Send + 'static,
    PC::Output: Send + 'static,
    PA::Failure: Send + 'static,
{
    type Output = (PA::Output, PB::Output, PC::Output);
    type Failure = PA::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = Self::Output, Failure = Self::Failure> + 'static,
    {
        self.inner.subscribe(subscriber);
    }
}

/// 四元配对描述符：两对二元配对的摊平组合。
#[derive(Clone)]
pub struct Zip4<PA, PB, PC, PD>
where
    PA: Publisher,
    PB: Publisher,
    PC: Publisher,
    PD: Publisher,
{
    inner: Map<
        Zip<Zip<PA, PB>, Zip<PC, PD>>,
        Flatten4<PA::Output, PB::Output, PC::Output, PD::Output>,
    >,
}

impl<PA, PB, PC, PD> Zip4<PA, PB, PC, PD>
where
    PA: Publisher,
    PB: Publisher,
    PC: Publisher,
    PD: Publisher,
{
    pub(crate) fn new(first: PA, second: PB, third: PC, fourth: PD) -> Self {
        Zip4 {
            inner: Map::new(
                Zip::new(Zip::new(first, second), Zip::new(third, fourth)),
                flatten4 as Flatten4<PA::Output, PB::Output, PC::Output, PD::Output>,
            ),
        }
    }
}

impl<PA, PB, PC, PD> Publisher for Zip4<PA, PB, PC, PD>
where
    PA: Publisher,
    PB: Publisher<Failure = PA::Failure>,
    PC: Publisher<Failure = PA::Failure>,
    PD: Publisher<Failure = PA::Failure>,
    PA::Output: Send + 'static,
    PB::Output: Send + 'static,
    PC::Output: Send + 'static,
    PD::Output: Send + 'static,
    PA::Failure: Send + 'static,
{
    type Output = (PA::Output, PB::Output, PC::Output, PD::Output);
    type Failure = PA::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = Self::Output, Failure = Self::Failure> + 'static,
    {
        self.inner.subscribe(subscriber);
    }
}
