//! `concatenate`：前缀流尽后接续后缀流，同一个下游贯穿始终。
//!
//! # 契约说明（What）
//! - 前缀 `Finished` 触发后缀订阅；前缀 `Failed` 原样转发且后缀永不订阅；
//! - 只有后缀的 `Finished` 才终结下游；
//! - 前缀期间累计的未满足需求在后缀握手时整体重放；
//! - 下游只在前缀握手时收到一次订阅交付。

use alloc::sync::{Arc, Weak};

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber, Subscription};
use crate::demand::Demand;
use crate::error::{codes, protocol_violation};

/// 顺序接续描述符。
#[derive(Clone)]
pub struct Concatenate<P1, P2> {
    prefix: P1,
    suffix: P2,
}

impl<P1, P2> Concatenate<P1, P2> {
    pub(crate) fn new(prefix: P1, suffix: P2) -> Self {
        Concatenate { prefix, suffix }
    }
}

impl<P1, P2> Publisher for Concatenate<P1, P2>
where
    P1: Publisher,
    P2: Publisher<Output = P1::Output, Failure = P1::Failure> + Clone + Send + Sync + 'static,
    P1::Output: Send + 'static,
    P1::Failure: 'static,
{
    type Output = P1::Output;
    type Failure = P1::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = P1::Output, Failure = P1::Failure> + 'static,
    {
        let core = Arc::new_cyclic(|weak: &Weak<ConcatCore<P2, S>>| ConcatCore {
            weak: weak.clone(),
            suffix: self.suffix.clone(),
            state: Mutex::new(ConcatMachine {
                phase: ConcatPhase::PendingPrefix,
                demand: Demand::NONE,
            }),
            downstream: subscriber,
        });
        self.prefix.subscribe(PrefixSubscriber { core });
    }
}

enum ConcatPhase {
    PendingPrefix,
    Prefix(SharedSubscription),
    PendingSuffix,
    Suffix(SharedSubscription),
    Terminal,
}

struct ConcatMachine {
    phase: ConcatPhase,
    demand: Demand,
}

struct ConcatCore<P2, Down> {
    weak: Weak<Self>,
    suffix: P2,
    state: Mutex<ConcatMachine>,
    downstream: Down,
}

impl<P2, Down> ConcatCore<P2, Down>
where
    P2: Publisher + Clone + Send + Sync + 'static,
    Down: Subscriber<Input = P2::Output, Failure = P2::Failure> + 'static,
    P2::Output: Send + 'static,
    P2::Failure: 'static,
{
    fn shared(&self) -> SharedSubscription {
        self.weak.upgrade().expect("阶段在回调期间必然存活")
    }

    fn deliver(&self, value: P2::Output) -> Demand {
        {
            let mut state = self.state.lock();
            state.demand -= Demand::finite(1);
        }
        let extra = self.downstream.receive_value(value);
        if !extra.is_none() {
            self.state.lock().demand += extra;
        }
        extra
    }

    fn prefix_subscription(&self, subscription: SharedSubscription) {
        let adopted = {
            let mut state = self.state.lock();
            match state.phase {
                ConcatPhase::PendingPrefix => {
                    state.phase = ConcatPhase::Prefix(subscription.clone());
                    true
                }
                _ => false,
            }
        };
        if adopted {
            self.downstream.receive_subscription(self.shared());
        } else {
            subscription.cancel();
        }
    }

    fn prefix_completion(&self, completion: Completion<P2::Failure>) {
        match completion {
            Completion::Finished => {
                let proceed = {
                    let mut state = self.state.lock();
                    match state.phase {
                        ConcatPhase::Prefix(_) | ConcatPhase::PendingPrefix => {
                            state.phase = ConcatPhase::PendingSuffix;
                            true
                        }
                        _ => false,
                    }
                };
                if proceed {
                    let core = self.weak.upgrade().expect("阶段在回调期间必然存活");
                    let suffix = self.suffix.clone();
                    suffix.subscribe(SuffixSubscriber { core });
                }
            }
            Completion::Failed(error) => {
                let forward = {
                    let mut state = self.state.lock();
                    match state.phase {
                        ConcatPhase::Prefix(_) | ConcatPhase::PendingPrefix => {
                            state.phase = ConcatPhase::Terminal;
                            true
                        }
                        _ => false,
                    }
                };
                if forward {
                    self.downstream
                        .receive_completion(Completion::Failed(error));
                }
            }
        }
    }

    fn suffix_subscription(&self, subscription: SharedSubscription) {
        let replay = {
            let mut state = self.state.lock();
            match state.phase {
                ConcatPhase::PendingSuffix => {
                    state.phase = ConcatPhase::Suffix(subscription.clone());
                    state.demand
                }
                _ => {
                    drop(state);
                    subscription.cancel();
                    return;
                }
            }
        };
        if replay.is_positive() {
            subscription.request(replay);
        }
    }

    fn suffix_completion(&self, completion: Completion<P2::Failure>) {
        let forward = {
            let mut state = self.state.lock();
            match state.phase {
                ConcatPhase::Suffix(_) | ConcatPhase::PendingSuffix => {
                    state.phase = ConcatPhase::Terminal;
                    true
                }
                _ => false,
            }
        };
        if forward {
            self.downstream.receive_completion(completion);
        }
    }
}

impl<P2, Down> Subscription for ConcatCore<P2, Down>
where
    P2: Publisher + Clone + Send + Sync + 'static,
    Down: Subscriber<Input = P2::Output, Failure = P2::Failure> + 'static,
    P2::Output: Send + 'static,
    P2::Failure: 'static,
{
    fn request(&self, demand: Demand) {
        let demand = demand.expect_nonzero();
        let target = {
            let mut state = self.state.lock();
            state.demand += demand;
            match &state.phase {
                ConcatPhase::PendingPrefix => protocol_violation(
                    codes::REQUEST_BEFORE_SUBSCRIPTION,
                    "订阅握手完成前收到 request",
                ),
                ConcatPhase::Prefix(subscription) | ConcatPhase::Suffix(subscription) => {
                    Some(subscription.clone())
                }
                // 换段途中：计入需求，待后缀握手时重放。
                ConcatPhase::PendingSuffix => None,
                ConcatPhase::Terminal => None,
            }
        };
        if let Some(target) = target {
            target.request(demand);
        }
    }

    fn cancel(&self) {
        let target = {
            let mut state = self.state.lock();
            match core::mem::replace(&mut state.phase, ConcatPhase::Terminal) {
                ConcatPhase::Prefix(subscription) | ConcatPhase::Suffix(subscription) => {
                    Some(subscription)
                }
                _ => None,
            }
        };
        if let Some(target) = target {
            target.cancel();
        }
    }
}

/// 前缀段订阅者。
struct PrefixSubscriber<P2, Down> {
    core: Arc<ConcatCore<P2, Down>>,
}

impl<P2, Down> Subscriber for PrefixSubscriber<P2, Down>
where
    P2: Publisher + Clone + Send + Sync + 'static,
    Down: Subscriber<Input = P2::Output, Failure = P2::Failure> + 'static,
    P2::Output: Send + 'static,
    P2::Failure: 'static,
{
    type Input = P2::Output;
    type Failure = P2::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        self.core.prefix_subscription(subscription);
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        if !matches!(self.core.state.lock().phase, ConcatPhase::Prefix(_)) {
            return Demand::NONE;
        }
        self.core.deliver(value)
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        self.core.prefix_completion(completion);
    }
}

/// 后缀段订阅者。
struct SuffixSubscriber<P2, Down> {
    core: Arc<ConcatCore<P2, Down>>,
}

impl<P2, Down> Subscriber for SuffixSubscriber<P2, Down>
where
    P2: Publisher + Clone + Send + Sync + 'static,
    Down: Subscriber<Input = P2::Output, Failure = P2::Failure> + 'static,
    P2::Output: Send + 'static,
    P2::Failure: 'static,
{
    type Input = P2::Output;
    type Failure = P2::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        self.core.suffix_subscription(subscription);
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        if !matches!(self.core.state.lock().phase, ConcatPhase::Suffix(_)) {
            return Demand::NONE;
        }
        self.core.deliver(value)
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        self.core.suffix_completion(completion);
    }
}
