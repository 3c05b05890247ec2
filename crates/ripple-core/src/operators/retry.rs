//! `retry`：失败时对同一上游发布者重新订阅的恢复算子。
//!
//! # 设计背景（Why）
//! - 每次重订都带来一次全新的 `receive_subscription`；阶段把它存为新的
//!   上游句柄并重放仍然存活的下游需求，但**绝不**向下游再次
//!   交付订阅——下游对重试全程无感。
//! - 同步失败的上游会在 `subscribe` 调用栈内再次递归进入
//!   `receive_completion`；`completion_recursion` + `needs_subscribe`
//!   两面旗标把递归坍缩成循环，栈深有界。
//! - 循环的每一圈都回查终态：与重订并发到达的 `cancel` 在任何一点
//!   观察到都会终止重试且不向下游发声。
//!
//! # 契约说明（What）
//! - `limit = Some(n)`：最多重试 `n` 次，之后的失败原样转发；
//!   `limit = None`：无限重试；
//! - 存活需求 = 下游累计 `request` − 已投递值数，由 ± 记账维护。

use alloc::sync::{Arc, Weak};

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber, Subscription};
use crate::demand::Demand;
use crate::error::{codes, protocol_violation};

/// 重试描述符。
#[derive(Clone)]
pub struct Retry<P> {
    upstream: P,
    limit: Option<u64>,
}

impl<P> Retry<P> {
    pub(crate) fn new(upstream: P, limit: Option<u64>) -> Self {
        Retry { upstream, limit }
    }
}

impl<P> Publisher for Retry<P>
where
    P: Publisher + Clone + Send + Sync + 'static,
    P::Output: Send + 'static,
    P::Failure: 'static,
{
    type Output = P::Output;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = P::Output, Failure = P::Failure> + 'static,
    {
        let stage = Arc::new_cyclic(|weak: &Weak<RetryStage<P, S>>| RetryStage {
            weak: weak.clone(),
            publisher: self.upstream.clone(),
            state: Mutex::new(RetryMachine {
                phase: RetryPhase::Awaiting,
                demand: Demand::NONE,
                remaining: self.limit,
                delivered_subscription: false,
                completion_recursion: false,
                needs_subscribe: false,
            }),
            downstream: subscriber,
        });
        self.upstream.subscribe(Arc::clone(&stage));
    }
}

enum RetryPhase {
    /// 等待（首次或重订后的）上游握手。
    Awaiting,
    Active(SharedSubscription),
    Terminal,
}

struct RetryMachine {
    phase: RetryPhase,
    demand: Demand,
    remaining: Option<u64>,
    delivered_subscription: bool,
    completion_recursion: bool,
    needs_subscribe: bool,
}

struct RetryStage<P, Down> {
    weak: Weak<Self>,
    publisher: P,
    state: Mutex<RetryMachine>,
    downstream: Down,
}

impl<P, Down> RetryStage<P, Down>
where
    P: Publisher + Clone + Send + Sync + 'static,
    Down: Subscriber<Input = P::Output, Failure = P::Failure> + 'static,
    P::Output: Send + 'static,
{
    fn shared(&self) -> SharedSubscription {
        self.weak.upgrade().expect("阶段在回调期间必然存活")
    }

    /// 重订循环：把递归触发的再订阅请求坍缩到本层执行。
    fn resubscribe_loop(&self) {
        loop {
            {
                let mut state = self.state.lock();
                if matches!(state.phase, RetryPhase::Terminal) {
                    state.completion_recursion = false;
                    return;
                }
                if !state.needs_subscribe {
                    state.completion_recursion = false;
                    return;
                }
                state.needs_subscribe = false;
            }
            let stage = self.weak.upgrade().expect("阶段在回调期间必然存活");
            self.publisher.subscribe(stage);
        }
    }
}

impl<P, Down> Subscriber for RetryStage<P, Down>
where
    P: Publisher + Clone + Send + Sync + 'static,
    Down: Subscriber<Input = P::Output, Failure = P::Failure> + 'static,
    P::Output: Send + 'static,
{
    type Input = P::Output;
    type Failure = P::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        let (deliver_downstream, replay) = {
            let mut state = self.state.lock();
            match state.phase {
                RetryPhase::Awaiting => {
                    state.phase = RetryPhase::Active(subscription.clone());
                    if state.delivered_subscription {
                        // 重订握手：只重放存活需求。
                        (false, state.demand)
                    } else {
                        state.delivered_subscription = true;
                        (true, Demand::NONE)
                    }
                }
                _ => {
                    drop(state);
                    subscription.cancel();
                    return;
                }
            }
        };
        if deliver_downstream {
            self.downstream.receive_subscription(self.shared());
        } else if replay.is_positive() {
            subscription.request(replay);
        }
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        {
            let mut state = self.state.lock();
            if !matches!(state.phase, RetryPhase::Active(_)) {
                return Demand::NONE;
            }
            state.demand -= Demand::finite(1);
        }
        let extra = self.downstream.receive_value(value);
        if !extra.is_none() {
            self.state.lock().demand += extra;
        }
        extra
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        match completion {
            Completion::Finished => {
                let forward = {
                    let mut state = self.state.lock();
                    match core::mem::replace(&mut state.phase, RetryPhase::Terminal) {
                        RetryPhase::Terminal => false,
                        _ => true,
                    }
                };
                if forward {
                    self.downstream.receive_completion(Completion::Finished);
                }
            }
            Completion::Failed(error) => {
                let verdict = {
                    let mut state = self.state.lock();
                    match state.phase {
                        RetryPhase::Terminal => FailVerdict::Ignore,
                        _ => match state.remaining {
                            Some(0) => {
                                state.phase = RetryPhase::Terminal;
                                FailVerdict::Forward
                            }
                            Some(ref mut n) => {
                                *n -= 1;
                                state.phase = RetryPhase::Awaiting;
                                state.needs_subscribe = true;
                                if state.completion_recursion {
                                    FailVerdict::Coalesced
                                } else {
                                    state.completion_recursion = true;
                                    FailVerdict::Drive
                                }
                            }
                            None => {
                                state.phase = RetryPhase::Awaiting;
                                state.needs_subscribe = true;
                                if state.completion_recursion {
                                    FailVerdict::Coalesced
                                } else {
                                    state.completion_recursion = true;
                                    FailVerdict::Drive
                                }
                            }
                        },
                    }
                };
                match verdict {
                    FailVerdict::Ignore | FailVerdict::Coalesced => {}
                    FailVerdict::Forward => {
                        self.downstream
                            .receive_completion(Completion::Failed(error));
                    }
                    FailVerdict::Drive => self.resubscribe_loop(),
                }
            }
        }
    }
}

enum FailVerdict {
    /// 已终态，丢弃。
    Ignore,
    /// 重试额度耗尽，失败原样下发。
    Forward,
    /// 外层循环已在驱动重订，本层只登记。
    Coalesced,
    /// 本层负责驱动重订循环。
    Drive,
}

impl<P, Down> Subscription for RetryStage<P, Down>
where
    P: Publisher + Clone + Send + Sync + 'static,
    Down: Subscriber<Input = P::Output, Failure = P::Failure> + 'static,
    P::Output: Send + 'static,
{
    fn request(&self, demand: Demand) {
        let demand = demand.expect_nonzero();
        let target = {
            let mut state = self.state.lock();
            match &state.phase {
                RetryPhase::Terminal => return,
                RetryPhase::Awaiting => {
                    if !state.delivered_subscription {
                        protocol_violation(
                            codes::REQUEST_BEFORE_SUBSCRIPTION,
                            "订阅握手完成前收到 request",
                        );
                    }
                    // 重订途中：记账，握手时重放。
                    state.demand += demand;
                    None
                }
                RetryPhase::Active(subscription) => {
                    let subscription = subscription.clone();
                    state.demand += demand;
                    Some(subscription)
                }
            }
        };
        if let Some(target) = target {
            target.request(demand);
        }
    }

    fn cancel(&self) {
        let target = {
            let mut state = self.state.lock();
            state.needs_subscribe = false;
            match core::mem::replace(&mut state.phase, RetryPhase::Terminal) {
                RetryPhase::Active(subscription) => Some(subscription),
                _ => None,
            }
        };
        if let Some(target) = target {
            target.cancel();
        }
    }
}
