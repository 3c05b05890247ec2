//! `replace_error`：把失败终结替换为一个收尾值的自插入算子。
//!
//! # 设计背景（Why）
//! - 替换值也是值，必须遵守需求记账：若失败到达时下游需求为零，
//!   阶段进入 `TerminatedPending` 挂起，等到下一次 `request` 才投递
//!   替换值与 `Finished`。
//! - 经过本算子错误被彻底消化，下游错误类型收窄为
//!   [`Infallible`](core::convert::Infallible)。
//!
//! # 契约说明（What）
//! - 待决需求计数随每次值投递扣减、随下游返回的增量与 `request` 增加；
//! - 失败时上游已经自行终结，无须回头取消。

use alloc::sync::{Arc, Weak};
use core::convert::Infallible;
use core::marker::PhantomData;

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber, Subscription};
use crate::demand::Demand;
use crate::error::{codes, protocol_violation};

/// 失败替换描述符。
pub struct ReplaceError<P: Publisher> {
    upstream: P,
    replacement: P::Output,
}

impl<P: Publisher> ReplaceError<P> {
    pub(crate) fn new(upstream: P, replacement: P::Output) -> Self {
        ReplaceError {
            upstream,
            replacement,
        }
    }
}

impl<P> Clone for ReplaceError<P>
where
    P: Publisher + Clone,
    P::Output: Clone,
{
    fn clone(&self) -> Self {
        ReplaceError {
            upstream: self.upstream.clone(),
            replacement: self.replacement.clone(),
        }
    }
}

impl<P> Publisher for ReplaceError<P>
where
    P: Publisher,
    P::Output: Clone + Send + 'static,
    P::Failure: 'static,
{
    type Output = P::Output;
    type Failure = Infallible;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = P::Output, Failure = Infallible> + 'static,
    {
        let stage = Arc::new_cyclic(|weak: &Weak<ReplaceErrorStage<P::Failure, S>>| {
            ReplaceErrorStage {
                weak: weak.clone(),
                state: Mutex::new(ReplaceErrorState {
                    phase: ReplacePhase::Awaiting,
                    pending_demand: Demand::NONE,
                    replacement: Some(self.replacement.clone()),
                }),
                downstream: subscriber,
                _marker: PhantomData,
            }
        });
        self.upstream.subscribe(stage);
    }
}

enum ReplacePhase {
    Awaiting,
    Active(SharedSubscription),
    /// 失败已到达而需求为零：替换值待投递。
    TerminatedPending,
    Terminal,
}

struct ReplaceErrorState<V> {
    phase: ReplacePhase,
    pending_demand: Demand,
    replacement: Option<V>,
}

struct ReplaceErrorStage<EUp, Down: Subscriber> {
    weak: Weak<Self>,
    state: Mutex<ReplaceErrorState<Down::Input>>,
    downstream: Down,
    _marker: PhantomData<fn(EUp)>,
}

impl<EUp, Down> ReplaceErrorStage<EUp, Down>
where
    EUp: 'static,
    Down: Subscriber<Failure = Infallible> + 'static,
    Down::Input: Send + 'static,
{
    fn shared(&self) -> SharedSubscription {
        self.weak.upgrade().expect("阶段在回调期间必然存活")
    }

    /// 投递替换值并正常收尾。
    fn emit_replacement(&self, value: Option<Down::Input>) {
        if let Some(value) = value {
            let _ = self.downstream.receive_value(value);
        }
        self.downstream.receive_completion(Completion::Finished);
    }
}

impl<EUp, Down> Subscriber for ReplaceErrorStage<EUp, Down>
where
    EUp: 'static,
    Down: Subscriber<Failure = Infallible> + 'static,
    Down::Input: Send + 'static,
{
    type Input = Down::Input;
    type Failure = EUp;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        let adopted = {
            let mut state = self.state.lock();
            match state.phase {
                ReplacePhase::Awaiting => {
                    state.phase = ReplacePhase::Active(subscription.clone());
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

    fn receive_value(&self, value: Self::Input) -> Demand {
        {
            let mut state = self.state.lock();
            if !matches!(state.phase, ReplacePhase::Active(_)) {
                return Demand::NONE;
            }
            state.pending_demand -= Demand::finite(1);
        }
        let extra = self.downstream.receive_value(value);
        if !extra.is_none() {
            self.state.lock().pending_demand += extra;
        }
        extra
    }

    fn receive_completion(&self, completion: Completion<EUp>) {
        match completion {
            Completion::Finished => {
                let deliver = {
                    let mut state = self.state.lock();
                    match state.phase {
                        ReplacePhase::Active(_) | ReplacePhase::Awaiting => {
                            state.phase = ReplacePhase::Terminal;
                            state.replacement = None;
                            true
                        }
                        _ => false,
                    }
                };
                if deliver {
                    self.downstream.receive_completion(Completion::Finished);
                }
            }
            Completion::Failed(_) => {
                let replacement = {
                    let mut state = self.state.lock();
                    match state.phase {
                        ReplacePhase::Active(_) | ReplacePhase::Awaiting => {
                            if state.pending_demand.is_positive() {
                                state.phase = ReplacePhase::Terminal;
                                state.replacement.take()
                            } else {
                                state.phase = ReplacePhase::TerminatedPending;
                                return;
                            }
                        }
                        _ => return,
                    }
                };
                self.emit_replacement(replacement);
            }
        }
    }
}

impl<EUp, Down> Subscription for ReplaceErrorStage<EUp, Down>
where
    EUp: 'static,
    Down: Subscriber<Failure = Infallible> + 'static,
    Down::Input: Send + 'static,
{
    fn request(&self, demand: Demand) {
        let demand = demand.expect_nonzero();
        enum Route {
            Upstream(SharedSubscription),
            Replacement(Option<()>),
            Idle,
        }
        let (route, replacement) = {
            let mut state = self.state.lock();
            match &state.phase {
                ReplacePhase::Awaiting => protocol_violation(
                    codes::REQUEST_BEFORE_SUBSCRIPTION,
                    "订阅握手完成前收到 request",
                ),
                ReplacePhase::Active(subscription) => {
                    let subscription = subscription.clone();
                    state.pending_demand += demand;
                    (Route::Upstream(subscription), None)
                }
                ReplacePhase::TerminatedPending => {
                    state.phase = ReplacePhase::Terminal;
                    (Route::Replacement(Some(())), state.replacement.take())
                }
                ReplacePhase::Terminal => (Route::Idle, None),
            }
        };
        match route {
            Route::Upstream(upstream) => upstream.request(demand),
            Route::Replacement(_) => self.emit_replacement(replacement),
            Route::Idle => {}
        }
    }

    fn cancel(&self) {
        let upstream = {
            let mut state = self.state.lock();
            state.replacement = None;
            match core::mem::replace(&mut state.phase, ReplacePhase::Terminal) {
                ReplacePhase::Active(subscription) => Some(subscription),
                _ => None,
            }
        };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}
