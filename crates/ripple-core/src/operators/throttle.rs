//! `throttle`：按最小间隔限速，窗口内的值按 `latest` 取舍。
//!
//! # 设计背景（Why）
//! - 状态机四态：`等待订阅 → 已订阅 → 待终结 → 终态`。
//! - 距上次发射已满间隔且无在途发射时，经 `schedule` 立即发射
//!  （首个值总是立即发射）；未满间隔时在
//!   `max(now, 上次发射 + 间隔)` 排定一次发射，窗口内新值按
//!   `latest` 覆盖或丢弃待发槽。
//! - 终结在有在途发射时挂起（`待终结`），随发射一并兑现。
//!
//! # 契约说明（What）
//! - 上游以 `Unlimited` 吸入；
//! - 发射时需求为零的待发值被丢弃（限速算子不补投旧值）。

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber, Subscription};
use crate::demand::Demand;
use crate::error::{codes, protocol_violation};
use crate::scheduler::{Scheduler, SchedulerTime};

/// 限速描述符；`latest = true` 时窗口内保留最新值，否则保留最早值。
pub struct Throttle<P, S: Scheduler> {
    upstream: P,
    interval: <S::Time as SchedulerTime>::Stride,
    scheduler: S,
    latest: bool,
}

impl<P, S: Scheduler> Throttle<P, S> {
    pub(crate) fn new(
        upstream: P,
        interval: <S::Time as SchedulerTime>::Stride,
        scheduler: S,
        latest: bool,
    ) -> Self {
        Throttle {
            upstream,
            interval,
            scheduler,
            latest,
        }
    }
}

impl<P: Clone, S: Scheduler + Clone> Clone for Throttle<P, S> {
    fn clone(&self) -> Self {
        Throttle {
            upstream: self.upstream.clone(),
            interval: self.interval,
            scheduler: self.scheduler.clone(),
            latest: self.latest,
        }
    }
}

impl<P, S> Publisher for Throttle<P, S>
where
    P: Publisher,
    P::Output: Send + 'static,
    P::Failure: Send + 'static,
    S: Scheduler + Clone,
{
    type Output = P::Output;
    type Failure = P::Failure;

    fn subscribe<Down>(&self, subscriber: Down)
    where
        Down: Subscriber<Input = P::Output, Failure = P::Failure> + 'static,
    {
        let stage = Arc::new_cyclic(|weak: &Weak<ThrottleStage<S, Down>>| ThrottleStage {
            weak: weak.clone(),
            scheduler: self.scheduler.clone(),
            interval: self.interval,
            latest: self.latest,
            state: Mutex::new(ThrottleMachine {
                phase: ThrottlePhase::AwaitingSubscription,
                upstream: None,
                last_emission: None,
                pending_value: None,
                pending_completion: None,
                emission_scheduled: false,
                demand: Demand::NONE,
            }),
            downstream: subscriber,
        });
        self.upstream.subscribe(stage);
    }
}

enum ThrottlePhase {
    AwaitingSubscription,
    Subscribed,
    /// 终结已到达，等待在途发射兑现。
    PendingTerminal,
    Terminal,
}

struct ThrottleMachine<V, E, T> {
    phase: ThrottlePhase,
    upstream: Option<SharedSubscription>,
    last_emission: Option<T>,
    pending_value: Option<V>,
    pending_completion: Option<Completion<E>>,
    emission_scheduled: bool,
    demand: Demand,
}

struct ThrottleStage<S: Scheduler, Down: Subscriber> {
    weak: Weak<Self>,
    scheduler: S,
    interval: <S::Time as SchedulerTime>::Stride,
    latest: bool,
    state: Mutex<ThrottleMachine<Down::Input, Down::Failure, S::Time>>,
    downstream: Down,
}

impl<S, Down> ThrottleStage<S, Down>
where
    S: Scheduler,
    Down: Subscriber + 'static,
    Down::Input: Send + 'static,
    Down::Failure: Send + 'static,
{
    fn shared(&self) -> SharedSubscription {
        self.weak.upgrade().expect("阶段在回调期间必然存活")
    }

    /// 排定的发射：投递待发值（若需求允许），随后兑现挂起的终结。
    fn emit(&self) {
        let now = self.scheduler.now();
        let value = {
            let mut state = self.state.lock();
            state.emission_scheduled = false;
            if matches!(state.phase, ThrottlePhase::Terminal) {
                return;
            }
            match state.pending_value.take() {
                Some(value) if state.demand.is_positive() => {
                    state.demand -= Demand::finite(1);
                    state.last_emission = Some(now);
                    Some(value)
                }
                // 需求为零：待发值丢弃。
                _ => None,
            }
        };
        if let Some(value) = value {
            let extra = self.downstream.receive_value(value);
            if !extra.is_none() {
                self.state.lock().demand += extra;
            }
        }
        let completion = {
            let mut state = self.state.lock();
            if matches!(state.phase, ThrottlePhase::PendingTerminal) {
                state.phase = ThrottlePhase::Terminal;
                state.upstream = None;
                state.pending_completion.take()
            } else {
                None
            }
        };
        if let Some(completion) = completion {
            self.downstream.receive_completion(completion);
        }
    }
}

impl<S, Down> Subscriber for ThrottleStage<S, Down>
where
    S: Scheduler,
    Down: Subscriber + 'static,
    Down::Input: Send + 'static,
    Down::Failure: Send + 'static,
{
    type Input = Down::Input;
    type Failure = Down::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        let adopted = {
            let mut state = self.state.lock();
            match state.phase {
                ThrottlePhase::AwaitingSubscription => {
                    state.phase = ThrottlePhase::Subscribed;
                    state.upstream = Some(subscription.clone());
                    true
                }
                _ => false,
            }
        };
        if !adopted {
            subscription.cancel();
            return;
        }
        self.downstream.receive_subscription(self.shared());
        subscription.request(Demand::UNLIMITED);
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        let now = self.scheduler.now();
        enum Plan<T> {
            Immediate,
            At(T),
            Absorbed,
        }
        let plan = {
            let mut state = self.state.lock();
            if !matches!(state.phase, ThrottlePhase::Subscribed) {
                return Demand::NONE;
            }
            if state.emission_scheduled {
                // 窗口内：按 latest 覆盖或保留既有待发值。
                if self.latest || state.pending_value.is_none() {
                    state.pending_value = Some(value);
                }
                Plan::Absorbed
            } else {
                let elapsed = match &state.last_emission {
                    None => true,
                    Some(last) => now >= last.clone().advanced_by(self.interval),
                };
                state.pending_value = Some(value);
                state.emission_scheduled = true;
                if elapsed {
                    Plan::Immediate
                } else {
                    let due = state
                        .last_emission
                        .clone()
                        .expect("未满间隔必有上次发射时间")
                        .advanced_by(self.interval);
                    Plan::At(if due > now { due } else { now })
                }
            }
        };
        match plan {
            Plan::Absorbed => {}
            Plan::Immediate => {
                let stage = self.weak.upgrade().expect("阶段在回调期间必然存活");
                self.scheduler.schedule(Box::new(move || stage.emit()));
            }
            Plan::At(due) => {
                let stage = self.weak.upgrade().expect("阶段在回调期间必然存活");
                self.scheduler.schedule_after(
                    due,
                    self.scheduler.minimum_tolerance(),
                    None,
                    Box::new(move || stage.emit()),
                );
            }
        }
        Demand::NONE
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        let forward = {
            let mut state = self.state.lock();
            match state.phase {
                ThrottlePhase::Subscribed => {
                    if state.emission_scheduled {
                        state.phase = ThrottlePhase::PendingTerminal;
                        state.pending_completion = Some(completion);
                        return;
                    }
                    state.phase = ThrottlePhase::Terminal;
                    state.upstream = None;
                    Some(completion)
                }
                ThrottlePhase::AwaitingSubscription => {
                    state.phase = ThrottlePhase::Terminal;
                    Some(completion)
                }
                _ => None,
            }
        };
        if let Some(completion) = forward {
            self.downstream.receive_completion(completion);
        }
    }
}

impl<S, Down> Subscription for ThrottleStage<S, Down>
where
    S: Scheduler,
    Down: Subscriber + 'static,
    Down::Input: Send + 'static,
    Down::Failure: Send + 'static,
{
    fn request(&self, demand: Demand) {
        let demand = demand.expect_nonzero();
        let mut state = self.state.lock();
        match state.phase {
            ThrottlePhase::AwaitingSubscription => protocol_violation(
                codes::REQUEST_BEFORE_SUBSCRIPTION,
                "订阅握手完成前收到 request",
            ),
            ThrottlePhase::Terminal => {}
            _ => state.demand += demand,
        }
    }

    fn cancel(&self) {
        let upstream = {
            let mut state = self.state.lock();
            if matches!(state.phase, ThrottlePhase::Terminal) {
                return;
            }
            state.phase = ThrottlePhase::Terminal;
            state.pending_value = None;
            state.pending_completion = None;
            state.upstream.take()
        };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}
