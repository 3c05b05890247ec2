//! `debounce`：只在输入静默满 `due_time` 后投递最新值。
//!
//! # 设计背景（Why）
//! - 单次延迟调度（`schedule_after`）没有取消句柄（见调度器契约），
//!   因此"取消上一次排定的投递"以**世代号**实现：每个新值令世代 +1
//!   并携带新世代排定动作；动作触发时世代不再匹配即作废。
//!   世代计数器就是逻辑上的取消句柄表。
//! - 节律由算子自身实现，上游以 `Unlimited` 吸入。
//!
//! # 契约说明（What）
//! - 触发时需求为正才投递（投递后按下游返回补记需求）；需求为零时
//!   最新值保留在槽中，直到被更新的值替换——迟到的 `request` 不会
//!   补投旧值；
//! - 终结信号经 `schedule` 转一跳调度器后转发；
//! - 取消令世代 +1，已排定的动作全部作废。

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber, Subscription};
use crate::demand::Demand;
use crate::error::{codes, protocol_violation};
use crate::scheduler::{Scheduler, SchedulerTime};
use crate::stage::UpstreamState;

/// 去抖描述符。
pub struct Debounce<P, S: Scheduler> {
    upstream: P,
    due_time: <S::Time as SchedulerTime>::Stride,
    scheduler: S,
    options: Option<S::Options>,
}

impl<P, S: Scheduler> Debounce<P, S> {
    pub(crate) fn new(
        upstream: P,
        due_time: <S::Time as SchedulerTime>::Stride,
        scheduler: S,
        options: Option<S::Options>,
    ) -> Self {
        Debounce {
            upstream,
            due_time,
            scheduler,
            options,
        }
    }
}

impl<P: Clone, S: Scheduler + Clone> Clone for Debounce<P, S> {
    fn clone(&self) -> Self {
        Debounce {
            upstream: self.upstream.clone(),
            due_time: self.due_time,
            scheduler: self.scheduler.clone(),
            options: self.options.clone(),
        }
    }
}

impl<P, S> Publisher for Debounce<P, S>
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
        let stage = Arc::new_cyclic(|weak: &Weak<DebounceStage<S, Down>>| DebounceStage {
            weak: weak.clone(),
            scheduler: self.scheduler.clone(),
            due_time: self.due_time,
            options: self.options.clone(),
            state: Mutex::new(DebounceMachine {
                upstream: UpstreamState::Awaiting,
                latest: None,
                generation: 0,
                demand: Demand::NONE,
            }),
            downstream: subscriber,
        });
        self.upstream.subscribe(stage);
    }
}

struct DebounceMachine<V> {
    upstream: UpstreamState,
    latest: Option<V>,
    generation: u64,
    demand: Demand,
}

struct DebounceStage<S: Scheduler, Down: Subscriber> {
    weak: Weak<Self>,
    scheduler: S,
    due_time: <S::Time as SchedulerTime>::Stride,
    options: Option<S::Options>,
    state: Mutex<DebounceMachine<Down::Input>>,
    downstream: Down,
}

impl<S, Down> DebounceStage<S, Down>
where
    S: Scheduler,
    Down: Subscriber + 'static,
    Down::Input: Send + 'static,
    Down::Failure: Send + 'static,
{
    fn shared(&self) -> SharedSubscription {
        self.weak.upgrade().expect("阶段在回调期间必然存活")
    }

    /// 排定的投递触发：世代匹配且需求为正才出手。
    fn fire(&self, generation: u64) {
        let value = {
            let mut state = self.state.lock();
            if state.upstream.is_terminal() || generation != state.generation {
                return;
            }
            if !state.demand.is_positive() {
                return;
            }
            match state.latest.take() {
                Some(value) => {
                    state.demand -= Demand::finite(1);
                    value
                }
                None => return,
            }
        };
        let extra = self.downstream.receive_value(value);
        if !extra.is_none() {
            self.state.lock().demand += extra;
        }
    }

    /// 经调度器转发终结（保持与值投递相同的调度语境）。
    fn deliver_completion(&self, completion: Completion<Down::Failure>) {
        {
            let mut state = self.state.lock();
            if state.upstream.is_terminal() {
                return;
            }
            let _ = state.upstream.terminate();
            state.latest = None;
            state.generation += 1;
        }
        self.downstream.receive_completion(completion);
    }
}

impl<S, Down> Subscriber for DebounceStage<S, Down>
where
    S: Scheduler,
    Down: Subscriber + 'static,
    Down::Input: Send + 'static,
    Down::Failure: Send + 'static,
{
    type Input = Down::Input;
    type Failure = Down::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        let adopted = self.state.lock().upstream.try_adopt(subscription.clone());
        if !adopted {
            subscription.cancel();
            return;
        }
        self.downstream.receive_subscription(self.shared());
        subscription.request(Demand::UNLIMITED);
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        let generation = {
            let mut state = self.state.lock();
            if state.upstream.is_terminal() {
                return Demand::NONE;
            }
            state.generation += 1;
            state.latest = Some(value);
            state.generation
        };
        let stage = self.weak.upgrade().expect("阶段在回调期间必然存活");
        let when = self.scheduler.now().advanced_by(self.due_time);
        self.scheduler.schedule_after(
            when,
            self.scheduler.minimum_tolerance(),
            self.options.clone(),
            Box::new(move || stage.fire(generation)),
        );
        Demand::NONE
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        let stage = self.weak.upgrade().expect("阶段在回调期间必然存活");
        self.scheduler
            .schedule(Box::new(move || stage.deliver_completion(completion)));
    }
}

impl<S, Down> Subscription for DebounceStage<S, Down>
where
    S: Scheduler,
    Down: Subscriber + 'static,
    Down::Input: Send + 'static,
    Down::Failure: Send + 'static,
{
    fn request(&self, demand: Demand) {
        let demand = demand.expect_nonzero();
        let mut state = self.state.lock();
        if state.upstream.is_terminal() {
            return;
        }
        if matches!(state.upstream, UpstreamState::Awaiting) {
            protocol_violation(
                codes::REQUEST_BEFORE_SUBSCRIPTION,
                "订阅握手完成前收到 request",
            );
        }
        state.demand += demand;
    }

    fn cancel(&self) {
        let upstream = {
            let mut state = self.state.lock();
            state.latest = None;
            // 作废所有在途的排定动作。
            state.generation += 1;
            state.upstream.terminate()
        };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}
