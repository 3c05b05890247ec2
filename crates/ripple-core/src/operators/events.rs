//! `handle_events` / `log_events`：信号观察算子。
//!
//! # 设计背景（Why）
//! - 为了观察下游的 `request` 与 `cancel`，观察类算子必须把自身包装成
//!   下游的订阅（其余信号仍原样转发），这是直通家族中唯一需要插入
//!   订阅边的成员。
//! - `log_events` 是同一机制在可观测性契约上的固化：把每个协议信号
//!   翻译成结构化 [`SignalEvent`](crate::observability::SignalEvent)
//!   交给宿主注入的 [`Logger`](crate::observability::Logger)。
//!
//! # 契约说明（What）
//! - 回调/日志均在锁外执行；
//! - 终态（终结或取消）后用户回调被整体清除，不再被调用。

use alloc::borrow::Cow;
use alloc::format;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::fmt::Debug;

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber, Subscription};
use crate::demand::Demand;
use crate::observability::{LogLevel, Logger, SignalEvent, SignalKind};
use crate::stage::UpstreamState;

type Hook<A> = Arc<dyn Fn(A) + Send + Sync>;

/// `handle_events` 的回调集合；未设置的回调为空操作。
pub struct EventHooks<V, E> {
    on_subscription: Option<Hook<()>>,
    on_value: Option<Arc<dyn Fn(&V) + Send + Sync>>,
    on_completion: Option<Arc<dyn Fn(&Completion<E>) + Send + Sync>>,
    on_cancel: Option<Hook<()>>,
    on_request: Option<Hook<Demand>>,
}

impl<V, E> Default for EventHooks<V, E> {
    fn default() -> Self {
        EventHooks {
            on_subscription: None,
            on_value: None,
            on_completion: None,
            on_cancel: None,
            on_request: None,
        }
    }
}

impl<V, E> Clone for EventHooks<V, E> {
    fn clone(&self) -> Self {
        EventHooks {
            on_subscription: self.on_subscription.clone(),
            on_value: self.on_value.clone(),
            on_completion: self.on_completion.clone(),
            on_cancel: self.on_cancel.clone(),
            on_request: self.on_request.clone(),
        }
    }
}

impl<V, E> EventHooks<V, E> {
    /// 构造空回调集合。
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅握手回调。
    pub fn on_subscription(mut self, hook: impl Fn(()) + Send + Sync + 'static) -> Self {
        self.on_subscription = Some(Arc::new(hook));
        self
    }

    /// 值投递回调。
    pub fn on_value(mut self, hook: impl Fn(&V) + Send + Sync + 'static) -> Self {
        self.on_value = Some(Arc::new(hook));
        self
    }

    /// 终结回调。
    pub fn on_completion(mut self, hook: impl Fn(&Completion<E>) + Send + Sync + 'static) -> Self {
        self.on_completion = Some(Arc::new(hook));
        self
    }

    /// 取消回调。
    pub fn on_cancel(mut self, hook: impl Fn(()) + Send + Sync + 'static) -> Self {
        self.on_cancel = Some(Arc::new(hook));
        self
    }

    /// 需求请求回调。
    pub fn on_request(mut self, hook: impl Fn(Demand) + Send + Sync + 'static) -> Self {
        self.on_request = Some(Arc::new(hook));
        self
    }
}

/// 信号回调描述符。
pub struct HandleEvents<P: Publisher> {
    upstream: P,
    hooks: EventHooks<P::Output, P::Failure>,
}

impl<P: Publisher> HandleEvents<P> {
    pub(crate) fn new(upstream: P, hooks: EventHooks<P::Output, P::Failure>) -> Self {
        HandleEvents { upstream, hooks }
    }
}

impl<P> Publisher for HandleEvents<P>
where
    P: Publisher,
    P::Output: 'static,
    P::Failure: 'static,
{
    type Output = P::Output;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = P::Output, Failure = P::Failure> + 'static,
    {
        let stage = Arc::new_cyclic(|weak: &Weak<HandleEventsStage<S>>| HandleEventsStage {
            weak: weak.clone(),
            state: Mutex::new(HandleEventsState {
                upstream: UpstreamState::Awaiting,
                hooks: Some(self.hooks.clone()),
            }),
            downstream: subscriber,
        });
        self.upstream.subscribe(stage);
    }
}

struct HandleEventsState<V, E> {
    upstream: UpstreamState,
    hooks: Option<EventHooks<V, E>>,
}

struct HandleEventsStage<Down: Subscriber> {
    weak: Weak<Self>,
    state: Mutex<HandleEventsState<Down::Input, Down::Failure>>,
    downstream: Down,
}

impl<Down> HandleEventsStage<Down>
where
    Down: Subscriber + 'static,
{
    fn shared(&self) -> SharedSubscription {
        self.weak.upgrade().expect("事件阶段在回调期间必然存活")
    }

    fn hooks(&self) -> Option<EventHooks<Down::Input, Down::Failure>> {
        self.state.lock().hooks.clone()
    }

    /// 终态：清除回调并交出上游句柄。
    fn terminate(&self) -> Option<SharedSubscription> {
        let mut state = self.state.lock();
        state.hooks = None;
        state.upstream.terminate()
    }
}

impl<Down> Subscriber for HandleEventsStage<Down>
where
    Down: Subscriber + 'static,
{
    type Input = Down::Input;
    type Failure = Down::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        let adopted = self.state.lock().upstream.try_adopt(subscription.clone());
        if !adopted {
            subscription.cancel();
            return;
        }
        if let Some(hook) = self.hooks().and_then(|hooks| hooks.on_subscription) {
            hook(());
        }
        self.downstream.receive_subscription(self.shared());
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        if self.state.lock().upstream.is_terminal() {
            return Demand::NONE;
        }
        if let Some(hook) = self.hooks().and_then(|hooks| hooks.on_value) {
            hook(&value);
        }
        self.downstream.receive_value(value)
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        let hooks = {
            let state = self.state.lock();
            if state.upstream.is_terminal() {
                return;
            }
            state.hooks.clone()
        };
        if let Some(hook) = hooks.and_then(|hooks| hooks.on_completion) {
            hook(&completion);
        }
        let _ = self.terminate();
        self.downstream.receive_completion(completion);
    }
}

impl<Down> Subscription for HandleEventsStage<Down>
where
    Down: Subscriber + 'static,
{
    fn request(&self, demand: Demand) {
        let demand = demand.expect_nonzero();
        let (hook, upstream) = {
            let state = self.state.lock();
            (
                state.hooks.clone().and_then(|hooks| hooks.on_request),
                state.upstream.active(),
            )
        };
        if let Some(hook) = hook {
            hook(demand);
        }
        if let Some(upstream) = upstream {
            upstream.request(demand);
        }
    }

    fn cancel(&self) {
        let hook = self.hooks().and_then(|hooks| hooks.on_cancel);
        if let Some(hook) = hook {
            hook(());
        }
        if let Some(upstream) = self.terminate() {
            upstream.cancel();
        }
    }
}

/// 结构化信号日志描述符（`log_events`）。
pub struct LogEvents<P> {
    upstream: P,
    label: Cow<'static, str>,
    logger: Arc<dyn Logger>,
}

impl<P> LogEvents<P> {
    pub(crate) fn new(
        upstream: P,
        label: impl Into<Cow<'static, str>>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        LogEvents {
            upstream,
            label: label.into(),
            logger,
        }
    }
}

impl<P> Publisher for LogEvents<P>
where
    P: Publisher,
    P::Output: Debug + 'static,
    P::Failure: Debug + 'static,
{
    type Output = P::Output;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = P::Output, Failure = P::Failure> + 'static,
    {
        let stage = Arc::new_cyclic(|weak: &Weak<LogEventsStage<S>>| LogEventsStage {
            weak: weak.clone(),
            state: Mutex::new(UpstreamState::Awaiting),
            label: self.label.clone(),
            logger: Arc::clone(&self.logger),
            downstream: subscriber,
        });
        self.upstream.subscribe(stage);
    }
}

struct LogEventsStage<Down> {
    weak: Weak<Self>,
    state: Mutex<UpstreamState>,
    label: Cow<'static, str>,
    logger: Arc<dyn Logger>,
    downstream: Down,
}

impl<Down: Subscriber + 'static> LogEventsStage<Down> {
    fn emit(&self, level: LogLevel, kind: SignalKind, detail: Option<String>) {
        let event = SignalEvent {
            label: self.label.clone(),
            kind,
            detail,
        };
        self.logger.log(level, &event);
    }
}

impl<Down> Subscriber for LogEventsStage<Down>
where
    Down: Subscriber + 'static,
    Down::Input: Debug,
    Down::Failure: Debug,
{
    type Input = Down::Input;
    type Failure = Down::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        let adopted = self.state.lock().try_adopt(subscription.clone());
        if !adopted {
            subscription.cancel();
            return;
        }
        self.emit(LogLevel::Trace, SignalKind::Subscription, None);
        let shared = self.weak.upgrade().expect("日志阶段在回调期间必然存活");
        self.downstream.receive_subscription(shared);
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        if self.state.lock().is_terminal() {
            return Demand::NONE;
        }
        self.emit(
            LogLevel::Trace,
            SignalKind::Value,
            Some(format!("{value:?}")),
        );
        self.downstream.receive_value(value)
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return;
            }
            let _ = state.terminate();
        }
        let level = if completion.is_failure() {
            LogLevel::Error
        } else {
            LogLevel::Trace
        };
        self.emit(level, SignalKind::Completion, Some(format!("{completion:?}")));
        self.downstream.receive_completion(completion);
    }
}

impl<Down> Subscription for LogEventsStage<Down>
where
    Down: Subscriber + 'static,
    Down::Input: Debug,
    Down::Failure: Debug,
{
    fn request(&self, demand: Demand) {
        let demand = demand.expect_nonzero();
        self.emit(
            LogLevel::Trace,
            SignalKind::Request,
            Some(format!("{demand}")),
        );
        let upstream = self.state.lock().active();
        if let Some(upstream) = upstream {
            upstream.request(demand);
        }
    }

    fn cancel(&self) {
        let upstream = self.state.lock().terminate();
        if upstream.is_some() {
            self.emit(LogLevel::Trace, SignalKind::Cancel, None);
        }
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}
