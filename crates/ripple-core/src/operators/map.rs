//! `map` / `map_error`：逐值变换与错误变换的直通算子。
//!
//! # 设计背景（Why）
//! - 这里不可能产生新错误，算子因此不拥有订阅边：收到的上游订阅句柄
//!   原样转发给下游，下游的 `request`/`cancel` 完全绕过本阶段，
//!   省去一把锁。
//! - 重复握手由无锁守卫兜底：多余的上游订阅被立即取消。

use alloc::sync::Arc;
use core::marker::PhantomData;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber};
use crate::demand::Demand;
use crate::stage::SubscriptionGuard;

/// 逐值变换描述符。
pub struct Map<P, F> {
    upstream: P,
    transform: Arc<F>,
}

impl<P, F> Map<P, F> {
    pub(crate) fn new(upstream: P, transform: F) -> Self {
        Map {
            upstream,
            transform: Arc::new(transform),
        }
    }
}

impl<P: Clone, F> Clone for Map<P, F> {
    fn clone(&self) -> Self {
        Map {
            upstream: self.upstream.clone(),
            transform: Arc::clone(&self.transform),
        }
    }
}

impl<P, F, T> Publisher for Map<P, F>
where
    P: Publisher,
    F: Fn(P::Output) -> T + Send + Sync + 'static,
    P::Output: 'static,
{
    type Output = T;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = T, Failure = P::Failure> + 'static,
    {
        self.upstream.subscribe(Arc::new(MapStage {
            guard: SubscriptionGuard::new(),
            downstream: subscriber,
            transform: Arc::clone(&self.transform),
            _marker: PhantomData,
        }));
    }
}

struct MapStage<In, Down, F> {
    guard: SubscriptionGuard,
    downstream: Down,
    transform: Arc<F>,
    _marker: PhantomData<fn(In)>,
}

impl<In, Down, F> Subscriber for MapStage<In, Down, F>
where
    Down: Subscriber,
    F: Fn(In) -> Down::Input + Send + Sync,
{
    type Input = In;
    type Failure = Down::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        if self.guard.accept_first() {
            self.downstream.receive_subscription(subscription);
        } else {
            subscription.cancel();
        }
    }

    fn receive_value(&self, value: In) -> Demand {
        self.downstream.receive_value((self.transform)(value))
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        self.downstream.receive_completion(completion);
    }
}

/// 错误变换描述符：值原样直通，失败终结经 `g` 变换。
pub struct MapError<P, G> {
    upstream: P,
    transform: Arc<G>,
}

impl<P, G> MapError<P, G> {
    pub(crate) fn new(upstream: P, transform: G) -> Self {
        MapError {
            upstream,
            transform: Arc::new(transform),
        }
    }
}

impl<P: Clone, G> Clone for MapError<P, G> {
    fn clone(&self) -> Self {
        MapError {
            upstream: self.upstream.clone(),
            transform: Arc::clone(&self.transform),
        }
    }
}

impl<P, G, E2> Publisher for MapError<P, G>
where
    P: Publisher,
    G: Fn(P::Failure) -> E2 + Send + Sync + 'static,
    P::Failure: 'static,
{
    type Output = P::Output;
    type Failure = E2;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = P::Output, Failure = E2> + 'static,
    {
        self.upstream.subscribe(Arc::new(MapErrorStage {
            guard: SubscriptionGuard::new(),
            downstream: subscriber,
            transform: Arc::clone(&self.transform),
            _marker: PhantomData,
        }));
    }
}

struct MapErrorStage<EUp, Down, G> {
    guard: SubscriptionGuard,
    downstream: Down,
    transform: Arc<G>,
    _marker: PhantomData<fn(EUp)>,
}

impl<EUp, Down, G> Subscriber for MapErrorStage<EUp, Down, G>
where
    Down: Subscriber,
    G: Fn(EUp) -> Down::Failure + Send + Sync,
{
    type Input = Down::Input;
    type Failure = EUp;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        if self.guard.accept_first() {
            self.downstream.receive_subscription(subscription);
        } else {
            subscription.cancel();
        }
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        self.downstream.receive_value(value)
    }

    fn receive_completion(&self, completion: Completion<EUp>) {
        self.downstream
            .receive_completion(completion.map_failure(|error| (self.transform)(error)));
    }
}
