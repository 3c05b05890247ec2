//! `filter` / `compact_map` / `remove_duplicates`：值闸门类直通算子。
//!
//! # 设计背景（Why）
//! - 闸门拒绝一个值时，下游对这次投递一无所知；若就此返回零需求，
//!   上游的有效需求会被悄悄吃掉。因此**拒绝路径必须返回一个需求**，
//!   向上游补拉一个替代值，保持有效需求不缩水。
//! - 与 `map` 同理，这里不产生错误，订阅句柄原样直通。

use alloc::sync::Arc;
use core::marker::PhantomData;

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber};
use crate::demand::Demand;
use crate::stage::SubscriptionGuard;

/// 谓词过滤描述符。
pub struct Filter<P, F> {
    upstream: P,
    predicate: Arc<F>,
}

impl<P, F> Filter<P, F> {
    pub(crate) fn new(upstream: P, predicate: F) -> Self {
        Filter {
            upstream,
            predicate: Arc::new(predicate),
        }
    }
}

impl<P: Clone, F> Clone for Filter<P, F> {
    fn clone(&self) -> Self {
        Filter {
            upstream: self.upstream.clone(),
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<P, F> Publisher for Filter<P, F>
where
    P: Publisher,
    F: Fn(&P::Output) -> bool + Send + Sync + 'static,
{
    type Output = P::Output;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = P::Output, Failure = P::Failure> + 'static,
    {
        self.upstream.subscribe(Arc::new(FilterStage {
            guard: SubscriptionGuard::new(),
            downstream: subscriber,
            predicate: Arc::clone(&self.predicate),
        }));
    }
}

struct FilterStage<Down, F> {
    guard: SubscriptionGuard,
    downstream: Down,
    predicate: Arc<F>,
}

impl<Down, F> Subscriber for FilterStage<Down, F>
where
    Down: Subscriber,
    F: Fn(&Down::Input) -> bool + Send + Sync,
{
    type Input = Down::Input;
    type Failure = Down::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        if self.guard.accept_first() {
            self.downstream.receive_subscription(subscription);
        } else {
            subscription.cancel();
        }
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        if (self.predicate)(&value) {
            self.downstream.receive_value(value)
        } else {
            // 拒绝：补拉一个替代值，保持有效需求不缩水。
            Demand::finite(1)
        }
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        self.downstream.receive_completion(completion);
    }
}

/// 投影-过滤一体描述符：投影返回 `None` 即拒绝。
pub struct CompactMap<P, F> {
    upstream: P,
    projection: Arc<F>,
}

impl<P, F> CompactMap<P, F> {
    pub(crate) fn new(upstream: P, projection: F) -> Self {
        CompactMap {
            upstream,
            projection: Arc::new(projection),
        }
    }
}

impl<P: Clone, F> Clone for CompactMap<P, F> {
    fn clone(&self) -> Self {
        CompactMap {
            upstream: self.upstream.clone(),
            projection: Arc::clone(&self.projection),
        }
    }
}

impl<P, F, T> Publisher for CompactMap<P, F>
where
    P: Publisher,
    F: Fn(P::Output) -> Option<T> + Send + Sync + 'static,
    P::Output: 'static,
{
    type Output = T;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = T, Failure = P::Failure> + 'static,
    {
        self.upstream.subscribe(Arc::new(CompactMapStage {
            guard: SubscriptionGuard::new(),
            downstream: subscriber,
            projection: Arc::clone(&self.projection),
            _marker: PhantomData,
        }));
    }
}

struct CompactMapStage<In, Down, F> {
    guard: SubscriptionGuard,
    downstream: Down,
    projection: Arc<F>,
    _marker: PhantomData<fn(In)>,
}

impl<In, Down, F> Subscriber for CompactMapStage<In, Down, F>
where
    Down: Subscriber,
    F: Fn(In) -> Option<Down::Input> + Send + Sync,
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
        match (self.projection)(value) {
            Some(projected) => self.downstream.receive_value(projected),
            None => Demand::finite(1),
        }
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        self.downstream.receive_completion(completion);
    }
}

/// 相邻去重描述符：`is_duplicate(prev, next)` 判定为重复的值被闸掉。
pub struct RemoveDuplicates<P, F> {
    upstream: P,
    is_duplicate: Arc<F>,
}

impl<P, F> RemoveDuplicates<P, F> {
    pub(crate) fn new(upstream: P, is_duplicate: F) -> Self {
        RemoveDuplicates {
            upstream,
            is_duplicate: Arc::new(is_duplicate),
        }
    }
}

impl<P: Clone, F> Clone for RemoveDuplicates<P, F> {
    fn clone(&self) -> Self {
        RemoveDuplicates {
            upstream: self.upstream.clone(),
            is_duplicate: Arc::clone(&self.is_duplicate),
        }
    }
}

impl<P, F> Publisher for RemoveDuplicates<P, F>
where
    P: Publisher,
    P::Output: Clone + Send,
    F: Fn(&P::Output, &P::Output) -> bool + Send + Sync + 'static,
{
    type Output = P::Output;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = P::Output, Failure = P::Failure> + 'static,
    {
        self.upstream.subscribe(Arc::new(RemoveDuplicatesStage {
            guard: SubscriptionGuard::new(),
            previous: Mutex::new(None),
            downstream: subscriber,
            is_duplicate: Arc::clone(&self.is_duplicate),
        }));
    }
}

struct RemoveDuplicatesStage<Down: Subscriber, F> {
    guard: SubscriptionGuard,
    previous: Mutex<Option<Down::Input>>,
    downstream: Down,
    is_duplicate: Arc<F>,
}

impl<Down, F> Subscriber for RemoveDuplicatesStage<Down, F>
where
    Down: Subscriber,
    Down::Input: Clone + Send,
    F: Fn(&Down::Input, &Down::Input) -> bool + Send + Sync,
{
    type Input = Down::Input;
    type Failure = Down::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        if self.guard.accept_first() {
            self.downstream.receive_subscription(subscription);
        } else {
            subscription.cancel();
        }
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        // 谓词是用户代码，先出锁再比较。
        let previous = self.previous.lock().clone();
        let duplicate = previous
            .as_ref()
            .is_some_and(|prev| (self.is_duplicate)(prev, &value));
        if duplicate {
            return Demand::finite(1);
        }
        *self.previous.lock() = Some(value.clone());
        self.downstream.receive_value(value)
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        self.downstream.receive_completion(completion);
    }
}
