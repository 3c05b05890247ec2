//! `scan`：带种子累加器的逐值折叠直通算子。
//!
//! # 契约说明（What）
//! - 累加器以用户种子初始化；每收到一个值，计算 `f(acc, x)`，
//!   把新累加值投递给下游并留作下一轮输入；
//! - 订阅句柄原样直通；失败终结不触碰累加器，直接转发。
//!
//! # 风险提示（Trade-offs）
//! - 折叠闭包在锁外执行；累加槽在计算期间被临时取空，
//!   并行投递下后到的值会观察到取空前的旧累加值——上游协议本就要求
//!   对同一订阅者的值投递串行化，这里不重复加锁串行。

use alloc::sync::Arc;
use core::marker::PhantomData;

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber};
use crate::demand::Demand;
use crate::stage::SubscriptionGuard;

/// 折叠描述符。
pub struct Scan<P, A, F> {
    upstream: P,
    seed: A,
    accumulate: Arc<F>,
}

impl<P, A, F> Scan<P, A, F> {
    pub(crate) fn new(upstream: P, seed: A, accumulate: F) -> Self {
        Scan {
            upstream,
            seed,
            accumulate: Arc::new(accumulate),
        }
    }
}

impl<P: Clone, A: Clone, F> Clone for Scan<P, A, F> {
    fn clone(&self) -> Self {
        Scan {
            upstream: self.upstream.clone(),
            seed: self.seed.clone(),
            accumulate: Arc::clone(&self.accumulate),
        }
    }
}

impl<P, A, F> Publisher for Scan<P, A, F>
where
    P: Publisher,
    A: Clone + Send + 'static,
    F: Fn(A, P::Output) -> A + Send + Sync + 'static,
    P::Output: 'static,
{
    type Output = A;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = A, Failure = P::Failure> + 'static,
    {
        self.upstream.subscribe(Arc::new(ScanStage {
            guard: SubscriptionGuard::new(),
            accumulator: Mutex::new(Some(self.seed.clone())),
            downstream: subscriber,
            accumulate: Arc::clone(&self.accumulate),
            _marker: PhantomData,
        }));
    }
}

struct ScanStage<In, A, Down, F> {
    guard: SubscriptionGuard,
    accumulator: Mutex<Option<A>>,
    downstream: Down,
    accumulate: Arc<F>,
    _marker: PhantomData<fn(In)>,
}

impl<In, A, Down, F> Subscriber for ScanStage<In, A, Down, F>
where
    A: Clone + Send,
    Down: Subscriber<Input = A>,
    F: Fn(A, In) -> A + Send + Sync,
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
        let Some(accumulator) = self.accumulator.lock().take() else {
            return Demand::NONE;
        };
        let next = (self.accumulate)(accumulator, value);
        *self.accumulator.lock() = Some(next.clone());
        self.downstream.receive_value(next)
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        self.downstream.receive_completion(completion);
    }
}
