//! `try_map` / `try_filter` / `try_scan`：运行用户可失败闭包的自插入算子。
//!
//! # 设计背景（Why）
//! - 一旦用户闭包可能失败，算子就必须拥有订阅边：失败发生时它要取消上游、
//!   向下游投递 `Failed(e)`，这些能力只有把自己插入为下游的订阅才能获得。
//! - 三个算子的差异仅在于“对一个值做什么”，生命周期状态机完全一致，
//!   因此共用一个 [`FallibleStage`]，按 [`FallibleTransform`] 注入值语义。
//!   `encode`/`decode` 也复用该阶段（见 `operators::codec`）。
//!
//! # 契约说明（What）
//! - 用户闭包永远在状态锁外执行；
//! - 闭包失败 ⇒ 进入终态、取消上游、向下游投递 `Failed(BoxError)`；
//! - 上游的静态错误类型在此拓宽为 [`BoxError`]；
//! - 闸门拒绝（`try_filter` 判 `false`）返回需求一，补拉替代值。

use alloc::sync::{Arc, Weak};
use core::marker::PhantomData;

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber, Subscription};
use crate::demand::Demand;
use crate::error::{BoxError, codes, protocol_violation};
use crate::stage::UpstreamState;

/// 可失败的逐值变换：`Ok(Some)` 投递、`Ok(None)` 补拉、`Err` 终止。
pub(crate) trait FallibleTransform: Send + Sync {
    type In;
    type Out;

    fn apply(&self, value: Self::In) -> Result<Option<Self::Out>, BoxError>;
}

/// 自插入的可失败变换阶段；`try-*` 家族与 `encode`/`decode` 的公共载体。
pub(crate) struct FallibleStage<EUp, Down, L> {
    weak: Weak<Self>,
    state: Mutex<UpstreamState>,
    downstream: Down,
    logic: L,
    _marker: PhantomData<fn(EUp)>,
}

impl<EUp, Down, L> FallibleStage<EUp, Down, L>
where
    EUp: Into<BoxError> + 'static,
    Down: Subscriber<Failure = BoxError> + 'static,
    L: FallibleTransform<Out = Down::Input> + 'static,
{
    pub(crate) fn attach<P>(upstream: &P, downstream: Down, logic: L)
    where
        P: Publisher<Output = L::In, Failure = EUp> + ?Sized,
        L::In: 'static,
    {
        let stage = Arc::new_cyclic(|weak: &Weak<Self>| FallibleStage {
            weak: weak.clone(),
            state: Mutex::new(UpstreamState::Awaiting),
            downstream,
            logic,
            _marker: PhantomData,
        });
        upstream.subscribe(stage);
    }

    fn shared(&self) -> SharedSubscription {
        self.weak.upgrade().expect("阶段在回调期间必然存活")
    }

    /// 终态切换 + 失败下发；上游在锁外取消。
    fn fail(&self, error: BoxError) {
        let upstream = self.state.lock().terminate();
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
        self.downstream.receive_completion(Completion::Failed(error));
    }
}

impl<EUp, Down, L> Subscriber for FallibleStage<EUp, Down, L>
where
    EUp: Into<BoxError> + 'static,
    Down: Subscriber<Failure = BoxError> + 'static,
    L: FallibleTransform<Out = Down::Input> + 'static,
    L::In: 'static,
{
    type Input = L::In;
    type Failure = EUp;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        let adopted = self.state.lock().try_adopt(subscription.clone());
        if adopted {
            self.downstream.receive_subscription(self.shared());
        } else {
            subscription.cancel();
        }
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        if self.state.lock().is_terminal() {
            return Demand::NONE;
        }
        match self.logic.apply(value) {
            Ok(Some(out)) => self.downstream.receive_value(out),
            Ok(None) => Demand::finite(1),
            Err(error) => {
                self.fail(error);
                Demand::NONE
            }
        }
    }

    fn receive_completion(&self, completion: Completion<EUp>) {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return;
            }
            // 上游已自行终结，句柄直接释放，无须取消。
            let _ = state.terminate();
        }
        self.downstream
            .receive_completion(completion.map_failure(Into::into));
    }
}

impl<EUp, Down, L> Subscription for FallibleStage<EUp, Down, L>
where
    EUp: Into<BoxError> + 'static,
    Down: Subscriber<Failure = BoxError> + 'static,
    L: FallibleTransform<Out = Down::Input> + 'static,
{
    fn request(&self, demand: Demand) {
        let demand = demand.expect_nonzero();
        let upstream = {
            let state = self.state.lock();
            if state.is_terminal() {
                return;
            }
            match state.active() {
                Some(upstream) => upstream,
                None => protocol_violation(
                    codes::REQUEST_BEFORE_SUBSCRIPTION,
                    "订阅握手完成前收到 request",
                ),
            }
        };
        upstream.request(demand);
    }

    fn cancel(&self) {
        let upstream = self.state.lock().terminate();
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}

pub(crate) struct TryMapTransform<In, Out, F> {
    transform: Arc<F>,
    _marker: PhantomData<fn(In) -> Out>,
}

impl<In, Out, F> FallibleTransform for TryMapTransform<In, Out, F>
where
    F: Fn(In) -> Result<Out, BoxError> + Send + Sync,
{
    type In = In;
    type Out = Out;

    fn apply(&self, value: In) -> Result<Option<Out>, BoxError> {
        (self.transform)(value).map(Some)
    }
}

pub(crate) struct TryFilterTransform<In, F> {
    predicate: Arc<F>,
    _marker: PhantomData<fn(In)>,
}

impl<In, F> FallibleTransform for TryFilterTransform<In, F>
where
    In: Send,
    F: Fn(&In) -> Result<bool, BoxError> + Send + Sync,
{
    type In = In;
    type Out = In;

    fn apply(&self, value: In) -> Result<Option<In>, BoxError> {
        Ok((self.predicate)(&value)?.then_some(value))
    }
}

pub(crate) struct TryScanTransform<In, A, F> {
    accumulator: Mutex<Option<A>>,
    accumulate: Arc<F>,
    _marker: PhantomData<fn(In)>,
}

impl<In, A, F> FallibleTransform for TryScanTransform<In, A, F>
where
    A: Clone + Send,
    F: Fn(A, In) -> Result<A, BoxError> + Send + Sync,
{
    type In = In;
    type Out = A;

    fn apply(&self, value: In) -> Result<Option<A>, BoxError> {
        let Some(accumulator) = self.accumulator.lock().take() else {
            return Ok(None);
        };
        let next = (self.accumulate)(accumulator, value)?;
        *self.accumulator.lock() = Some(next.clone());
        Ok(Some(next))
    }
}

/// 可失败逐值变换描述符。
pub struct TryMap<P, F> {
    upstream: P,
    transform: Arc<F>,
}

impl<P, F> TryMap<P, F> {
    pub(crate) fn new(upstream: P, transform: F) -> Self {
        TryMap {
            upstream,
            transform: Arc::new(transform),
        }
    }
}

impl<P: Clone, F> Clone for TryMap<P, F> {
    fn clone(&self) -> Self {
        TryMap {
            upstream: self.upstream.clone(),
            transform: Arc::clone(&self.transform),
        }
    }
}

impl<P, F, T> Publisher for TryMap<P, F>
where
    P: Publisher,
    P::Output: 'static,
    P::Failure: Into<BoxError> + 'static,
    F: Fn(P::Output) -> Result<T, BoxError> + Send + Sync + 'static,
    T: 'static,
{
    type Output = T;
    type Failure = BoxError;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = T, Failure = BoxError> + 'static,
    {
        FallibleStage::attach(
            &self.upstream,
            subscriber,
            TryMapTransform {
                transform: Arc::clone(&self.transform),
                _marker: PhantomData,
            },
        );
    }
}

/// 可失败谓词过滤描述符。
pub struct TryFilter<P, F> {
    upstream: P,
    predicate: Arc<F>,
}

impl<P, F> TryFilter<P, F> {
    pub(crate) fn new(upstream: P, predicate: F) -> Self {
        TryFilter {
            upstream,
            predicate: Arc::new(predicate),
        }
    }
}

impl<P: Clone, F> Clone for TryFilter<P, F> {
    fn clone(&self) -> Self {
        TryFilter {
            upstream: self.upstream.clone(),
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<P, F> Publisher for TryFilter<P, F>
where
    P: Publisher,
    P::Output: Send + 'static,
    P::Failure: Into<BoxError> + 'static,
    F: Fn(&P::Output) -> Result<bool, BoxError> + Send + Sync + 'static,
{
    type Output = P::Output;
    type Failure = BoxError;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = P::Output, Failure = BoxError> + 'static,
    {
        FallibleStage::attach(
            &self.upstream,
            subscriber,
            TryFilterTransform {
                predicate: Arc::clone(&self.predicate),
                _marker: PhantomData,
            },
        );
    }
}

/// 可失败折叠描述符。
pub struct TryScan<P, A, F> {
    upstream: P,
    seed: A,
    accumulate: Arc<F>,
}

impl<P, A, F> TryScan<P, A, F> {
    pub(crate) fn new(upstream: P, seed: A, accumulate: F) -> Self {
        TryScan {
            upstream,
            seed,
            accumulate: Arc::new(accumulate),
        }
    }
}

impl<P: Clone, A: Clone, F> Clone for TryScan<P, A, F> {
    fn clone(&self) -> Self {
        TryScan {
            upstream: self.upstream.clone(),
            seed: self.seed.clone(),
            accumulate: Arc::clone(&self.accumulate),
        }
    }
}

impl<P, A, F> Publisher for TryScan<P, A, F>
where
    P: Publisher,
    P::Output: 'static,
    P::Failure: Into<BoxError> + 'static,
    A: Clone + Send + 'static,
    F: Fn(A, P::Output) -> Result<A, BoxError> + Send + Sync + 'static,
{
    type Output = A;
    type Failure = BoxError;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = A, Failure = BoxError> + 'static,
    {
        FallibleStage::attach(
            &self.upstream,
            subscriber,
            TryScanTransform {
                accumulator: Mutex::new(Some(self.seed.clone())),
                accumulate: Arc::clone(&self.accumulate),
                _marker: PhantomData,
            },
        );
    }
}
