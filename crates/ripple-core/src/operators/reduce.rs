//! 折叠终结家族：`last` / `first` / `reduce` / `count` / `ignore_output` 及其可失败变体。
//!
//! # 设计背景（Why）
//! - 这一族算子把整条流折叠成至多一个终值：上游以无限需求吸入，
//!   终值在上游正常结束（或 `first` 系提前命中）时投递。
//! - 终值的投递受下游需求约束：若命中时需求为零，结果挂起在
//!   `PendingEmit`，等待下一次 `request` 兑现。
//! - 折叠逻辑以 [`Fold`] / [`TryFold`] 注入；状态机只有两份
//!   （错误直通版与错误拓宽版），所有具体算子都是折叠逻辑的薄壳。
//!
//! # 契约说明（What）
//! - 下游首个正需求触发对上游的 `Unlimited` 请求；
//! - `first` 系命中后立即取消上游；
//! - 失败终结丢弃累积状态原样转发（可失败变体拓宽为 [`BoxError`]）。

use alloc::sync::{Arc, Weak};
use core::convert::Infallible;
use core::marker::PhantomData;

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber, Subscription};
use crate::demand::Demand;
use crate::error::{BoxError, codes, protocol_violation};

/// 折叠的控制流：继续吸入或提前完成。
pub(crate) enum FoldControl {
    Continue,
    Complete,
}

/// 错误直通的折叠逻辑。
pub(crate) trait Fold: Send + Sync {
    type In;
    type Out;

    fn absorb(&self, value: Self::In) -> FoldControl;

    /// 取出折叠结果；`None` 表示无可投递的终值。
    fn finish(&self) -> Option<Self::Out>;
}

/// 可失败的折叠逻辑（错误拓宽为 [`BoxError`]）。
pub(crate) trait TryFold: Send + Sync {
    type In;
    type Out;

    fn absorb(&self, value: Self::In) -> Result<FoldControl, BoxError>;

    fn finish(&self) -> Option<Self::Out>;
}

enum ReducePhase {
    Awaiting,
    Active(SharedSubscription),
    /// 终值已就绪，等待下游需求。
    PendingEmit,
    Terminal,
}

struct ReduceState<Out> {
    phase: ReducePhase,
    demand: Demand,
    upstream_requested: bool,
    pending: Option<Out>,
}

/// 折叠阶段的公共骨架：下游订阅边 + 终值挂起逻辑。
struct FoldCore<Down: Subscriber, L> {
    weak: Weak<Self>,
    state: Mutex<ReduceState<<Down as Subscriber>::Input>>,
    downstream: Down,
    logic: L,
}

impl<Down, L> FoldCore<Down, L>
where
    Down: Subscriber + 'static,
    L: Send + Sync + 'static,
    Down::Input: Send + 'static,
{
    fn materialize(downstream: Down, logic: L) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| FoldCore {
            weak: weak.clone(),
            state: Mutex::new(ReduceState {
                phase: ReducePhase::Awaiting,
                demand: Demand::NONE,
                upstream_requested: false,
                pending: None,
            }),
            downstream,
            logic,
        })
    }

    fn shared(&self) -> SharedSubscription {
        self.weak.upgrade().expect("阶段在回调期间必然存活")
    }

    fn adopt(&self, subscription: SharedSubscription) {
        let adopted = {
            let mut state = self.state.lock();
            match state.phase {
                ReducePhase::Awaiting => {
                    state.phase = ReducePhase::Active(subscription.clone());
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

    fn is_absorbing(&self) -> bool {
        matches!(
            self.state.lock().phase,
            ReducePhase::Awaiting | ReducePhase::Active(_)
        )
    }

    /// 提前完成（`first` 系）：取消上游，按需求投递或挂起终值。
    fn complete_early(&self, mut value: Option<Down::Input>) {
        let (upstream, emit_now) = {
            let mut state = self.state.lock();
            let upstream = match core::mem::replace(&mut state.phase, ReducePhase::Terminal) {
                ReducePhase::Active(subscription) => Some(subscription),
                _ => None,
            };
            if state.demand.is_positive() {
                (upstream, true)
            } else {
                state.phase = ReducePhase::PendingEmit;
                state.pending = value.take();
                (upstream, false)
            }
        };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
        if emit_now {
            if let Some(value) = value {
                let _ = self.downstream.receive_value(value);
            }
            self.downstream.receive_completion(Completion::Finished);
        }
    }

    /// 上游正常结束：按需求投递或挂起折叠结果。
    fn finish_with(&self, mut value: Option<Down::Input>) {
        let emit_now = {
            let mut state = self.state.lock();
            match state.phase {
                ReducePhase::Awaiting | ReducePhase::Active(_) => {}
                _ => return,
            }
            state.phase = ReducePhase::Terminal;
            if value.is_some() && !state.demand.is_positive() {
                state.phase = ReducePhase::PendingEmit;
                state.pending = value.take();
                false
            } else {
                true
            }
        };
        if emit_now {
            if let Some(value) = value {
                let _ = self.downstream.receive_value(value);
            }
            self.downstream.receive_completion(Completion::Finished);
        }
    }

    fn terminate(&self) -> Option<SharedSubscription> {
        let mut state = self.state.lock();
        state.pending = None;
        match core::mem::replace(&mut state.phase, ReducePhase::Terminal) {
            ReducePhase::Active(subscription) => Some(subscription),
            _ => None,
        }
    }
}

enum RequestAction {
    RequestUpstream(SharedSubscription),
    Emit,
    Idle,
}

impl<Down, L> Subscription for FoldCore<Down, L>
where
    Down: Subscriber + 'static,
    L: Send + Sync + 'static,
    Down::Input: Send + 'static,
{
    fn request(&self, demand: Demand) {
        let demand = demand.expect_nonzero();
        let (action, pending) = {
            let mut state = self.state.lock();
            state.demand += demand;
            match &state.phase {
                ReducePhase::Awaiting => protocol_violation(
                    codes::REQUEST_BEFORE_SUBSCRIPTION,
                    "订阅握手完成前收到 request",
                ),
                ReducePhase::Active(subscription) => {
                    let subscription = subscription.clone();
                    if state.upstream_requested {
                        (RequestAction::Idle, None)
                    } else {
                        state.upstream_requested = true;
                        (RequestAction::RequestUpstream(subscription), None)
                    }
                }
                ReducePhase::PendingEmit => {
                    state.phase = ReducePhase::Terminal;
                    (RequestAction::Emit, state.pending.take())
                }
                ReducePhase::Terminal => (RequestAction::Idle, None),
            }
        };
        match action {
            // 折叠族对上游总是整吸：首个正需求换成 Unlimited。
            RequestAction::RequestUpstream(upstream) => upstream.request(Demand::UNLIMITED),
            RequestAction::Emit => {
                if let Some(value) = pending {
                    let _ = self.downstream.receive_value(value);
                }
                self.downstream.receive_completion(Completion::Finished);
            }
            RequestAction::Idle => {}
        }
    }

    fn cancel(&self) {
        if let Some(upstream) = self.terminate() {
            upstream.cancel();
        }
    }
}

impl<Down, L> Subscriber for FoldCore<Down, L>
where
    Down: Subscriber + 'static,
    L: Fold<Out = Down::Input> + 'static,
    Down::Input: Send + 'static,
{
    type Input = L::In;
    type Failure = Down::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        self.adopt(subscription);
    }

    fn receive_value(&self, value: L::In) -> Demand {
        if !self.is_absorbing() {
            return Demand::NONE;
        }
        match self.logic.absorb(value) {
            FoldControl::Continue => Demand::NONE,
            FoldControl::Complete => {
                let value = self.logic.finish();
                self.complete_early(value);
                Demand::NONE
            }
        }
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        match completion {
            Completion::Finished => {
                let value = self.logic.finish();
                self.finish_with(value);
            }
            Completion::Failed(error) => {
                let _ = self.terminate();
                self.downstream.receive_completion(Completion::Failed(error));
            }
        }
    }
}

/// 错误拓宽版的上游订阅者：包装共享骨架，把上游失败与逻辑失败都变成 [`BoxError`]。
struct TryFoldSubscriber<EUp, Down: Subscriber, L> {
    core: Arc<FoldCore<Down, L>>,
    _marker: PhantomData<fn(EUp)>,
}

impl<EUp, Down, L> TryFoldSubscriber<EUp, Down, L>
where
    EUp: Into<BoxError> + 'static,
    Down: Subscriber<Failure = BoxError> + 'static,
    L: TryFold<Out = Down::Input> + Send + Sync + 'static,
    Down::Input: Send + 'static,
    L::In: 'static,
{
    fn attach<P>(upstream: &P, downstream: Down, logic: L)
    where
        P: Publisher<Output = L::In, Failure = EUp> + ?Sized,
    {
        let core = FoldCore::materialize(downstream, logic);
        upstream.subscribe(Arc::new(TryFoldSubscriber {
            core,
            _marker: PhantomData,
        }));
    }

    /// 逻辑失败：取消上游并下发拓宽错误。
    fn fail(&self, error: BoxError) {
        if let Some(upstream) = self.core.terminate() {
            upstream.cancel();
        }
        self.core
            .downstream
            .receive_completion(Completion::Failed(error));
    }
}

impl<EUp, Down, L> Subscriber for TryFoldSubscriber<EUp, Down, L>
where
    EUp: Into<BoxError> + 'static,
    Down: Subscriber<Failure = BoxError> + 'static,
    L: TryFold<Out = Down::Input> + Send + Sync + 'static,
    Down::Input: Send + 'static,
    L::In: 'static,
{
    type Input = L::In;
    type Failure = EUp;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        self.core.adopt(subscription);
    }

    fn receive_value(&self, value: L::In) -> Demand {
        if !self.core.is_absorbing() {
            return Demand::NONE;
        }
        match self.core.logic.absorb(value) {
            Ok(FoldControl::Continue) => Demand::NONE,
            Ok(FoldControl::Complete) => {
                let value = self.core.logic.finish();
                self.core.complete_early(value);
                Demand::NONE
            }
            Err(error) => {
                self.fail(error);
                Demand::NONE
            }
        }
    }

    fn receive_completion(&self, completion: Completion<EUp>) {
        match completion {
            Completion::Finished => {
                let value = self.core.logic.finish();
                self.core.finish_with(value);
            }
            Completion::Failed(error) => {
                let _ = self.core.terminate();
                self.core
                    .downstream
                    .receive_completion(Completion::Failed(error.into()));
            }
        }
    }
}

struct LastFold<V, F> {
    slot: Mutex<Option<V>>,
    keep: F,
}

impl<V, F> Fold for LastFold<V, F>
where
    V: Send,
    F: Fn(&V) -> bool + Send + Sync,
{
    type In = V;
    type Out = V;

    fn absorb(&self, value: V) -> FoldControl {
        if (self.keep)(&value) {
            *self.slot.lock() = Some(value);
        }
        FoldControl::Continue
    }

    fn finish(&self) -> Option<V> {
        self.slot.lock().take()
    }
}

struct TryLastFold<V, F> {
    slot: Mutex<Option<V>>,
    keep: F,
}

impl<V, F> TryFold for TryLastFold<V, F>
where
    V: Send,
    F: Fn(&V) -> Result<bool, BoxError> + Send + Sync,
{
    type In = V;
    type Out = V;

    fn absorb(&self, value: V) -> Result<FoldControl, BoxError> {
        if (self.keep)(&value)? {
            *self.slot.lock() = Some(value);
        }
        Ok(FoldControl::Continue)
    }

    fn finish(&self) -> Option<V> {
        self.slot.lock().take()
    }
}

struct FirstFold<V, F> {
    slot: Mutex<Option<V>>,
    accept: F,
}

impl<V, F> Fold for FirstFold<V, F>
where
    V: Send,
    F: Fn(&V) -> bool + Send + Sync,
{
    type In = V;
    type Out = V;

    fn absorb(&self, value: V) -> FoldControl {
        if (self.accept)(&value) {
            *self.slot.lock() = Some(value);
            FoldControl::Complete
        } else {
            FoldControl::Continue
        }
    }

    fn finish(&self) -> Option<V> {
        self.slot.lock().take()
    }
}

struct ReduceFold<In, A, F> {
    accumulator: Mutex<Option<A>>,
    accumulate: F,
    _marker: PhantomData<fn(In)>,
}

impl<In, A, F> Fold for ReduceFold<In, A, F>
where
    A: Send,
    F: Fn(A, In) -> A + Send + Sync,
{
    type In = In;
    type Out = A;

    fn absorb(&self, value: In) -> FoldControl {
        let Some(accumulator) = self.accumulator.lock().take() else {
            return FoldControl::Continue;
        };
        let next = (self.accumulate)(accumulator, value);
        *self.accumulator.lock() = Some(next);
        FoldControl::Continue
    }

    fn finish(&self) -> Option<A> {
        self.accumulator.lock().take()
    }
}

struct TryReduceFold<In, A, F> {
    accumulator: Mutex<Option<A>>,
    accumulate: F,
    _marker: PhantomData<fn(In)>,
}

impl<In, A, F> TryFold for TryReduceFold<In, A, F>
where
    A: Send,
    F: Fn(A, In) -> Result<A, BoxError> + Send + Sync,
{
    type In = In;
    type Out = A;

    fn absorb(&self, value: In) -> Result<FoldControl, BoxError> {
        let Some(accumulator) = self.accumulator.lock().take() else {
            return Ok(FoldControl::Continue);
        };
        let next = (self.accumulate)(accumulator, value)?;
        *self.accumulator.lock() = Some(next);
        Ok(FoldControl::Continue)
    }

    fn finish(&self) -> Option<A> {
        self.accumulator.lock().take()
    }
}

struct CountFold<In> {
    count: Mutex<u64>,
    _marker: PhantomData<fn(In)>,
}

impl<In> Fold for CountFold<In> {
    type In = In;
    type Out = u64;

    fn absorb(&self, _value: In) -> FoldControl {
        *self.count.lock() += 1;
        FoldControl::Continue
    }

    fn finish(&self) -> Option<u64> {
        Some(*self.count.lock())
    }
}

struct IgnoreFold<In> {
    _marker: PhantomData<fn(In)>,
}

impl<In> Fold for IgnoreFold<In> {
    type In = In;
    type Out = Infallible;

    fn absorb(&self, _value: In) -> FoldControl {
        FoldControl::Continue
    }

    fn finish(&self) -> Option<Infallible> {
        None
    }
}

/// 最后值描述符：上游结束时投递最后观察到的值。
#[derive(Clone)]
pub struct Last<P> {
    upstream: P,
}

impl<P> Last<P> {
    pub(crate) fn new(upstream: P) -> Self {
        Last { upstream }
    }
}

impl<P> Publisher for Last<P>
where
    P: Publisher,
    P::Output: Send + 'static,
{
    type Output = P::Output;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = P::Output, Failure = P::Failure> + 'static,
    {
        let core = FoldCore::materialize(
            subscriber,
            LastFold {
                slot: Mutex::new(None),
                keep: |_: &P::Output| true,
            },
        );
        self.upstream.subscribe(core);
    }
}

/// 谓词最后值描述符。
pub struct LastWhere<P, F> {
    upstream: P,
    predicate: Arc<F>,
}

impl<P, F> LastWhere<P, F> {
    pub(crate) fn new(upstream: P, predicate: F) -> Self {
        LastWhere {
            upstream,
            predicate: Arc::new(predicate),
        }
    }
}

impl<P: Clone, F> Clone for LastWhere<P, F> {
    fn clone(&self) -> Self {
        LastWhere {
            upstream: self.upstream.clone(),
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<P, F> Publisher for LastWhere<P, F>
where
    P: Publisher,
    P::Output: Send + 'static,
    F: Fn(&P::Output) -> bool + Send + Sync + 'static,
{
    type Output = P::Output;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = P::Output, Failure = P::Failure> + 'static,
    {
        let predicate = Arc::clone(&self.predicate);
        let core = FoldCore::materialize(
            subscriber,
            LastFold {
                slot: Mutex::new(None),
                keep: move |value: &P::Output| predicate(value),
            },
        );
        self.upstream.subscribe(core);
    }
}

/// 可失败谓词最后值描述符（错误拓宽）。
pub struct TryLastWhere<P, F> {
    upstream: P,
    predicate: Arc<F>,
}

impl<P, F> TryLastWhere<P, F> {
    pub(crate) fn new(upstream: P, predicate: F) -> Self {
        TryLastWhere {
            upstream,
            predicate: Arc::new(predicate),
        }
    }
}

impl<P: Clone, F> Clone for TryLastWhere<P, F> {
    fn clone(&self) -> Self {
        TryLastWhere {
            upstream: self.upstream.clone(),
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<P, F> Publisher for TryLastWhere<P, F>
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
        let predicate = Arc::clone(&self.predicate);
        TryFoldSubscriber::attach(
            &self.upstream,
            subscriber,
            TryLastFold {
                slot: Mutex::new(None),
                keep: move |value: &P::Output| predicate(value),
            },
        );
    }
}

/// 首个命中谓词的值描述符：命中后立即取消上游。
pub struct FirstWhere<P, F> {
    upstream: P,
    predicate: Arc<F>,
}

impl<P, F> FirstWhere<P, F> {
    pub(crate) fn new(upstream: P, predicate: F) -> Self {
        FirstWhere {
            upstream,
            predicate: Arc::new(predicate),
        }
    }
}

impl<P: Clone, F> Clone for FirstWhere<P, F> {
    fn clone(&self) -> Self {
        FirstWhere {
            upstream: self.upstream.clone(),
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<P, F> Publisher for FirstWhere<P, F>
where
    P: Publisher,
    P::Output: Send + 'static,
    F: Fn(&P::Output) -> bool + Send + Sync + 'static,
{
    type Output = P::Output;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = P::Output, Failure = P::Failure> + 'static,
    {
        let predicate = Arc::clone(&self.predicate);
        let core = FoldCore::materialize(
            subscriber,
            FirstFold {
                slot: Mutex::new(None),
                accept: move |value: &P::Output| predicate(value),
            },
        );
        self.upstream.subscribe(core);
    }
}

/// 折叠归约描述符：上游结束时投递最终累加值。
pub struct Reduce<P, A, F> {
    upstream: P,
    seed: A,
    accumulate: Arc<F>,
}

impl<P, A, F> Reduce<P, A, F> {
    pub(crate) fn new(upstream: P, seed: A, accumulate: F) -> Self {
        Reduce {
            upstream,
            seed,
            accumulate: Arc::new(accumulate),
        }
    }
}

impl<P: Clone, A: Clone, F> Clone for Reduce<P, A, F> {
    fn clone(&self) -> Self {
        Reduce {
            upstream: self.upstream.clone(),
            seed: self.seed.clone(),
            accumulate: Arc::clone(&self.accumulate),
        }
    }
}

impl<P, A, F> Publisher for Reduce<P, A, F>
where
    P: Publisher,
    P::Output: 'static,
    A: Clone + Send + 'static,
    F: Fn(A, P::Output) -> A + Send + Sync + 'static,
{
    type Output = A;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = A, Failure = P::Failure> + 'static,
    {
        let accumulate = Arc::clone(&self.accumulate);
        let core = FoldCore::materialize(
            subscriber,
            ReduceFold {
                accumulator: Mutex::new(Some(self.seed.clone())),
                accumulate: move |acc: A, value: P::Output| accumulate(acc, value),
                _marker: PhantomData,
            },
        );
        self.upstream.subscribe(core);
    }
}

/// 可失败折叠归约描述符（错误拓宽）。
pub struct TryReduce<P, A, F> {
    upstream: P,
    seed: A,
    accumulate: Arc<F>,
}

impl<P, A, F> TryReduce<P, A, F> {
    pub(crate) fn new(upstream: P, seed: A, accumulate: F) -> Self {
        TryReduce {
            upstream,
            seed,
            accumulate: Arc::new(accumulate),
        }
    }
}

impl<P: Clone, A: Clone, F> Clone for TryReduce<P, A, F> {
    fn clone(&self) -> Self {
        TryReduce {
            upstream: self.upstream.clone(),
            seed: self.seed.clone(),
            accumulate: Arc::clone(&self.accumulate),
        }
    }
}

impl<P, A, F> Publisher for TryReduce<P, A, F>
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
        let accumulate = Arc::clone(&self.accumulate);
        TryFoldSubscriber::attach(
            &self.upstream,
            subscriber,
            TryReduceFold {
                accumulator: Mutex::new(Some(self.seed.clone())),
                accumulate: move |acc: A, value: P::Output| accumulate(acc, value),
                _marker: PhantomData,
            },
        );
    }
}

/// 计数描述符：上游结束时投递观察到的值总数。
#[derive(Clone)]
pub struct Count<P> {
    upstream: P,
}

impl<P> Count<P> {
    pub(crate) fn new(upstream: P) -> Self {
        Count { upstream }
    }
}

impl<P> Publisher for Count<P>
where
    P: Publisher,
    P::Output: 'static,
{
    type Output = u64;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = u64, Failure = P::Failure> + 'static,
    {
        let core = FoldCore::materialize(
            subscriber,
            CountFold {
                count: Mutex::new(0),
                _marker: PhantomData,
            },
        );
        self.upstream.subscribe(core);
    }
}

/// 丢弃一切值、只保留终结信号的描述符。
#[derive(Clone)]
pub struct IgnoreOutput<P> {
    upstream: P,
}

impl<P> IgnoreOutput<P> {
    pub(crate) fn new(upstream: P) -> Self {
        IgnoreOutput { upstream }
    }
}

impl<P> Publisher for IgnoreOutput<P>
where
    P: Publisher,
    P::Output: 'static,
{
    type Output = Infallible;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = Infallible, Failure = P::Failure> + 'static,
    {
        let core = FoldCore::materialize(
            subscriber,
            IgnoreFold {
                _marker: PhantomData,
            },
        );
        self.upstream.subscribe(core);
    }
}
