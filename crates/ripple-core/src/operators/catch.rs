//! `catch` / `try_catch`：失败时切换到替换发布者的前/后段状态机。
//!
//! # 设计背景（Why）
//! - 状态机五态：`PendingPre → Pre(上游) → PendingPost → Post(替换上游) → Cancelled`。
//!   下游全程只看到**一次**订阅交付（在前段握手时发出），上游的换血对它不可见。
//! - 需求计数跨越换血存活：前段失败瞬间记录的未满足需求，在后段握手时
//!   一次性重放给替换上游。
//! - 前段与后段各由一个专职订阅者代表（两者共享同一内核），
//!   换血后迟到的前段信号按状态被丢弃。
//!
//! # 契约说明（What）
//! - `catch`：处理器 `Fn(E) -> P2` 不可失败，下游错误类型即 `P2::Failure`；
//! - `try_catch`：处理器本身可失败，失败立刻作为 `Failed(e')` 下发，
//!   下游错误类型拓宽为 [`BoxError`]；
//! - `request`/`cancel` 按当前状态路由到前段或后段上游；
//!   `PendingPost` 期间的 `request` 只累加计数。

use alloc::sync::{Arc, Weak};
use core::marker::PhantomData;

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber, Subscription};
use crate::demand::Demand;
use crate::error::{BoxError, codes, protocol_violation};

/// 失败恢复策略：`catch` 与 `try_catch` 的差异被收拢到这一个接口上。
pub(crate) trait RecoverStrategy<E>: Send + Sync + 'static {
    /// 替换发布者类型。
    type Replacement: Publisher;
    /// 下游看到的错误类型。
    type Failure;

    /// 用失败换取替换发布者；`Err` 分支直接成为下游的失败终结。
    fn recover(&self, error: E) -> Result<Self::Replacement, Self::Failure>;

    /// 把替换发布者的失败映射为下游错误类型。
    fn widen(failure: <Self::Replacement as Publisher>::Failure) -> Self::Failure;
}

enum CatchPhase {
    PendingPre,
    Pre(SharedSubscription),
    PendingPost,
    Post(SharedSubscription),
    Cancelled,
}

struct CatchMachine {
    phase: CatchPhase,
    demand: Demand,
}

struct CatchCore<EUp, Down, R>
where
    R: RecoverStrategy<EUp>,
{
    weak: Weak<Self>,
    state: Mutex<CatchMachine>,
    downstream: Down,
    strategy: R,
    _marker: PhantomData<fn(EUp)>,
}

impl<EUp, Down, R> CatchCore<EUp, Down, R>
where
    EUp: 'static,
    R: RecoverStrategy<EUp>,
    Down: Subscriber<
            Input = <R::Replacement as Publisher>::Output,
            Failure = R::Failure,
        > + 'static,
    R::Failure: 'static,
{
    fn materialize<P>(upstream: &P, downstream: Down, strategy: R)
    where
        P: Publisher<Output = <R::Replacement as Publisher>::Output, Failure = EUp> + ?Sized,
    {
        let core = Arc::new_cyclic(|weak: &Weak<Self>| CatchCore {
            weak: weak.clone(),
            state: Mutex::new(CatchMachine {
                phase: CatchPhase::PendingPre,
                demand: Demand::NONE,
            }),
            downstream,
            strategy,
            _marker: PhantomData,
        });
        upstream.subscribe(PreSubscriber { core });
    }

    fn shared(&self) -> SharedSubscription {
        self.weak.upgrade().expect("阶段在回调期间必然存活")
    }

    fn self_arc(&self) -> Arc<Self> {
        self.weak.upgrade().expect("阶段在回调期间必然存活")
    }

    /// 值投递的公共记账：扣一、投递、按下游返回补回。
    fn deliver(&self, value: <R::Replacement as Publisher>::Output) -> Demand {
        {
            let mut state = self.state.lock();
            state.demand -= Demand::finite(1);
        }
        let extra = self.downstream.receive_value(value);
        if !extra.is_none() {
            self.state.lock().demand += extra;
        }
        extra
    }

    fn pre_subscription(&self, subscription: SharedSubscription) {
        let adopted = {
            let mut state = self.state.lock();
            match state.phase {
                CatchPhase::PendingPre => {
                    state.phase = CatchPhase::Pre(subscription.clone());
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

    fn pre_value(&self, value: <R::Replacement as Publisher>::Output) -> Demand {
        if !matches!(self.state.lock().phase, CatchPhase::Pre(_)) {
            return Demand::NONE;
        }
        self.deliver(value)
    }

    fn pre_completion(&self, completion: Completion<EUp>) {
        match completion {
            Completion::Finished => {
                let forward = {
                    let mut state = self.state.lock();
                    match state.phase {
                        CatchPhase::Pre(_) | CatchPhase::PendingPre => {
                            state.phase = CatchPhase::Cancelled;
                            true
                        }
                        _ => false,
                    }
                };
                if forward {
                    self.downstream.receive_completion(Completion::Finished);
                }
            }
            Completion::Failed(error) => {
                let proceed = {
                    let mut state = self.state.lock();
                    match state.phase {
                        CatchPhase::Pre(_) | CatchPhase::PendingPre => {
                            // 前段上游已自行终结，句柄随相位替换释放。
                            state.phase = CatchPhase::PendingPost;
                            true
                        }
                        _ => false,
                    }
                };
                if !proceed {
                    return;
                }
                match self.strategy.recover(error) {
                    Ok(replacement) => {
                        replacement.subscribe(PostSubscriber {
                            core: self.self_arc(),
                        });
                    }
                    Err(failure) => {
                        self.state.lock().phase = CatchPhase::Cancelled;
                        self.downstream
                            .receive_completion(Completion::Failed(failure));
                    }
                }
            }
        }
    }

    fn post_subscription(&self, subscription: SharedSubscription) {
        let replay = {
            let mut state = self.state.lock();
            match state.phase {
                CatchPhase::PendingPost => {
                    state.phase = CatchPhase::Post(subscription.clone());
                    state.demand
                }
                _ => {
                    drop(state);
                    subscription.cancel();
                    return;
                }
            }
        };
        if replay.is_positive() {
            subscription.request(replay);
        }
    }

    fn post_value(&self, value: <R::Replacement as Publisher>::Output) -> Demand {
        if !matches!(self.state.lock().phase, CatchPhase::Post(_)) {
            return Demand::NONE;
        }
        self.deliver(value)
    }

    fn post_completion(&self, completion: Completion<<R::Replacement as Publisher>::Failure>) {
        let forward = {
            let mut state = self.state.lock();
            match state.phase {
                CatchPhase::Post(_) | CatchPhase::PendingPost => {
                    state.phase = CatchPhase::Cancelled;
                    true
                }
                _ => false,
            }
        };
        if forward {
            self.downstream
                .receive_completion(completion.map_failure(R::widen));
        }
    }
}

impl<EUp, Down, R> Subscription for CatchCore<EUp, Down, R>
where
    EUp: 'static,
    R: RecoverStrategy<EUp>,
    Down: Subscriber<
            Input = <R::Replacement as Publisher>::Output,
            Failure = R::Failure,
        > + 'static,
    R::Failure: 'static,
{
    fn request(&self, demand: Demand) {
        let demand = demand.expect_nonzero();
        let target = {
            let mut state = self.state.lock();
            state.demand += demand;
            match &state.phase {
                CatchPhase::PendingPre => protocol_violation(
                    codes::REQUEST_BEFORE_SUBSCRIPTION,
                    "订阅握手完成前收到 request",
                ),
                CatchPhase::Pre(subscription) | CatchPhase::Post(subscription) => {
                    Some(subscription.clone())
                }
                // 换血途中：需求已入账，待后段握手时重放。
                CatchPhase::PendingPost => None,
                CatchPhase::Cancelled => None,
            }
        };
        if let Some(target) = target {
            target.request(demand);
        }
    }

    fn cancel(&self) {
        let target = {
            let mut state = self.state.lock();
            match core::mem::replace(&mut state.phase, CatchPhase::Cancelled) {
                CatchPhase::Pre(subscription) | CatchPhase::Post(subscription) => {
                    Some(subscription)
                }
                _ => None,
            }
        };
        if let Some(target) = target {
            target.cancel();
        }
    }
}

/// 前段订阅者：面对原始上游。
struct PreSubscriber<EUp, Down, R>
where
    R: RecoverStrategy<EUp>,
{
    core: Arc<CatchCore<EUp, Down, R>>,
}

impl<EUp, Down, R> Subscriber for PreSubscriber<EUp, Down, R>
where
    EUp: 'static,
    R: RecoverStrategy<EUp>,
    Down: Subscriber<
            Input = <R::Replacement as Publisher>::Output,
            Failure = R::Failure,
        > + 'static,
    R::Failure: 'static,
{
    type Input = <R::Replacement as Publisher>::Output;
    type Failure = EUp;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        self.core.pre_subscription(subscription);
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        self.core.pre_value(value)
    }

    fn receive_completion(&self, completion: Completion<EUp>) {
        self.core.pre_completion(completion);
    }
}

/// 后段订阅者：面对替换上游。
struct PostSubscriber<EUp, Down, R>
where
    R: RecoverStrategy<EUp>,
{
    core: Arc<CatchCore<EUp, Down, R>>,
}

impl<EUp, Down, R> Subscriber for PostSubscriber<EUp, Down, R>
where
    EUp: 'static,
    R: RecoverStrategy<EUp>,
    Down: Subscriber<
            Input = <R::Replacement as Publisher>::Output,
            Failure = R::Failure,
        > + 'static,
    R::Failure: 'static,
{
    type Input = <R::Replacement as Publisher>::Output;
    type Failure = <R::Replacement as Publisher>::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        self.core.post_subscription(subscription);
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        self.core.post_value(value)
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        self.core.post_completion(completion);
    }
}

struct CatchStrategy<H> {
    handler: Arc<H>,
}

impl<E, H, P2> RecoverStrategy<E> for CatchStrategy<H>
where
    H: Fn(E) -> P2 + Send + Sync + 'static,
    P2: Publisher + 'static,
{
    type Replacement = P2;
    type Failure = P2::Failure;

    fn recover(&self, error: E) -> Result<P2, P2::Failure> {
        Ok((self.handler)(error))
    }

    fn widen(failure: P2::Failure) -> P2::Failure {
        failure
    }
}

struct TryCatchStrategy<H> {
    handler: Arc<H>,
}

impl<E, H, P2> RecoverStrategy<E> for TryCatchStrategy<H>
where
    H: Fn(E) -> Result<P2, BoxError> + Send + Sync + 'static,
    P2: Publisher + 'static,
    P2::Failure: Into<BoxError>,
{
    type Replacement = P2;
    type Failure = BoxError;

    fn recover(&self, error: E) -> Result<P2, BoxError> {
        (self.handler)(error)
    }

    fn widen(failure: P2::Failure) -> BoxError {
        failure.into()
    }
}

/// 失败恢复描述符：处理器不可失败。
pub struct Catch<P, H> {
    upstream: P,
    handler: Arc<H>,
}

impl<P, H> Catch<P, H> {
    pub(crate) fn new(upstream: P, handler: H) -> Self {
        Catch {
            upstream,
            handler: Arc::new(handler),
        }
    }
}

impl<P: Clone, H> Clone for Catch<P, H> {
    fn clone(&self) -> Self {
        Catch {
            upstream: self.upstream.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<P, H, P2> Publisher for Catch<P, H>
where
    P: Publisher,
    P::Failure: Send + 'static,
    P::Output: Send + 'static,
    H: Fn(P::Failure) -> P2 + Send + Sync + 'static,
    P2: Publisher<Output = P::Output> + 'static,
    P2::Failure: 'static,
{
    type Output = P::Output;
    type Failure = P2::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = P::Output, Failure = P2::Failure> + 'static,
    {
        CatchCore::materialize(
            &self.upstream,
            subscriber,
            CatchStrategy {
                handler: Arc::clone(&self.handler),
            },
        );
    }
}

/// 可失败的失败恢复描述符：处理器自身可失败，错误拓宽为 [`BoxError`]。
pub struct TryCatch<P, H> {
    upstream: P,
    handler: Arc<H>,
}

impl<P, H> TryCatch<P, H> {
    pub(crate) fn new(upstream: P, handler: H) -> Self {
        TryCatch {
            upstream,
            handler: Arc::new(handler),
        }
    }
}

impl<P: Clone, H> Clone for TryCatch<P, H> {
    fn clone(&self) -> Self {
        TryCatch {
            upstream: self.upstream.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<P, H, P2> Publisher for TryCatch<P, H>
where
    P: Publisher,
    P::Failure: Send + 'static,
    P::Output: Send + 'static,
    H: Fn(P::Failure) -> Result<P2, BoxError> + Send + Sync + 'static,
    P2: Publisher<Output = P::Output> + 'static,
    P2::Failure: Into<BoxError> + 'static,
{
    type Output = P::Output;
    type Failure = BoxError;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = P::Output, Failure = BoxError> + 'static,
    {
        CatchCore::materialize(
            &self.upstream,
            subscriber,
            TryCatchStrategy {
                handler: Arc::clone(&self.handler),
            },
        );
    }
}
