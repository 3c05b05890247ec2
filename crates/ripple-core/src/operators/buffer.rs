//! `buffer(size, prefetch, when_full)`：有界缓冲与补拉记账。
//!
//! # 设计背景（Why）
//! - `KeepFull` 预取：订阅时即向上游请求 `size`，此后每向下游投递一个
//!   就补拉一个，让缓冲保持满水位；
//! - `ByRequest` 预取：不做预取记账，对上游直接请求 `Unlimited`，
//!   投递节奏完全由下游需求与缓冲水位约束；
//! - 满缓冲策略：丢新值 / 丢队头 / 以用户闭包产错终止。
//!
//! # 并发纪律（How）
//! - 排水循环由旗标独占；投递期间下游重入的 `request` 只记账，
//!   由在途循环继续消化；
//! - 上游 `Finished` 时先排空缓冲再转发；`Failed` 丢弃缓冲立即转发。

use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber, Subscription};
use crate::demand::Demand;
use crate::error::{codes, protocol_violation};

/// 预取策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum PrefetchStrategy {
    /// 订阅即请求 `size`，按投递逐个补拉。
    KeepFull,
    /// 不做预取记账，对上游请求 `Unlimited`。
    ByRequest,
}

/// 满缓冲策略。
#[non_exhaustive]
pub enum BufferingStrategy<E> {
    /// 丢弃新到的值。
    DropNewest,
    /// 移除队头、接纳新值。
    DropOldest,
    /// 调用闭包产出错误，终止流并取消上游。
    CustomError(Arc<dyn Fn() -> E + Send + Sync>),
}

impl<E> Clone for BufferingStrategy<E> {
    fn clone(&self) -> Self {
        match self {
            BufferingStrategy::DropNewest => BufferingStrategy::DropNewest,
            BufferingStrategy::DropOldest => BufferingStrategy::DropOldest,
            BufferingStrategy::CustomError(factory) => {
                BufferingStrategy::CustomError(Arc::clone(factory))
            }
        }
    }
}

/// 有界缓冲描述符。
pub struct Buffer<P: Publisher> {
    upstream: P,
    size: usize,
    prefetch: PrefetchStrategy,
    when_full: BufferingStrategy<P::Failure>,
}

impl<P: Publisher> Buffer<P> {
    pub(crate) fn new(
        upstream: P,
        size: usize,
        prefetch: PrefetchStrategy,
        when_full: BufferingStrategy<P::Failure>,
    ) -> Self {
        assert!(size > 0, "buffer 的容量必须为正");
        Buffer {
            upstream,
            size,
            prefetch,
            when_full,
        }
    }
}

impl<P> Clone for Buffer<P>
where
    P: Publisher + Clone,
{
    fn clone(&self) -> Self {
        Buffer {
            upstream: self.upstream.clone(),
            size: self.size,
            prefetch: self.prefetch,
            when_full: self.when_full.clone(),
        }
    }
}

impl<P> Publisher for Buffer<P>
where
    P: Publisher,
    P::Output: Send + 'static,
    P::Failure: Send + 'static,
{
    type Output = P::Output;
    type Failure = P::Failure;

    fn subscribe<Down>(&self, subscriber: Down)
    where
        Down: Subscriber<Input = P::Output, Failure = P::Failure> + 'static,
    {
        let stage = Arc::new_cyclic(|weak: &Weak<BufferStage<Down>>| BufferStage {
            weak: weak.clone(),
            size: self.size,
            prefetch: self.prefetch,
            when_full: self.when_full.clone(),
            state: Mutex::new(BufferMachine {
                upstream: None,
                handshaken: false,
                buffer: VecDeque::with_capacity(self.size),
                demand: Demand::NONE,
                pending_finish: false,
                draining: false,
                terminal: false,
            }),
            downstream: subscriber,
        });
        self.upstream.subscribe(stage);
    }
}

struct BufferMachine<V> {
    upstream: Option<SharedSubscription>,
    handshaken: bool,
    buffer: VecDeque<V>,
    demand: Demand,
    /// 上游已正常结束，缓冲排空后向下游收尾。
    pending_finish: bool,
    draining: bool,
    terminal: bool,
}

struct BufferStage<Down: Subscriber> {
    weak: Weak<Self>,
    size: usize,
    prefetch: PrefetchStrategy,
    when_full: BufferingStrategy<Down::Failure>,
    state: Mutex<BufferMachine<Down::Input>>,
    downstream: Down,
}

impl<Down> BufferStage<Down>
where
    Down: Subscriber + 'static,
    Down::Input: Send + 'static,
    Down::Failure: Send + 'static,
{
    fn shared(&self) -> SharedSubscription {
        self.weak.upgrade().expect("阶段在回调期间必然存活")
    }

    /// 排水循环：需求与缓冲同时非空时逐个投递；`KeepFull` 下逐个补拉。
    fn drain(&self) {
        {
            let mut state = self.state.lock();
            if state.terminal || state.draining {
                return;
            }
            state.draining = true;
        }
        loop {
            let (value, refill) = {
                let mut state = self.state.lock();
                if state.terminal {
                    state.draining = false;
                    return;
                }
                if !state.demand.is_positive() || state.buffer.is_empty() {
                    state.draining = false;
                    // 上游已尽且缓冲排空：收尾。
                    if state.pending_finish && state.buffer.is_empty() {
                        state.terminal = true;
                        drop(state);
                        self.downstream.receive_completion(Completion::Finished);
                    }
                    return;
                }
                state.demand -= Demand::finite(1);
                let value = state
                    .buffer
                    .pop_front()
                    .expect("缓冲非空判定后必有队头元素");
                let refill = match self.prefetch {
                    PrefetchStrategy::KeepFull => state.upstream.clone(),
                    PrefetchStrategy::ByRequest => None,
                };
                (value, refill)
            };
            let extra = self.downstream.receive_value(value);
            if !extra.is_none() {
                self.state.lock().demand += extra;
            }
            if let Some(upstream) = refill {
                upstream.request(Demand::finite(1));
            }
        }
    }
}

impl<Down> Subscriber for BufferStage<Down>
where
    Down: Subscriber + 'static,
    Down::Input: Send + 'static,
    Down::Failure: Send + 'static,
{
    type Input = Down::Input;
    type Failure = Down::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        let adopted = {
            let mut state = self.state.lock();
            if state.terminal || state.handshaken {
                false
            } else {
                state.handshaken = true;
                state.upstream = Some(subscription.clone());
                true
            }
        };
        if !adopted {
            subscription.cancel();
            return;
        }
        self.downstream.receive_subscription(self.shared());
        match self.prefetch {
            PrefetchStrategy::KeepFull => subscription.request(Demand::finite(self.size as u64)),
            PrefetchStrategy::ByRequest => subscription.request(Demand::UNLIMITED),
        }
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        enum Verdict<E> {
            Stored,
            Dropped,
            Overflow(Arc<dyn Fn() -> E + Send + Sync>),
        }
        let verdict = {
            let mut state = self.state.lock();
            if state.terminal {
                return Demand::NONE;
            }
            if state.buffer.len() == self.size {
                match &self.when_full {
                    BufferingStrategy::DropNewest => Verdict::Dropped,
                    BufferingStrategy::DropOldest => {
                        state.buffer.pop_front();
                        state.buffer.push_back(value);
                        Verdict::Stored
                    }
                    BufferingStrategy::CustomError(factory) => {
                        state.terminal = true;
                        state.buffer.clear();
                        Verdict::Overflow(Arc::clone(factory))
                    }
                }
            } else {
                state.buffer.push_back(value);
                Verdict::Stored
            }
        };
        match verdict {
            Verdict::Stored => self.drain(),
            Verdict::Dropped => {}
            Verdict::Overflow(factory) => {
                let upstream = self.state.lock().upstream.take();
                if let Some(upstream) = upstream {
                    upstream.cancel();
                }
                let error = factory();
                self.downstream.receive_completion(Completion::Failed(error));
            }
        }
        Demand::NONE
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        match completion {
            Completion::Finished => {
                {
                    let mut state = self.state.lock();
                    if state.terminal {
                        return;
                    }
                    state.upstream = None;
                    state.pending_finish = true;
                }
                // 排空剩余缓冲后由排水循环转发 Finished。
                self.drain();
                let finish_now = {
                    let mut state = self.state.lock();
                    if !state.terminal && state.pending_finish && state.buffer.is_empty() {
                        state.terminal = true;
                        true
                    } else {
                        false
                    }
                };
                if finish_now {
                    self.downstream.receive_completion(Completion::Finished);
                }
            }
            Completion::Failed(error) => {
                let forward = {
                    let mut state = self.state.lock();
                    if state.terminal {
                        false
                    } else {
                        state.terminal = true;
                        state.buffer.clear();
                        state.upstream = None;
                        true
                    }
                };
                if forward {
                    self.downstream.receive_completion(Completion::Failed(error));
                }
            }
        }
    }
}

impl<Down> Subscription for BufferStage<Down>
where
    Down: Subscriber + 'static,
    Down::Input: Send + 'static,
    Down::Failure: Send + 'static,
{
    fn request(&self, demand: Demand) {
        let demand = demand.expect_nonzero();
        {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            if !state.handshaken {
                protocol_violation(
                    codes::REQUEST_BEFORE_SUBSCRIPTION,
                    "订阅握手完成前收到 request",
                );
            }
            state.demand += demand;
        }
        self.drain();
    }

    fn cancel(&self) {
        let upstream = {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            state.terminal = true;
            state.buffer.clear();
            state.upstream.take()
        };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}
