//! `sequence`：迭代器驱动的有限或无限源，带重入合并的排水循环。
//!
//! # 设计背景（Why）
//! - 序列源是“需求驱动投递”的原型：`request(d)` 抵达后循环出队，
//!   直到需求耗尽或迭代器枯竭；下游在 `receive_value` 内部发起的递归
//!   `request` 必须并入正在进行的循环，而不是再起一层调用栈。
//! - 迭代器在耗尽或取消时立刻释放（置 `None`），其析构可能牵连用户资源。
//!
//! # 并发纪律（How）
//! - 排水权由 `draining` 旗标独占：持旗线程把迭代器整个移出状态，
//!   在锁外推进与投递；让出排水权前回查需求，避免丢失唤醒；
//! - 需求配额在短临界区内预扣（每次一个），投递与 `next()` 都发生在锁外。

use alloc::sync::Arc;
use core::convert::Infallible;

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber, Subscription};
use crate::demand::Demand;

/// 序列源描述符；`subscribe` 时克隆底层序列并转为迭代器。
#[derive(Clone, Debug)]
pub struct SequencePublisher<Seq> {
    sequence: Seq,
}

/// 构造序列源；接受任何可克隆、可迭代的序列（含无限序列）。
pub fn sequence<Seq>(sequence: Seq) -> SequencePublisher<Seq>
where
    Seq: IntoIterator + Clone + Send + 'static,
    Seq::IntoIter: Send + 'static,
    Seq::Item: Send + 'static,
{
    SequencePublisher { sequence }
}

impl<Seq> Publisher for SequencePublisher<Seq>
where
    Seq: IntoIterator + Clone + Send + 'static,
    Seq::IntoIter: Send + 'static,
    Seq::Item: Send + 'static,
{
    type Output = Seq::Item;
    type Failure = Infallible;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = Seq::Item, Failure = Infallible> + 'static,
    {
        let stage = Arc::new(SequenceStage {
            state: Mutex::new(SequenceState {
                iterator: Some(self.sequence.clone().into_iter()),
                demand: Demand::NONE,
                draining: false,
                terminal: false,
            }),
            downstream: subscriber,
        });
        let handle: SharedSubscription = stage.clone();
        stage.downstream.receive_subscription(handle);
    }
}

struct SequenceState<I> {
    iterator: Option<I>,
    demand: Demand,
    draining: bool,
    terminal: bool,
}

struct SequenceStage<I, Down> {
    state: Mutex<SequenceState<I>>,
    downstream: Down,
}

impl<I, Down> SequenceStage<I, Down>
where
    I: Iterator + Send,
    I::Item: Send,
    Down: Subscriber<Input = I::Item>,
{
    /// 排水循环：独占推进迭代器，直到需求耗尽、迭代器枯竭或被取消。
    fn drain(&self) {
        let mut iterator = {
            let mut state = self.state.lock();
            if state.terminal || state.draining {
                return;
            }
            match state.iterator.take() {
                Some(iterator) => {
                    state.draining = true;
                    iterator
                }
                None => return,
            }
        };

        loop {
            // 预扣一个投递配额；需求耗尽时尝试让出排水权。
            let granted = {
                let mut state = self.state.lock();
                if state.terminal {
                    // 取消发生在排水期间：迭代器就地释放，不归还。
                    state.draining = false;
                    return;
                }
                if state.demand.is_positive() {
                    state.demand -= Demand::finite(1);
                    true
                } else {
                    false
                }
            };

            if !granted {
                let mut state = self.state.lock();
                if state.terminal {
                    state.draining = false;
                    return;
                }
                if state.demand.is_positive() {
                    // 让出前到达了新需求，继续持旗排水。
                    continue;
                }
                state.iterator = Some(iterator);
                state.draining = false;
                return;
            }

            match iterator.next() {
                Some(value) => {
                    let extra = self.downstream.receive_value(value);
                    if !extra.is_none() {
                        self.state.lock().demand += extra;
                    }
                }
                None => {
                    {
                        let mut state = self.state.lock();
                        state.terminal = true;
                        state.draining = false;
                    }
                    self.downstream.receive_completion(Completion::Finished);
                    return;
                }
            }
        }
    }
}

impl<I, Down> Subscription for SequenceStage<I, Down>
where
    I: Iterator + Send,
    I::Item: Send,
    Down: Subscriber<Input = I::Item>,
{
    fn request(&self, demand: Demand) {
        let demand = demand.expect_nonzero();
        {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            state.demand += demand;
            if state.draining {
                // 重入或并发请求：并入正在进行的排水循环。
                return;
            }
        }
        self.drain();
    }

    fn cancel(&self) {
        let mut state = self.state.lock();
        state.terminal = true;
        state.demand = Demand::NONE;
        let released = state.iterator.take();
        drop(state);
        drop(released);
    }
}
