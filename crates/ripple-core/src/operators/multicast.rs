//! `make_connectable` / `share`：显式连接的单上游多下游扇出包装。
//!
//! # 设计背景（Why）
//! - 普通描述符每次 `subscribe` 物化一条独立链；可连接包装改为：
//!   订阅者先挂到共享登记表，`connect()` 才对上游完成一次订阅，
//!   此后每个值按登记表扇出。两个订阅者因此看到**同一次**上游排水的
//!   完全相同的值序列（热总线的一般形态仍在范围之外）。
//! - 扇出不缓冲：值到达瞬间需求为零的订阅者错过该值。
//! - 订阅者以共享句柄存放在登记表中，回调永远在登记表锁外执行。
//!
//! # 契约说明（What）
//! - `connect()` 返回可取消句柄，取消即断开上游；重复连接为空操作；
//! - 每个订阅者独立记账需求与取消；
//! - 终结信号对所有在册订阅者广播并清空登记表。

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber, Subscription};
use crate::demand::Demand;
use crate::scheduler::Cancellable;

type SharedSubscriber<V, E> = Arc<dyn Subscriber<Input = V, Failure = E>>;

/// 可连接扇出描述符。
pub struct Share<P: Publisher> {
    upstream: P,
    hub: Arc<Hub<P::Output, P::Failure>>,
}

impl<P: Publisher> Share<P> {
    pub(crate) fn new(upstream: P) -> Self {
        Share {
            upstream,
            hub: Arc::new(Hub {
                state: Mutex::new(HubState {
                    slots: Vec::new(),
                    next_id: 0,
                    upstream: None,
                    connected: false,
                    terminal: false,
                }),
            }),
        }
    }
}

impl<P: Publisher + Clone> Clone for Share<P> {
    fn clone(&self) -> Self {
        Share {
            upstream: self.upstream.clone(),
            hub: Arc::clone(&self.hub),
        }
    }
}

impl<P> Share<P>
where
    P: Publisher,
    P::Output: Clone + Send + 'static,
    P::Failure: Clone + Send + 'static,
{
    /// 连接上游：完成唯一一次上游订阅，开始扇出。重复连接为空操作。
    pub fn connect(&self) -> Arc<dyn Cancellable> {
        let first = {
            let mut state = self.hub.state.lock();
            if state.connected || state.terminal {
                false
            } else {
                state.connected = true;
                true
            }
        };
        if first {
            self.upstream.subscribe(HubDriver {
                hub: Arc::clone(&self.hub),
            });
        }
        Arc::new(Disconnect {
            hub: Arc::clone(&self.hub) as Arc<dyn DisconnectTarget>,
        })
    }
}

impl<P> Publisher for Share<P>
where
    P: Publisher,
    P::Output: Clone + Send + 'static,
    P::Failure: Clone + Send + 'static,
{
    type Output = P::Output;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = P::Output, Failure = P::Failure> + 'static,
    {
        let subscriber: SharedSubscriber<P::Output, P::Failure> = Arc::new(subscriber);
        let id = {
            let mut state = self.hub.state.lock();
            if state.terminal {
                None
            } else {
                state.next_id += 1;
                let id = state.next_id;
                state.slots.push(Slot {
                    id,
                    demand: Demand::NONE,
                    subscriber: Arc::clone(&subscriber),
                });
                Some(id)
            }
        };
        match id {
            Some(id) => {
                let handle: SharedSubscription = Arc::new(SlotSubscription {
                    hub: Arc::clone(&self.hub),
                    id,
                });
                subscriber.receive_subscription(handle);
            }
            None => {
                // 登记表已终结：交付空操作订阅并立即结束。
                struct Noop;
                impl Subscription for Noop {
                    fn request(&self, demand: Demand) {
                        let _ = demand.expect_nonzero();
                    }
                    fn cancel(&self) {}
                }
                subscriber.receive_subscription(Arc::new(Noop));
                subscriber.receive_completion(Completion::Finished);
            }
        }
    }
}

struct Slot<V, E> {
    id: u64,
    demand: Demand,
    subscriber: SharedSubscriber<V, E>,
}

struct HubState<V, E> {
    slots: Vec<Slot<V, E>>,
    next_id: u64,
    upstream: Option<SharedSubscription>,
    connected: bool,
    terminal: bool,
}

struct Hub<V, E> {
    state: Mutex<HubState<V, E>>,
}

impl<V, E> Hub<V, E>
where
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// 扇出一个值：对扇出瞬间需求为正的订阅者投递，回调在锁外。
    fn fan_out(&self, value: V) {
        let targets: Vec<(u64, SharedSubscriber<V, E>)> = {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            state
                .slots
                .iter_mut()
                .filter(|slot| slot.demand.is_positive())
                .map(|slot| {
                    slot.demand -= Demand::finite(1);
                    (slot.id, Arc::clone(&slot.subscriber))
                })
                .collect()
        };
        for (id, subscriber) in targets {
            let extra = subscriber.receive_value(value.clone());
            if !extra.is_none() {
                let mut state = self.state.lock();
                if let Some(slot) = state.slots.iter_mut().find(|slot| slot.id == id) {
                    slot.demand += extra;
                }
            }
        }
    }

    fn fan_out_completion(&self, completion: Completion<E>) {
        let slots = {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            state.terminal = true;
            state.upstream = None;
            core::mem::take(&mut state.slots)
        };
        for slot in slots {
            slot.subscriber.receive_completion(completion.clone());
        }
    }

    fn disconnect(&self) {
        let upstream = {
            let mut state = self.state.lock();
            state.connected = false;
            state.upstream.take()
        };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}

trait DisconnectTarget: Send + Sync {
    fn do_disconnect(&self);
}

impl<V, E> DisconnectTarget for Hub<V, E>
where
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn do_disconnect(&self) {
        self.disconnect();
    }
}

struct Disconnect {
    hub: Arc<dyn DisconnectTarget>,
}

impl Cancellable for Disconnect {
    fn cancel(&self) {
        self.hub.do_disconnect();
    }
}

/// 驱动者：代表登记表面对上游的唯一订阅者。
struct HubDriver<V, E> {
    hub: Arc<Hub<V, E>>,
}

impl<V, E> Subscriber for HubDriver<V, E>
where
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Input = V;
    type Failure = E;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        let adopted = {
            let mut state = self.hub.state.lock();
            if state.terminal || state.upstream.is_some() {
                false
            } else {
                state.upstream = Some(subscription.clone());
                true
            }
        };
        if adopted {
            subscription.request(Demand::UNLIMITED);
        } else {
            subscription.cancel();
        }
    }

    fn receive_value(&self, value: V) -> Demand {
        self.hub.fan_out(value);
        Demand::NONE
    }

    fn receive_completion(&self, completion: Completion<E>) {
        self.hub.fan_out_completion(completion);
    }
}

/// 每订阅者的扇出订阅句柄：记账独立需求，取消即除名。
struct SlotSubscription<V, E> {
    hub: Arc<Hub<V, E>>,
    id: u64,
}

impl<V, E> Subscription for SlotSubscription<V, E>
where
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn request(&self, demand: Demand) {
        let demand = demand.expect_nonzero();
        let mut state = self.hub.state.lock();
        if let Some(slot) = state.slots.iter_mut().find(|slot| slot.id == self.id) {
            slot.demand += demand;
        }
    }

    fn cancel(&self) {
        let mut state = self.hub.state.lock();
        state.slots.retain(|slot| slot.id != self.id);
    }
}
