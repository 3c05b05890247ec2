//! 发布者探针：由测试脚本手动注入信号的可观察上游。
//!
//! # 设计动机（Why）
//! - 契约测试既要扮演守规矩的上游（按需求投递），也要扮演**不守规矩**的
//!   上游（终结后继续发值、重复终结），以验证阶段的终态幂等；
//!   因此 `send`/`complete` 不做任何需求或状态检查，照单全发。
//! - 探针同时记录下游的每次 `request` 与取消，供需求重放与
//!   需求守恒断言使用。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ripple_core::{Completion, Demand, Publisher, SharedSubscription, Subscriber, Subscription};

type BoxedSubscriber<V, E> = Arc<dyn Subscriber<Input = V, Failure = E>>;

struct ProbeControl {
    requests: Mutex<Vec<Demand>>,
    cancelled: AtomicBool,
}

struct ProbeSubscription {
    control: Arc<ProbeControl>,
}

impl Subscription for ProbeSubscription {
    fn request(&self, demand: Demand) {
        let demand = demand.expect_nonzero();
        self.control
            .requests
            .lock()
            .expect("发布者探针请求日志锁中毒")
            .push(demand);
    }

    fn cancel(&self) {
        self.control.cancelled.store(true, Ordering::Release);
    }
}

struct Link<V, E> {
    subscriber: BoxedSubscriber<V, E>,
    control: Arc<ProbeControl>,
    handle: SharedSubscription,
}

struct ProbeState<V, E> {
    links: Vec<Link<V, E>>,
}

/// 手动驱动的发布者探针；克隆共享同一登记表。
pub struct ManualPublisher<V, E> {
    state: Arc<Mutex<ProbeState<V, E>>>,
}

impl<V, E> Clone for ManualPublisher<V, E> {
    fn clone(&self) -> Self {
        ManualPublisher {
            state: Arc::clone(&self.state),
        }
    }
}

impl<V, E> Default for ManualPublisher<V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> ManualPublisher<V, E> {
    /// 创建空探针。
    pub fn new() -> Self {
        ManualPublisher {
            state: Arc::new(Mutex::new(ProbeState { links: Vec::new() })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProbeState<V, E>> {
        self.state.lock().expect("发布者探针状态锁中毒")
    }

    /// 首个订阅边收到的订阅句柄（用于直通身份断言）。
    pub fn first_subscription(&self) -> Option<SharedSubscription> {
        self.lock().links.first().map(|link| link.handle.clone())
    }

    /// 向最新的订阅边注入一个值（不检查需求），返回其追加需求。
    ///
    /// 重订类算子（retry）会在同一探针上形成多条订阅边；
    /// 默认注入永远落在最新一条，旧边用 [`Self::send_to`] 定点注入。
    pub fn send(&self, value: V) -> Demand {
        let latest = self.lock().links.len().saturating_sub(1);
        self.send_to(latest, value)
    }

    /// 向第 `index` 条订阅边定点注入一个值（陈旧边/协议违规注入）。
    pub fn send_to(&self, index: usize, value: V) -> Demand {
        let subscriber = {
            let state = self.lock();
            match state.links.get(index) {
                Some(link) => Arc::clone(&link.subscriber),
                None => return Demand::NONE,
            }
        };
        subscriber.receive_value(value)
    }

    /// 向最新的订阅边注入终结信号（不检查状态，可重复注入以测试幂等）。
    pub fn complete(&self, completion: Completion<E>) {
        let latest = self.lock().links.len().saturating_sub(1);
        self.complete_to(latest, completion);
    }

    /// 向第 `index` 条订阅边定点注入终结信号。
    pub fn complete_to(&self, index: usize, completion: Completion<E>) {
        let subscriber = {
            let state = self.lock();
            match state.links.get(index) {
                Some(link) => Arc::clone(&link.subscriber),
                None => return,
            }
        };
        subscriber.receive_completion(completion);
    }

    /// 首个订阅边收到的累计需求。
    pub fn total_requested(&self) -> Demand {
        self.requests()
            .iter()
            .fold(Demand::NONE, |acc, demand| acc + *demand)
    }

    /// 首个订阅边的逐次请求日志。
    pub fn requests(&self) -> Vec<Demand> {
        self.requests_of(0)
    }

    /// 第 `index` 条订阅边的逐次请求日志。
    pub fn requests_of(&self, index: usize) -> Vec<Demand> {
        self.lock()
            .links
            .get(index)
            .map(|link| {
                link.control
                    .requests
                    .lock()
                    .expect("发布者探针请求日志锁中毒")
                    .clone()
            })
            .unwrap_or_default()
    }

    /// 首个订阅边是否已被取消。
    pub fn is_cancelled(&self) -> bool {
        self.is_cancelled_of(0)
    }

    /// 第 `index` 条订阅边是否已被取消。
    pub fn is_cancelled_of(&self, index: usize) -> bool {
        self.lock()
            .links
            .get(index)
            .map(|link| link.control.cancelled.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// 已完成的订阅边数量。
    pub fn subscriber_count(&self) -> usize {
        self.lock().links.len()
    }

    /// 向首个订阅者重复投递一次全新订阅（协议违规注入）。
    ///
    /// 返回该多余订阅是否被同步取消（握手去重要求为 `true`）。
    pub fn inject_duplicate_subscription(&self) -> bool {
        let subscriber = {
            let state = self.lock();
            match state.links.first() {
                Some(link) => Arc::clone(&link.subscriber),
                None => return false,
            }
        };
        let control = Arc::new(ProbeControl {
            requests: Mutex::new(Vec::new()),
            cancelled: AtomicBool::new(false),
        });
        subscriber.receive_subscription(Arc::new(ProbeSubscription {
            control: Arc::clone(&control),
        }));
        control.cancelled.load(Ordering::Acquire)
    }
}

impl<V, E> Publisher for ManualPublisher<V, E>
where
    V: Send + 'static,
    E: Send + 'static,
{
    type Output = V;
    type Failure = E;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = V, Failure = E> + 'static,
    {
        let subscriber: BoxedSubscriber<V, E> = Arc::new(subscriber);
        let control = Arc::new(ProbeControl {
            requests: Mutex::new(Vec::new()),
            cancelled: AtomicBool::new(false),
        });
        let handle: SharedSubscription = Arc::new(ProbeSubscription { control: Arc::clone(&control) });
        self.lock().links.push(Link {
            subscriber: Arc::clone(&subscriber),
            control,
            handle: handle.clone(),
        });
        subscriber.receive_subscription(handle);
    }
}
