//! 发布者 / 订阅者 / 订阅三方契约：阶段图赖以成立的能力边界。
//!
//! # 模块定位（Why）
//! - 运行时是能力导向（capability-based）的：下游对上游只看得见
//!   [`Subscription`]（请求与取消），上游对下游只看得见 [`Subscriber`]
//!   （握手、投递、终结）。对象安全的窄接口替代继承层次，
//!   算子对上游的输出/错误类型保持参数化。
//! - 所有回调均取 `&self`：阶段以 `Arc` 形式同时挂在上游边与下游边，
//!   且运行模型允许并行调用，内部状态由各阶段自备的自旋锁串行化。
//!
//! # 握手协议（What）
//! 每条边（上游 → 阶段 → 下游）满足：
//! 1. `receive_subscription` 先于任何 `receive_value` / `receive_completion` 到达；
//! 2. 终结之后收到的值与终结信号一律丢弃（幂等终态）；
//! 3. 阶段对下游至多转发一次订阅；多余的上游订阅被立即取消。
//!
//! # 风险提示（Trade-offs）
//! - `receive_value` 的返回值是“本次投递之外追加的需求”，
//!   返回 [`Demand::NONE`](crate::Demand::NONE) 合法；
//!   而 `request` 的参数必须为正，零需求按协议错误 panic。

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::completion::Completion;
use crate::demand::Demand;

/// 订阅：订阅者持有的上游能力句柄。
///
/// # 契约说明（What）
/// - `request(d)`：累加需求 `d`，`d` 必须为正（零需求触发
///   `demand.zero_request` panic）；
/// - `cancel()`：幂等拆除，上游资源释放，下游不会收到任何终结信号；
/// - `cancel` 先行发生（happens-before）于其后任何 `request` 被上游观察到。
pub trait Subscription: Send + Sync {
    /// 向上游追加正需求。
    fn request(&self, demand: Demand);

    /// 幂等取消；静默拆除，不产生下游信号。
    fn cancel(&self);
}

/// 共享订阅句柄：跨边传递的对象安全形态。
///
/// 直通类算子把收到的句柄原样转发给下游（转发身份可用 `Arc::ptr_eq` 观测）。
pub type SharedSubscription = Arc<dyn Subscription + 'static>;

/// 订阅者：下游消费端的能力集合。
pub trait Subscriber: Send + Sync {
    /// 接收的值类型。
    type Input;
    /// 接收的错误类型。
    type Failure;

    /// 接收上游订阅；每个订阅者至多尊重一次，多余的订阅应被立即取消。
    fn receive_subscription(&self, subscription: SharedSubscription);

    /// 接收一个值，返回本次投递之外追加的需求增量。
    fn receive_value(&self, value: Self::Input) -> Demand;

    /// 接收终结信号；至多一次，此后订阅者进入终态。
    fn receive_completion(&self, completion: Completion<Self::Failure>);
}

/// 发布者：装配层的惰性描述符，`subscribe` 时物化为阶段链。
///
/// # 契约说明（What）
/// - `subscribe` 可被调用多次，每次物化一条独立的阶段链（描述符不携带运行态）；
/// - 值与错误类型在边界处静态匹配。
pub trait Publisher {
    /// 产出的值类型。
    type Output;
    /// 产出的错误类型。
    type Failure;

    /// 挂接订阅者，物化运行时阶段。
    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = Self::Output, Failure = Self::Failure> + 'static;
}

impl<T> Subscriber for Arc<T>
where
    T: Subscriber + ?Sized,
{
    type Input = T::Input;
    type Failure = T::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        (**self).receive_subscription(subscription);
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        (**self).receive_value(value)
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        (**self).receive_completion(completion);
    }
}

impl<T> Subscriber for Box<T>
where
    T: Subscriber + ?Sized,
{
    type Input = T::Input;
    type Failure = T::Failure;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        (**self).receive_subscription(subscription);
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        (**self).receive_value(value)
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        (**self).receive_completion(completion);
    }
}

impl<P> Publisher for Arc<P>
where
    P: Publisher + ?Sized,
{
    type Output = P::Output;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = Self::Output, Failure = Self::Failure> + 'static,
    {
        (**self).subscribe(subscriber);
    }
}
