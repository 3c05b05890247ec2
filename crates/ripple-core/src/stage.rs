//! 阶段生命周期的公共构件：上游状态机与握手去重守卫。
//!
//! # 模块定位（Why）
//! - 几乎所有自插入（self-interposing）算子共享同一套最小生命周期：
//!   `等待订阅 → 已订阅(上游句柄) → 终态`。把这段状态机抽到一处，
//!   让各算子文件专注于自己的值语义。
//! - 直通类算子不持有上游句柄，只需一个原子布尔守卫实现握手去重
//!   （重复到达的订阅被立即取消）。
//!
//! # 并发纪律（What）
//! - [`UpstreamState`] 自身不带锁，持有方必须把它放进自己的状态锁里；
//! - 从状态机中取出的 [`SharedSubscription`] 一律在锁外执行
//!   `cancel`/`request`（先释放、后行动）。

use core::sync::atomic::{AtomicBool, Ordering};

use crate::contract::SharedSubscription;

/// 自插入算子的最小上游生命周期。
#[derive(Default)]
pub(crate) enum UpstreamState {
    /// 尚未收到上游订阅。
    #[default]
    Awaiting,
    /// 握手完成，持有唯一的上游句柄。
    Active(SharedSubscription),
    /// 终态：后续一切信号均为空操作。
    Terminal,
}

impl UpstreamState {
    /// 是否已进入终态。
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self, UpstreamState::Terminal)
    }

    /// 借用活跃的上游句柄（克隆后在锁外使用）。
    pub(crate) fn active(&self) -> Option<SharedSubscription> {
        match self {
            UpstreamState::Active(subscription) => Some(subscription.clone()),
            _ => None,
        }
    }

    /// 尝试接纳一个上游订阅。
    ///
    /// # 契约说明（What）
    /// - 仅在 `Awaiting` 状态接纳并转入 `Active`，返回 `true`；
    /// - 其余状态返回 `false`，调用方必须在锁外取消传入的订阅。
    pub(crate) fn try_adopt(&mut self, subscription: SharedSubscription) -> bool {
        match self {
            UpstreamState::Awaiting => {
                *self = UpstreamState::Active(subscription);
                true
            }
            _ => false,
        }
    }

    /// 转入终态，交出此前持有的上游句柄（若有）。
    ///
    /// 句柄的取消或释放由调用方在锁外完成；订阅的析构可能执行任意用户代码。
    pub(crate) fn terminate(&mut self) -> Option<SharedSubscription> {
        match core::mem::replace(self, UpstreamState::Terminal) {
            UpstreamState::Active(subscription) => Some(subscription),
            _ => None,
        }
    }
}

/// 直通类算子的握手去重守卫（无锁实现）。
pub(crate) struct SubscriptionGuard {
    received: AtomicBool,
}

impl SubscriptionGuard {
    pub(crate) const fn new() -> Self {
        Self {
            received: AtomicBool::new(false),
        }
    }

    /// 首个订阅返回 `true`；此后的订阅返回 `false`，调用方应立即取消它。
    pub(crate) fn accept_first(&self) -> bool {
        !self.received.swap(true, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demand::Demand;

    struct Noop;

    impl crate::contract::Subscription for Noop {
        fn request(&self, _demand: Demand) {}
        fn cancel(&self) {}
    }

    /// 验证：状态机只接纳首个订阅，终态交出句柄一次。
    #[test]
    fn adopt_once_then_terminate_once() {
        let mut state = UpstreamState::default();
        let first: SharedSubscription = alloc::sync::Arc::new(Noop);
        let second: SharedSubscription = alloc::sync::Arc::new(Noop);

        assert!(state.try_adopt(first));
        assert!(!state.try_adopt(second));
        assert!(state.terminate().is_some());
        assert!(state.terminate().is_none());
        assert!(state.is_terminal());
    }

    /// 验证：守卫仅放行首个握手。
    #[test]
    fn guard_accepts_only_the_first_handshake() {
        let guard = SubscriptionGuard::new();
        assert!(guard.accept_first());
        assert!(!guard.accept_first());
    }
}
