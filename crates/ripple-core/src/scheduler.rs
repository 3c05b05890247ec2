//! 调度器契约：时间类算子消费（而不实现）的最小时间接口。
//!
//! # 模块定位（Why）
//! - `debounce`/`throttle` 等算子依赖“当前时间 + 延迟执行”，若直接触碰系统时钟，
//!   测试将无法复现；通过 trait 注入调度器，生产环境挂接真实时间驱动，
//!   测试环境使用可手动推进的虚拟实现（见 `ripple-testkit::VirtualScheduler`）。
//! - 即时执行（`schedule`）与单次延迟（`schedule_after`）不提供取消句柄：
//!   需要“逻辑取消”的算子（如 debounce）以单调代数检查在触发时判定动作是否过期；
//!   只有重复调度返回 [`Cancellable`] 句柄。
//!
//! # 契约说明（What）
//! - [`SchedulerTime`] 是可步进的时刻，全序可比较；
//! - [`SchedulerStride`] 是时间间隔，可由秒/毫秒/微秒/纳秒（整数与浮点）构造；
//! - `schedule` 在“下一个机会”执行动作：虚拟调度器可以内联立即执行，
//!   真实调度器可以投递到运行循环，两者都满足契约；
//! - 实现者必须保证 `now` 单调不减。

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::ops::Add;

/// 可取消句柄：停止一项重复调度的后续触发。
pub trait Cancellable: Send + Sync {
    /// 幂等取消。
    fn cancel(&self);
}

/// 时间间隔：可由常用时间单位构造、可相加、全序可比较。
pub trait SchedulerStride:
    Clone + Copy + PartialEq + Eq + PartialOrd + Ord + Add<Output = Self> + Send + Sync + 'static
{
    /// 整数秒。
    fn seconds(value: u64) -> Self;

    /// 浮点秒（就近取整到实现精度）。
    fn seconds_f64(value: f64) -> Self;

    /// 毫秒。
    fn milliseconds(value: u64) -> Self;

    /// 微秒。
    fn microseconds(value: u64) -> Self;

    /// 纳秒。
    fn nanoseconds(value: u64) -> Self;
}

/// 可步进时刻。
pub trait SchedulerTime: Clone + PartialEq + Eq + PartialOrd + Ord + Send + Sync + 'static {
    /// 对应的间隔类型。
    type Stride: SchedulerStride;

    /// 返回前进 `stride` 后的时刻（实现可饱和，不得回绕）。
    fn advanced_by(&self, stride: Self::Stride) -> Self;
}

/// 调度器契约。
///
/// # 风险提示（Trade-offs）
/// - 动作闭包可能执行任意用户代码；调用 `schedule*` 的阶段必须已经释放自身状态锁；
/// - `Options` 由实现自定（如 QoS 标记），算子只负责透传。
pub trait Scheduler: Send + Sync + 'static {
    /// 时刻类型。
    type Time: SchedulerTime;
    /// 实现自定的调度选项。
    type Options: Clone + Send + Sync + 'static;

    /// 当前时刻。
    fn now(&self) -> Self::Time;

    /// 最小有意义容差。
    fn minimum_tolerance(&self) -> <Self::Time as SchedulerTime>::Stride;

    /// 在下一个机会执行动作；无取消句柄。
    fn schedule(&self, action: Box<dyn FnOnce() + Send + 'static>);

    /// 在指定时刻单次执行动作；无取消句柄。
    fn schedule_after(
        &self,
        after: Self::Time,
        tolerance: <Self::Time as SchedulerTime>::Stride,
        options: Option<Self::Options>,
        action: Box<dyn FnOnce() + Send + 'static>,
    );

    /// 自指定时刻起按间隔重复执行动作，返回可停止后续触发的句柄。
    fn schedule_repeating(
        &self,
        after: Self::Time,
        interval: <Self::Time as SchedulerTime>::Stride,
        tolerance: <Self::Time as SchedulerTime>::Stride,
        options: Option<Self::Options>,
        action: Arc<dyn Fn() + Send + Sync + 'static>,
    ) -> Arc<dyn Cancellable>;
}
