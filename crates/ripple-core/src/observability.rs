//! 可观测性契约：面向宿主注入的结构化信号日志接口。
//!
//! # 模块定位（Why）
//! - 核心运行时运行在 `no_std + alloc` 环境，自身不做任何 I/O；
//!   日志因此是一个**契约**而非依赖：宿主实现 [`Logger`] 并注入
//!   [`log_events`](crate::operators::PublisherExt::log_events) 算子，
//!   由算子把流经的每个协议信号翻译成结构化事件。
//! - 事件字段保持机器可读（信号种类 + 稳定标签 + 可选明细），
//!   宿主可以据此打点、落盘或转发，而核心不对后端做任何假设。

use alloc::borrow::Cow;
use alloc::string::String;
use core::fmt;

/// 日志级别，按严重程度递增。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[non_exhaustive]
pub enum LogLevel {
    /// 协议级细粒度信号。
    Trace,
    /// 调试信息。
    Debug,
    /// 常规运行信息。
    Info,
    /// 潜在问题。
    Warn,
    /// 错误。
    Error,
}

/// 协议信号的种类，覆盖一条边上可观测的全部事件。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum SignalKind {
    /// 订阅握手抵达。
    Subscription,
    /// 值投递。
    Value,
    /// 终结信号。
    Completion,
    /// 下游取消。
    Cancel,
    /// 下游请求需求。
    Request,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SignalKind::Subscription => "subscription",
            SignalKind::Value => "value",
            SignalKind::Completion => "completion",
            SignalKind::Cancel => "cancel",
            SignalKind::Request => "request",
        };
        f.write_str(text)
    }
}

/// 一条结构化信号事件。
///
/// # 契约说明（What）
/// - `label`：调用方为这条边起的稳定标签，建议遵循 `pipeline.stage` 命名；
/// - `kind`：信号种类；
/// - `detail`：可选明细（值的 `Debug` 渲染、需求数等），由产生方保证不含敏感信息。
#[derive(Clone, Debug)]
pub struct SignalEvent {
    /// 边的稳定标签。
    pub label: Cow<'static, str>,
    /// 信号种类。
    pub kind: SignalKind,
    /// 可选明细。
    pub detail: Option<String>,
}

/// 宿主注入的日志后端契约。
pub trait Logger: Send + Sync {
    /// 记录一条信号事件；实现不得阻塞调用线程以外的执行路径。
    fn log(&self, level: LogLevel, event: &SignalEvent);
}

/// 丢弃一切事件的空实现，供默认装配与测试使用。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: LogLevel, _event: &SignalEvent) {}
}
