//! 错误域与协议诊断：不透明拓宽错误 + 稳定错误码。
//!
//! # 模块定位（Why）
//! - 流水线的错误类型 `E` 是调用方自定的静态类型；`try-*` 系算子运行用户闭包，
//!   闭包可能抛出任意错误，因此在这些边界上统一拓宽为对象安全的 [`BoxError`]。
//! - 协议违规（重复握手、握手前终结、零需求请求）是编程错误而非运行期错误，
//!   必须立刻以携带稳定错误码与调用位置的 panic 终止，便于机器可读的根因识别。
//!
//! # 契约说明（What）
//! - [`BoxError`] 满足 `Send + Sync + 'static`，可跨线程传播并参与错误链；
//! - [`codes`] 中的错误码一经发布即保持稳定，遵循 `namespace.reason` 命名；
//! - [`protocol_violation`] 永不返回，panic 信息形如 `[code] 说明`。

use alloc::boxed::Box;

/// 不透明错误：`try-*` 算子与编解码边界的统一拓宽形态。
pub type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

/// 稳定错误码清单。
///
/// # 契约说明（What）
/// - 错误码是机器可读契约的一部分：测试与上层诊断按字符串匹配，禁止改写既有取值。
pub mod codes {
    /// 以零需求调用 `request`。
    pub const ZERO_DEMAND: &str = "demand.zero_request";
    /// 同一阶段收到第二次上游订阅（多余订阅会被立即取消，仅诊断用）。
    pub const DUPLICATE_SUBSCRIPTION: &str = "protocol.duplicate_subscription";
    /// 在订阅握手完成前收到终结信号。
    pub const COMPLETION_BEFORE_SUBSCRIPTION: &str = "protocol.completion_before_subscription";
    /// 在订阅握手完成前收到 `request`。
    pub const REQUEST_BEFORE_SUBSCRIPTION: &str = "protocol.request_before_subscription";
    /// `assert_no_failure` 观察到失败终结。
    pub const UNEXPECTED_FAILURE: &str = "protocol.unexpected_failure";
}

/// 以稳定错误码终止进程的协议违规出口。
///
/// # 契约说明（What）
/// - **前置条件**：仅用于协议层面的编程错误，运行期可恢复错误一律走 `Completion::Failed`；
/// - **后置条件**：永不返回；panic 信息携带错误码与调用点（`#[track_caller]`）。
#[track_caller]
pub(crate) fn protocol_violation(code: &'static str, detail: &str) -> ! {
    panic!("[{code}] {detail}");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 验证：协议违规 panic 携带稳定错误码前缀。
    #[test]
    #[should_panic(expected = "[protocol.completion_before_subscription]")]
    fn violation_message_carries_the_stable_code() {
        protocol_violation(codes::COMPLETION_BEFORE_SUBSCRIPTION, "握手前收到终结信号");
    }
}
