//! 终结信号（Completion）：流生命周期的唯一收尾事件。
//!
//! # 模块定位（Why）
//! - 每条流最多向下游投递一次终结信号：要么正常结束（`Finished`），
//!   要么携带类型化错误失败（`Failed`）。之后的一切信号都必须被忽略。
//! - 错误类型 `E` 静态绑定在流水线两端；`try-*` 系算子会把它拓宽为
//!   [`BoxError`](crate::error::BoxError)，恢复类算子（catch/retry/replace-error）则消耗它。

use core::fmt;

/// 流的终结信号。
///
/// # 契约说明（What）
/// - `Finished`：上游再无值可投递，正常收尾；
/// - `Failed(e)`：流因错误终止，`e` 沿流水线向下游传播（除非被恢复类算子拦截）；
/// - 同一阶段对下游至多投递一次终结信号，取消不会产生终结信号。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Completion<E> {
    /// 正常结束。
    Finished,
    /// 携带错误的失败结束。
    Failed(E),
}

impl<E> Completion<E> {
    /// 是否为失败终结。
    pub const fn is_failure(&self) -> bool {
        matches!(self, Completion::Failed(_))
    }

    /// 借用失败错误（若有）。
    pub const fn failure(&self) -> Option<&E> {
        match self {
            Completion::Finished => None,
            Completion::Failed(error) => Some(error),
        }
    }

    /// 映射失败错误类型，`Finished` 原样保留。
    ///
    /// # 契约说明（What）
    /// - 供 `map_error` 与各 `try-*` 算子在边界处完成错误类型拓宽/变换；
    /// - 映射闭包仅在 `Failed` 分支执行一次。
    pub fn map_failure<E2, F>(self, f: F) -> Completion<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Completion::Finished => Completion::Finished,
            Completion::Failed(error) => Completion::Failed(f(error)),
        }
    }
}

impl<E: fmt::Display> fmt::Display for Completion<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Finished => f.write_str("finished"),
            Completion::Failed(error) => write!(f, "failed: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 验证：`map_failure` 仅变换失败分支。
    #[test]
    fn map_failure_only_touches_the_failed_arm() {
        let finished: Completion<u8> = Completion::Finished;
        assert_eq!(finished.map_failure(|e| e as u16), Completion::Finished);

        let failed: Completion<u8> = Completion::Failed(7);
        assert_eq!(failed.map_failure(u16::from), Completion::Failed(7u16));
    }
}
