//! 编解码契约：`encode`/`decode` 算子消费的外部协作者接口。
//!
//! # 模块定位（Why）
//! - 核心不绑定任何序列化格式；具体格式（JSON、二进制等）由宿主实现
//!   本模块的两个 trait 并注入算子。失败以不透明错误
//!   [`BoxError`](crate::error::BoxError) 表达，沿流水线作 `Failed(e)` 传播。
//! - 与运行时其余契约一致，接口保持 `no_std + alloc` 可用，
//!   输入输出类型由实现者静态声明。

use crate::error::BoxError;

/// 把值编码为外部表示（如字节序列）。
///
/// # 契约说明（What）
/// - `Output` 为编码产物类型，常见为 `Vec<u8>`；
/// - 编码失败返回不透明错误，由 `encode` 算子转为下游的失败终结并取消上游。
pub trait Encoder<T>: Send + Sync {
    /// 编码产物类型。
    type Output;

    /// 编码一个值。
    fn encode(&self, value: &T) -> Result<Self::Output, BoxError>;
}

/// 从外部表示解码出值。
///
/// # 契约说明（What）
/// - `Input` 为待解码的外部表示类型；
/// - 解码失败返回不透明错误，由 `decode` 算子转为下游的失败终结并取消上游。
pub trait Decoder<T>: Send + Sync {
    /// 待解码的外部表示类型。
    type Input;

    /// 解码一个值。
    fn decode(&self, input: &Self::Input) -> Result<T, BoxError>;
}
