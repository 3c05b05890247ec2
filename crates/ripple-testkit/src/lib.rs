//! ripple-testkit：`ripple-core` 契约测试的仪表箱。
//!
//! # 模块定位（Why）
//! - 核心运行时的测试需要三类仪表：可手动推进的虚拟时间
//!   （[`VirtualScheduler`]）、记录协议信号并核对握手不变量的订阅者探针
//!   （[`TestSubscriber`]）、以及允许测试脚本任意注入信号（包括协议违规
//!   信号）的发布者探针（[`ManualPublisher`]）。
//! - 编解码算子另配一个 `serde_json` 后端的 [`JsonCodec`]，
//!   覆盖 `encode`/`decode` 的成败两路。
//!
//! # 使用指引（How）
//! - 虚拟调度器的 `schedule` 内联立即执行（对齐"下一个机会"的最紧实现）；
//!   `schedule_after` 过期即内联、未到期入队，由 `advance` 按
//!   `(时刻, 登记序)` 稳定次序触发；
//! - 订阅者探针不会 panic：协议违规被记录在 `violations()` 中，
//!   由测试断言为空。

mod codec;
mod publisher;
mod scheduler;
mod subscriber;

pub use codec::JsonCodec;
pub use publisher::ManualPublisher;
pub use scheduler::{VirtualScheduler, VirtualStride, VirtualTime};
pub use subscriber::{Record, TestSubscriber};
