#![cfg_attr(not(feature = "std"), no_std)]
#![doc = "ripple-core: 拉取式、需求驱动的响应式流核心运行时。"]
#![doc = ""]
#![doc = "== 两层模型 =="]
#![doc = "装配层是惰性求值的发布者描述符树：描述符只携带配置（闭包、阈值、调度器）与对上游描述符的引用，不携带任何运行态。"]
#![doc = "运行层在终端订阅者挂接时出现：每个描述符物化一个阶段节点，恰好绑定一个下游订阅者，握手后恰好持有一个上游订阅。"]
#![doc = "信号沿下游方向流动（订阅握手、值、终结）；需求与取消沿上游方向流动。"]
#![doc = ""]
#![doc = "== 内存分配依赖 =="]
#![doc = "`ripple-core` 定位于 `no_std + alloc` 场景：阶段图依赖 [`alloc`] 中的 `Box`、`Arc`、`Vec` 支撑对象安全的订阅句柄与缓冲。"]
#![doc = "纯 `no_std`（无分配器）环境暂不支持。"]
#![doc = ""]
#![doc = "== 并发纪律 =="]
#![doc = "任何阶段都可能被多线程并发进入；每个阶段用自备的自旋锁串行化内部状态，且**绝不**在持锁期间执行用户代码（订阅者回调、用户闭包、调度器闭包、上游 request/cancel）。"]
#![doc = "多路投递的算子以排水旗标独占下游投递权，重入的 request 并入在途循环。"]

extern crate alloc;

pub mod codec;
pub mod completion;
pub mod contract;
pub mod demand;
pub mod error;
pub mod observability;
pub mod operators;
pub mod scheduler;
pub mod sources;

mod stage;

pub use codec::{Decoder, Encoder};
pub use completion::Completion;
pub use contract::{Publisher, SharedSubscription, Subscriber, Subscription};
pub use demand::Demand;
pub use error::{BoxError, codes};
pub use observability::{LogLevel, Logger, NoopLogger, SignalEvent, SignalKind};
pub use operators::{
    BufferingStrategy, EventHooks, PrefetchStrategy, PublisherExt, Share,
};
pub use scheduler::{Cancellable, Scheduler, SchedulerStride, SchedulerTime};
pub use sources::{
    Empty, Just, OptionalPublisher, ResultPublisher, SequencePublisher, empty, from_optional,
    from_result, just, never, sequence,
};
