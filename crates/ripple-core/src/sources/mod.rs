//! 源阶段：有限 / 可选 / 结果 / 空 / 序列发射器。
//!
//! # 模块定位（Why）
//! - 源是阶段图的叶子：没有上游，只面对下游的需求与取消。
//!   它们是需求算术最直接的试金石——值只在 `request` 之后投递，
//!   终结紧随最后一个值。
//! - 标量三件套（值、可选、结果）共享同一个一次性投递状态机
//!   [`ScalarSubscription`]；序列源则带着完整的重入合并排水循环。
//!
//! # 契约说明（What）
//! - 每次 `subscribe` 物化一条独立的阶段链，源描述符自身无运行态；
//! - 失败形态的源（`from_result` 的 `Err` 分支）先投递空操作订阅，
//!   随即投递 `Failed(e)`，满足“订阅先于一切信号”的握手不变量。

mod empty;
mod option;
mod result;
mod sequence;
mod value;

pub use empty::{Empty, empty, never};
pub use option::{OptionalPublisher, from_optional};
pub use result::{ResultPublisher, from_result};
pub use sequence::{SequencePublisher, sequence};
pub use value::{Just, just};

use alloc::sync::Arc;

use spin::Mutex;

use crate::completion::Completion;
use crate::contract::{SharedSubscription, Subscriber, Subscription};
use crate::demand::Demand;

/// 空操作订阅：无值可供、无资源可释放的源使用。
pub(crate) struct NoopSubscription;

impl Subscription for NoopSubscription {
    fn request(&self, demand: Demand) {
        let _ = demand.expect_nonzero();
    }

    fn cancel(&self) {}
}

/// 一次性标量投递状态机：`just` / `from_optional` / `from_result` 的共用阶段。
///
/// # 契约说明（What）
/// - 首个正需求到达时投递存放的值并紧随 `Finished`；
/// - 取消在投递前到达则值被静默释放；两者的竞争由状态锁仲裁，
///   值的交付与释放都发生在锁外。
pub(crate) struct ScalarSubscription<Down>
where
    Down: Subscriber,
{
    value: Mutex<Option<Down::Input>>,
    downstream: Down,
}

impl<Down> ScalarSubscription<Down>
where
    Down: Subscriber + 'static,
    Down::Input: Send,
{
    /// 物化标量阶段：向下游交付订阅句柄，等待需求。
    pub(crate) fn attach(value: Down::Input, downstream: Down) {
        let stage = Arc::new(ScalarSubscription {
            value: Mutex::new(Some(value)),
            downstream,
        });
        let handle: SharedSubscription = stage.clone();
        stage.downstream.receive_subscription(handle);
    }
}

impl<Down> Subscription for ScalarSubscription<Down>
where
    Down: Subscriber,
    Down::Input: Send,
{
    fn request(&self, demand: Demand) {
        let _ = demand.expect_nonzero();
        let taken = self.value.lock().take();
        if let Some(value) = taken {
            let _ = self.downstream.receive_value(value);
            self.downstream.receive_completion(Completion::Finished);
        }
    }

    fn cancel(&self) {
        self.value.lock().take();
    }
}
