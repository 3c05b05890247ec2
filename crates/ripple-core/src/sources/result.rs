//! `from_result`：成功分支如 `just`，失败分支立即投递失败终结。

use alloc::sync::Arc;

use crate::completion::Completion;
use crate::contract::{Publisher, Subscriber};
use crate::sources::{NoopSubscription, ScalarSubscription};

/// 结果源描述符。
///
/// # 契约说明（What）
/// - `Ok(v)`：订阅句柄 → 首个正需求时投递 `v` + `Finished`；
/// - `Err(e)`：先交付空操作订阅（握手不变量），随即投递 `Failed(e)`，
///   失败不等待需求——终结信号不受需求记账约束。
#[derive(Clone, Debug)]
pub struct ResultPublisher<T, E> {
    result: Result<T, E>,
}

/// 构造结果源。
pub fn from_result<T, E>(result: Result<T, E>) -> ResultPublisher<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    ResultPublisher { result }
}

impl<T, E> Publisher for ResultPublisher<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = T;
    type Failure = E;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = T, Failure = E> + 'static,
    {
        match &self.result {
            Ok(value) => ScalarSubscription::attach(value.clone(), subscriber),
            Err(error) => {
                subscriber.receive_subscription(Arc::new(NoopSubscription));
                subscriber.receive_completion(Completion::Failed(error.clone()));
            }
        }
    }
}
