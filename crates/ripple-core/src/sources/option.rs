//! `from_optional`：有值则如 `just`，无值则立即正常结束。

use alloc::sync::Arc;
use core::convert::Infallible;

use crate::completion::Completion;
use crate::contract::{Publisher, Subscriber};
use crate::sources::{NoopSubscription, ScalarSubscription};

/// 可选值源描述符。
#[derive(Clone, Debug)]
pub struct OptionalPublisher<T> {
    value: Option<T>,
}

/// 构造可选值源。
pub fn from_optional<T>(value: Option<T>) -> OptionalPublisher<T>
where
    T: Clone + Send + 'static,
{
    OptionalPublisher { value }
}

impl<T> Publisher for OptionalPublisher<T>
where
    T: Clone + Send + 'static,
{
    type Output = T;
    type Failure = Infallible;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = T, Failure = Infallible> + 'static,
    {
        match &self.value {
            Some(value) => ScalarSubscription::attach(value.clone(), subscriber),
            None => {
                // 无值：空操作订阅 + 立即正常结束。
                subscriber.receive_subscription(Arc::new(NoopSubscription));
                subscriber.receive_completion(Completion::Finished);
            }
        }
    }
}
