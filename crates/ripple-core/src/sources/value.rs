//! `just`：恰好发射一个值后正常结束的源。

use core::convert::Infallible;

use crate::contract::{Publisher, Subscriber};
use crate::sources::ScalarSubscription;

/// 单值源描述符。
///
/// # 契约说明（What）
/// - 订阅后先交付订阅句柄；首个正需求到来时投递值并紧随 `Finished`；
/// - 不会失败，错误类型为 [`Infallible`]；
/// - 值按订阅者克隆，描述符可被多次订阅。
#[derive(Clone, Debug)]
pub struct Just<T> {
    value: T,
}

/// 构造单值源。
pub fn just<T>(value: T) -> Just<T>
where
    T: Clone + Send + 'static,
{
    Just { value }
}

impl<T> Publisher for Just<T>
where
    T: Clone + Send + 'static,
{
    type Output = T;
    type Failure = Infallible;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = T, Failure = Infallible> + 'static,
    {
        ScalarSubscription::attach(self.value.clone(), subscriber);
    }
}
