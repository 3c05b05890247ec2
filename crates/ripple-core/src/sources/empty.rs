//! `empty` / `never`：不发值的源，是否立即结束由构造参数决定。

use alloc::sync::Arc;
use core::convert::Infallible;
use core::marker::PhantomData;

use crate::completion::Completion;
use crate::contract::{Publisher, Subscriber};
use crate::sources::NoopSubscription;

/// 空源描述符。
///
/// # 契约说明（What）
/// - 任何订阅者都先收到空操作订阅句柄；
/// - `complete_immediately = true` 时随即投递 `Finished`，否则永不终结；
/// - 类型参数只用于边界对齐，运行期不携带任何值。
pub struct Empty<T> {
    complete_immediately: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Empty<T> {
    /// 构造空源；`complete_immediately` 控制是否立即正常结束。
    pub const fn new(complete_immediately: bool) -> Self {
        Empty {
            complete_immediately,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for Empty<T> {
    fn clone(&self) -> Self {
        Empty::new(self.complete_immediately)
    }
}

/// 立即结束的空源。
pub fn empty<T>() -> Empty<T> {
    Empty::new(true)
}

/// 永不发声的源。
pub fn never<T>() -> Empty<T> {
    Empty::new(false)
}

impl<T> Publisher for Empty<T> {
    type Output = T;
    type Failure = Infallible;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = T, Failure = Infallible> + 'static,
    {
        subscriber.receive_subscription(Arc::new(NoopSubscription));
        if self.complete_immediately {
            subscriber.receive_completion(Completion::Finished);
        }
    }
}
