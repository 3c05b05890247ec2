//! `assert_no_failure`：断言流不会失败的直通算子。
//!
//! # 契约说明（What）
//! - 值原样直通，订阅句柄原样转发；
//! - 观察到 `Failed(e)` 即视为编程错误，以稳定错误码
//!   [`codes::UNEXPECTED_FAILURE`](crate::error::codes::UNEXPECTED_FAILURE)
//!   携带调用位置终止进程；
//! - 因此对下游而言错误类型收窄为 [`Infallible`](core::convert::Infallible)。

use alloc::format;
use alloc::sync::Arc;
use core::convert::Infallible;
use core::fmt::Debug;
use core::marker::PhantomData;

use crate::completion::Completion;
use crate::contract::{Publisher, SharedSubscription, Subscriber};
use crate::demand::Demand;
use crate::error::{codes, protocol_violation};
use crate::stage::SubscriptionGuard;

/// 无失败断言描述符。
#[derive(Clone)]
pub struct AssertNoFailure<P> {
    upstream: P,
}

impl<P> AssertNoFailure<P> {
    pub(crate) fn new(upstream: P) -> Self {
        AssertNoFailure { upstream }
    }
}

impl<P> Publisher for AssertNoFailure<P>
where
    P: Publisher,
    P::Failure: Debug + 'static,
{
    type Output = P::Output;
    type Failure = Infallible;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = P::Output, Failure = Infallible> + 'static,
    {
        self.upstream.subscribe(Arc::new(AssertNoFailureStage {
            guard: SubscriptionGuard::new(),
            downstream: subscriber,
            _marker: PhantomData,
        }));
    }
}

struct AssertNoFailureStage<EUp, Down> {
    guard: SubscriptionGuard,
    downstream: Down,
    _marker: PhantomData<fn(EUp)>,
}

impl<EUp, Down> Subscriber for AssertNoFailureStage<EUp, Down>
where
    EUp: Debug,
    Down: Subscriber<Failure = Infallible>,
{
    type Input = Down::Input;
    type Failure = EUp;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        if self.guard.accept_first() {
            self.downstream.receive_subscription(subscription);
        } else {
            subscription.cancel();
        }
    }

    fn receive_value(&self, value: Self::Input) -> Demand {
        self.downstream.receive_value(value)
    }

    fn receive_completion(&self, completion: Completion<EUp>) {
        match completion {
            Completion::Finished => self.downstream.receive_completion(Completion::Finished),
            Completion::Failed(error) => protocol_violation(
                codes::UNEXPECTED_FAILURE,
                &format!("断言无失败的流收到失败终结: {error:?}"),
            ),
        }
    }
}
