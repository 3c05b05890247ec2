//! `encode` / `decode`：把编解码契约挂进流水线的自插入算子。
//!
//! # 设计背景（Why）
//! - 编解码失败与用户闭包失败同构：终止流、取消上游、下发 `Failed(e)`。
//!   因此两个算子直接复用 [`FallibleStage`](super::fallible) 的生命周期，
//!   只注入“调用编码器/解码器”这一步值语义。

use alloc::sync::Arc;

use crate::codec::{Decoder, Encoder};
use crate::contract::{Publisher, Subscriber};
use crate::error::BoxError;
use crate::operators::fallible::{FallibleStage, FallibleTransform};

/// 编码描述符：逐值调用 [`Encoder::encode`]。
pub struct Encode<P, C> {
    upstream: P,
    encoder: Arc<C>,
}

impl<P, C> Encode<P, C> {
    pub(crate) fn new(upstream: P, encoder: C) -> Self {
        Encode {
            upstream,
            encoder: Arc::new(encoder),
        }
    }
}

impl<P: Clone, C> Clone for Encode<P, C> {
    fn clone(&self) -> Self {
        Encode {
            upstream: self.upstream.clone(),
            encoder: Arc::clone(&self.encoder),
        }
    }
}

struct EncodeTransform<C, T> {
    encoder: Arc<C>,
    _marker: core::marker::PhantomData<fn(T)>,
}

impl<T, C> FallibleTransform for EncodeTransform<C, T>
where
    C: Encoder<T>,
{
    type In = T;
    type Out = C::Output;

    fn apply(&self, value: T) -> Result<Option<C::Output>, BoxError> {
        self.encoder.encode(&value).map(Some)
    }
}

impl<P, C> Publisher for Encode<P, C>
where
    P: Publisher,
    P::Output: 'static,
    P::Failure: Into<BoxError> + 'static,
    C: Encoder<P::Output> + 'static,
    C::Output: 'static,
{
    type Output = C::Output;
    type Failure = BoxError;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = C::Output, Failure = BoxError> + 'static,
    {
        FallibleStage::attach(
            &self.upstream,
            subscriber,
            EncodeTransform {
                encoder: Arc::clone(&self.encoder),
                _marker: core::marker::PhantomData,
            },
        );
    }
}

/// 解码描述符：逐值调用 [`Decoder::decode`]。
pub struct Decode<P, C, T> {
    upstream: P,
    decoder: Arc<C>,
    _marker: core::marker::PhantomData<fn() -> T>,
}

impl<P, C, T> Decode<P, C, T> {
    pub(crate) fn new(upstream: P, decoder: C) -> Self {
        Decode {
            upstream,
            decoder: Arc::new(decoder),
            _marker: core::marker::PhantomData,
        }
    }
}

impl<P: Clone, C, T> Clone for Decode<P, C, T> {
    fn clone(&self) -> Self {
        Decode {
            upstream: self.upstream.clone(),
            decoder: Arc::clone(&self.decoder),
            _marker: core::marker::PhantomData,
        }
    }
}

struct DecodeTransform<C, T> {
    decoder: Arc<C>,
    _marker: core::marker::PhantomData<fn() -> T>,
}

impl<C, T> FallibleTransform for DecodeTransform<C, T>
where
    C: Decoder<T>,
    T: Send,
{
    type In = C::Input;
    type Out = T;

    fn apply(&self, value: C::Input) -> Result<Option<T>, BoxError> {
        self.decoder.decode(&value).map(Some)
    }
}

impl<P, C, T> Publisher for Decode<P, C, T>
where
    P: Publisher,
    P::Output: 'static,
    P::Failure: Into<BoxError> + 'static,
    C: Decoder<T, Input = P::Output> + 'static,
    T: Send + 'static,
{
    type Output = T;
    type Failure = BoxError;

    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Input = T, Failure = BoxError> + 'static,
    {
        FallibleStage::attach(
            &self.upstream,
            subscriber,
            DecodeTransform {
                decoder: Arc::clone(&self.decoder),
                _marker: core::marker::PhantomData,
            },
        );
    }
}
