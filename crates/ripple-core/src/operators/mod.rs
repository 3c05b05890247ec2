//! 算子命名空间：装配层组合子与各算子描述符。
//!
//! # 模块定位（Why）
//! - 每个文件承载一族语义相近的算子状态机；本文件收拢导出面，
//!   并以 [`PublisherExt`] 扩展 trait 提供链式组合子（生态中
//!   `Iterator`/`StreamExt` 式的惯用法）。
//! - 组合子只做装配（构造描述符、闭包适配、错误拓宽包装），
//!   一切运行态都在 `subscribe` 时物化。
//!
//! # 结构说明（What）
//! - 直通族：`map` / `filter` / `scan` / `events` / `assert`；
//! - 自插入族：`fallible`（try-*）、`reduce`（折叠终结）、
//!   `replace_error`、`collect_count`、`codec`；
//! - 换血族：`catch`、`concatenate`、`retry`；
//! - 嵌套族：`switch_latest`、`flat_map`；
//! - 扇入族：`zip`；
//! - 时间族：`debounce`、`throttle`、`buffer`；
//! - 扇出包装：`multicast`。

mod assert;
mod buffer;
mod catch;
mod codec;
mod collect_count;
mod concatenate;
mod debounce;
mod events;
mod fallible;
mod filter;
mod flat_map;
mod map;
mod multicast;
mod reduce;
mod replace_error;
mod retry;
mod scan;
mod switch_latest;
mod throttle;
mod zip;

pub use assert::AssertNoFailure;
pub use buffer::{Buffer, BufferingStrategy, PrefetchStrategy};
pub use catch::{Catch, TryCatch};
pub use codec::{Decode, Encode};
pub use collect_count::CollectByCount;
pub use concatenate::Concatenate;
pub use debounce::Debounce;
pub use events::{EventHooks, HandleEvents, LogEvents};
pub use fallible::{TryFilter, TryMap, TryScan};
pub use filter::{CompactMap, Filter, RemoveDuplicates};
pub use flat_map::FlatMap;
pub use map::{Map, MapError};
pub use multicast::Share;
pub use reduce::{
    Count, FirstWhere, IgnoreOutput, Last, LastWhere, Reduce, TryLastWhere, TryReduce,
};
pub use replace_error::ReplaceError;
pub use retry::Retry;
pub use scan::Scan;
pub use switch_latest::SwitchToLatest;
pub use throttle::Throttle;
pub use zip::{Zip, Zip3, Zip4};

use alloc::borrow::Cow;
use alloc::sync::Arc;

use crate::contract::Publisher;
use crate::demand::Demand;
use crate::error::BoxError;
use crate::observability::Logger;
use crate::scheduler::{Scheduler, SchedulerTime};

/// 链式组合子：对任意发布者开放的装配接口。
///
/// # 使用指引（How）
/// - 组合子按值消费上游描述符并返回新描述符，`subscribe` 前不产生运行态；
/// - 可失败变体（`try_*`）接受返回 `Result<_, E>` 的闭包，
///   `E` 在此处统一拓宽为 [`BoxError`]。
pub trait PublisherExt: Publisher + Sized {
    /// 逐值变换。
    fn map<T, F>(self, transform: F) -> Map<Self, F>
    where
        F: Fn(Self::Output) -> T + Send + Sync + 'static,
    {
        Map::new(self, transform)
    }

    /// 双投影：把一个值投影成二元组（键路径式多投影的闭包形态）。
    fn map2<A, B, F1, F2>(
        self,
        first: F1,
        second: F2,
    ) -> Map<Self, impl Fn(Self::Output) -> (A, B) + Send + Sync + 'static>
    where
        F1: Fn(&Self::Output) -> A + Send + Sync + 'static,
        F2: Fn(&Self::Output) -> B + Send + Sync + 'static,
    {
        Map::new(self, move |value| (first(&value), second(&value)))
    }

    /// 三投影：把一个值投影成三元组。
    fn map3<A, B, C, F1, F2, F3>(
        self,
        first: F1,
        second: F2,
        third: F3,
    ) -> Map<Self, impl Fn(Self::Output) -> (A, B, C) + Send + Sync + 'static>
    where
        F1: Fn(&Self::Output) -> A + Send + Sync + 'static,
        F2: Fn(&Self::Output) -> B + Send + Sync + 'static,
        F3: Fn(&Self::Output) -> C + Send + Sync + 'static,
    {
        Map::new(self, move |value| {
            (first(&value), second(&value), third(&value))
        })
    }

    /// 错误变换：值原样直通。
    fn map_error<E2, G>(self, transform: G) -> MapError<Self, G>
    where
        G: Fn(Self::Failure) -> E2 + Send + Sync + 'static,
    {
        MapError::new(self, transform)
    }

    /// 谓词过滤；拒绝的值会向上游补拉。
    fn filter<F>(self, predicate: F) -> Filter<Self, F>
    where
        F: Fn(&Self::Output) -> bool + Send + Sync + 'static,
    {
        Filter::new(self, predicate)
    }

    /// 投影-过滤一体：投影为 `None` 即拒绝。
    fn compact_map<T, F>(self, projection: F) -> CompactMap<Self, F>
    where
        F: Fn(Self::Output) -> Option<T> + Send + Sync + 'static,
    {
        CompactMap::new(self, projection)
    }

    /// 相邻去重（按谓词判定重复）。
    fn remove_duplicates_by<F>(self, is_duplicate: F) -> RemoveDuplicates<Self, F>
    where
        F: Fn(&Self::Output, &Self::Output) -> bool + Send + Sync + 'static,
    {
        RemoveDuplicates::new(self, is_duplicate)
    }

    /// 带种子的逐值折叠，每步投递累加值。
    fn scan<A, F>(self, seed: A, accumulate: F) -> Scan<Self, A, F>
    where
        A: Clone + Send + 'static,
        F: Fn(A, Self::Output) -> A + Send + Sync + 'static,
    {
        Scan::new(self, seed, accumulate)
    }

    /// 信号观察回调。
    fn handle_events(self, hooks: EventHooks<Self::Output, Self::Failure>) -> HandleEvents<Self> {
        HandleEvents::new(self, hooks)
    }

    /// 把每个协议信号交给日志契约。
    fn log_events(
        self,
        label: impl Into<Cow<'static, str>>,
        logger: Arc<dyn Logger>,
    ) -> LogEvents<Self> {
        LogEvents::new(self, label, logger)
    }

    /// 断言流不会失败；失败即进程级诊断终止。
    fn assert_no_failure(self) -> AssertNoFailure<Self> {
        AssertNoFailure::new(self)
    }

    /// 可失败逐值变换；闭包错误拓宽为 [`BoxError`]。
    fn try_map<T, E2, F>(
        self,
        transform: F,
    ) -> TryMap<Self, impl Fn(Self::Output) -> Result<T, BoxError> + Send + Sync + 'static>
    where
        F: Fn(Self::Output) -> Result<T, E2> + Send + Sync + 'static,
        E2: Into<BoxError>,
    {
        TryMap::new(self, move |value| transform(value).map_err(Into::into))
    }

    /// 可失败谓词过滤。
    fn try_filter<E2, F>(
        self,
        predicate: F,
    ) -> TryFilter<Self, impl Fn(&Self::Output) -> Result<bool, BoxError> + Send + Sync + 'static>
    where
        F: Fn(&Self::Output) -> Result<bool, E2> + Send + Sync + 'static,
        E2: Into<BoxError>,
    {
        TryFilter::new(self, move |value: &Self::Output| {
            predicate(value).map_err(Into::into)
        })
    }

    /// 可失败折叠。
    fn try_scan<A, E2, F>(
        self,
        seed: A,
        accumulate: F,
    ) -> TryScan<Self, A, impl Fn(A, Self::Output) -> Result<A, BoxError> + Send + Sync + 'static>
    where
        A: Clone + Send + 'static,
        F: Fn(A, Self::Output) -> Result<A, E2> + Send + Sync + 'static,
        E2: Into<BoxError>,
    {
        TryScan::new(self, seed, move |acc, value| {
            accumulate(acc, value).map_err(Into::into)
        })
    }

    /// 失败替换为收尾值。
    fn replace_error(self, replacement: Self::Output) -> ReplaceError<Self> {
        ReplaceError::new(self, replacement)
    }

    /// 失败后对同一上游重试至多 `attempts` 次。
    fn retry(self, attempts: u64) -> Retry<Self> {
        Retry::new(self, Some(attempts))
    }

    /// 失败后无限重试。
    fn retry_forever(self) -> Retry<Self> {
        Retry::new(self, None)
    }

    /// 按固定批量聚集。
    fn collect_by_count(self, count: usize) -> CollectByCount<Self> {
        CollectByCount::new(self, count)
    }

    /// 逐值编码。
    fn encode<C>(self, encoder: C) -> Encode<Self, C>
    where
        C: crate::codec::Encoder<Self::Output>,
    {
        Encode::new(self, encoder)
    }

    /// 逐值解码。
    fn decode<T, C>(self, decoder: C) -> Decode<Self, C, T>
    where
        C: crate::codec::Decoder<T, Input = Self::Output>,
    {
        Decode::new(self, decoder)
    }

    /// 上游结束时投递最后一个值。
    fn last(self) -> Last<Self> {
        Last::new(self)
    }

    /// 上游结束时投递最后一个命中谓词的值。
    fn last_where<F>(self, predicate: F) -> LastWhere<Self, F>
    where
        F: Fn(&Self::Output) -> bool + Send + Sync + 'static,
    {
        LastWhere::new(self, predicate)
    }

    /// 可失败谓词的最后值。
    fn try_last_where<E2, F>(
        self,
        predicate: F,
    ) -> TryLastWhere<Self, impl Fn(&Self::Output) -> Result<bool, BoxError> + Send + Sync + 'static>
    where
        F: Fn(&Self::Output) -> Result<bool, E2> + Send + Sync + 'static,
        E2: Into<BoxError>,
    {
        TryLastWhere::new(self, move |value: &Self::Output| {
            predicate(value).map_err(Into::into)
        })
    }

    /// 首个值：命中即取消上游。
    fn first(self) -> FirstWhere<Self, fn(&Self::Output) -> bool> {
        FirstWhere::new(self, |_| true)
    }

    /// 首个命中谓词的值。
    fn first_where<F>(self, predicate: F) -> FirstWhere<Self, F>
    where
        F: Fn(&Self::Output) -> bool + Send + Sync + 'static,
    {
        FirstWhere::new(self, predicate)
    }

    /// 折叠归约：上游结束时投递最终累加值。
    fn reduce<A, F>(self, seed: A, accumulate: F) -> Reduce<Self, A, F>
    where
        A: Clone + Send + 'static,
        F: Fn(A, Self::Output) -> A + Send + Sync + 'static,
    {
        Reduce::new(self, seed, accumulate)
    }

    /// 可失败折叠归约。
    fn try_reduce<A, E2, F>(
        self,
        seed: A,
        accumulate: F,
    ) -> TryReduce<Self, A, impl Fn(A, Self::Output) -> Result<A, BoxError> + Send + Sync + 'static>
    where
        A: Clone + Send + 'static,
        F: Fn(A, Self::Output) -> Result<A, E2> + Send + Sync + 'static,
        E2: Into<BoxError>,
    {
        TryReduce::new(self, seed, move |acc, value| {
            accumulate(acc, value).map_err(Into::into)
        })
    }

    /// 值计数。
    fn count(self) -> Count<Self> {
        Count::new(self)
    }

    /// 丢弃一切值，只保留终结。
    fn ignore_output(self) -> IgnoreOutput<Self> {
        IgnoreOutput::new(self)
    }

    /// 失败恢复：以处理器产出的替换发布者接续。
    fn catch<H, P2>(self, handler: H) -> Catch<Self, H>
    where
        H: Fn(Self::Failure) -> P2 + Send + Sync + 'static,
        P2: Publisher<Output = Self::Output>,
    {
        Catch::new(self, handler)
    }

    /// 可失败的失败恢复；处理器错误拓宽为 [`BoxError`]。
    fn try_catch<H, P2, E2>(
        self,
        handler: H,
    ) -> TryCatch<Self, impl Fn(Self::Failure) -> Result<P2, BoxError> + Send + Sync + 'static>
    where
        H: Fn(Self::Failure) -> Result<P2, E2> + Send + Sync + 'static,
        P2: Publisher<Output = Self::Output>,
        E2: Into<BoxError>,
    {
        TryCatch::new(self, move |error| handler(error).map_err(Into::into))
    }

    /// 顺序接续：本流尽后接 `suffix`。
    fn concatenate<P2>(self, suffix: P2) -> Concatenate<Self, P2>
    where
        P2: Publisher<Output = Self::Output, Failure = Self::Failure>,
    {
        Concatenate::new(self, suffix)
    }

    /// 追随最新内层流。
    fn switch_to_latest(self) -> SwitchToLatest<Self>
    where
        Self::Output: Publisher,
    {
        SwitchToLatest::new(self)
    }

    /// 并发展开内层流；`max_publishers` 必须为正。
    fn flat_map<Inner, F>(self, max_publishers: Demand, transform: F) -> FlatMap<Self, F>
    where
        F: Fn(Self::Output) -> Inner + Send + Sync + 'static,
        Inner: Publisher,
    {
        FlatMap::new(self, max_publishers, transform)
    }

    /// 二元配对。
    fn zip<P2>(self, other: P2) -> Zip<Self, P2>
    where
        P2: Publisher,
    {
        Zip::new(self, other)
    }

    /// 三元配对。
    fn zip3<P2, P3>(self, second: P2, third: P3) -> Zip3<Self, P2, P3>
    where
        P2: Publisher,
        P3: Publisher,
    {
        Zip3::new(self, second, third)
    }

    /// 四元配对。
    fn zip4<P2, P3, P4>(self, second: P2, third: P3, fourth: P4) -> Zip4<Self, P2, P3, P4>
    where
        P2: Publisher,
        P3: Publisher,
        P4: Publisher,
    {
        Zip4::new(self, second, third, fourth)
    }

    /// 静默满 `due_time` 后投递最新值。
    fn debounce<S>(
        self,
        due_time: <S::Time as SchedulerTime>::Stride,
        scheduler: S,
        options: Option<S::Options>,
    ) -> Debounce<Self, S>
    where
        S: Scheduler,
    {
        Debounce::new(self, due_time, scheduler, options)
    }

    /// 按最小间隔限速。
    fn throttle<S>(
        self,
        interval: <S::Time as SchedulerTime>::Stride,
        scheduler: S,
        latest: bool,
    ) -> Throttle<Self, S>
    where
        S: Scheduler,
    {
        Throttle::new(self, interval, scheduler, latest)
    }

    /// 有界缓冲。
    fn buffer(
        self,
        size: usize,
        prefetch: PrefetchStrategy,
        when_full: BufferingStrategy<Self::Failure>,
    ) -> Buffer<Self> {
        Buffer::new(self, size, prefetch, when_full)
    }

    /// 可连接扇出包装；`connect()` 触发唯一一次上游订阅。
    fn make_connectable(self) -> Share<Self> {
        Share::new(self)
    }

    /// `make_connectable` 的别名（连接仍需显式触发）。
    fn share(self) -> Share<Self> {
        Share::new(self)
    }
}

impl<P: Publisher> PublisherExt for P {}
