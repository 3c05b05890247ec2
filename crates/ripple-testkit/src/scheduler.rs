//! 虚拟调度器：手动推进的确定性时间源。
//!
//! # 设计动机（Why）
//! - 时间类算子（debounce/throttle）的行为必须在 CI 中 100% 可复现；
//!   虚拟时钟把时间推进变成显式调用，并以稳定次序触发到期动作。
//!
//! # 契约说明（What）
//! - `now` 单调不减；`advance` 把到期动作按 `(时刻, 登记序)` 排序逐个执行；
//! - `schedule` 内联立即执行；`schedule_after` 的过期时刻同样内联；
//! - 重复调度返回的句柄取消后不再触发，已入队的下一次触发会被跳过。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ripple_core::scheduler::{Cancellable, Scheduler, SchedulerStride, SchedulerTime};

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// 虚拟时刻：自调度器创建起的纳秒偏移。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualTime {
    nanos: u64,
}

impl VirtualTime {
    /// 以纳秒偏移构造时刻。
    pub const fn from_nanos(nanos: u64) -> Self {
        VirtualTime { nanos }
    }

    /// 纳秒偏移。
    pub const fn as_nanos(self) -> u64 {
        self.nanos
    }
}

/// 虚拟间隔（纳秒）。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualStride {
    nanos: u64,
}

impl VirtualStride {
    /// 纳秒数。
    pub const fn as_nanos(self) -> u64 {
        self.nanos
    }
}

impl core::ops::Add for VirtualStride {
    type Output = VirtualStride;

    fn add(self, rhs: VirtualStride) -> VirtualStride {
        VirtualStride {
            nanos: self.nanos.saturating_add(rhs.nanos),
        }
    }
}

impl SchedulerStride for VirtualStride {
    fn seconds(value: u64) -> Self {
        VirtualStride {
            nanos: value.saturating_mul(NANOS_PER_SECOND),
        }
    }

    fn seconds_f64(value: f64) -> Self {
        let nanos = if value <= 0.0 {
            0
        } else {
            (value * NANOS_PER_SECOND as f64).round() as u64
        };
        VirtualStride { nanos }
    }

    fn milliseconds(value: u64) -> Self {
        VirtualStride {
            nanos: value.saturating_mul(1_000_000),
        }
    }

    fn microseconds(value: u64) -> Self {
        VirtualStride {
            nanos: value.saturating_mul(1_000),
        }
    }

    fn nanoseconds(value: u64) -> Self {
        VirtualStride { nanos: value }
    }
}

impl SchedulerTime for VirtualTime {
    type Stride = VirtualStride;

    fn advanced_by(&self, stride: VirtualStride) -> Self {
        VirtualTime {
            nanos: self.nanos.saturating_add(stride.nanos),
        }
    }
}

enum Entry {
    Once(Box<dyn FnOnce() + Send + 'static>),
    Repeating {
        interval: u64,
        action: Arc<dyn Fn() + Send + Sync + 'static>,
        alive: Arc<AtomicBool>,
    },
}

struct SchedulerState {
    now: u64,
    sequence: u64,
    queue: BTreeMap<(u64, u64), Entry>,
}

/// 手动推进的虚拟调度器；克隆共享同一时间线。
#[derive(Clone)]
pub struct VirtualScheduler {
    state: Arc<Mutex<SchedulerState>>,
}

impl Default for VirtualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualScheduler {
    /// 创建起点为零的调度器。
    pub fn new() -> Self {
        VirtualScheduler {
            state: Arc::new(Mutex::new(SchedulerState {
                now: 0,
                sequence: 0,
                queue: BTreeMap::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        self.state.lock().expect("虚拟调度器状态锁中毒")
    }

    fn enqueue(&self, at: u64, entry: Entry) {
        let mut state = self.lock();
        let sequence = state.sequence;
        state.sequence += 1;
        state.queue.insert((at, sequence), entry);
    }

    /// 推进虚拟时间，按 `(时刻, 登记序)` 依次执行到期动作。
    ///
    /// # 契约说明（What）
    /// - 执行动作时不持状态锁，动作内可以再次调度或推进前的登记仍然有效；
    /// - 重复任务执行后若未被取消，按 `时刻 + 间隔` 重新入队。
    pub fn advance(&self, stride: VirtualStride) {
        let target = {
            let state = self.lock();
            state.now.saturating_add(stride.nanos)
        };
        loop {
            let due = {
                let mut state = self.lock();
                let key = state
                    .queue
                    .keys()
                    .next()
                    .copied()
                    .filter(|(at, _)| *at <= target);
                match key {
                    Some(key) => {
                        state.now = key.0;
                        state.queue.remove(&key).map(|entry| (key.0, entry))
                    }
                    None => {
                        state.now = target;
                        return;
                    }
                }
            };
            let Some((fired_at, entry)) = due else {
                return;
            };
            match entry {
                Entry::Once(action) => action(),
                Entry::Repeating {
                    interval,
                    action,
                    alive,
                } => {
                    if alive.load(Ordering::Acquire) {
                        action();
                    }
                    if alive.load(Ordering::Acquire) {
                        self.enqueue(
                            fired_at.saturating_add(interval.max(1)),
                            Entry::Repeating {
                                interval,
                                action,
                                alive,
                            },
                        );
                    }
                }
            }
        }
    }

    /// 当前虚拟时刻的纳秒偏移。
    pub fn now_nanos(&self) -> u64 {
        self.lock().now
    }

    /// 尚未触发的登记数。
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }
}

struct RepeatingHandle {
    alive: Arc<AtomicBool>,
}

impl Cancellable for RepeatingHandle {
    fn cancel(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

impl Scheduler for VirtualScheduler {
    type Time = VirtualTime;
    type Options = ();

    fn now(&self) -> VirtualTime {
        VirtualTime::from_nanos(self.lock().now)
    }

    fn minimum_tolerance(&self) -> VirtualStride {
        VirtualStride::nanoseconds(1)
    }

    fn schedule(&self, action: Box<dyn FnOnce() + Send + 'static>) {
        // "下一个机会"的最紧实现：内联立即执行（此刻不持状态锁）。
        action();
    }

    fn schedule_after(
        &self,
        after: VirtualTime,
        _tolerance: VirtualStride,
        _options: Option<()>,
        action: Box<dyn FnOnce() + Send + 'static>,
    ) {
        let due = after.as_nanos();
        let now = self.lock().now;
        if due <= now {
            action();
        } else {
            self.enqueue(due, Entry::Once(action));
        }
    }

    fn schedule_repeating(
        &self,
        after: VirtualTime,
        interval: VirtualStride,
        _tolerance: VirtualStride,
        _options: Option<()>,
        action: Arc<dyn Fn() + Send + Sync + 'static>,
    ) -> Arc<dyn Cancellable> {
        let alive = Arc::new(AtomicBool::new(true));
        let now = self.lock().now;
        let first = after.as_nanos().max(now);
        self.enqueue(
            first,
            Entry::Repeating {
                interval: interval.as_nanos(),
                action,
                alive: Arc::clone(&alive),
            },
        );
        Arc::new(RepeatingHandle { alive })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 验证：到期动作按时刻与登记序稳定触发。
    #[test]
    fn advance_fires_in_stable_order() {
        let scheduler = VirtualScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for (label, at) in [("b", 20u64), ("a", 10), ("c", 20)] {
            let log = Arc::clone(&log);
            scheduler.schedule_after(
                VirtualTime::from_nanos(at),
                VirtualStride::nanoseconds(1),
                None,
                Box::new(move || log.lock().unwrap().push(label)),
            );
        }
        scheduler.advance(VirtualStride::nanoseconds(30));
        assert_eq!(*log.lock().unwrap(), ["a", "b", "c"]);
    }

    /// 验证：重复任务取消后不再触发。
    #[test]
    fn cancelled_repeating_task_stops_firing() {
        let scheduler = VirtualScheduler::new();
        let count = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&count);
        let handle = scheduler.schedule_repeating(
            VirtualTime::from_nanos(5),
            VirtualStride::nanoseconds(5),
            VirtualStride::nanoseconds(1),
            None,
            Arc::new(move || *counter.lock().unwrap() += 1),
        );
        scheduler.advance(VirtualStride::nanoseconds(12));
        assert_eq!(*count.lock().unwrap(), 2);
        handle.cancel();
        scheduler.advance(VirtualStride::nanoseconds(100));
        assert_eq!(*count.lock().unwrap(), 2);
    }
}
