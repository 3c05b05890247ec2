#![cfg(loom)]

//! 排水纪律的 Loom 影子模型
//!
//! # 教案级说明
//! - **意图 (Why)**：核心的下游串行化不靠递归锁，而靠"排水旗标 + 状态锁"
//!   的独占循环（见 crate 文档的并发纪律）。该协议有两条性质必须在任意线程交错下成立：
//!   1. 任一时刻至多一个线程处于投递区（下游回调串行化）；
//!   2. 让出排水权前回查需求，不存在"需求已入账却无人排水"的丢失唤醒。
//! - **手法 (How)**：与生产代码同构的影子模型（锁 + 旗标 + 计数），
//!   用 Loom 穷举两线程的 `request` 交错；不直接驱动生产阶段，
//!   避免把模型检查耦合到具体算子的值语义上。
//! - **契约 (What)**：投递区并发度恒为 1；模型收敛后投递计数等于需求总量。

use loom::model;
use loom::sync::atomic::{AtomicU64, Ordering};
use loom::sync::{Arc, Mutex};
use loom::thread;

/// 影子阶段：需求记账 + 排水旗标，结构与序列/缓冲阶段一致。
struct ShadowStage {
    state: Mutex<ShadowState>,
    /// 投递区并发度探针。
    in_delivery: AtomicU64,
    delivered: AtomicU64,
}

struct ShadowState {
    demand: u64,
    draining: bool,
}

impl ShadowStage {
    fn new() -> Self {
        ShadowStage {
            state: Mutex::new(ShadowState {
                demand: 0,
                draining: false,
            }),
            in_delivery: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    /// 与生产代码同构的 `request`：记账，已有排水者则并入其循环。
    fn request(&self, demand: u64) {
        {
            let mut state = self.state.lock().unwrap();
            state.demand += demand;
            if state.draining {
                return;
            }
            state.draining = true;
        }
        self.drain();
    }

    fn drain(&self) {
        loop {
            let granted = {
                let mut state = self.state.lock().unwrap();
                if state.demand == 0 {
                    state.draining = false;
                    return;
                }
                state.demand -= 1;
                true
            };
            if granted {
                // 投递区：断言串行化。
                let concurrent = self.in_delivery.fetch_add(1, Ordering::SeqCst);
                assert_eq!(concurrent, 0, "投递区必须串行");
                self.delivered.fetch_add(1, Ordering::SeqCst);
                self.in_delivery.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

/// 两线程并发 `request`：投递串行且无丢失唤醒。
#[test]
fn concurrent_requests_serialize_and_lose_nothing() {
    model(|| {
        let stage = Arc::new(ShadowStage::new());

        let left = {
            let stage = Arc::clone(&stage);
            thread::spawn(move || stage.request(2))
        };
        let right = {
            let stage = Arc::clone(&stage);
            thread::spawn(move || stage.request(1))
        };

        left.join().expect("请求线程不应 panic");
        right.join().expect("请求线程不应 panic");

        assert_eq!(
            stage.delivered.load(Ordering::SeqCst),
            3,
            "需求总量必须全部兑现"
        );
        assert!(!stage.state.lock().unwrap().draining, "排水权必须归还");
    });
}

/// 排水者让出与新请求的竞争：让出后到达的需求必有人接手。
#[test]
fn handoff_window_does_not_strand_demand() {
    model(|| {
        let stage = Arc::new(ShadowStage::new());
        stage.request(1);

        let late = {
            let stage = Arc::clone(&stage);
            thread::spawn(move || stage.request(1))
        };
        late.join().expect("迟到请求线程不应 panic");

        assert_eq!(stage.delivered.load(Ordering::SeqCst), 2);
        assert_eq!(stage.state.lock().unwrap().demand, 0);
    });
}
