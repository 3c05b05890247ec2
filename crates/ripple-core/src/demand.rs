//! 需求（Demand）代数：下游向上游声明“还能接收多少个值”的记账单位。
//!
//! # 模块定位（Why）
//! - 拉取式流的背压完全由需求计数表达：值只会在需求为正时向下游投递，
//!   需求的增减构成了整个运行时最核心的守恒量。
//! - 需求存在“无限”形态：`Unlimited` 表示下游放弃背压，上游可以任意推送。
//!   我们采用显式和类型而非 `u64::MAX` 哨兵值，避免哨兵参与算术后悄悄溢出。
//!
//! # 契约说明（What）
//! - 加法饱和：有限值相加溢出时饱和到 `Unlimited`；任何一侧为 `Unlimited` 则结果为 `Unlimited`；
//! - 减法不下穿零：`Unlimited` 减任何值仍为 `Unlimited`；
//! - 全序：`Unlimited` 为最大元素，有限值按计数比较；
//! - 乘法（非负整数倍）在 `Unlimited` 处饱和；
//! - 以 `Demand::NONE`（即零）调用 `Subscription::request` 属编程错误，
//!   由 [`Demand::expect_nonzero`] 以稳定错误码 `demand.zero_request` 直接 panic。
//!
//! # 风险提示（Trade-offs）
//! - 字段对外只读，所有运算返回新值；需求本身不承担并发控制，
//!   持有方（各阶段）须在自身状态锁内更新。

use core::cmp::Ordering;
use core::fmt;
use core::ops::{Add, AddAssign, Mul, Sub, SubAssign};

use crate::error::codes;

/// 下游尚可接收的值数量，带显式的“无限”形态。
///
/// # 契约说明（What）
/// - `Finite(n)`：还可以接收 `n` 个值；`Finite(0)` 即 [`Demand::NONE`]，表示暂不接收；
/// - `Unlimited`：不设上限，上游可以连续推送直至终结。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Demand {
    /// 有限需求计数。
    Finite(u64),
    /// 无限需求，放弃背压。
    Unlimited,
}

impl Demand {
    /// 零需求：合法的记账中间值，但禁止作为 `request` 的参数。
    pub const NONE: Demand = Demand::Finite(0);

    /// 无限需求。
    pub const UNLIMITED: Demand = Demand::Unlimited;

    /// 构造有限需求。
    pub const fn finite(count: u64) -> Self {
        Demand::Finite(count)
    }

    /// 是否为零需求。
    pub const fn is_none(self) -> bool {
        matches!(self, Demand::Finite(0))
    }

    /// 是否为无限需求。
    pub const fn is_unlimited(self) -> bool {
        matches!(self, Demand::Unlimited)
    }

    /// 需求是否为正（可以投递至少一个值）。
    pub const fn is_positive(self) -> bool {
        match self {
            Demand::Finite(n) => n > 0,
            Demand::Unlimited => true,
        }
    }

    /// 校验 `request` 参数为正需求，零需求按协议错误处理。
    ///
    /// # 契约说明（What）
    /// - **前置条件**：`self` 来自下游的 `request` 调用参数；
    /// - **后置条件**：零需求触发带稳定错误码 [`codes::ZERO_DEMAND`] 的 panic，
    ///   panic 信息携带调用点位置（`#[track_caller]`），其余情况原样返回。
    #[track_caller]
    pub fn expect_nonzero(self) -> Self {
        if self.is_none() {
            panic!("[{}] request 需求必须为正", codes::ZERO_DEMAND);
        }
        self
    }

    /// 饱和减去一个值的投递配额；零处截断，`Unlimited` 恒为 `Unlimited`。
    #[must_use]
    pub fn saturating_sub(self, rhs: Demand) -> Self {
        match (self, rhs) {
            (Demand::Unlimited, _) => Demand::Unlimited,
            (Demand::Finite(_), Demand::Unlimited) => Demand::NONE,
            (Demand::Finite(a), Demand::Finite(b)) => Demand::Finite(a.saturating_sub(b)),
        }
    }

    /// 饱和加法；有限溢出饱和到 `Unlimited`。
    #[must_use]
    pub fn saturating_add(self, rhs: Demand) -> Self {
        match (self, rhs) {
            (Demand::Unlimited, _) | (_, Demand::Unlimited) => Demand::Unlimited,
            (Demand::Finite(a), Demand::Finite(b)) => match a.checked_add(b) {
                Some(sum) => Demand::Finite(sum),
                None => Demand::Unlimited,
            },
        }
    }

    /// 非负整数倍乘法，`Unlimited` 处饱和；乘零得零。
    #[must_use]
    pub fn saturating_mul(self, factor: u64) -> Self {
        match self {
            Demand::Unlimited => {
                if factor == 0 {
                    Demand::NONE
                } else {
                    Demand::Unlimited
                }
            }
            Demand::Finite(n) => match n.checked_mul(factor) {
                Some(product) => Demand::Finite(product),
                None => Demand::Unlimited,
            },
        }
    }
}

impl Add for Demand {
    type Output = Demand;

    fn add(self, rhs: Demand) -> Demand {
        self.saturating_add(rhs)
    }
}

impl AddAssign for Demand {
    fn add_assign(&mut self, rhs: Demand) {
        *self = self.saturating_add(rhs);
    }
}

impl Sub for Demand {
    type Output = Demand;

    fn sub(self, rhs: Demand) -> Demand {
        self.saturating_sub(rhs)
    }
}

impl SubAssign for Demand {
    fn sub_assign(&mut self, rhs: Demand) {
        *self = self.saturating_sub(rhs);
    }
}

impl Mul<u64> for Demand {
    type Output = Demand;

    fn mul(self, factor: u64) -> Demand {
        self.saturating_mul(factor)
    }
}

impl PartialOrd for Demand {
    fn partial_cmp(&self, other: &Demand) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Demand {
    fn cmp(&self, other: &Demand) -> Ordering {
        match (self, other) {
            (Demand::Unlimited, Demand::Unlimited) => Ordering::Equal,
            (Demand::Unlimited, Demand::Finite(_)) => Ordering::Greater,
            (Demand::Finite(_), Demand::Unlimited) => Ordering::Less,
            (Demand::Finite(a), Demand::Finite(b)) => a.cmp(b),
        }
    }
}

impl fmt::Display for Demand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Demand::Finite(n) => write!(f, "{n}"),
            Demand::Unlimited => f.write_str("unlimited"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 验证：有限加法溢出时饱和到 `Unlimited`。
    #[test]
    fn finite_addition_saturates_to_unlimited() {
        let sum = Demand::finite(u64::MAX) + Demand::finite(1);
        assert_eq!(sum, Demand::Unlimited);
    }

    /// 验证：减法不下穿零。
    #[test]
    fn subtraction_floors_at_zero() {
        assert_eq!(Demand::finite(1) - Demand::finite(5), Demand::NONE);
        assert_eq!(Demand::Unlimited - Demand::finite(5), Demand::Unlimited);
    }

    /// 验证：`Unlimited` 为全序最大元素。
    #[test]
    fn unlimited_is_the_greatest_element() {
        assert!(Demand::Unlimited > Demand::finite(u64::MAX));
        assert!(Demand::finite(3) > Demand::finite(2));
    }

    /// 验证：乘零得零、`Unlimited` 乘正数仍为 `Unlimited`。
    #[test]
    fn multiplication_saturates() {
        assert_eq!(Demand::Unlimited * 0, Demand::NONE);
        assert_eq!(Demand::Unlimited * 3, Demand::Unlimited);
        assert_eq!(Demand::finite(4) * 5, Demand::finite(20));
        assert_eq!(Demand::finite(u64::MAX) * 2, Demand::Unlimited);
    }

    /// 验证：零需求触发协议 panic。
    #[test]
    #[should_panic(expected = "demand.zero_request")]
    fn zero_request_panics_with_stable_code() {
        let _ = Demand::NONE.expect_nonzero();
    }
}
