//! 坐标系.
//!
//! 一次运行中同时存在四套坐标:
//!
//! 1. **level-0 坐标** ([`Level0Point`]): 最高分辨率下的全局坐标.
//!   切片后端的 `read_region` 和标注文件都使用这套坐标.
//! 2. **层级坐标** ([`LevelPoint`]): 所选层级下的全局坐标,
//!   等于 level-0 坐标除以 `2^level`. 分割、采样和重叠计算都在这套坐标下进行.
//! 3. **section 局部坐标** ([`LocalPoint`]): 层级坐标减去所在 section 的偏移.
//! 4. **(h, w) 数组索引** ([`crate::Idx2d`]): 局部坐标在 `ndarray`
//!   中的行优先索引, 即 `(y, x)`.
//!
//! 所有结构中的坐标, 除非类型名带 `Level0`, 均为层级坐标.
//! 跨越到 `read_region` 的坐标必须经过 [`Level::to_level0`] 转换.

use std::fmt::{Display, Formatter};
use std::ops::{Add, Sub};

/// 金字塔层级. `0` 为最高分辨率, 之后每级边长减半.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Level(u32);

impl Level {
    /// 第 `index` 级. 调用者保证 `index <= crate::consts::MAX_LEVEL`.
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// 层级索引.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// 放大倍率 `2^level`. 层级坐标乘以该值即为 level-0 坐标.
    #[inline]
    pub const fn scale_factor(self) -> i64 {
        1i64 << self.0
    }

    /// 层级坐标 -> level-0 坐标.
    #[inline]
    pub const fn to_level0(self, p: LevelPoint) -> Level0Point {
        let s = self.scale_factor();
        Level0Point { x: p.x * s, y: p.y * s }
    }

    /// level-0 坐标 -> 层级坐标. 整数除法, 向零截断.
    #[inline]
    pub const fn from_level0(self, p: Level0Point) -> LevelPoint {
        let s = self.scale_factor();
        LevelPoint { x: p.x / s, y: p.y / s }
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "level{}", self.0)
    }
}

macro_rules! impl_point {
    ($($(#[$doc: meta])* $name: ident),+) => {
        $(
            $(#[$doc])*
            #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
            #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
            pub struct $name {
                /// 水平分量 (向右增长).
                pub x: i64,
                /// 垂直分量 (向下增长).
                pub y: i64,
            }

            impl $name {
                /// 直接初始化.
                #[inline]
                pub const fn new(x: i64, y: i64) -> Self {
                    Self { x, y }
                }

                /// 以 `(x, y)` 元组形式返回.
                #[inline]
                pub const fn xy(self) -> (i64, i64) {
                    (self.x, self.y)
                }
            }

            impl From<(i64, i64)> for $name {
                #[inline]
                fn from((x, y): (i64, i64)) -> Self {
                    Self { x, y }
                }
            }

            impl Display for $name {
                fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                    write!(f, "({}, {})", self.x, self.y)
                }
            }
        )+
    };
}

impl_point!(
    /// level-0 全局坐标.
    Level0Point,
    /// 所选层级下的全局坐标.
    LevelPoint,
    /// section 局部坐标. 对于标注点, 分量 `-1` 表示该点落在 section 之外.
    LocalPoint
);

/// 标注局部坐标中表示 "不在本 section 内" 的哨兵值.
pub const OUTSIDE_SECTION: i64 = -1;

impl LevelPoint {
    /// 转换为相对于 `offset` 的局部坐标. 任何为负的分量都被替换为哨兵
    /// [`OUTSIDE_SECTION`].
    #[inline]
    pub fn localize(self, offset: LevelPoint) -> LocalPoint {
        #[inline]
        fn sentinel(v: i64) -> i64 {
            if v < 0 {
                OUTSIDE_SECTION
            } else {
                v
            }
        }
        LocalPoint::new(sentinel(self.x - offset.x), sentinel(self.y - offset.y))
    }
}

impl LocalPoint {
    /// 转换为全局层级坐标. 局部坐标必须是真实坐标而非哨兵.
    #[inline]
    pub fn globalize(self, offset: LevelPoint) -> LevelPoint {
        debug_assert!(self.x >= 0 && self.y >= 0);
        offset + self
    }
}

impl Add<LocalPoint> for LevelPoint {
    type Output = LevelPoint;

    #[inline]
    fn add(self, rhs: LocalPoint) -> Self::Output {
        LevelPoint::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for LevelPoint {
    type Output = LocalPoint;

    /// 不做哨兵处理的原始差值.
    #[inline]
    fn sub(self, rhs: LevelPoint) -> Self::Output {
        LocalPoint::new(self.x - rhs.x, self.y - rhs.y)
    }
}
