//! 组织区域的外轮廓及其几何量.

use crate::coords::LocalPoint;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 轴对齐包围盒 `(x, y, w, h)`, section 局部坐标.
///
/// 覆盖像素范围 `[x, x + w) x [y, y + h)`. 单像素轮廓的包围盒为 `1 x 1`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoundingBox {
    /// 左上角 x.
    pub x: i64,
    /// 左上角 y.
    pub y: i64,
    /// 宽.
    pub width: i64,
    /// 高.
    pub height: i64,
}

impl BoundingBox {
    /// 直接初始化.
    #[inline]
    pub const fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// 包含所有 `points` 的最小包围盒. `points` 为空时返回 `None`.
    pub fn enclosing<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a LocalPoint>,
    {
        let mut it = points.into_iter();
        let first = it.next()?;
        let (mut x0, mut y0, mut x1, mut y1) = (first.x, first.y, first.x, first.y);
        for p in it {
            x0 = x0.min(p.x);
            y0 = y0.min(p.y);
            x1 = x1.max(p.x);
            y1 = y1.max(p.y);
        }
        Some(Self::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1))
    }

    /// 右边界 (不含).
    #[inline]
    pub const fn right(&self) -> i64 {
        self.x + self.width
    }

    /// 下边界 (不含).
    #[inline]
    pub const fn bottom(&self) -> i64 {
        self.y + self.height
    }

    /// `(x, y, w, h)` 元组.
    #[inline]
    pub const fn as_tuple(&self) -> (i64, i64, i64, i64) {
        (self.x, self.y, self.width, self.height)
    }
}

/// 一个连通组织区域, 由其外轮廓描述.
#[derive(Clone, Debug, PartialEq)]
pub struct TissueRegion {
    /// 完整的 8-邻接外轮廓点列.
    contour: Vec<LocalPoint>,
    bbox: BoundingBox,
    area: f64,
}

impl TissueRegion {
    /// 由首尾相连的外轮廓点列构建. `contour` 不能为空.
    pub fn new(contour: Vec<LocalPoint>) -> Self {
        debug_assert!(!contour.is_empty());
        let bbox = BoundingBox::enclosing(&contour).unwrap_or_default();
        let area = shoelace_area(&contour);
        Self {
            contour,
            bbox,
            area,
        }
    }

    /// 包围盒.
    #[inline]
    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// 轮廓所围成的多边形面积 (鞋带公式). 少于 3 个点时为 0.
    ///
    /// 这是轮廓多边形的面积而不是像素个数, 因此细长区域的面积可能接近 0.
    #[inline]
    pub fn area(&self) -> f64 {
        self.area
    }

    /// 完整轮廓.
    #[inline]
    pub fn contour(&self) -> &[LocalPoint] {
        &self.contour
    }

    /// 压缩后的轮廓: 水平、垂直、对角线方向的连续线段只保留两个端点.
    pub fn chain(&self) -> Vec<LocalPoint> {
        compress_chain(&self.contour)
    }
}

/// 闭合多边形的无向面积.
pub(crate) fn shoelace_area(ring: &[LocalPoint]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let n = ring.len();
    let twice: i64 = (0..n)
        .map(|i| {
            let (a, b) = (ring[i], ring[(i + 1) % n]);
            a.x * b.y - b.x * a.y
        })
        .sum();
    twice.abs() as f64 / 2.0
}

/// 移除闭合折线上的共线中间点.
pub(crate) fn compress_chain(ring: &[LocalPoint]) -> Vec<LocalPoint> {
    let n = ring.len();
    if n < 3 {
        return ring.to_vec();
    }
    let step = |a: LocalPoint, b: LocalPoint| ((b.x - a.x).signum(), (b.y - a.y).signum());
    let kept: Vec<LocalPoint> = (0..n)
        .filter(|&i| {
            let prev = ring[(i + n - 1) % n];
            let (cur, next) = (ring[i], ring[(i + 1) % n]);
            step(prev, cur) != step(cur, next)
        })
        .map(|i| ring[i])
        .collect();
    // 所有点共线且首尾方向相同 (理论上不会出现在闭合轮廓中).
    if kept.is_empty() {
        ring[..1].to_vec()
    } else {
        kept
    }
}
