//! patch 与标注区域的重叠面积.
//!
//! 标注多边形之间可能相互重叠. 先求所有多边形的并集, 再与 patch
//! 的正方形求交, 保证重叠部分不会被重复计算.
//!
//! 手绘标注的外环可能自相交 (如 "8" 字形). 这类多边形先按奇偶规则
//! 转为若干合法多边形再参与求并.

use crate::coords::LevelPoint;
use geo::{
    coord, Area, BooleanOps, BoundingRect, Intersects, Line, LineString, MultiPolygon, Polygon, Rect,
    Triangle,
};
use std::collections::HashMap;

/// 一张切片上所有标注多边形的并集. 每张切片只需构建一次, 之后只读.
#[derive(Clone, Debug)]
pub struct TumorRegion {
    union: MultiPolygon<f64>,
    bounds: Option<Rect<f64>>,
}

impl TumorRegion {
    /// 求 `polygons` 的并集.
    ///
    /// 外环自相交的多边形按奇偶规则填充; 面积为 0 的退化多边形被忽略.
    /// 两种情况都会记录一条警告.
    pub fn new(polygons: &[Polygon<f64>]) -> Self {
        let mut union = MultiPolygon::<f64>::new(vec![]);
        for (i, p) in polygons.iter().enumerate() {
            let mut ring = p.exterior().clone();
            ring.0.dedup();
            let part = if is_simple(&ring) {
                MultiPolygon::new(vec![Polygon::new(ring, p.interiors().to_vec())])
            } else {
                log::warn!("annotation polygon #{i} is self-intersecting, filled by even-odd rule");
                even_odd_fill(&ring)
            };
            if part.unsigned_area() <= 0.0 {
                log::warn!("annotation polygon #{i} encloses no area, ignored");
                continue;
            }
            union = union.union(&part);
        }
        let bounds = union.bounding_rect();
        Self { union, bounds }
    }

    /// 是否不含任何有效区域.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    /// 并集的总面积.
    #[inline]
    pub fn area(&self) -> f64 {
        self.union.unsigned_area()
    }

    /// 左上角为 `corner`, 边长为 `patch_size` 的正方形与并集的交集面积.
    ///
    /// 结果不超过 `patch_size^2`.
    pub fn overlap(&self, corner: LevelPoint, patch_size: usize) -> f64 {
        let Some(bounds) = self.bounds else {
            return 0.0;
        };
        let (x, y) = (corner.x as f64, corner.y as f64);
        let p = patch_size as f64;
        let square = Rect::new(coord! { x: x, y: y }, coord! { x: x + p, y: y + p });

        // 包围盒不相交时直接跳过布尔运算.
        if square.max().x <= bounds.min().x
            || bounds.max().x <= square.min().x
            || square.max().y <= bounds.min().y
            || bounds.max().y <= square.min().y
        {
            return 0.0;
        }
        let clip = MultiPolygon::new(vec![square.to_polygon()]);
        self.union.intersection(&clip).unsigned_area().min(p * p)
    }
}

/// 闭合环 `ring` 的任意两条不相邻的边都不相交.
fn is_simple(ring: &LineString<f64>) -> bool {
    let lines: Vec<Line<f64>> = ring.lines().collect();
    let n = lines.len();
    for i in 0..n {
        for j in i + 2..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            if lines[i].intersects(&lines[j]) {
                return false;
            }
        }
    }
    true
}

/// 闭合环 `ring` 按奇偶规则围成的区域.
///
/// 以首点为公共顶点, 对扇形三角形逐个求对称差: 任一点被奇数个三角形
/// 覆盖当且仅当它在环内.
fn even_odd_fill(ring: &LineString<f64>) -> MultiPolygon<f64> {
    let mut acc = MultiPolygon::<f64>::new(vec![]);
    let Some((&p0, rest)) = ring.0.split_first() else {
        return acc;
    };
    for w in rest.windows(2) {
        let tri = Triangle::new(p0, w[0], w[1]);
        if tri.unsigned_area() > 0.0 {
            acc = acc.xor(&MultiPolygon::new(vec![tri.to_polygon()]));
        }
    }
    acc
}

/// patch 全局坐标到重叠面积的映射.
///
/// 不在映射中的坐标视为重叠面积为 0.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TumorOverlap {
    patch_size: usize,
    areas: HashMap<LevelPoint, f64>,
}

impl TumorOverlap {
    /// 空映射.
    pub fn new(patch_size: usize) -> Self {
        Self {
            patch_size,
            areas: HashMap::new(),
        }
    }

    /// 记录一个 patch 的重叠面积.
    #[inline]
    pub fn insert(&mut self, corner: LevelPoint, area: f64) {
        self.areas.insert(corner, area);
    }

    /// 重叠面积 (像素). 不存在时为 0.
    #[inline]
    pub fn get(&self, corner: LevelPoint) -> f64 {
        self.areas.get(&corner).copied().unwrap_or(0.0)
    }

    /// 重叠面积占 patch 面积的比例 `area / (P * P)`.
    #[inline]
    pub fn fraction(&self, corner: LevelPoint) -> f64 {
        self.get(corner) / (self.patch_size * self.patch_size) as f64
    }

    /// 已记录的 patch 个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.areas.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    /// 迭代所有记录.
    pub fn iter(&self) -> impl Iterator<Item = (LevelPoint, f64)> + '_ {
        self.areas.iter().map(|(&k, &v)| (k, v))
    }
}

/// 计算每个 patch (左上角全局坐标 `coords`, 边长 `patch_size`) 与标注并集的重叠面积.
pub fn calc_tumor_area<I>(region: &TumorRegion, coords: I, patch_size: usize) -> TumorOverlap
where
    I: IntoIterator<Item = LevelPoint>,
{
    let mut ans = TumorOverlap::new(patch_size);
    for corner in coords {
        ans.insert(corner, region.overlap(corner, patch_size));
    }
    ans
}
