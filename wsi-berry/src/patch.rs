//! 滑窗 patch 采样.
//!
//! 对面积最大的若干个组织区域, 在其包围盒内以半个 patch 为步长滑动窗口,
//! 保留被组织掩码充分覆盖且完整落在 section 内的窗口.

use crate::color::rgb_to_gray;
use crate::config::PipelineConfig;
use crate::consts::gray::is_tissue;
use crate::consts::*;
use crate::coords::{LevelPoint, LocalPoint};
use crate::error::{ShapeError, ShapeResult};
use crate::tissue::{BoundingBox, TissueMask, TissueRegion};
use binary_heap_plus::BinaryHeap;
use itertools::iproduct;
use ndarray::{s, Array3, ArrayView3, Axis, Zip};

/// 一个被接受的 patch.
#[derive(Clone, Debug, PartialEq)]
pub struct Patch {
    /// `(P, P, 3)` 的 RGB 像素.
    pixels: Array3<u8>,
    local: LocalPoint,
    global: LevelPoint,
    covered: usize,
}

impl Patch {
    /// 像素, `(P, P, 3)`.
    #[inline]
    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }

    /// 取出像素, 丢弃其余信息.
    #[inline]
    pub fn into_pixels(self) -> Array3<u8> {
        self.pixels
    }

    /// 左上角的 section 局部坐标.
    #[inline]
    pub fn local(&self) -> LocalPoint {
        self.local
    }

    /// 左上角的全局层级坐标, 恒等于 `local + section offset`.
    #[inline]
    pub fn global(&self) -> LevelPoint {
        self.global
    }

    /// patch 边长 `P`.
    #[inline]
    pub fn size(&self) -> usize {
        self.pixels.len_of(Axis(0))
    }

    /// 被掩码覆盖且灰度非零的像素个数.
    #[inline]
    pub fn covered(&self) -> usize {
        self.covered
    }

    /// 有效面积占比 `covered / (P * P)`.
    #[inline]
    pub fn occupancy(&self) -> f64 {
        self.covered as f64 / self.size().pow(2) as f64
    }
}

/// 对单个候选窗口的判定.
#[derive(Clone, Debug, PartialEq)]
pub enum CandidateOutcome {
    /// 接受.
    Accepted(Patch),

    /// 窗口超出 section 边界, 静默丢弃. 这是预期情况而不是错误.
    BoundaryClipped,

    /// 有效像素不足.
    LowOccupancy {
        /// 有效像素个数.
        covered: usize,
    },
}

/// 单个 section 的采样结果.
#[derive(Clone, Debug, Default)]
pub struct Sampling {
    /// 被接受的 patch, 按区域面积降序, 区域内先行后列.
    pub patches: Vec<Patch>,

    /// 枚举的候选窗口总数.
    pub candidates: usize,

    /// 因越界被丢弃的窗口个数.
    pub clipped: usize,

    /// 因有效像素不足被丢弃的窗口个数.
    pub rejected: usize,
}

/// patch 采样器.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PatchSampler {
    patch_size: usize,
    occupancy: f64,
    max_regions: usize,
}

impl Default for PatchSampler {
    fn default() -> Self {
        Self::new(DEFAULT_PATCH_SIZE, DEFAULT_OCCUPANCY, DEFAULT_MAX_REGIONS)
    }
}

impl PatchSampler {
    /// 直接初始化. 调用者保证 `patch_size >= 2`, `0 < occupancy <= 1`.
    pub fn new(patch_size: usize, occupancy: f64, max_regions: usize) -> Self {
        debug_assert!(patch_size >= 2);
        Self {
            patch_size,
            occupancy,
            max_regions,
        }
    }

    /// 从 (已校验的) 流水线配置构建.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.patch_size, config.occupancy, config.max_regions)
    }

    /// patch 边长 `P`.
    #[inline]
    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    /// 滑窗步长 `P / 2`.
    #[inline]
    pub fn stride(&self) -> usize {
        self.patch_size / 2
    }

    /// 接受一个 patch 所需的最少有效像素个数.
    #[inline]
    fn min_covered(&self) -> f64 {
        self.occupancy * (self.patch_size * self.patch_size) as f64
    }

    /// 面积最大的至多 `max_regions` 个区域, 按面积降序.
    /// 面积相同的区域保持其在 `regions` 中的先后次序.
    pub fn rank_regions<'a>(&self, regions: &'a [TissueRegion]) -> Vec<&'a TissueRegion> {
        // 堆顶面积最大, 面积相同时索引最小.
        let mut heap: BinaryHeap<usize, _> = BinaryHeap::new_by(|a: &usize, b: &usize| {
            regions[*a]
                .area()
                .total_cmp(&regions[*b].area())
                .then_with(|| b.cmp(a))
        });
        heap.extend(0..regions.len());
        std::iter::from_fn(|| heap.pop())
            .take(self.max_regions)
            .map(|i| &regions[i])
            .collect()
    }

    /// 包围盒内的所有候选左上角, 先行 (y) 后列 (x).
    ///
    /// 候选覆盖 `x ∈ [bx, bx + bw)`, `y ∈ [by, by + bh)`, 步长 `P / 2`.
    pub fn candidates(&self, bbox: BoundingBox) -> impl Iterator<Item = LocalPoint> {
        let step = self.stride().max(1);
        let xs = (bbox.x..bbox.right()).step_by(step);
        let ys = (bbox.y..bbox.bottom()).step_by(step);
        iproduct!(ys, xs).map(|(y, x)| LocalPoint::new(x, y))
    }

    /// 判定左上角为 `corner` 的窗口.
    ///
    /// `rgb` 为 `(高, 宽, 3)`, 与 `mask` 的形状必须一致, 否则返回
    /// `Err(ShapeError::ShapeMismatch)`; 窗口越界不是错误.
    pub fn evaluate(
        &self,
        rgb: ArrayView3<u8>,
        mask: &TissueMask,
        corner: LocalPoint,
        offset: LevelPoint,
    ) -> ShapeResult<CandidateOutcome> {
        check_aligned(&rgb, mask)?;
        let (h, w, _) = rgb.dim();
        let p = self.patch_size;
        let (x, y) = match (usize::try_from(corner.x), usize::try_from(corner.y)) {
            (Ok(x), Ok(y)) if x + p <= w && y + p <= h => (x, y),
            _ => return Ok(CandidateOutcome::BoundaryClipped),
        };

        let block = rgb.slice(s![y..y + p, x..x + p, ..]);
        let mask_block = mask.view().slice_move(s![y..y + p, x..x + p]);
        let mut covered = 0usize;
        Zip::from(&mask_block)
            .and(block.lanes(Axis(2)))
            .for_each(|&m, px| {
                if is_tissue(m) && rgb_to_gray([px[0], px[1], px[2]]) != 0 {
                    covered += 1;
                }
            });

        if (covered as f64) < self.min_covered() {
            return Ok(CandidateOutcome::LowOccupancy { covered });
        }
        Ok(CandidateOutcome::Accepted(Patch {
            pixels: block.to_owned(),
            local: corner,
            global: corner.globalize(offset),
            covered,
        }))
    }

    /// 在一个 section 上采样.
    ///
    /// 不同区域的包围盒可能重叠, 此时同一窗口会被重复接受, 与逐区域处理的语义一致.
    pub fn sample(
        &self,
        rgb: ArrayView3<u8>,
        regions: &[TissueRegion],
        mask: &TissueMask,
        offset: LevelPoint,
    ) -> ShapeResult<Sampling> {
        check_aligned(&rgb, mask)?;
        let mut ans = Sampling::default();
        for (rank, region) in self.rank_regions(regions).into_iter().enumerate() {
            let before = ans.patches.len();
            for corner in self.candidates(region.bbox()) {
                ans.candidates += 1;
                match self.evaluate(rgb.view(), mask, corner, offset)? {
                    CandidateOutcome::Accepted(patch) => ans.patches.push(patch),
                    CandidateOutcome::BoundaryClipped => ans.clipped += 1,
                    CandidateOutcome::LowOccupancy { .. } => ans.rejected += 1,
                }
            }
            log::debug!(
                "region #{rank} {:?} (area {}): {} patch(es)",
                region.bbox().as_tuple(),
                region.area(),
                ans.patches.len() - before
            );
        }
        Ok(ans)
    }
}

/// `rgb` 必须是 3 通道, 且与 `mask` 空间对齐.
fn check_aligned(rgb: &ArrayView3<u8>, mask: &TissueMask) -> ShapeResult<()> {
    let (h, w, c) = rgb.dim();
    if c != RGB_CHANNELS {
        return Err(ShapeError::InvalidImageShape {
            expected: RGB_CHANNELS,
            found: rgb.shape().to_vec(),
        });
    }
    if (h, w) != mask.shape() {
        return Err(ShapeError::ShapeMismatch {
            image: (h, w),
            mask: mask.shape(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::gray::PIXEL_WHITE;
    use ndarray::{s, Array2, Array3};

    fn rect_region(x: i64, y: i64, w: i64, h: i64) -> TissueRegion {
        let (r, b) = (x + w - 1, y + h - 1);
        TissueRegion::new(
            [(x, y), (r, y), (r, b), (x, b)]
                .into_iter()
                .map(LocalPoint::from)
                .collect(),
        )
    }

    fn canvas(h: usize, w: usize) -> (Array3<u8>, Array2<u8>) {
        (Array3::from_elem((h, w, 3), 180), Array2::zeros((h, w)))
    }

    #[test]
    fn test_candidate_grid() {
        let sampler = PatchSampler::new(100, 0.5, 5);
        let corners: Vec<_> = sampler
            .candidates(BoundingBox::new(100, 100, 300, 300))
            .collect();
        assert_eq!(corners.len(), 36);
        let expected = [100, 150, 200, 250, 300, 350];
        for (i, c) in corners.iter().enumerate() {
            assert_eq!(c.y, expected[i / 6]);
            assert_eq!(c.x, expected[i % 6]);
        }
    }

    #[test]
    fn test_rank_regions() {
        let regions = vec![
            rect_region(0, 0, 3, 3),
            rect_region(0, 0, 9, 9),
            rect_region(0, 0, 5, 5),
            rect_region(50, 50, 5, 5),
        ];
        let sampler = PatchSampler::new(10, 0.5, 3);
        let ranked: Vec<_> = sampler
            .rank_regions(&regions)
            .into_iter()
            .map(|r| r.bbox().as_tuple())
            .collect();
        // 面积相同时保持原顺序.
        assert_eq!(ranked, [(0, 0, 9, 9), (0, 0, 5, 5), (50, 50, 5, 5)]);
        assert!(sampler.rank_regions(&[]).is_empty());
    }

    #[test]
    fn test_sixth_region_is_never_sampled() {
        let (rgb, mut mask) = canvas(200, 400);
        // 边长 30, 28, .., 20 的六个区域.
        let regions: Vec<_> = (0..6)
            .map(|i| {
                let (x, side) = (10 + 60 * i, 30 - 2 * i);
                mask.slice_mut(s![10..10 + side, x..x + side]).fill(PIXEL_WHITE);
                rect_region(x as i64, 10, side as i64, side as i64)
            })
            .collect();
        let mask = TissueMask::from_raw(mask);
        let sampler = PatchSampler::new(10, 0.5, 5);
        let out = sampler
            .sample(rgb.view(), &regions, &mask, LevelPoint::default())
            .unwrap();
        assert!(!out.patches.is_empty());
        let smallest = regions[5].bbox();
        assert!(out
            .patches
            .iter()
            .all(|p| p.local().x < smallest.x || p.local().x >= smallest.right()));
        assert!(out.patches.iter().any(|p| p.local().x == 250));
    }

    #[test]
    fn test_accepted_patch_invariants() {
        let (rgb, mut mask) = canvas(120, 120);
        mask.slice_mut(s![20..100, 10..90]).fill(PIXEL_WHITE);
        let mask = TissueMask::from_raw(mask);
        let regions = [rect_region(10, 20, 80, 80)];
        let offset = LevelPoint::new(500, 1500);
        let out = PatchSampler::new(40, 0.5, 5)
            .sample(rgb.view(), &regions, &mask, offset)
            .unwrap();

        // x ∈ {10, 30, 50, 70}, y ∈ {20, 40, 60, 80}, 均不越界.
        assert_eq!(out.candidates, 16);
        assert_eq!(out.clipped, 0);
        for p in &out.patches {
            assert_eq!(p.pixels().dim(), (40, 40, 3));
            assert!(p.occupancy() >= 0.5);
            assert_eq!(p.global(), offset + p.local());
        }
        // (70, 80): 覆盖 20 x 20 = 400 < 800.
        assert!(out.patches.iter().all(|p| p.local() != LocalPoint::new(70, 80)));
        assert_eq!(out.patches.len() + out.rejected, 16);
    }

    #[test]
    fn test_boundary_clipped() {
        let (rgb, mut mask) = canvas(50, 50);
        mask.fill(PIXEL_WHITE);
        let mask = TissueMask::from_raw(mask);
        let sampler = PatchSampler::new(20, 0.5, 5);
        let at = |x, y| {
            sampler
                .evaluate(rgb.view(), &mask, LocalPoint::new(x, y), LevelPoint::default())
                .unwrap()
        };
        assert!(matches!(at(30, 30), CandidateOutcome::Accepted(_)));
        assert_eq!(at(31, 0), CandidateOutcome::BoundaryClipped);
        assert_eq!(at(0, 45), CandidateOutcome::BoundaryClipped);
        assert_eq!(at(-1, 0), CandidateOutcome::BoundaryClipped);
    }

    #[test]
    fn test_black_pixels_do_not_count() {
        let (mut rgb, mut mask) = canvas(20, 20);
        mask.fill(PIXEL_WHITE);
        // 左半边为纯黑 (例如超出切片的透明区域).
        rgb.slice_mut(s![.., ..10, ..]).fill(0);
        let mask = TissueMask::from_raw(mask);
        let sampler = PatchSampler::new(20, 0.5, 5);
        let outcome = sampler
            .evaluate(rgb.view(), &mask, LocalPoint::new(0, 0), LevelPoint::default())
            .unwrap();
        // 恰好一半.
        assert!(matches!(outcome, CandidateOutcome::Accepted(ref p) if p.covered() == 200));

        let strict = PatchSampler::new(20, 0.51, 5);
        assert_eq!(
            strict
                .evaluate(rgb.view(), &mask, LocalPoint::new(0, 0), LevelPoint::default())
                .unwrap(),
            CandidateOutcome::LowOccupancy { covered: 200 }
        );
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        let rgb = Array3::<u8>::zeros((10, 12, 3));
        let mask = TissueMask::empty((10, 10));
        let sampler = PatchSampler::new(4, 0.5, 5);
        assert_eq!(
            sampler.evaluate(rgb.view(), &mask, LocalPoint::new(0, 0), LevelPoint::default()),
            Err(ShapeError::ShapeMismatch {
                image: (10, 12),
                mask: (10, 10)
            })
        );
        assert!(sampler
            .sample(rgb.view(), &[], &mask, LevelPoint::default())
            .is_err());
    }

    #[test]
    fn test_empty_regions_give_no_patches() {
        let (rgb, mask) = canvas(30, 30);
        let out = PatchSampler::new(10, 0.5, 5)
            .sample(rgb.view(), &[], &TissueMask::from_raw(mask), LevelPoint::default())
            .unwrap();
        assert!(out.patches.is_empty());
        assert_eq!(out.candidates, 0);
    }
}
