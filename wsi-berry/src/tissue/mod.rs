//! 基于 HSV 阈值与形态学操作的组织分割.
//!
//! 流程:
//!
//! 1. 对 HSV 三个通道做闭区间阈值, 三者同时落在范围内的像素为组织.
//! 2. 方形结构元闭运算, 填补组织内部的小缝隙.
//! 3. 方形结构元开运算, 去除孤立的小噪点.
//! 4. 提取最外层轮廓 (不含内部嵌套轮廓), 计算包围盒与面积.
//! 5. 填充每个外轮廓内部, 得到组织掩码.

mod contour;
mod mask;

pub use contour::{BoundingBox, TissueRegion};
pub use mask::{CompactMask, TissueMask};

use crate::config::PipelineConfig;
use crate::consts::gray::{PIXEL_BLACK, PIXEL_WHITE};
use crate::consts::*;
use crate::coords::LocalPoint;
use crate::error::{ConfigError, ShapeError, ShapeResult};
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use ndarray::{Array2, ArrayView2, ArrayView3, Axis, Zip};

/// HSV 阈值窗口, 三个通道各自的闭区间 `[lower, upper]`.
///
/// 该窗口是只读的. 若要修改窗口参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct HsvRange {
    lower: [u8; 3],
    upper: [u8; 3],
}

impl Default for HsvRange {
    fn default() -> Self {
        Self::tissue_default()
    }
}

impl HsvRange {
    /// 构建阈值窗口. 任一通道下限大于上限时返回 `None`.
    pub fn new(lower: [u8; 3], upper: [u8; 3]) -> Option<Self> {
        lower
            .iter()
            .zip(upper.iter())
            .all(|(l, u)| l <= u)
            .then_some(Self { lower, upper })
    }

    /// 经验组织窗口 `(20, 20, 20)` - `(200, 200, 200)`.
    ///
    /// 排除了接近白色的玻片背景 (V 过高) 和接近黑色的扫描空白 (V 过低).
    #[inline]
    pub const fn tissue_default() -> Self {
        Self {
            lower: DEFAULT_HSV_LOWER,
            upper: DEFAULT_HSV_UPPER,
        }
    }

    /// 下限.
    #[inline]
    pub fn lower(&self) -> [u8; 3] {
        self.lower
    }

    /// 上限.
    #[inline]
    pub fn upper(&self) -> [u8; 3] {
        self.upper
    }

    /// 像素的三个通道是否都落在窗口内 (含边界)?
    #[inline]
    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| self.lower[i] <= hsv[i] && hsv[i] <= self.upper[i])
    }

    /// 窗口内为 255, 窗口外为 0.
    #[inline]
    pub fn eval(&self, hsv: [u8; 3]) -> u8 {
        if self.contains(hsv) {
            PIXEL_WHITE
        } else {
            PIXEL_BLACK
        }
    }
}

/// 方形结构元边长 `2k + 1` 对应的 `imageproc` 半径 `k`.
#[inline]
fn kernel_radius(size: u16) -> u8 {
    debug_assert!(size % 2 == 1 && size <= MAX_KERNEL);
    ((size.max(1) - 1) / 2).min(u8::MAX as u16) as u8
}

/// 组织分割器. 无内部状态, 同一输入总是得到相同输出.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TissueSegmenter {
    range: HsvRange,
    close_radius: u8,
    open_radius: u8,
}

impl Default for TissueSegmenter {
    fn default() -> Self {
        Self {
            range: HsvRange::tissue_default(),
            close_radius: kernel_radius(DEFAULT_CLOSE_KERNEL as u16),
            open_radius: kernel_radius(DEFAULT_OPEN_KERNEL as u16),
        }
    }
}

impl TissueSegmenter {
    /// 以阈值窗口和两个结构元边长构建. 边长必须为不超过 511 的正奇数.
    pub fn new(range: HsvRange, close_kernel: u16, open_kernel: u16) -> Result<Self, ConfigError> {
        for k in [close_kernel, open_kernel] {
            if k % 2 == 0 || k > MAX_KERNEL {
                return Err(ConfigError::BadKernel(k, MAX_KERNEL));
            }
        }
        Ok(Self {
            range,
            close_radius: kernel_radius(close_kernel),
            open_radius: kernel_radius(open_kernel),
        })
    }

    /// 从流水线配置构建.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        let range = HsvRange::new(config.hsv_lower, config.hsv_upper)
            .ok_or(ConfigError::InvertedHsvRange(config.hsv_lower, config.hsv_upper))?;
        Self::new(range, config.close_kernel, config.open_kernel)
    }

    /// 阈值窗口.
    #[inline]
    pub fn range(&self) -> HsvRange {
        self.range
    }

    /// 阈值化, 得到 0/255 的二值图像.
    ///
    /// `hsv` 不是 3 通道时返回 `Err(ShapeError::InvalidImageShape)`.
    pub fn threshold(&self, hsv: ArrayView3<u8>) -> ShapeResult<Array2<u8>> {
        if hsv.len_of(Axis(2)) != RGB_CHANNELS {
            return Err(ShapeError::InvalidImageShape {
                expected: RGB_CHANNELS,
                found: hsv.shape().to_vec(),
            });
        }
        let (h, w, _) = hsv.dim();
        let mut binary = Array2::<u8>::zeros((h, w));
        Zip::from(&mut binary)
            .and(hsv.lanes(Axis(2)))
            .for_each(|b, px| *b = self.range.eval([px[0], px[1], px[2]]));
        Ok(binary)
    }

    /// 先闭运算, 再开运算.
    pub fn clean(&self, binary: ArrayView2<u8>) -> Array2<u8> {
        let img = to_gray_image(binary);
        let closed = morphology::close(&img, Norm::LInf, self.close_radius);
        let opened = morphology::open(&closed, Norm::LInf, self.open_radius);
        from_gray_image(&opened)
    }

    /// 完整的分割流程.
    ///
    /// 不含组织的输入得到空的 [`Segmentation`], 而不是错误.
    pub fn segment(&self, hsv: ArrayView3<u8>) -> ShapeResult<Segmentation> {
        let binary = self.threshold(hsv)?;
        let cleaned = self.clean(binary.view());
        drop(binary);

        let regions: Vec<TissueRegion> = find_contours::<i32>(&to_gray_image(cleaned.view()))
            .into_iter()
            .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
            .filter(|c| !c.points.is_empty())
            .map(|c| {
                let points = c
                    .points
                    .iter()
                    .map(|p| LocalPoint::new(p.x as i64, p.y as i64))
                    .collect();
                TissueRegion::new(points)
            })
            .collect();

        let mask = TissueMask::from_binary(cleaned);
        log::debug!(
            "segmented {} region(s), {} tissue pixel(s)",
            regions.len(),
            mask.tissue_count()
        );
        Ok(Segmentation { regions, mask })
    }
}

/// 一个 section 的分割结果.
#[derive(Clone, Debug)]
pub struct Segmentation {
    /// 按轮廓提取顺序排列 (自上而下, 自左而右) 的外轮廓区域.
    regions: Vec<TissueRegion>,
    mask: TissueMask,
}

impl Segmentation {
    /// 所有外轮廓区域.
    #[inline]
    pub fn regions(&self) -> &[TissueRegion] {
        &self.regions
    }

    /// 组织掩码.
    #[inline]
    pub fn mask(&self) -> &TissueMask {
        &self.mask
    }

    /// 是否没有找到任何组织.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// 所有区域的包围盒, 与 [`Self::regions`] 顺序一致.
    pub fn bounding_boxes(&self) -> Vec<BoundingBox> {
        self.regions.iter().map(TissueRegion::bbox).collect()
    }

    /// 所有区域的压缩轮廓坐标, 与 [`Self::regions`] 顺序一致.
    pub fn contour_coords(&self) -> Vec<Vec<LocalPoint>> {
        self.regions.iter().map(TissueRegion::chain).collect()
    }

    /// 拆分为区域列表和掩码.
    #[inline]
    pub fn into_parts(self) -> (Vec<TissueRegion>, TissueMask) {
        (self.regions, self.mask)
    }
}

fn to_gray_image(a: ArrayView2<u8>) -> GrayImage {
    let (h, w) = a.dim();
    GrayImage::from_fn(w as u32, h as u32, |x, y| Luma([a[(y as usize, x as usize)]]))
}

fn from_gray_image(img: &GrayImage) -> Array2<u8> {
    let (w, h) = img.dimensions();
    Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
        img.get_pixel(x as u32, y as u32).0[0]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array3};

    const TISSUE: [u8; 3] = [100, 100, 100];

    fn hsv_canvas(h: usize, w: usize) -> Array3<u8> {
        Array3::zeros((h, w, 3))
    }

    fn paint(hsv: &mut Array3<u8>, ys: std::ops::Range<usize>, xs: std::ops::Range<usize>) {
        for y in ys {
            for x in xs.clone() {
                for c in 0..3 {
                    hsv[(y, x, c)] = TISSUE[c];
                }
            }
        }
    }

    #[test]
    fn test_hsv_range() {
        let r = HsvRange::tissue_default();
        assert!(r.contains([20, 20, 20]));
        assert!(r.contains([200, 200, 200]));
        assert!(!r.contains([19, 100, 100]));
        assert!(!r.contains([100, 100, 201]));
        assert_eq!(r.eval([50, 60, 70]), 255);
        assert_eq!(r.eval([0, 0, 0]), 0);
        assert!(HsvRange::new([10, 10, 10], [9, 20, 20]).is_none());
        assert_eq!(HsvRange::new([20; 3], [200; 3]), Some(r));
    }

    #[test]
    fn test_bad_kernels() {
        let r = HsvRange::default();
        assert_eq!(TissueSegmenter::new(r, 4, 5), Err(ConfigError::BadKernel(4, 511)));
        assert_eq!(TissueSegmenter::new(r, 15, 513), Err(ConfigError::BadKernel(513, 511)));
        assert_eq!(TissueSegmenter::new(r, 15, 5), Ok(TissueSegmenter::default()));
        assert_eq!(
            TissueSegmenter::from_config(&PipelineConfig::default()),
            Ok(TissueSegmenter::default())
        );
    }

    #[test]
    fn test_empty_segmentation() {
        let hsv = hsv_canvas(40, 50);
        let seg = TissueSegmenter::default().segment(hsv.view()).unwrap();
        assert!(seg.is_empty());
        assert!(seg.mask().is_background());
        assert_eq!(seg.mask().shape(), (40, 50));
    }

    #[test]
    fn test_single_blob() {
        let mut hsv = hsv_canvas(60, 60);
        paint(&mut hsv, 10..30, 15..40);
        let seg = TissueSegmenter::default().segment(hsv.view()).unwrap();
        assert_eq!(seg.regions().len(), 1);
        assert_eq!(seg.bounding_boxes(), [BoundingBox::new(15, 10, 25, 20)]);
        assert_eq!(seg.regions()[0].area(), (24 * 19) as f64);
        assert_eq!(seg.mask().tissue_count(), 25 * 20);
        // 压缩后的矩形轮廓只剩 4 个角点.
        assert_eq!(seg.contour_coords()[0].len(), 4);
    }

    #[test]
    fn test_speck_is_removed_and_blobs_are_separate() {
        let mut hsv = hsv_canvas(80, 120);
        paint(&mut hsv, 10..40, 10..40);
        paint(&mut hsv, 10..30, 70..100);
        // 3x3 的噪点在开运算中消失.
        paint(&mut hsv, 60..63, 60..63);
        let seg = TissueSegmenter::default().segment(hsv.view()).unwrap();
        assert_eq!(seg.regions().len(), 2);
        assert!(!seg.mask().is_tissue_at((61, 61)));
        let mut boxes = seg.bounding_boxes();
        boxes.sort_by_key(|b| b.x);
        assert_eq!(boxes[0], BoundingBox::new(10, 10, 30, 30));
        assert_eq!(boxes[1], BoundingBox::new(70, 10, 30, 20));
    }

    #[test]
    fn test_hole_is_filled_but_not_a_region() {
        let mut hsv = hsv_canvas(50, 50);
        paint(&mut hsv, 5..45, 5..45);
        hsv.slice_mut(s![15..35, 15..35, ..]).fill(0);
        let seg = TissueSegmenter::new(HsvRange::default(), 1, 1)
            .unwrap()
            .segment(hsv.view())
            .unwrap();
        // 只有外轮廓.
        assert_eq!(seg.regions().len(), 1);
        assert!(seg.mask().is_tissue_at((25, 25)));
        assert_eq!(seg.mask().tissue_count(), 40 * 40);
    }

    #[test]
    fn test_idempotent() {
        let mut hsv = hsv_canvas(64, 64);
        paint(&mut hsv, 3..20, 5..50);
        paint(&mut hsv, 30..60, 30..40);
        let seg = TissueSegmenter::default();
        let a = seg.segment(hsv.view()).unwrap();
        let b = seg.segment(hsv.view()).unwrap();
        assert_eq!(a.bounding_boxes(), b.bounding_boxes());
        assert_eq!(a.contour_coords(), b.contour_coords());
        assert_eq!(a.mask(), b.mask());
    }

    #[test]
    fn test_invalid_hsv_shape() {
        let hsv = Array3::<u8>::zeros((4, 4, 4));
        assert!(matches!(
            TissueSegmenter::default().segment(hsv.view()),
            Err(ShapeError::InvalidImageShape { expected: 3, .. })
        ));
    }
}
