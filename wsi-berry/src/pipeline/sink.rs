//! section 产出的消费者.

use super::{PatchRecord, SectionOutput};
use crate::coords::LevelPoint;
use crate::error::SinkResult;
use crate::patch::Patch;
use crate::tissue::CompactMask;
use ndarray::Array3;

/// 接收每个 section 的产出.
///
/// 流水线对每个处理成功的 section 调用一次 `accept`, 即使它没有任何 patch.
/// 返回 `Err` 会中止整个运行.
pub trait SectionSink {
    /// 消费一个 section 的产出.
    fn accept(&mut self, output: SectionOutput) -> SinkResult<()>;
}

impl<F> SectionSink for F
where
    F: FnMut(SectionOutput) -> SinkResult<()>,
{
    #[inline]
    fn accept(&mut self, output: SectionOutput) -> SinkResult<()> {
        self(output)
    }
}

/// 在内存中收集的单个 section.
#[derive(Clone, Debug)]
pub struct CollectedSection {
    /// section 编号.
    pub id: String,
    /// section 左上角的层级坐标.
    pub offset: LevelPoint,
    /// patch 坐标记录.
    pub records: Vec<PatchRecord>,
    /// patch 像素. 只在 [`PatchCollector::with_pixels`] 打开时非空.
    pub pixels: Vec<Array3<u8>>,
    /// 压缩后的组织掩码.
    pub mask: CompactMask,
}

/// 把所有 section 的产出收集到内存中.
///
/// 默认只保留坐标记录和压缩掩码, 不保留像素.
#[derive(Clone, Debug, Default)]
pub struct PatchCollector {
    keep_pixels: bool,
    sections: Vec<CollectedSection>,
}

impl PatchCollector {
    /// 空收集器.
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否同时保留 patch 像素.
    pub fn with_pixels(mut self, keep: bool) -> Self {
        self.keep_pixels = keep;
        self
    }

    /// 已收集的 section, 按交付顺序排列.
    #[inline]
    pub fn sections(&self) -> &[CollectedSection] {
        &self.sections
    }

    /// 取出已收集的 section.
    #[inline]
    pub fn into_sections(self) -> Vec<CollectedSection> {
        self.sections
    }

    /// 所有 section 的 patch 总数.
    pub fn total_patches(&self) -> usize {
        self.sections.iter().map(|s| s.records.len()).sum()
    }
}

impl SectionSink for PatchCollector {
    fn accept(&mut self, output: SectionOutput) -> SinkResult<()> {
        let mask = output.mask().compress()?;
        let records = output.records();
        let id = output.id();
        let offset = output.section().offset();
        let pixels = if self.keep_pixels {
            output.into_patches().into_iter().map(Patch::into_pixels).collect()
        } else {
            vec![]
        };
        log::debug!(
            "collected section {id}: {} patch(es), mask {} byte(s) compressed",
            records.len(),
            mask.compressed_len()
        );
        self.sections.push(CollectedSection {
            id,
            offset,
            records,
            pixels,
            mask,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SectionPipeline;
    use crate::slide::RasterSlide;
    use crate::PipelineConfig;
    use image::{Rgba, RgbaImage};

    fn pipeline() -> SectionPipeline<RasterSlide> {
        let mut img = RgbaImage::from_pixel(120, 120, Rgba([255, 255, 255, 255]));
        for y in 10..50 {
            for x in 10..50 {
                img.put_pixel(x, y, Rgba([200, 100, 150, 255]));
            }
        }
        let config = PipelineConfig {
            patch_size: 20,
            split: 1,
            level: 0,
            ..Default::default()
        };
        SectionPipeline::new(RasterSlide::from_rgba(img), config, None).unwrap()
    }

    #[test]
    fn test_collector_without_pixels() {
        let mut collector = PatchCollector::new();
        pipeline().run(&mut collector).unwrap();
        let [sec] = collector.sections() else {
            panic!("expected exactly one section");
        };
        assert_eq!(sec.id, "00");
        assert!(!sec.records.is_empty());
        assert!(sec.pixels.is_empty());

        let mask = sec.mask.decompress().unwrap();
        assert_eq!(mask.shape(), (120, 120));
        assert_eq!(mask.tissue_count(), 40 * 40);
    }

    #[test]
    fn test_collector_with_pixels() {
        let mut collector = PatchCollector::new().with_pixels(true);
        pipeline().run(&mut collector).unwrap();
        let sec = &collector.sections()[0];
        assert_eq!(sec.pixels.len(), sec.records.len());
        assert_eq!(collector.total_patches(), sec.records.len());
        // 窗口 (10, 10) 完全落在组织上.
        let first = &sec.records[0];
        assert_eq!((first.coord_x, first.coord_y), (10, 10));
        assert!(sec.pixels[0].iter().step_by(3).all(|&r| r == 200));
    }
}
