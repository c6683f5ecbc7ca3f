//! 逐 section 的 patch 提取流水线.
//!
//! 每个 section 依次经过: 读取区域 -> 颜色空间转换 -> 组织分割 -> patch 采样
//! -> 肿瘤重叠面积计算 -> 交给 [`SectionSink`]. 一个 section 的所有大块缓冲区
//! (原始区域, HSV, RGB, 掩码) 都在交付后立即释放, 不会在 section 之间累积.
//!
//! # 错误传播
//!
//! - 读取区域失败 ([`SlideError`]): 中止整个运行.
//! - 形状错误 ([`crate::ShapeError`]): 只影响该 section, 记录在 [`RunSummary`] 中.
//! - 持久化失败 ([`crate::SinkError`]): 中止整个运行, 已交付的 section 不受影响.

mod save;
mod sink;

pub use save::{DiskWriter, ImgWriteRaw};
pub use sink::{CollectedSection, PatchCollector, SectionSink};

use crate::annotation::{calc_tumor_area, AnnotationSet, TumorOverlap, TumorRegion};
use crate::color::ColorSpaces;
use crate::config::PipelineConfig;
use crate::consts::RGB_CHANNELS;
use crate::coords::{Level, LevelPoint};
use crate::error::*;
use crate::grid::{Section, SectionGrid};
use crate::patch::{Patch, PatchSampler};
use crate::slide::SlideSource;
use crate::tissue::{TissueMask, TissueSegmenter};
use ndarray::{Array4, Axis};
use std::time::{Duration, Instant};

/// 一条 patch 坐标记录, 对应输出 csv 的一行.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PatchRecord {
    /// 全局层级坐标 x.
    pub coord_x: i64,
    /// 全局层级坐标 y.
    pub coord_y: i64,
    /// 与标注并集的重叠面积 (像素). 无标注时为 0.
    pub tumor_area: f64,
    /// `tumor_area / (P * P)`.
    #[cfg_attr(feature = "serde", serde(rename = "tumor_%"))]
    pub tumor_pct: f64,
}

/// 一个 section 的全部产出. 由 [`SectionSink`] 消费.
#[derive(Clone, Debug)]
pub struct SectionOutput {
    section: Section,
    level: Level,
    patch_size: usize,
    patches: Vec<Patch>,
    overlap: Option<TumorOverlap>,
    mask: TissueMask,
    regions: usize,
    candidates: usize,
    clipped: usize,
    rejected: usize,
}

impl SectionOutput {
    /// 所属 section.
    #[inline]
    pub fn section(&self) -> &Section {
        &self.section
    }

    /// section 编号.
    #[inline]
    pub fn id(&self) -> String {
        self.section.id()
    }

    /// 工作层级.
    #[inline]
    pub fn level(&self) -> Level {
        self.level
    }

    /// patch 边长 `P`.
    #[inline]
    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    /// 被接受的 patch.
    #[inline]
    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// 取出所有 patch.
    #[inline]
    pub fn into_patches(self) -> Vec<Patch> {
        self.patches
    }

    /// 是否没有任何 patch.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// section 的组织掩码.
    #[inline]
    pub fn mask(&self) -> &TissueMask {
        &self.mask
    }

    /// 重叠面积映射. 切片没有标注时为 `None`.
    #[inline]
    pub fn overlap(&self) -> Option<&TumorOverlap> {
        self.overlap.as_ref()
    }

    /// 分割得到的外轮廓个数.
    #[inline]
    pub fn region_count(&self) -> usize {
        self.regions
    }

    /// 枚举的候选窗口个数.
    #[inline]
    pub fn candidate_count(&self) -> usize {
        self.candidates
    }

    /// 因越界和有效像素不足被丢弃的窗口个数.
    #[inline]
    pub fn dropped_counts(&self) -> (usize, usize) {
        (self.clipped, self.rejected)
    }

    /// 与 [`Self::patches`] 一一对应的坐标记录.
    pub fn records(&self) -> Vec<PatchRecord> {
        let area = (self.patch_size * self.patch_size) as f64;
        self.patches
            .iter()
            .map(|p| {
                let g = p.global();
                let tumor_area = self.overlap.as_ref().map_or(0.0, |o| o.get(g));
                PatchRecord {
                    coord_x: g.x,
                    coord_y: g.y,
                    tumor_area,
                    tumor_pct: tumor_area / area,
                }
            })
            .collect()
    }

    /// 所有 patch 拼接成的 `(n, P, P, 3)` 数组.
    pub fn stacked_pixels(&self) -> Array4<u8> {
        let p = self.patch_size;
        let mut whole = Array4::<u8>::zeros((self.patches.len(), p, p, RGB_CHANNELS));
        for (mut dst, patch) in whole.axis_iter_mut(Axis(0)).zip(&self.patches) {
            dst.assign(patch.pixels());
        }
        whole
    }
}

/// 单个 section 的运行报告.
#[derive(Clone, Debug)]
pub struct SectionReport {
    /// section 编号.
    pub id: String,
    /// 外轮廓个数.
    pub regions: usize,
    /// 候选窗口个数.
    pub candidates: usize,
    /// 被接受的 patch 个数.
    pub patches: usize,
    /// 耗时.
    pub elapsed: Duration,
    /// 若该 section 失败, 记录失败原因.
    pub failure: Option<String>,
}

/// 一次运行的汇总.
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// 工作层级.
    pub level: Level,
    /// 层级尺寸 (宽, 高).
    pub dimensions: (u32, u32),
    /// 按处理顺序排列的 section 报告.
    pub sections: Vec<SectionReport>,
    /// 总耗时.
    pub elapsed: Duration,
}

impl RunSummary {
    /// 所有 section 的 patch 总数.
    pub fn total_patches(&self) -> usize {
        self.sections.iter().map(|s| s.patches).sum()
    }

    /// 失败的 section.
    pub fn failed(&self) -> impl Iterator<Item = &SectionReport> + '_ {
        self.sections.iter().filter(|s| s.failure.is_some())
    }

    /// 耗时最长的 section.
    pub fn slowest(&self) -> Option<&SectionReport> {
        self.sections.iter().max_by_key(|s| s.elapsed)
    }
}

/// 一张切片上的流水线.
///
/// 构建后只读: 多个 section 可以共享同一个实例并发处理.
pub struct SectionPipeline<S> {
    slide: S,
    config: PipelineConfig,
    grid: SectionGrid,
    segmenter: TissueSegmenter,
    sampler: PatchSampler,
    tumor: Option<TumorRegion>,
}

impl<S: SlideSource> SectionPipeline<S> {
    /// 校验配置, 并预先计算标注多边形的并集.
    ///
    /// 工作层级不存在时返回 `Err(PipelineError::Slide)`.
    pub fn new(
        slide: S,
        config: PipelineConfig,
        annotation: Option<&AnnotationSet>,
    ) -> PipelineResult<Self> {
        config.validate()?;
        let level = config.level();
        let dims = slide.dimensions(level)?;
        let grid = SectionGrid::new(dims, config.split)?;
        let segmenter = TissueSegmenter::from_config(&config)?;
        let sampler = PatchSampler::from_config(&config);
        let tumor = annotation.map(|a| TumorRegion::new(&a.polygons(level)));
        log::info!(
            "{level} size (w, h): {dims:?}, {} section(s) of {:?}",
            grid.len(),
            grid.section_size()
        );
        Ok(Self {
            slide,
            config,
            grid,
            segmenter,
            sampler,
            tumor,
        })
    }

    /// 切分网格.
    #[inline]
    pub fn grid(&self) -> &SectionGrid {
        &self.grid
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 切片后端.
    #[inline]
    pub fn slide(&self) -> &S {
        &self.slide
    }

    /// 读取 section 并转换为三种颜色表示.
    pub fn load_section(&self, section: &Section) -> SectionResult<ColorSpaces> {
        let level = self.config.level();
        let rgba = self
            .slide
            .read_region(section.level0_origin(level), level, section.size())?;
        Ok(ColorSpaces::from_rgba(rgba.view())?)
    }

    /// 处理单个 section.
    pub fn process_section(&self, section: &Section) -> SectionResult<SectionOutput> {
        let colors = self.load_section(section)?;
        let segmentation = self.segmenter.segment(colors.hsv().view())?;
        // 只保留 RGB, 释放灰度和 HSV.
        let rgb = colors.into_rgb();
        let (regions, mask) = segmentation.into_parts();
        let sampling = self
            .sampler
            .sample(rgb.view(), &regions, &mask, section.offset())?;
        drop(rgb);

        let p = self.config.patch_size;
        let overlap = self
            .tumor
            .as_ref()
            .map(|t| calc_tumor_area(t, sampling.patches.iter().map(Patch::global), p));
        log::debug!(
            "section {}: {} candidate(s), {} clipped, {} below occupancy",
            section.id(),
            sampling.candidates,
            sampling.clipped,
            sampling.rejected
        );
        Ok(SectionOutput {
            section: *section,
            level: self.config.level(),
            patch_size: p,
            patches: sampling.patches,
            overlap,
            mask,
            regions: regions.len(),
            candidates: sampling.candidates,
            clipped: sampling.clipped,
            rejected: sampling.rejected,
        })
    }

    /// 处理单个 section 并交付. 切片级错误与交付错误向上传播,
    /// 其余错误记录在报告中.
    fn drive<F>(&self, section: &Section, deliver: F) -> PipelineResult<SectionReport>
    where
        F: FnOnce(SectionOutput) -> SinkResult<()>,
    {
        let start = Instant::now();
        let id = section.id();
        let mut report = SectionReport {
            id: id.clone(),
            regions: 0,
            candidates: 0,
            patches: 0,
            elapsed: Duration::ZERO,
            failure: None,
        };
        match self.process_section(section) {
            Ok(output) => {
                report.regions = output.region_count();
                report.patches = output.patches().len();
                report.candidates = output.candidate_count();
                deliver(output).map_err(|source| PipelineError::Sink {
                    section: id.clone(),
                    source,
                })?;
            }
            Err(SectionError::Slide(e)) => return Err(PipelineError::Slide(e)),
            Err(e) => {
                log::warn!("section {id} skipped: {e}");
                report.failure = Some(e.to_string());
            }
        }
        report.elapsed = start.elapsed();
        log::info!(
            "section {id}: {} patch(es) from {} region(s) in {:.2?}",
            report.patches,
            report.regions,
            report.elapsed
        );
        Ok(report)
    }

    /// 按列优先顺序逐个处理所有 section.
    pub fn run<K: SectionSink + ?Sized>(&self, sink: &mut K) -> PipelineResult<RunSummary> {
        let start = Instant::now();
        let mut sections = Vec::with_capacity(self.grid.len());
        for section in self.grid.sections() {
            sections.push(self.drive(&section, |out| sink.accept(out))?);
        }
        Ok(self.summarize(sections, start.elapsed()))
    }

    fn summarize(&self, sections: Vec<SectionReport>, elapsed: Duration) -> RunSummary {
        let level = self.config.level();
        RunSummary {
            level,
            dimensions: self.slide.level_dimensions(level).unwrap_or_default(),
            sections,
            elapsed,
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
        use std::sync::Mutex;
    }
}

/// 并发操作部分
#[cfg(feature = "rayon")]
impl<S: SlideSource + Sync> SectionPipeline<S> {
    /// 借助 `rayon`, 并行地处理所有 section.
    ///
    /// `sink` 的调用被互斥锁串行化, 调用顺序不确定;
    /// 返回的报告仍按列优先顺序排列.
    pub fn par_run<K: SectionSink + Send + ?Sized>(
        &self,
        sink: &mut K,
    ) -> PipelineResult<RunSummary> {
        let start = Instant::now();
        let sink = Mutex::new(sink);
        let sections: Vec<Section> = self.grid.sections().collect();
        let reports = sections
            .into_par_iter()
            .map(|section| {
                self.drive(&section, |out| {
                    let mut guard = sink.lock().unwrap_or_else(|e| e.into_inner());
                    guard.accept(out)
                })
            })
            .collect::<PipelineResult<Vec<_>>>()?;
        Ok(self.summarize(reports, start.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::{Level0Point, LocalPoint};
    use crate::slide::RasterSlide;
    use image::{Rgba, RgbaImage};
    use ndarray::Array3;

    const PINK: Rgba<u8> = Rgba([200, 100, 150, 255]);

    /// 白色背景上的两块组织: 一块在 section `00`, 一块在 section `10`.
    fn slide() -> RasterSlide {
        let mut img = RgbaImage::from_pixel(400, 400, Rgba([255, 255, 255, 255]));
        for (x0, y0, x1, y1) in [(50, 60, 170, 160), (250, 20, 330, 100)] {
            for y in y0..y1 {
                for x in x0..x1 {
                    img.put_pixel(x, y, PINK);
                }
            }
        }
        RasterSlide::from_rgba(img)
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            patch_size: 40,
            split: 2,
            level: 0,
            ..Default::default()
        }
    }

    fn tumor() -> AnnotationSet {
        AnnotationSet::from_groups(vec![vec![
            Level0Point::new(50, 60),
            Level0Point::new(170, 60),
            Level0Point::new(170, 160),
            Level0Point::new(50, 160),
        ]])
    }

    #[test]
    fn test_run_collects_all_sections() {
        let pipeline = SectionPipeline::new(slide(), config(), Some(&tumor())).unwrap();
        let mut collector = PatchCollector::new().with_pixels(true);
        let summary = pipeline.run(&mut collector).unwrap();

        assert_eq!(summary.sections.len(), 4);
        let ids: Vec<_> = summary.sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["00", "01", "10", "11"]);
        assert_eq!(summary.failed().count(), 0);
        assert_eq!(summary.dimensions, (400, 400));

        let by_id = |id: &str| summary.sections.iter().find(|s| s.id == id).unwrap().patches;
        assert!(by_id("00") > 0);
        assert!(by_id("10") > 0);
        assert_eq!(by_id("01"), 0);
        assert_eq!(by_id("11"), 0);
        assert_eq!(summary.total_patches(), collector.total_patches());

        for sec in collector.sections() {
            for (record, pixels) in sec.records.iter().zip(sec.pixels.iter()) {
                assert_eq!(pixels.dim(), (40, 40, 3));
                assert!(record.tumor_area <= 1600.0);
                assert!((record.tumor_pct - record.tumor_area / 1600.0).abs() < 1e-12);
            }
        }

        let s00 = collector.sections().iter().find(|s| s.id == "00").unwrap();
        assert!(s00.records.iter().all(|r| r.tumor_area > 0.0));
        let s10 = collector.sections().iter().find(|s| s.id == "10").unwrap();
        assert_eq!(s10.offset, LevelPoint::new(200, 0));
        assert!(s10.records.iter().all(|r| r.tumor_area == 0.0));
        // 全局坐标落在 section 10 的组织上.
        assert!(s10.records.iter().all(|r| (200..400).contains(&r.coord_x)));
    }

    #[test]
    fn test_process_section_coordinates() {
        let pipeline = SectionPipeline::new(slide(), config(), None).unwrap();
        let section = pipeline.grid().section(1, 0).unwrap();
        let out = pipeline.process_section(&section).unwrap();
        assert_eq!(out.id(), "10");
        assert_eq!(out.region_count(), 1);
        assert_eq!(out.mask().shape(), (200, 200));
        assert!(out.overlap().is_none());
        for p in out.patches() {
            assert_eq!(p.global(), section.offset() + p.local());
            assert!(p.occupancy() >= 0.5);
        }
        // 区域包围盒 (50, 20, 80, 80), 左上角的窗口完全落在组织上.
        assert!(out.patches().iter().any(|p| p.local() == LocalPoint::new(50, 20)));
        assert!(out.records().iter().all(|r| r.tumor_area == 0.0));

        let whole = out.stacked_pixels();
        assert_eq!(whole.dim(), (out.patches().len(), 40, 40, 3));
        assert_eq!(whole[(0, 0, 0, 0)], 200);
    }

    #[test]
    fn test_empty_section_still_delivered() {
        let pipeline = SectionPipeline::new(slide(), config(), None).unwrap();
        let mut seen = Vec::new();
        let mut sink = |out: SectionOutput| -> SinkResult<()> {
            seen.push((out.id(), out.is_empty()));
            Ok(())
        };
        pipeline.run(&mut sink).unwrap();
        assert_eq!(
            seen,
            [
                ("00".to_string(), false),
                ("01".to_string(), true),
                ("10".to_string(), false),
                ("11".to_string(), true)
            ]
        );
    }

    #[test]
    fn test_invalid_config_and_level() {
        let bad = PipelineConfig {
            split: 0,
            ..config()
        };
        assert!(matches!(
            SectionPipeline::new(slide(), bad, None),
            Err(PipelineError::Config(ConfigError::ZeroSplit))
        ));
        let deep = PipelineConfig {
            level: 20,
            ..config()
        };
        assert!(matches!(
            SectionPipeline::new(slide(), deep, None),
            Err(PipelineError::Slide(SlideError::LevelOutOfRange(20, _)))
        ));
    }

    /// 返回 3 通道区域的错误后端.
    struct ThreeChannel;

    impl SlideSource for ThreeChannel {
        fn level_count(&self) -> u32 {
            1
        }

        fn level_dimensions(&self, level: Level) -> Option<(u32, u32)> {
            (level.index() == 0).then_some((100, 100))
        }

        fn read_region(
            &self,
            _origin: Level0Point,
            _level: Level,
            (w, h): (u32, u32),
        ) -> SlideResult<Array3<u8>> {
            Ok(Array3::zeros((h as usize, w as usize, 3)))
        }
    }

    /// 第 `fail_at` 次读取失败的后端.
    struct Flaky {
        inner: RasterSlide,
        fail_at: usize,
        reads: std::sync::atomic::AtomicUsize,
    }

    impl SlideSource for Flaky {
        fn level_count(&self) -> u32 {
            self.inner.level_count()
        }

        fn level_dimensions(&self, level: Level) -> Option<(u32, u32)> {
            self.inner.level_dimensions(level)
        }

        fn read_region(
            &self,
            origin: Level0Point,
            level: Level,
            size: (u32, u32),
        ) -> SlideResult<Array3<u8>> {
            use std::sync::atomic::Ordering;
            if self.reads.fetch_add(1, Ordering::SeqCst) == self.fail_at {
                return Err(SlideError::Io(std::io::Error::other("disk gone")));
            }
            self.inner.read_region(origin, level, size)
        }
    }

    #[test]
    fn test_shape_errors_are_isolated() {
        let pipeline = SectionPipeline::new(ThreeChannel, config(), None).unwrap();
        let mut collector = PatchCollector::new();
        let summary = pipeline.run(&mut collector).unwrap();
        assert_eq!(summary.failed().count(), 4);
        assert!(collector.sections().is_empty());
        assert!(summary.sections[0]
            .failure
            .as_deref()
            .is_some_and(|f| f.contains("channel")));
    }

    #[test]
    fn test_slide_error_aborts_but_keeps_delivered() {
        let flaky = Flaky {
            inner: slide(),
            fail_at: 2,
            reads: Default::default(),
        };
        let pipeline = SectionPipeline::new(flaky, config(), None).unwrap();
        let mut collector = PatchCollector::new();
        let err = pipeline.run(&mut collector).unwrap_err();
        assert!(matches!(err, PipelineError::Slide(SlideError::Io(_))));
        let ids: Vec<_> = collector.sections().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["00", "01"]);
    }

    #[test]
    fn test_sink_error_aborts() {
        let pipeline = SectionPipeline::new(slide(), config(), None).unwrap();
        let mut calls = 0;
        let mut sink = |_: SectionOutput| -> SinkResult<()> {
            calls += 1;
            if calls == 2 {
                return Err(SinkError::Io(std::io::Error::other("full")));
            }
            Ok(())
        };
        let err = pipeline.run(&mut sink).unwrap_err();
        assert!(matches!(err, PipelineError::Sink { ref section, .. } if section == "01"));
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_par_run_matches_run() {
        let pipeline = SectionPipeline::new(slide(), config(), Some(&tumor())).unwrap();
        let mut seq = PatchCollector::new();
        let mut par = PatchCollector::new();
        let a = pipeline.run(&mut seq).unwrap();
        let b = pipeline.par_run(&mut par).unwrap();
        assert_eq!(a.total_patches(), b.total_patches());
        let ids = |s: &RunSummary| s.sections.iter().map(|r| r.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));

        let mut seq = seq.into_sections();
        let mut par = par.into_sections();
        seq.sort_by(|x, y| x.id.cmp(&y.id));
        par.sort_by(|x, y| x.id.cmp(&y.id));
        for (x, y) in seq.iter().zip(&par) {
            assert_eq!(x.records, y.records);
        }
    }
}
