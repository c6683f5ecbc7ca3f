#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 对全切片病理图像 (WSI) 进行组织分割, 并在组织区域内提取定长 patch,
//! 同时计算每个 patch 与病理医生肿瘤标注的重叠面积.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 该 crate 不负责解码厂商私有的切片格式. 任何金字塔切片只要实现
//!   [`slide::SlideSource`] 即可接入; 自带的 [`slide::RasterSlide`]
//!   适用于 `image` 能解码的普通栅格图像.
//! 2. 千兆像素的切片无法一次性载入内存. 工作层级被切分为 `N * N` 个 section,
//!   每次只有一个 section (并行时每个线程一个) 驻留内存.
//!
//! # 流程
//!
//! ```text
//! slide --read_region--> RGBA --> RGB / Gray / HSV
//!   HSV  --threshold, close, open, contours--> regions + mask
//!   RGB + Gray + mask --sliding window--> patches
//!   annotations --union--> tumor region --intersect--> per-patch tumor area
//!   patches + records + mask --> SectionSink (memory / disk)
//! ```
//!
//! # 开发计划
//!
//! ### 切片访问与 section 网格 ✅
//!
//! 实现位于 `wsi-berry/src/slide` 与 `wsi-berry/src/grid.rs`.
//!
//! ### OpenCV 兼容的颜色空间转换 ✅
//!
//! 灰度与 HSV 的定点算法与 OpenCV 逐像素一致, H 的范围为 `[0, 180)`.
//!
//! 实现位于 `wsi-berry/src/color.rs`.
//!
//! ### HSV 阈值组织分割 ✅
//!
//! 闭运算, 开运算, 外轮廓提取, 轮廓内部填充.
//!
//! 实现位于 `wsi-berry/src/tissue`.
//!
//! ### 滑动窗口 patch 采样 ✅
//!
//! 步长为 `P / 2`, 每个 section 最多采样面积最大的 5 个区域.
//! 越界窗口作为 [`patch::CandidateOutcome::BoundaryClipped`] 被跳过, 不是错误.
//!
//! 实现位于 `wsi-berry/src/patch.rs`.
//!
//! ### ASAP 标注解析与肿瘤重叠面积 ✅
//!
//! 先求所有标注多边形的并集, 再与 patch 求交, 重叠部分不会重复计算.
//!
//! 实现位于 `wsi-berry/src/annotation`.
//!
//! ### 流水线, 持久化与并行 ✅
//!
//! 1. 逐 section 处理, 大缓冲区及时释放. ✅
//! 2. 内存收集器与磁盘写出器. ✅
//! 3. `rayon` 并行处理 section. ✅
//!
//! 实现位于 `wsi-berry/src/pipeline`.
//!
//! ### OpenSlide 后端 ⌛️
//!
//! 通过 FFI 读取 `.svs`, `.ndpi` 等厂商格式.

/// 二维索引 `(h, w)`, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

pub mod annotation;
pub mod color;
pub mod config;
pub mod consts;
pub mod coords;
pub mod dataset;
pub mod error;
pub mod grid;
pub mod patch;
pub mod pipeline;
pub mod prelude;
pub mod slide;
pub mod tissue;

pub use config::PipelineConfig;
pub use coords::{Level, Level0Point, LevelPoint, LocalPoint};
pub use error::{
    AnnotationError, ConfigError, PipelineError, ShapeError, SinkError, SlideError,
};
pub use grid::{Section, SectionGrid};
