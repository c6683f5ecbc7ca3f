//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx2d;

pub use crate::annotation::{calc_tumor_area, parse_annotation, AnnotationSet, TumorRegion};
pub use crate::color::ColorSpaces;
pub use crate::config::PipelineConfig;
pub use crate::coords::{Level, Level0Point, LevelPoint, LocalPoint};
pub use crate::dataset::{self, home_dataset_dir_with, slide_loader, SlideEntry};
pub use crate::error::{PipelineError, PipelineResult};
pub use crate::grid::{Section, SectionGrid};
pub use crate::patch::{Patch, PatchSampler};
pub use crate::pipeline::{
    DiskWriter, ImgWriteRaw, PatchCollector, RunSummary, SectionOutput, SectionPipeline,
    SectionSink,
};
pub use crate::slide::{RasterSlide, SlideSource};
pub use crate::tissue::{TissueMask, TissueSegmenter};
