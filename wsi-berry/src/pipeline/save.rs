//! section 产出的持久化存储.
//!
//! 目录结构:
//!
//! ```text
//! {root}/{case}/level{L}/{id}/
//! ├── patches/
//! │   ├── patch_{i}_{x}_{y}.npy
//! │   └── patch_{i}_{x}_{y}.jpeg     (可选)
//! ├── patch_whole{id}.npy            (n, P, P, 3)
//! ├── patch_coords{id}.csv           coord_x,coord_y,tumor_area,tumor_%
//! ├── mask.npy                       (H, W, 3)
//! └── mask.png                       (可选)
//! ```
//!
//! 没有任何 patch 的 section 不产生任何文件.

use super::{SectionOutput, SectionSink};
use crate::error::SinkResult;
use crate::patch::Patch;
use crate::tissue::TissueMask;
use image::error::{ImageError, ParameterError, ParameterErrorKind};
use image::{GrayImage, ImageResult, RgbImage};
use ndarray_npy::write_npy;
use std::fs;
use std::path::{Path, PathBuf};

/// 表明一个可以按原样持久化存储的图像对象.
pub trait ImgWriteRaw {
    /// 按原样将图片保存到 `path` 路径. 格式由扩展名决定.
    fn save_raw<P: AsRef<Path>>(&self, path: P) -> ImageResult<()>;
}

/// 保存为 RGB 图像.
impl ImgWriteRaw for Patch {
    fn save_raw<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        let (h, w, _) = self.pixels().dim();
        let raw = self.pixels().as_standard_layout().into_owned().into_raw_vec();
        RgbImage::from_raw(w as u32, h as u32, raw)
            .ok_or_else(dimension_mismatch)?
            .save(path)
    }
}

/// 保存为单通道 0/255 图像.
impl ImgWriteRaw for TissueMask {
    fn save_raw<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        let (h, w) = self.shape();
        let raw = self.view().as_standard_layout().into_owned().into_raw_vec();
        GrayImage::from_raw(w as u32, h as u32, raw)
            .ok_or_else(dimension_mismatch)?
            .save(path)
    }
}

fn dimension_mismatch() -> ImageError {
    ImageError::Parameter(ParameterError::from_kind(ParameterErrorKind::DimensionMismatch))
}

/// 把每个 section 的产出写入磁盘.
#[derive(Clone, Debug)]
pub struct DiskWriter {
    root: PathBuf,
    case: String,
    save_jpeg: bool,
    mask_preview: bool,
}

impl DiskWriter {
    /// 输出到 `{root}/{case}/`.
    pub fn new<P: AsRef<Path>>(root: P, case: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_owned(),
            case: case.into(),
            save_jpeg: true,
            mask_preview: false,
        }
    }

    /// 以切片文件名 (不含扩展名) 作为病例名.
    pub fn for_slide<P: AsRef<Path>, Q: AsRef<Path>>(root: P, slide_path: Q) -> Self {
        let case = slide_path
            .as_ref()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "slide".to_string());
        Self::new(root, case)
    }

    /// 是否为每个 patch 额外保存 jpeg 预览. 默认保存.
    pub fn with_jpeg(mut self, on: bool) -> Self {
        self.save_jpeg = on;
        self
    }

    /// 是否额外保存 png 格式的掩码预览. 默认不保存.
    pub fn with_mask_preview(mut self, on: bool) -> Self {
        self.mask_preview = on;
        self
    }

    /// 病例名.
    #[inline]
    pub fn case(&self) -> &str {
        &self.case
    }

    /// section 的输出目录.
    pub fn section_dir(&self, output: &SectionOutput) -> PathBuf {
        let mut p = self.root.join(&self.case);
        p.push(format!("level{}", output.level().index()));
        p.push(output.id());
        p
    }

    fn write(&self, output: &SectionOutput) -> SinkResult<()> {
        let id = output.id();
        let mut dir = self.section_dir(output);
        dir.push("patches");
        fs::create_dir_all(&dir)?;
        for (i, patch) in output.patches().iter().enumerate() {
            let g = patch.global();
            dir.push(format!("patch_{i}_{}_{}.npy", g.x, g.y));
            write_npy(&dir, patch.pixels())?;
            if self.save_jpeg {
                dir.set_extension("jpeg");
                patch.save_raw(&dir)?;
            }
            dir.pop();
        }
        dir.pop();

        dir.push(format!("patch_whole{id}.npy"));
        write_npy(&dir, &output.stacked_pixels())?;
        dir.pop();

        dir.push(format!("patch_coords{id}.csv"));
        let mut csv = csv::Writer::from_path(&dir)?;
        csv.write_record(["coord_x", "coord_y", "tumor_area", "tumor_%"])?;
        for r in output.records() {
            csv.write_record([
                r.coord_x.to_string(),
                r.coord_y.to_string(),
                r.tumor_area.to_string(),
                r.tumor_pct.to_string(),
            ])?;
        }
        csv.flush()?;
        dir.pop();

        dir.push("mask.npy");
        write_npy(&dir, &output.mask().to_rgb3())?;
        if self.mask_preview {
            dir.set_extension("png");
            output.mask().save_raw(&dir)?;
        }
        dir.pop();
        Ok(())
    }
}

impl SectionSink for DiskWriter {
    fn accept(&mut self, output: SectionOutput) -> SinkResult<()> {
        if output.is_empty() {
            log::debug!("section {}: no patch, nothing written", output.id());
            return Ok(());
        }
        self.write(&output)?;
        log::info!(
            "section {}: {} patch(es) written to `{}`",
            output.id(),
            output.patches().len(),
            self.section_dir(&output).display()
        );
        Ok(())
    }
}
