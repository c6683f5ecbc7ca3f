//! 基于 `image` 的栅格切片后端.
//!
//! 任何 `image` 可以解码的格式 (TIFF, PNG, JPEG 等) 都可以作为切片打开.
//! 第 `k` 层是原图边长缩小 `2^k` 倍的副本, 在打开时一次性生成.

use super::SlideSource;
use crate::consts::RGBA_CHANNELS;
use crate::coords::{Level, Level0Point};
use crate::error::{SlideError, SlideResult};
use image::imageops::{self, FilterType};
use image::{ImageError, RgbaImage};
use ndarray::Array3;
use num::ToPrimitive;
use std::path::Path;

/// 金字塔层数上限.
const MAX_PYRAMID_LEVELS: usize = 10;

/// 内存中的栅格金字塔.
#[derive(Clone, Debug)]
pub struct RasterSlide {
    /// `levels[k]` 为第 `k` 层. 至少包含第 0 层.
    levels: Vec<RgbaImage>,
}

impl RasterSlide {
    /// 打开 `path` 处的栅格图像并构建金字塔.
    ///
    /// 格式无法识别或解码失败时返回 `Err(SlideError::UnsupportedFormat)`;
    /// 文件本身无法读取时返回 `Err(SlideError::Io)`.
    pub fn open<P: AsRef<Path>>(path: P) -> SlideResult<Self> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|e| match e {
            ImageError::IoError(io) => SlideError::Io(io),
            other => SlideError::UnsupportedFormat {
                path: path.to_owned(),
                reason: other.to_string(),
            },
        })?;
        let slide = Self::from_rgba(img.to_rgba8());
        log::info!(
            "opened `{}`: level0 {:?}, {} level(s)",
            path.display(),
            slide.levels[0].dimensions(),
            slide.levels.len()
        );
        Ok(slide)
    }

    /// 以 `base` 为第 0 层, 逐级对半缩小, 直到某一边不足 1 像素.
    pub fn from_rgba(base: RgbaImage) -> Self {
        let mut levels = vec![base];
        while levels.len() < MAX_PYRAMID_LEVELS {
            let (w, h) = levels[levels.len() - 1].dimensions();
            let (nw, nh) = (w / 2, h / 2);
            if nw == 0 || nh == 0 {
                break;
            }
            let next = imageops::resize(&levels[levels.len() - 1], nw, nh, FilterType::Triangle);
            levels.push(next);
        }
        Self { levels }
    }

    /// 直接以给定的各层图像构建. `levels` 不能为空.
    ///
    /// 调用者负责保证第 `k` 层的尺寸约为第 0 层的 `1 / 2^k`.
    pub fn from_levels(levels: Vec<RgbaImage>) -> Self {
        assert!(!levels.is_empty(), "a slide needs at least one level");
        Self { levels }
    }
}

impl SlideSource for RasterSlide {
    #[inline]
    fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    #[inline]
    fn level_dimensions(&self, level: Level) -> Option<(u32, u32)> {
        self.levels
            .get(level.index() as usize)
            .map(RgbaImage::dimensions)
    }

    fn read_region(
        &self,
        origin: Level0Point,
        level: Level,
        (width, height): (u32, u32),
    ) -> SlideResult<Array3<u8>> {
        let img = self
            .levels
            .get(level.index() as usize)
            .ok_or_else(|| SlideError::LevelOutOfRange(level.index(), self.level_count()))?;

        let (w, h) = (width as usize, height as usize);
        let len = w
            .checked_mul(h)
            .and_then(|v| v.checked_mul(RGBA_CHANNELS))
            .ok_or(SlideError::RegionTooLarge(width, height))?;
        let mut buf = vec![0u8; len];

        // 区域左上角的层级坐标.
        let s = level.scale_factor();
        let (x0, y0) = (origin.x.div_euclid(s), origin.y.div_euclid(s));
        let (iw, ih) = img.dimensions();

        // 区域与图像重叠部分 (层级坐标, 左闭右开).
        let xs = x0.max(0);
        let xe = (x0 + w as i64).min(iw as i64);
        let ys = y0.max(0);
        let ye = (y0 + h as i64).min(ih as i64);

        if xs < xe && ys < ye {
            let raw = img.as_raw();
            let row_len = (xe - xs).to_usize().unwrap_or(0) * RGBA_CHANNELS;
            let dst_x = (xs - x0).to_usize().unwrap_or(0);
            for y in ys..ye {
                let src = (y as usize * iw as usize + xs as usize) * RGBA_CHANNELS;
                let dst = ((y - y0) as usize * w + dst_x) * RGBA_CHANNELS;
                buf[dst..dst + row_len].copy_from_slice(&raw[src..src + row_len]);
            }
        }

        // `buf` 的长度与形状一致, 不会失败.
        Ok(Array3::from_shape_vec((h, w, RGBA_CHANNELS), buf).unwrap())
    }
}
