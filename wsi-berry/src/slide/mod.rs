//! 金字塔切片的访问接口.
//!
//! 具体的解码后端 (OpenSlide, 普通栅格图像等) 只需实现 [`SlideSource`].
//! 本 crate 附带一个基于 `image` 的栅格后端 [`RasterSlide`].

mod raster;

pub use raster::RasterSlide;

use crate::coords::{Level, Level0Point};
use crate::error::{SlideError, SlideResult};
use ndarray::Array3;

/// 金字塔切片后端.
///
/// 实现者应保证 `read_region` 是只读的. 若实现者同时是 `Sync`,
/// 则多个 section 可以并发读取.
pub trait SlideSource {
    /// 金字塔层级个数.
    fn level_count(&self) -> u32;

    /// 第 `level` 层的 (宽, 高). 层级不存在时返回 `None`.
    fn level_dimensions(&self, level: Level) -> Option<(u32, u32)>;

    /// 读取一块区域.
    ///
    /// `origin` 是区域左上角的 **level-0** 坐标; `size` 是区域在第 `level`
    /// 层下的 (宽, 高). 返回形状为 `(高, 宽, 4)` 的 RGBA 数组,
    /// 超出切片范围的像素为全 0 (透明黑).
    fn read_region(
        &self,
        origin: Level0Point,
        level: Level,
        size: (u32, u32),
    ) -> SlideResult<Array3<u8>>;

    /// 第 `level` 层的 (宽, 高). 层级不存在时返回 `Err(SlideError::LevelOutOfRange)`.
    fn dimensions(&self, level: Level) -> SlideResult<(u32, u32)> {
        self.level_dimensions(level)
            .ok_or_else(|| SlideError::LevelOutOfRange(level.index(), self.level_count()))
    }
}

impl<S: SlideSource + ?Sized> SlideSource for &S {
    #[inline]
    fn level_count(&self) -> u32 {
        (**self).level_count()
    }

    #[inline]
    fn level_dimensions(&self, level: Level) -> Option<(u32, u32)> {
        (**self).level_dimensions(level)
    }

    #[inline]
    fn read_region(
        &self,
        origin: Level0Point,
        level: Level,
        size: (u32, u32),
    ) -> SlideResult<Array3<u8>> {
        (**self).read_region(origin, level, size)
    }
}

impl<S: SlideSource + ?Sized> SlideSource for Box<S> {
    #[inline]
    fn level_count(&self) -> u32 {
        (**self).level_count()
    }

    #[inline]
    fn level_dimensions(&self, level: Level) -> Option<(u32, u32)> {
        (**self).level_dimensions(level)
    }

    #[inline]
    fn read_region(
        &self,
        origin: Level0Point,
        level: Level,
        size: (u32, u32),
    ) -> SlideResult<Array3<u8>> {
        (**self).read_region(origin, level, size)
    }
}
