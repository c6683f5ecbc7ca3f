//! 颜色空间转换.
//!
//! 灰度与 HSV 转换采用 8-bit 定点运算, 与常见计算机视觉库的
//! `RGB -> GRAY` / `RGB -> HSV` 逐位一致. 色相 `H` 的取值范围为 `[0, 180)`.

use crate::consts::{RGBA_CHANNELS, RGB_CHANNELS};
use crate::error::{ShapeError, ShapeResult};
use crate::Idx2d;
use ndarray::{s, Array2, Array3, ArrayView3, Axis, Zip};
use once_cell::sync::Lazy;

/// 定点运算的移位位数.
const SHIFT: u32 = 12;

/// 灰度系数的移位位数.
const GRAY_SHIFT: u32 = 14;

/// 灰度系数 (R, G, B), 放大了 `2^14` 倍.
const GRAY_COEFF: [u32; 3] = [4899, 9617, 1868];

/// `sdiv[v] = round((255 << 12) / v)`, `sdiv[0] = 0`.
static S_DIV: Lazy<[i32; 256]> = Lazy::new(|| {
    let mut t = [0; 256];
    for (i, v) in t.iter_mut().enumerate().skip(1) {
        *v = ((255 << SHIFT) as f64 / i as f64).round() as i32;
    }
    t
});

/// `hdiv[d] = round((180 << 12) / (6 * d))`, `hdiv[0] = 0`.
static H_DIV: Lazy<[i32; 256]> = Lazy::new(|| {
    let mut t = [0; 256];
    for (i, v) in t.iter_mut().enumerate().skip(1) {
        *v = ((180 << SHIFT) as f64 / (6.0 * i as f64)).round() as i32;
    }
    t
});

/// 单个 RGB 像素的灰度值.
#[inline]
pub fn rgb_to_gray([r, g, b]: [u8; 3]) -> u8 {
    let [cr, cg, cb] = GRAY_COEFF;
    let v = r as u32 * cr + g as u32 * cg + b as u32 * cb + (1 << (GRAY_SHIFT - 1));
    (v >> GRAY_SHIFT) as u8
}

/// 单个 RGB 像素的 HSV 值 `[h, s, v]`, 其中 `h` 在 `[0, 180)` 内.
pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let v = r.max(g).max(b);
    let diff = v - r.min(g).min(b);
    let half = 1 << (SHIFT - 1);

    let s = (diff * S_DIV[v as usize] + half) >> SHIFT;

    // 优先级: R > G > B.
    let raw = if v == r {
        g - b
    } else if v == g {
        b - r + 2 * diff
    } else {
        r - g + 4 * diff
    };
    let mut h = (raw * H_DIV[diff as usize] + half) >> SHIFT;
    if h < 0 {
        h += 180;
    }
    [h as u8, s as u8, v as u8]
}

/// 一个 section 的三种颜色表示. 三者空间对齐, 形状均为 `(高, 宽[, 3])`.
#[derive(Clone, Debug)]
pub struct ColorSpaces {
    rgb: Array3<u8>,
    gray: Array2<u8>,
    hsv: Array3<u8>,
}

impl ColorSpaces {
    /// 从 `(高, 宽, 4)` 的 RGBA 区域构建. Alpha 通道被丢弃.
    ///
    /// 通道数不为 4 时返回 `Err(ShapeError::InvalidImageShape)`.
    pub fn from_rgba(rgba: ArrayView3<u8>) -> ShapeResult<Self> {
        if rgba.len_of(Axis(2)) != RGBA_CHANNELS {
            return Err(ShapeError::InvalidImageShape {
                expected: RGBA_CHANNELS,
                found: rgba.shape().to_vec(),
            });
        }
        Ok(Self::from_rgb(rgba.slice(s![.., .., ..RGB_CHANNELS]).to_owned()))
    }

    /// 从 `(高, 宽, 3)` 的 RGB 图像构建.
    ///
    /// 通道数不为 3 时返回 `Err(ShapeError::InvalidImageShape)`.
    pub fn try_from_rgb(rgb: Array3<u8>) -> ShapeResult<Self> {
        if rgb.len_of(Axis(2)) != RGB_CHANNELS {
            return Err(ShapeError::InvalidImageShape {
                expected: RGB_CHANNELS,
                found: rgb.shape().to_vec(),
            });
        }
        Ok(Self::from_rgb(rgb))
    }

    fn from_rgb(rgb: Array3<u8>) -> Self {
        let (h, w, _) = rgb.dim();
        let mut gray = Array2::<u8>::zeros((h, w));
        let mut hsv = Array3::<u8>::zeros((h, w, RGB_CHANNELS));
        Zip::from(&mut gray)
            .and(hsv.lanes_mut(Axis(2)))
            .and(rgb.lanes(Axis(2)))
            .for_each(|g, mut out, px| {
                let px = [px[0], px[1], px[2]];
                *g = rgb_to_gray(px);
                let [hh, ss, vv] = rgb_to_hsv(px);
                out[0] = hh;
                out[1] = ss;
                out[2] = vv;
            });
        Self { rgb, gray, hsv }
    }

    /// RGB 图像, `(高, 宽, 3)`.
    #[inline]
    pub fn rgb(&self) -> &Array3<u8> {
        &self.rgb
    }

    /// 灰度图像, `(高, 宽)`.
    #[inline]
    pub fn gray(&self) -> &Array2<u8> {
        &self.gray
    }

    /// HSV 图像, `(高, 宽, 3)`.
    #[inline]
    pub fn hsv(&self) -> &Array3<u8> {
        &self.hsv
    }

    /// (高, 宽).
    #[inline]
    pub fn shape(&self) -> Idx2d {
        self.gray.dim()
    }

    /// 拆分出 RGB 图像, 释放其余两份.
    #[inline]
    pub fn into_rgb(self) -> Array3<u8> {
        self.rgb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_gray_known_values() {
        assert_eq!(rgb_to_gray([0, 0, 0]), 0);
        assert_eq!(rgb_to_gray([255, 255, 255]), 255);
        // 0.299 * 255 = 76.2
        assert_eq!(rgb_to_gray([255, 0, 0]), 76);
        assert_eq!(rgb_to_gray([0, 255, 0]), 150);
        assert_eq!(rgb_to_gray([0, 0, 255]), 29);
        // 近黑像素不为 0.
        assert_eq!(rgb_to_gray([1, 1, 1]), 1);
    }

    #[test]
    fn test_hsv_known_values() {
        assert_eq!(rgb_to_hsv([0, 0, 0]), [0, 0, 0]);
        assert_eq!(rgb_to_hsv([255, 255, 255]), [0, 0, 255]);
        assert_eq!(rgb_to_hsv([255, 0, 0]), [0, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 255, 0]), [60, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
        // 品红: raw = g - b = -255 -> -30 -> 150.
        assert_eq!(rgb_to_hsv([255, 0, 255]), [150, 255, 255]);
        assert_eq!(rgb_to_hsv([128, 64, 32]), [10, 191, 128]);
    }

    #[test]
    fn test_hsv_hue_range() {
        for r in (0..=255).step_by(15) {
            for g in (0..=255).step_by(15) {
                for b in (0..=255).step_by(15) {
                    let [h, _, v] = rgb_to_hsv([r, g, b]);
                    assert!(h < 180, "{r} {g} {b} -> {h}");
                    assert_eq!(v, r.max(g).max(b));
                }
            }
        }
    }

    #[test]
    fn test_color_spaces_shape() {
        let mut rgba = Array3::<u8>::zeros((2, 3, 4));
        rgba[(1, 2, 0)] = 255;
        rgba[(1, 2, 3)] = 255;
        let cs = ColorSpaces::from_rgba(rgba.view()).unwrap();
        assert_eq!(cs.shape(), (2, 3));
        assert_eq!(cs.rgb().dim(), (2, 3, 3));
        assert_eq!(cs.hsv().dim(), (2, 3, 3));
        assert_eq!(cs.gray()[(1, 2)], 76);
        assert_eq!(cs.gray()[(0, 0)], 0);
        assert_eq!(cs.hsv()[(1, 2, 1)], 255);
    }

    #[test]
    fn test_invalid_channels() {
        let rgb = Array3::<u8>::zeros((4, 4, 3));
        assert!(matches!(
            ColorSpaces::from_rgba(rgb.view()),
            Err(ShapeError::InvalidImageShape { expected: 4, .. })
        ));
        assert!(ColorSpaces::try_from_rgb(rgb).is_ok());
        assert!(ColorSpaces::try_from_rgb(Array3::zeros((4, 4, 1))).is_err());
    }
}
