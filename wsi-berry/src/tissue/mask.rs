//! 组织掩码.

use crate::consts::gray::{is_background, is_tissue, PIXEL_BLACK, PIXEL_WHITE};
use crate::consts::RGB_CHANNELS;
use crate::Idx2d;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use ndarray::{Array2, Array3, ArrayView2, Axis};
use std::collections::VecDeque;
use std::io::{self, Read, Write};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 单通道二值组织掩码, 形状 `(高, 宽)`. 组织为 255, 背景为 0.
///
/// 掩码中每个外轮廓的内部都被完整填充, 即不存在被组织完全包围的背景空洞.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TissueMask {
    data: Array2<u8>,
}

impl TissueMask {
    /// 由二值图像构建, 并填充所有被组织包围的背景空洞.
    pub fn from_binary(binary: Array2<u8>) -> Self {
        let mut mask = Self::from_raw(binary);
        mask.fill_enclosed_holes();
        mask
    }

    /// 直接使用 `data`, 只做二值化, 不填充空洞.
    pub fn from_raw(mut data: Array2<u8>) -> Self {
        data.mapv_inplace(|p| if is_tissue(p) { PIXEL_WHITE } else { PIXEL_BLACK });
        Self { data }
    }

    /// 全背景掩码.
    pub fn empty((h, w): Idx2d) -> Self {
        Self {
            data: Array2::zeros((h, w)),
        }
    }

    /// 填充与图像边界不 4-连通的背景区域, 返回被填充的像素个数.
    ///
    /// 组织在轮廓追踪中是 8-连通的, 因此背景按 4-连通处理.
    pub fn fill_enclosed_holes(&mut self) -> usize {
        let (h, w) = self.shape();
        if h == 0 || w == 0 {
            return 0;
        }
        let mut outside = Array2::<bool>::from_elem((h, w), false);
        let mut bfs_q = VecDeque::with_capacity(2 * (h + w));

        let border = (0..w)
            .flat_map(|x| [(0, x), (h - 1, x)])
            .chain((0..h).flat_map(|y| [(y, 0), (y, w - 1)]));
        for pos in border {
            if is_background(self.data[pos]) && !outside[pos] {
                outside[pos] = true;
                bfs_q.push_back(pos);
            }
        }

        while let Some((cur_h, cur_w)) = bfs_q.pop_front() {
            let neighbours = [
                (cur_h.wrapping_sub(1), cur_w),
                (cur_h + 1, cur_w),
                (cur_h, cur_w.wrapping_sub(1)),
                (cur_h, cur_w + 1),
            ];
            for pos in neighbours {
                if pos.0 < h && pos.1 < w && !outside[pos] && is_background(self.data[pos]) {
                    outside[pos] = true;
                    bfs_q.push_back(pos);
                }
            }
        }

        let mut filled = 0;
        for (p, &out) in self.data.iter_mut().zip(outside.iter()) {
            if is_background(*p) && !out {
                *p = PIXEL_WHITE;
                filled += 1;
            }
        }
        filled
    }

    /// (高, 宽).
    #[inline]
    pub fn shape(&self) -> Idx2d {
        self.data.dim()
    }

    /// 底层数据的只读视图.
    #[inline]
    pub fn view(&self) -> ArrayView2<'_, u8> {
        self.data.view()
    }

    /// 给定位置 (高, 宽) 是否为组织. 越界时返回 `false`.
    #[inline]
    pub fn is_tissue_at(&self, pos: Idx2d) -> bool {
        self.data.get(pos).copied().map_or(false, is_tissue)
    }

    /// 组织像素个数.
    pub fn tissue_count(&self) -> usize {
        self.data.iter().filter(|&&p| is_tissue(p)).count()
    }

    /// 是否不含任何组织.
    #[inline]
    pub fn is_background(&self) -> bool {
        self.data.iter().copied().all(is_background)
    }

    /// 复制到 3 个通道, 形状 `(高, 宽, 3)`.
    pub fn to_rgb3(&self) -> Array3<u8> {
        let (h, w) = self.shape();
        self.data
            .view()
            .insert_axis(Axis(2))
            .broadcast((h, w, RGB_CHANNELS))
            .map_or_else(|| Array3::zeros((h, w, RGB_CHANNELS)), |v| v.to_owned())
    }

    /// 直接获得底层数据.
    #[inline]
    pub fn into_raw(self) -> Array2<u8> {
        self.data
    }

    /// 压缩数据.
    pub fn compress(&self) -> io::Result<CompactMask> {
        let mut e = ZlibEncoder::new(Vec::with_capacity(64), Compression::best());
        for row in self.data.rows() {
            match row.as_slice() {
                Some(s) => e.write_all(s)?,
                None => e.write_all(&row.to_vec())?,
            }
        }
        Ok(CompactMask {
            buf: e.finish()?,
            sh: self.shape(),
        })
    }
}

/// 压缩存储的 [`TissueMask`]; 不透明类型.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CompactMask {
    /// 压缩的不透明字节流.
    buf: Vec<u8>,

    /// 形状.
    sh: Idx2d,
}

impl CompactMask {
    /// 解压后的形状 (高, 宽).
    #[inline]
    pub fn shape(&self) -> Idx2d {
        self.sh
    }

    /// 压缩后的字节数.
    #[inline]
    pub fn compressed_len(&self) -> usize {
        self.buf.len()
    }

    /// 解压缩数据. 字节流损坏时返回 `ErrorKind::InvalidData`.
    pub fn decompress(&self) -> io::Result<TissueMask> {
        let (h, w) = self.sh;
        let mut d = ZlibDecoder::new(self.buf.as_slice());
        let mut buf = Vec::with_capacity(h * w);
        d.read_to_end(&mut buf)?;
        let data = Array2::from_shape_vec((h, w), buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(TissueMask { data })
    }
}
