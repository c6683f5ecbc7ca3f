//! 将工作层级切分为 `N * N` 个 section.
//!
//! 千兆像素的 WSI 无法一次性载入内存, 因此按网格逐块处理.
//!
//! ```text
//! sect "12" (col = 1, row = 2), N = 4:
//!  _ _ _ _
//! |_|_|_|_|
//! |_|_|_|_|
//! |_|*|_|_|
//! |_|_|_|_|
//! ```

use crate::coords::{Level, Level0Point, LevelPoint};
use crate::error::ConfigError;

/// 网格中的一个 section.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Section {
    col: u32,
    row: u32,
    n: u32,
    offset: LevelPoint,
    width: u32,
    height: u32,
}

impl Section {
    /// 网格列号 (水平方向).
    #[inline]
    pub fn col(&self) -> u32 {
        self.col
    }

    /// 网格行号 (垂直方向).
    #[inline]
    pub fn row(&self) -> u32 {
        self.row
    }

    /// section 左上角在层级坐标下的偏移 `(delta_x, delta_y)`.
    #[inline]
    pub fn offset(&self) -> LevelPoint {
        self.offset
    }

    /// section 左上角的 level-0 坐标, 直接用于 `read_region`.
    #[inline]
    pub fn level0_origin(&self, level: Level) -> Level0Point {
        level.to_level0(self.offset)
    }

    /// section 的 (宽, 高), 层级像素.
    #[inline]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// section 编号, 形如 `"12"` (列号在前). `N > 10` 时以下划线分隔.
    pub fn id(&self) -> String {
        if self.n <= 10 {
            format!("{}{}", self.col, self.row)
        } else {
            format!("{}_{}", self.col, self.row)
        }
    }

    /// 判断层级坐标 `p` 是否落在本 section 内.
    #[inline]
    pub fn contains(&self, p: LevelPoint) -> bool {
        let (x0, y0) = self.offset.xy();
        (x0..x0 + self.width as i64).contains(&p.x) && (y0..y0 + self.height as i64).contains(&p.y)
    }
}

/// 层级范围上的 `N * N` 网格.
///
/// 每个 section 都是 `(W / N, H / N)`, 偏移为 `(col * (W / N), row * (H / N))`.
/// 余数不做重新分配: 层级右侧 `W % N` 列和底部 `H % N` 行不属于任何 section.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SectionGrid {
    width: u32,
    height: u32,
    n: u32,
}

impl SectionGrid {
    /// 以层级尺寸 `(width, height)` 和切分数 `n` 创建网格.
    ///
    /// `n == 0` 时返回 `Err(ConfigError::ZeroSplit)`.
    pub fn new((width, height): (u32, u32), n: u32) -> Result<Self, ConfigError> {
        if n == 0 {
            return Err(ConfigError::ZeroSplit);
        }
        Ok(Self { width, height, n })
    }

    /// 切分数 `N`.
    #[inline]
    pub fn split(&self) -> u32 {
        self.n
    }

    /// section 个数 `N * N`.
    #[inline]
    pub fn len(&self) -> usize {
        (self.n as usize).pow(2)
    }

    /// 网格是否为空. 由于 `N > 0`, 总是返回 `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// 每个 section 的 (宽, 高), 即 `(W / N, H / N)`.
    #[inline]
    pub fn section_size(&self) -> (u32, u32) {
        (self.width / self.n, self.height / self.n)
    }

    /// 获取第 `col` 列, 第 `row` 行的 section. 越界时返回 `None`.
    pub fn section(&self, col: u32, row: u32) -> Option<Section> {
        if col >= self.n || row >= self.n {
            return None;
        }
        let (sw, sh) = self.section_size();
        Some(Section {
            col,
            row,
            n: self.n,
            offset: LevelPoint::new((col * sw) as i64, (row * sh) as i64),
            width: sw,
            height: sh,
        })
    }

    /// 按列优先顺序 (`00, 01, 02, .., 10, 11, ..`) 迭代所有 section.
    pub fn sections(&self) -> impl ExactSizeIterator<Item = Section> + '_ {
        let n = self.n;
        (0..self.len()).map(move |i| {
            let i = i as u32;
            // 构造时保证不越界.
            self.section(i / n, i % n).unwrap()
        })
    }
}
