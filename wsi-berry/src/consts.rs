//! 通用常量.

/// 单通道颜色.
pub mod gray {
    /// 单通道黑色. 掩码中的背景.
    pub const PIXEL_BLACK: u8 = 0b_0000_0000;

    /// 单通道白色. 掩码中的组织.
    pub const PIXEL_WHITE: u8 = 0b_1111_1111;

    /// 掩码像素是否是组织 (前景)?
    #[inline]
    pub const fn is_tissue(p: u8) -> bool {
        p != PIXEL_BLACK
    }

    /// 掩码像素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        p == PIXEL_BLACK
    }
}

/// RGB 图像通道数.
pub const RGB_CHANNELS: usize = 3;

/// RGBA 图像通道数. 切片后端 `read_region` 的返回值总是 4 通道.
pub const RGBA_CHANNELS: usize = 4;

/// 默认 patch 边长 (像素).
pub const DEFAULT_PATCH_SIZE: usize = 500;

/// 默认切分数. `4` 表示将整个层级切分为 `4 * 4 = 16` 个 section 依次处理.
pub const DEFAULT_SPLIT: u32 = 4;

/// 默认金字塔层级.
pub const DEFAULT_LEVEL: u32 = 1;

/// 默认 patch 有效面积 (被掩码覆盖的像素) 占比下限.
pub const DEFAULT_OCCUPANCY: f64 = 0.5;

/// 默认闭运算结构元边长.
pub const DEFAULT_CLOSE_KERNEL: u8 = 15;

/// 默认开运算结构元边长.
pub const DEFAULT_OPEN_KERNEL: u8 = 5;

/// 默认 HSV 三通道阈值下限 (含).
///
/// 该阈值高度依赖数据集本身, 不同数据集之间可能差别很大.
pub const DEFAULT_HSV_LOWER: [u8; 3] = [20, 20, 20];

/// 默认 HSV 三通道阈值上限 (含).
pub const DEFAULT_HSV_UPPER: [u8; 3] = [200, 200, 200];

/// 每个 section 默认只从面积最大的前若干个组织区域中采样.
///
/// 小区域太多, 全部采样会引入大量无关 patch.
pub const DEFAULT_MAX_REGIONS: usize = 5;

/// 允许的最大金字塔层级. 保证 `2^level` 不会溢出坐标运算.
pub const MAX_LEVEL: u32 = 30;

/// `imageproc` 形态学操作的最大结构元边长 (`2 * u8::MAX + 1`).
pub const MAX_KERNEL: u16 = 511;
