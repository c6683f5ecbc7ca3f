//! 流水线配置.

use crate::consts::*;
use crate::error::ConfigError;
use crate::Level;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 一次运行的全部可调参数. 默认值与经验参数一致.
///
/// 该结构以值的形式传入各组件, 不存在任何全局可变状态.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct PipelineConfig {
    /// patch 边长 `P`. 采样步长为 `P / 2`.
    pub patch_size: usize,

    /// 切分数 `N`, 每个层级被切分成 `N * N` 个 section.
    pub split: u32,

    /// 工作层级.
    pub level: u32,

    /// patch 被接受所需的最小有效面积占比.
    pub occupancy: f64,

    /// 闭运算方形结构元边长 (正奇数).
    pub close_kernel: u16,

    /// 开运算方形结构元边长 (正奇数).
    pub open_kernel: u16,

    /// HSV 阈值下限 (含).
    pub hsv_lower: [u8; 3],

    /// HSV 阈值上限 (含).
    pub hsv_upper: [u8; 3],

    /// 每个 section 采样的组织区域个数上限 (按面积降序).
    pub max_regions: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            patch_size: DEFAULT_PATCH_SIZE,
            split: DEFAULT_SPLIT,
            level: DEFAULT_LEVEL,
            occupancy: DEFAULT_OCCUPANCY,
            close_kernel: DEFAULT_CLOSE_KERNEL as u16,
            open_kernel: DEFAULT_OPEN_KERNEL as u16,
            hsv_lower: DEFAULT_HSV_LOWER,
            hsv_upper: DEFAULT_HSV_UPPER,
            max_regions: DEFAULT_MAX_REGIONS,
        }
    }
}

impl PipelineConfig {
    /// 检查参数合法性.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.patch_size == 0 {
            return Err(ConfigError::ZeroPatchSize);
        }
        if self.patch_size < 2 {
            return Err(ConfigError::PatchTooSmall(self.patch_size));
        }
        if self.split == 0 {
            return Err(ConfigError::ZeroSplit);
        }
        if self.level > MAX_LEVEL {
            return Err(ConfigError::LevelTooLarge(self.level, MAX_LEVEL));
        }
        if !(self.occupancy > 0.0 && self.occupancy <= 1.0) {
            return Err(ConfigError::OccupancyOutOfRange(self.occupancy));
        }
        for k in [self.close_kernel, self.open_kernel] {
            if k % 2 == 0 || k > MAX_KERNEL {
                return Err(ConfigError::BadKernel(k, MAX_KERNEL));
            }
        }
        if self.hsv_lower.iter().zip(self.hsv_upper.iter()).any(|(l, u)| l > u) {
            return Err(ConfigError::InvertedHsvRange(self.hsv_lower, self.hsv_upper));
        }
        if self.max_regions == 0 {
            return Err(ConfigError::ZeroRegions);
        }
        Ok(())
    }

    /// 工作层级.
    #[inline]
    pub fn level(&self) -> Level {
        Level::new(self.level)
    }

    /// 滑窗步长, 即半个 patch (相邻 patch 重叠 50%).
    #[inline]
    pub fn stride(&self) -> usize {
        self.patch_size / 2
    }

    /// 单个 patch 的像素总数 `P * P`.
    #[inline]
    pub fn patch_area(&self) -> usize {
        self.patch_size * self.patch_size
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineConfig;
    use crate::error::ConfigError;

    #[test]
    fn test_default_is_valid() {
        let c = PipelineConfig::default();
        assert_eq!(c.validate(), Ok(()));
        assert_eq!(c.patch_size, 500);
        assert_eq!(c.stride(), 250);
        assert_eq!(c.level().scale_factor(), 2);
    }

    #[test]
    fn test_invalid_config() {
        let bad = |f: fn(&mut PipelineConfig)| {
            let mut c = PipelineConfig::default();
            f(&mut c);
            c.validate().unwrap_err()
        };
        assert_eq!(bad(|c| c.patch_size = 0), ConfigError::ZeroPatchSize);
        assert_eq!(bad(|c| c.patch_size = 1), ConfigError::PatchTooSmall(1));
        assert_eq!(bad(|c| c.split = 0), ConfigError::ZeroSplit);
        assert_eq!(bad(|c| c.level = 31), ConfigError::LevelTooLarge(31, 30));
        assert_eq!(bad(|c| c.occupancy = 0.0), ConfigError::OccupancyOutOfRange(0.0));
        assert_eq!(bad(|c| c.occupancy = 1.5), ConfigError::OccupancyOutOfRange(1.5));
        assert_eq!(bad(|c| c.close_kernel = 14), ConfigError::BadKernel(14, 511));
        assert_eq!(bad(|c| c.open_kernel = 0), ConfigError::BadKernel(0, 511));
        assert_eq!(bad(|c| c.max_regions = 0), ConfigError::ZeroRegions);
        assert!(matches!(
            bad(|c| c.hsv_lower = [201, 0, 0]),
            ConfigError::InvertedHsvRange(..)
        ));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_partial_overlay() {
        // 未给出的字段取默认值.
        let c: PipelineConfig = serde_json_like();
        assert_eq!(c.patch_size, 256);
        assert_eq!(c.split, 4);

        fn serde_json_like() -> PipelineConfig {
            use serde::de::value::{Error, MapDeserializer};
            use serde::Deserialize;
            let map = MapDeserializer::<_, Error>::new(std::iter::once(("patch_size", 256usize)));
            PipelineConfig::deserialize(map).unwrap()
        }
    }
}
