//! 运行时错误.

use std::path::PathBuf;
use thiserror::Error;

/// 打开切片或读取区域时的错误.
#[derive(Debug, Error)]
pub enum SlideError {
    /// 切片格式无法识别. 对该切片是致命错误.
    #[error("unsupported slide format `{path}`: {reason}")]
    UnsupportedFormat {
        /// 切片路径.
        path: PathBuf,
        /// 底层解码器给出的原因.
        reason: String,
    },

    /// 请求的层级不存在. 第一个参数为请求层级, 第二个参数为切片实际层级数.
    #[error("level {0} out of range, slide has {1} level(s)")]
    LevelOutOfRange(u32, u32),

    /// 请求的区域过大, 无法在内存中分配.
    #[error("region {0}x{1} is too large to allocate")]
    RegionTooLarge(u32, u32),

    /// 底层 I/O 错误.
    #[error("slide i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// 数组形状错误.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    /// 载入区域的通道数不符合预期. 对当前 section 是致命错误.
    #[error("invalid image shape: expected {expected} channel(s), found shape {found:?}")]
    InvalidImageShape {
        /// 期望通道数.
        expected: usize,
        /// 实际形状.
        found: Vec<usize>,
    },

    /// 两个本应空间对齐的数组 (如 RGB 图像和掩码) 形状不一致.
    ///
    /// 这是程序错误, 与 patch 在图像边缘被截断
    /// ([`crate::patch::CandidateOutcome::BoundaryClipped`]) 是两回事.
    #[error("shape mismatch: image is {image:?} but mask is {mask:?}")]
    ShapeMismatch {
        /// 图像的 (高, 宽).
        image: (usize, usize),
        /// 掩码的 (高, 宽).
        mask: (usize, usize),
    },
}

/// 解析标注文件的错误.
///
/// 任一坐标组出错都会使整个解析失败, 不会返回部分标注.
#[derive(Debug, Error)]
pub enum AnnotationError {
    /// XML 语法错误.
    #[error("malformed annotation xml at byte {position}: {source}")]
    Xml {
        /// 出错的字节位置.
        position: usize,
        /// 底层错误.
        #[source]
        source: quick_xml::Error,
    },

    /// 第 `group` 个坐标组中缺少属性 `attr`.
    #[error("coordinate group {group}: missing attribute `{attr}`")]
    MissingAttribute {
        /// 坐标组索引.
        group: usize,
        /// 属性名.
        attr: &'static str,
    },

    /// 第 `group` 个坐标组中属性 `attr` 的值无法解析为数值.
    #[error("coordinate group {group}: attribute `{attr}` is not numeric: `{value}`")]
    NotNumeric {
        /// 坐标组索引.
        group: usize,
        /// 属性名.
        attr: &'static str,
        /// 原始值.
        value: String,
    },

    /// 底层 I/O 错误.
    #[error("annotation i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// 配置参数非法.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// patch 边长为 0.
    #[error("patch size must be positive")]
    ZeroPatchSize,

    /// patch 边长小于 2, 无法以半个 patch 为步长滑动.
    #[error("patch size {0} is too small for a half-patch stride")]
    PatchTooSmall(usize),

    /// 切分数为 0.
    #[error("split must be positive")]
    ZeroSplit,

    /// 层级过大.
    #[error("level {0} exceeds the maximum of {1}")]
    LevelTooLarge(u32, u32),

    /// 有效面积占比不在 `(0, 1]` 内.
    #[error("occupancy threshold {0} is not in (0, 1]")]
    OccupancyOutOfRange(f64),

    /// 结构元边长必须为正奇数且不超过上限.
    #[error("kernel size {0} must be odd and in 1..={1}")]
    BadKernel(u16, u16),

    /// HSV 阈值下限大于上限.
    #[error("hsv lower bound {0:?} exceeds upper bound {1:?}")]
    InvertedHsvRange([u8; 3], [u8; 3]),

    /// 区域个数为 0.
    #[error("at least one region must be sampled")]
    ZeroRegions,
}

/// 将 section 结果持久化或收集时的错误.
#[derive(Debug, Error)]
pub enum SinkError {
    /// 底层 I/O 错误.
    #[error("sink i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// 写 npy 文件错误.
    #[error("npy write error: {0}")]
    Npy(#[from] ndarray_npy::WriteNpyError),

    /// 写图像文件错误.
    #[error("image write error: {0}")]
    Image(#[from] image::ImageError),

    /// 写 csv 文件错误.
    #[error("csv write error: {0}")]
    Csv(#[from] csv::Error),
}

/// 处理单个 section 时的错误.
#[derive(Debug, Error)]
pub enum SectionError {
    /// 读取区域失败. 切片级错误, 会中止整个运行.
    #[error(transparent)]
    Slide(#[from] SlideError),

    /// 形状错误. 只影响该 section, 其余 section 照常处理.
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// 整个流水线的错误. 会中止对当前切片的处理.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 切片错误.
    #[error(transparent)]
    Slide(#[from] SlideError),

    /// 标注错误.
    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    /// 配置错误.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 在 section `section` 持久化阶段出错.
    #[error("section {section}: {source}")]
    Sink {
        /// section 编号.
        section: String,
        /// 底层错误.
        #[source]
        source: SinkError,
    },
}

/// 切片操作结果.
pub type SlideResult<T> = Result<T, SlideError>;

/// 形状相关操作结果.
pub type ShapeResult<T> = Result<T, ShapeError>;

/// 标注解析结果.
pub type AnnotationResult<T> = Result<T, AnnotationError>;

/// 单个 section 的处理结果.
pub type SectionResult<T> = Result<T, SectionError>;

/// 持久化结果.
pub type SinkResult<T> = Result<T, SinkError>;

/// 流水线运行结果.
pub type PipelineResult<T> = Result<T, PipelineError>;
