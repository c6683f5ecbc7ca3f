//! 病理医生手工标注 (如肿瘤边界) 的解析.
//!
//! 标注文件为 ASAP 风格的 XML, 每个 `Coordinates` 元素是一个坐标组,
//! 其中每个 `Coordinate` 子元素以 `X`, `Y` 属性给出一个 level-0 坐标 (可以是小数):
//!
//! ```xml
//! <Annotation Name="Annotation 0" Type="Polygon">
//!   <Coordinates>
//!     <Coordinate Order="0" X="17312.2" Y="53424.0" />
//!     <Coordinate Order="1" X="17400.0" Y="53500.5" />
//!   </Coordinates>
//! </Annotation>
//! ```
//!
//! 坐标先按 `trunc(float(X))` 取整, 再整除缩放倍率得到层级坐标.
//! 任一坐标组出错都使整个解析失败.

mod overlap;

pub use overlap::{calc_tumor_area, TumorOverlap, TumorRegion};

use crate::coords::{Level, Level0Point, LevelPoint, LocalPoint};
use crate::error::{AnnotationError, AnnotationResult};
use geo::{LineString, Polygon};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// 构成多边形所需的最少点数 (不含).
const MIN_POLYGON_POINTS: usize = 2;

/// 一张切片的全部标注坐标组, level-0 坐标.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnnotationSet {
    groups: Vec<Vec<Level0Point>>,
}

/// 标注在某个层级、某个 section 下的三种表示, 三者都与源坐标组顺序对齐.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedAnnotation {
    /// 点数大于 2 的坐标组构成的闭合多边形, 全局层级坐标.
    /// 点数不足的坐标组被跳过, 因此长度可能小于坐标组个数.
    pub polygons: Vec<Polygon<f64>>,

    /// 每个坐标组的全局层级坐标.
    pub global: Vec<Vec<LevelPoint>>,

    /// 每个坐标组的 section 局部坐标, 负分量被替换为 `-1`.
    pub local: Vec<Vec<LocalPoint>>,
}

impl AnnotationSet {
    /// 直接以坐标组构建.
    pub fn from_groups(groups: Vec<Vec<Level0Point>>) -> Self {
        Self { groups }
    }

    /// 打开并解析 `path` 处的标注文件.
    pub fn open<P: AsRef<Path>>(path: P) -> AnnotationResult<Self> {
        let path = path.as_ref();
        let set = Self::from_xml_reader(BufReader::new(File::open(path)?))?;
        log::info!(
            "parsed {} annotation group(s) from `{}`",
            set.len(),
            path.display()
        );
        Ok(set)
    }

    /// 解析 XML 字符串.
    pub fn from_xml_str(xml: &str) -> AnnotationResult<Self> {
        Self::from_xml_reader(xml.as_bytes())
    }

    /// 从任意缓冲读取器解析 XML.
    pub fn from_xml_reader<R: BufRead>(source: R) -> AnnotationResult<Self> {
        let mut reader = Reader::from_reader(source);
        reader.trim_text(true);

        let mut groups = Vec::new();
        let mut current: Option<Vec<Level0Point>> = None;
        let mut buf = Vec::new();

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|source| AnnotationError::Xml {
                    position: reader.buffer_position(),
                    source,
                })?;
            match event {
                Event::Start(e) if e.local_name().as_ref() == b"Coordinates" => {
                    current = Some(Vec::new());
                }
                Event::Empty(e) if e.local_name().as_ref() == b"Coordinates" => {
                    groups.push(Vec::new());
                }
                Event::End(e) if e.local_name().as_ref() == b"Coordinates" => {
                    if let Some(group) = current.take() {
                        groups.push(group);
                    }
                }
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Coordinate" => {
                    // 坐标组之外的孤立坐标没有意义, 忽略.
                    if let Some(group) = current.as_mut() {
                        let point = Level0Point::new(
                            attr_value(&e, "X", groups.len(), reader.buffer_position())?,
                            attr_value(&e, "Y", groups.len(), reader.buffer_position())?,
                        );
                        group.push(point);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        Ok(Self { groups })
    }

    /// 所有坐标组.
    #[inline]
    pub fn groups(&self) -> &[Vec<Level0Point>] {
        &self.groups
    }

    /// 坐标组个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// 是否没有任何坐标组.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// 全局层级坐标下的多边形. 与 section 无关, 每张切片只需计算一次.
    pub fn polygons(&self, level: Level) -> Vec<Polygon<f64>> {
        self.groups
            .iter()
            .filter(|g| g.len() > MIN_POLYGON_POINTS)
            .map(|g| to_polygon(g.iter().map(|&p| level.from_level0(p))))
            .collect()
    }

    /// 投影到 `level` 层, 偏移为 `offset` 的 section.
    pub fn project(&self, level: Level, offset: LevelPoint) -> ParsedAnnotation {
        let mut ans = ParsedAnnotation::default();
        for group in &self.groups {
            let global: Vec<LevelPoint> = group.iter().map(|&p| level.from_level0(p)).collect();
            ans.local
                .push(global.iter().map(|p| p.localize(offset)).collect());
            if global.len() > MIN_POLYGON_POINTS {
                ans.polygons.push(to_polygon(global.iter().copied()));
            }
            ans.global.push(global);
        }
        ans
    }
}

/// 解析 `path` 处的标注文件, 并投影到 `level` 层, 偏移为 `offset` 的 section.
pub fn parse_annotation<P: AsRef<Path>>(
    path: P,
    level: Level,
    offset: LevelPoint,
) -> AnnotationResult<ParsedAnnotation> {
    Ok(AnnotationSet::open(path)?.project(level, offset))
}

fn to_polygon<I: IntoIterator<Item = LevelPoint>>(points: I) -> Polygon<f64> {
    let ring: LineString<f64> = points
        .into_iter()
        .map(|p| (p.x as f64, p.y as f64))
        .collect::<Vec<_>>()
        .into();
    Polygon::new(ring, vec![])
}

/// 读取数值属性 `attr`, 按 `trunc(float(value))` 取整.
fn attr_value(
    e: &BytesStart,
    attr: &'static str,
    group: usize,
    position: usize,
) -> AnnotationResult<i64> {
    let xml_err = |source: quick_xml::Error| AnnotationError::Xml { position, source };
    let raw = e
        .try_get_attribute(attr)
        .map_err(|err| xml_err(err.into()))?
        .ok_or(AnnotationError::MissingAttribute { group, attr })?;
    let value = raw.unescape_value().map_err(xml_err)?;
    let not_numeric = || AnnotationError::NotNumeric {
        group,
        attr,
        value: value.to_string(),
    };
    let v: f64 = value.trim().parse().map_err(|_| not_numeric())?;
    if !v.is_finite() || v.abs() >= i64::MAX as f64 {
        return Err(not_numeric());
    }
    Ok(v.trunc() as i64)
}
