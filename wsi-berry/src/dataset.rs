//! 切片数据集操作.
//!
//! 数据集目录中每张切片是一个栅格文件, 其标注 (如果有) 是同名的 `.xml` 文件:
//!
//! ```text
//! slides/
//! ├── case_001.tif
//! ├── case_001.xml
//! └── case_002.tif
//! ```

use crate::annotation::AnnotationSet;
use crate::error::PipelineResult;
use crate::slide::RasterSlide;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 可被识别为切片的文件扩展名 (小写).
pub const SLIDE_EXTENSIONS: [&str; 5] = ["tif", "tiff", "png", "jpg", "jpeg"];

/// 标注文件扩展名.
pub const ANNOTATION_EXTENSION: &str = "xml";

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

/// 数据集中的一项: 切片文件, 以及可能存在的标注文件.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SlideEntry {
    /// 切片文件路径.
    pub slide: PathBuf,
    /// 同名 `.xml` 标注文件路径.
    pub annotation: Option<PathBuf>,
}

impl SlideEntry {
    /// 以 `slide` 为切片, 并查找其同名标注文件.
    pub fn new<P: AsRef<Path>>(slide: P) -> Self {
        let slide = slide.as_ref().to_owned();
        let xml = slide.with_extension(ANNOTATION_EXTENSION);
        let annotation = xml.is_file().then_some(xml);
        Self { slide, annotation }
    }

    /// 病例名, 即切片文件名 (不含扩展名).
    pub fn case(&self) -> String {
        self.slide
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// 打开切片和标注.
    pub fn load(&self) -> PipelineResult<LoadedSlide> {
        let slide = RasterSlide::open(&self.slide)?;
        let annotation = match self.annotation {
            Some(ref p) => Some(AnnotationSet::open(p)?),
            None => None,
        };
        Ok(LoadedSlide { slide, annotation })
    }
}

/// 已经载入内存的切片和标注.
#[derive(Clone, Debug)]
pub struct LoadedSlide {
    /// 切片.
    pub slide: RasterSlide,
    /// 标注. 没有标注文件时为 `None`.
    pub annotation: Option<AnnotationSet>,
}

#[inline]
fn is_slide_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(OsStr::to_str)
            .is_some_and(|e| SLIDE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// 列出 `dir` 下 (不递归) 的所有切片, 按文件名排序.
pub fn scan_slides<P: AsRef<Path>>(dir: P) -> io::Result<Vec<SlideEntry>> {
    let mut ans = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if is_slide_file(&path) {
            ans.push(SlideEntry::new(path));
        }
    }
    ans.sort_unstable();
    Ok(ans)
}

/// 创建 `dir` 下所有切片的加载器.
///
/// 目录本身无法读取时返回 `Err`; 单张切片的载入错误在迭代时返回.
pub fn slide_loader<P: AsRef<Path>>(dir: P) -> io::Result<SlideLoader> {
    scan_slides(dir).map(SlideLoader::from)
}

/// 切片数据加载器. 每次迭代才真正解码一张切片.
#[derive(Clone, Debug)]
pub struct SlideLoader {
    entries_rev: Vec<SlideEntry>,
}

impl Iterator for SlideLoader {
    type Item = (SlideEntry, PipelineResult<LoadedSlide>);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries_rev.pop()?;
        let data = entry.load();
        Some((entry, data))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.entries_rev.len(), Some(self.entries_rev.len()))
    }
}

/// 按 `entries` 的顺序加载.
impl From<Vec<SlideEntry>> for SlideLoader {
    fn from(mut entries: Vec<SlideEntry>) -> Self {
        entries.reverse();
        Self { entries_rev: entries }
    }
}

impl ExactSizeIterator for SlideLoader {
    #[inline]
    fn len(&self) -> usize {
        self.entries_rev.len()
    }
}
