//! 对 `wsi_berry::dataset` 的更一层封装. 提供更直接的数据集加载器.

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use wsi_berry::dataset::{self, SlideLoader};

/// 指定切片目录的环境变量.
pub const SLIDE_DIR_ENV: &str = "WSI_SLIDE_DIR";

/// 指定输出目录的环境变量.
pub const OUTPUT_DIR_ENV: &str = "WSI_OUTPUT_DIR";

fn dir_from_env_or_home(var: &str, sub: &str) -> Option<PathBuf> {
    match env::var(var) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => dataset::home_dataset_dir_with([sub]),
    }
}

/// 获取切片目录.
///
/// 1. 若环境变量 `$WSI_SLIDE_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/slides`. 无法确定用户主目录时返回 `None`.
pub fn slide_dir_from_env_or_home() -> Option<PathBuf> {
    dir_from_env_or_home(SLIDE_DIR_ENV, "slides")
}

/// 获取输出目录.
///
/// 1. 若环境变量 `$WSI_OUTPUT_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/patches`.
pub fn output_dir_from_env_or_home() -> Option<PathBuf> {
    dir_from_env_or_home(OUTPUT_DIR_ENV, "patches")
}

/// 获取 `path` 下的切片加载器.
#[inline]
pub fn slide_loader<P: AsRef<Path>>(path: P) -> io::Result<SlideLoader> {
    dataset::slide_loader(path)
}

/// 从 `$WSI_SLIDE_DIR` 或者 `$HOME/dataset/slides` 下加载切片.
pub fn slide_loader_from_env_or_home() -> io::Result<SlideLoader> {
    let dir = slide_dir_from_env_or_home()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "home directory not found"))?;
    slide_loader(dir)
}
