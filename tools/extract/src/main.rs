//! `wsi-extract`: 对一张切片或一个目录下的所有切片进行组织分割与 patch 提取.
//!
//! ```text
//! wsi-extract slides/ -o out/ --level 1 --patch-size 500 -j
//! wsi-extract case_001.tif -a case_001.xml -c config.json -v
//! ```

mod result;
mod runner;

use anyhow::Context;
use clap::{ArgAction, Parser};
use log::LevelFilter;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use wsi_berry::PipelineConfig;

/// 命令行参数.
#[derive(Parser, Debug)]
#[command(name = "wsi-extract", version, about = "WSI tissue patch extraction")]
pub struct Cli {
    /// 切片文件或切片目录. 缺省时使用 `$WSI_SLIDE_DIR` 或 `$HOME/dataset/slides`.
    pub input: Option<PathBuf>,

    /// 标注文件. 只对单张切片有效; 缺省时使用同名 `.xml` 文件.
    #[arg(short, long)]
    pub annotation: Option<PathBuf>,

    /// 输出目录. 缺省时使用 `$WSI_OUTPUT_DIR` 或 `$HOME/dataset/patches`.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// JSON 配置文件. 命令行参数会覆盖其中的同名项.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// patch 边长.
    #[arg(long)]
    pub patch_size: Option<usize>,

    /// 切分数 N.
    #[arg(long)]
    pub split: Option<u32>,

    /// 工作层级.
    #[arg(long)]
    pub level: Option<u32>,

    /// 有效面积占比下限.
    #[arg(long)]
    pub occupancy: Option<f64>,

    /// 每个 section 采样的区域个数上限.
    #[arg(long)]
    pub max_regions: Option<usize>,

    /// 不保存 jpeg 预览.
    #[arg(long)]
    pub no_jpeg: bool,

    /// 保存 png 掩码预览.
    #[arg(long)]
    pub mask_preview: bool,

    /// 并行处理 section.
    #[arg(short = 'j', long)]
    pub parallel: bool,

    /// 日志更详细 (可叠加).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// 只输出警告和错误.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    /// 日志等级.
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Warn;
        }
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// 读取配置文件 (如有), 用命令行参数覆盖, 并校验.
    pub fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match self.config {
            Some(ref p) => {
                let f = File::open(p).with_context(|| format!("open `{}`", p.display()))?;
                serde_json::from_reader(BufReader::new(f))
                    .with_context(|| format!("parse `{}`", p.display()))?
            }
            None => PipelineConfig::default(),
        };
        if let Some(v) = self.patch_size {
            config.patch_size = v;
        }
        if let Some(v) = self.split {
            config.split = v;
        }
        if let Some(v) = self.level {
            config.level = v;
        }
        if let Some(v) = self.occupancy {
            config.occupancy = v;
        }
        if let Some(v) = self.max_regions {
            config.max_regions = v;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    simple_logger::SimpleLogger::new()
        .with_level(cli.log_level())
        .init()?;

    let report = runner::run(&cli)?;
    report.analyze()?;
    if report.failed() > 0 {
        std::process::exit(1);
    }
    Ok(())
}
