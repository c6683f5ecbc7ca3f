//! 程序运行函数.

use crate::result::ExtractResult;
use crate::Cli;
use anyhow::Context;
use std::path::Path;
use utils::loader;
use wsi_berry::dataset::{LoadedSlide, SlideEntry, SlideLoader};
use wsi_berry::pipeline::{DiskWriter, RunSummary, SectionPipeline};
use wsi_berry::error::PipelineResult;
use wsi_berry::PipelineConfig;

/// 处理一张已加载的切片. 切片级错误中止该切片, 不影响其他切片.
fn extract_one(
    entry: &SlideEntry,
    loaded: LoadedSlide,
    config: &PipelineConfig,
    output: &Path,
    cli: &Cli,
) -> PipelineResult<RunSummary> {
    let pipeline = SectionPipeline::new(loaded.slide, config.clone(), loaded.annotation.as_ref())?;
    let mut writer = DiskWriter::for_slide(output, &entry.slide)
        .with_jpeg(!cli.no_jpeg)
        .with_mask_preview(cli.mask_preview);
    if cli.parallel {
        pipeline.par_run(&mut writer)
    } else {
        pipeline.run(&mut writer)
    }
}

/// 根据输入路径构造切片加载器: 目录下的所有切片, 或者单张切片.
fn slides(cli: &Cli) -> anyhow::Result<(String, SlideLoader)> {
    let Some(ref input) = cli.input else {
        anyhow::ensure!(
            cli.annotation.is_none(),
            "`--annotation` only applies to a single slide"
        );
        let dir = loader::slide_dir_from_env_or_home()
            .map_or_else(|| "<unknown>".to_string(), |d| d.display().to_string());
        let slides = loader::slide_loader_from_env_or_home()
            .with_context(|| format!("scan `{dir}`"))?;
        return Ok((dir, slides));
    };
    let name = input.display().to_string();

    if input.is_dir() {
        anyhow::ensure!(
            cli.annotation.is_none(),
            "`--annotation` only applies to a single slide"
        );
        let slides = loader::slide_loader(input).with_context(|| format!("scan `{name}`"))?;
        Ok((name, slides))
    } else {
        let mut entry = SlideEntry::new(input);
        if cli.annotation.is_some() {
            entry.annotation = cli.annotation.clone();
        }
        Ok((name, SlideLoader::from(vec![entry])))
    }
}

/// 实际运行.
pub fn run(cli: &Cli) -> anyhow::Result<ExtractResult> {
    let config = cli.pipeline_config()?;
    let output = match cli.output {
        Some(ref p) => p.clone(),
        None => loader::output_dir_from_env_or_home().context("cannot locate output directory")?,
    };
    let (input, slides) = slides(cli)?;
    anyhow::ensure!(slides.len() > 0, "no slide found in `{input}`");

    log::info!(
        "{} slide(s), output to `{}`, {}",
        slides.len(),
        output.display(),
        if cli.parallel {
            format!("parallel on {} core(s)", utils::cpus())
        } else {
            "sequential".to_string()
        }
    );
    log::debug!("{config:?}");

    let mut ans = ExtractResult::new();
    for (entry, loaded) in slides {
        let case = entry.case();
        log::info!("processing `{case}`...");
        let outcome = loaded.and_then(|l| extract_one(&entry, l, &config, &output, cli));
        if let Err(ref e) = outcome {
            log::error!("`{case}` aborted: {e}");
        }
        ans.push(case, outcome);
    }
    Ok(ans)
}
