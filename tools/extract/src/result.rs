//! 运行结果.

use std::io::{self, Write};
use wsi_berry::error::PipelineError;
use wsi_berry::pipeline::RunSummary;

/// 将 `summary` 的结果写进 `w` 中.
fn describe_into<W: Write>(name: &str, s: &RunSummary, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    writeln!(w, "Slide `{name}`:")?;
    writeln!(w, "{S4}Level: {}, size (w, h): {:?}", s.level, s.dimensions)?;
    writeln!(w, "{S4}Sections: {}", s.sections.len())?;
    writeln!(w, "{S4}Patches in total: {}", s.total_patches())?;
    for r in s.sections.iter() {
        match r.failure {
            Some(ref f) => writeln!(w, "{S4}{S4}[{}] failed: {f}", r.id)?,
            None => writeln!(
                w,
                "{S4}{S4}[{}] {} region(s), {} candidate(s), {} patch(es), {} ms",
                r.id,
                r.regions,
                r.candidates,
                r.patches,
                r.elapsed.as_millis()
            )?,
        }
    }
    writeln!(w, "{S4}Failed sections: {}", s.failed().count())?;
    let slowest = s
        .slowest()
        .map_or_else(|| "/".to_string(), |r| format!("[{}] {} ms", r.id, r.elapsed.as_millis()));
    writeln!(w, "{S4}Most time-consuming section: {slowest}")?;
    write!(w, "{S4}Total machine time: {} ms", s.elapsed.as_millis())?;
    Ok(())
}

/// 所有切片的运行结果.
#[derive(Debug, Default)]
pub struct ExtractResult {
    data: Vec<(String, Result<RunSummary, PipelineError>)>,
}

impl ExtractResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一张切片的结果.
    pub fn push(&mut self, case: String, outcome: Result<RunSummary, PipelineError>) {
        self.data.push((case, outcome));
    }

    /// 被中止的切片个数.
    pub fn failed(&self) -> usize {
        self.data.iter().filter(|(_, r)| r.is_err()).count()
    }

    /// 将所有切片的运行结果写进 `w` 中, 以分隔线隔开.
    pub fn analyze_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        utils::sep_to(&mut *w)?;
        for (case, outcome) in self.data.iter() {
            match outcome {
                Ok(summary) => describe_into(case, summary, w)?,
                Err(e) => write!(w, "Slide `{case}` aborted: {e}")?,
            }
            writeln!(w)?;
            utils::sep_to(&mut *w)?;
        }
        Ok(())
    }

    /// 分析运行结果, 输出到标准输出.
    pub fn analyze(&self) -> io::Result<()> {
        let mut out = io::stdout().lock();
        self.analyze_into(&mut out)?;
        out.flush()
    }
}
