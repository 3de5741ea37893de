//! 匹配引擎
//!
//! - 按枚举顺序逐个扫描来源，来源 N 的结果整体提交后才开始 N+1
//! - 取消：来源之间、匹配之间、文件读块之间检查
//! - 单个来源失败只记录在该来源上，不影响其余来源

use super::pattern::Pattern;
use super::scope::{SourceEntry, TextSource};
use crate::kernel::services::ports::search::{EngineError, MatchSpan, SkipReason, SourceId};
use crate::kernel::services::ports::FindSettings;
use rustc_hash::FxHasher;
use std::fs::File;
use std::hash::Hasher;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

const BINARY_PROBE_LEN: usize = 8192;

/// 结果接收端；由结果聚合器实现
pub trait ResultSink {
    fn commit_source(&self, source: SourceId, spans: Vec<MatchSpan>);
    fn fail_source(&self, source: SourceId, error: EngineError);
    fn skip_source(&self, source: SourceId, reason: SkipReason);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Matches(Vec<MatchSpan>),
    Skipped(SkipReason),
    Cancelled,
}

/// 读入内存的来源快照
pub struct LoadedText {
    pub text: String,
    pub version: u64,
}

pub(crate) enum Loaded {
    Text(LoadedText),
    Skipped(SkipReason),
    Cancelled,
}

pub struct MatchEngine<'a> {
    pattern: &'a Pattern,
    settings: &'a FindSettings,
    cancelled: &'a AtomicBool,
}

impl<'a> MatchEngine<'a> {
    pub fn new(
        pattern: &'a Pattern,
        settings: &'a FindSettings,
        cancelled: &'a AtomicBool,
    ) -> Self {
        Self {
            pattern,
            settings,
            cancelled,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn run<I, S>(&self, sources: I, sink: &S) -> RunOutcome
    where
        I: IntoIterator<Item = SourceEntry>,
        S: ResultSink + ?Sized,
    {
        for entry in sources {
            if self.is_cancelled() {
                return RunOutcome::Cancelled;
            }

            let source = match entry {
                Ok(source) => source,
                Err(failure) => {
                    sink.fail_source(failure.source, failure.error);
                    continue;
                }
            };

            let id = source.id();
            match self.scan_source(&source) {
                Ok(ScanOutcome::Matches(spans)) => sink.commit_source(id, spans),
                Ok(ScanOutcome::Skipped(reason)) => {
                    tracing::debug!(source = %id, ?reason, "source skipped");
                    sink.skip_source(id, reason);
                }
                Ok(ScanOutcome::Cancelled) => return RunOutcome::Cancelled,
                Err(error) => {
                    tracing::warn!(source = %id, error = %error, "source unreadable");
                    sink.fail_source(id, error);
                }
            }
        }

        if self.is_cancelled() {
            RunOutcome::Cancelled
        } else {
            RunOutcome::Completed
        }
    }

    /// 扫描单个来源；取消时丢弃该来源已找到的部分结果
    pub fn scan_source(&self, source: &TextSource) -> Result<ScanOutcome, EngineError> {
        let id = source.id();
        let loaded = match load_source(source, self.settings, self.cancelled)? {
            Loaded::Text(loaded) => loaded,
            Loaded::Skipped(reason) => return Ok(ScanOutcome::Skipped(reason)),
            Loaded::Cancelled => return Ok(ScanOutcome::Cancelled),
        };

        // 选区只限定匹配位置，整词和正则断言仍看完整文本
        let range = match source {
            TextSource::Document {
                range: Some(range), ..
            } => {
                let text = &loaded.text;
                if range.end > text.len()
                    || !text.is_char_boundary(range.start)
                    || !text.is_char_boundary(range.end)
                {
                    // 选区在枚举之后被外部编辑改得越界
                    return Err(EngineError::SelectionOutOfRange {
                        start: range.start,
                        end: range.end,
                        len: text.len(),
                    });
                }
                range.clone()
            }
            _ => 0..loaded.text.len(),
        };

        let mut spans = Vec::new();
        for m in self.pattern.find_all_within(&loaded.text, range) {
            if self.is_cancelled() {
                return Ok(ScanOutcome::Cancelled);
            }
            spans.push(m.to_span(&id, loaded.version, 0));
        }
        Ok(ScanOutcome::Matches(spans))
    }
}

/// 读出来源当前内容与版本
///
/// 文档在读锁内复制文本和版本号后立即释放锁；文件分块读取，块之间检查取消。
pub(crate) fn load_source(
    source: &TextSource,
    settings: &FindSettings,
    cancelled: &AtomicBool,
) -> Result<Loaded, EngineError> {
    match source {
        TextSource::Document { handle, .. } => {
            let doc = handle.read().map_err(|_| EngineError::Io {
                kind: std::io::ErrorKind::Other,
                message: "document lock poisoned".to_string(),
            })?;
            Ok(Loaded::Text(LoadedText {
                text: doc.text().into_owned(),
                version: doc.version(),
            }))
        }
        TextSource::File { path } => load_file(path, settings, cancelled),
    }
}

fn load_file(
    path: &Path,
    settings: &FindSettings,
    cancelled: &AtomicBool,
) -> Result<Loaded, EngineError> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    if size > settings.max_file_size {
        return Ok(Loaded::Skipped(SkipReason::TooLarge));
    }

    let mut bytes = Vec::with_capacity(size as usize);
    let mut chunk = vec![0u8; settings.read_chunk_size.max(1)];
    loop {
        if cancelled.load(Ordering::Relaxed) {
            return Ok(Loaded::Cancelled);
        }
        let n = match file.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..n]);
        if bytes.len() as u64 > settings.max_file_size {
            return Ok(Loaded::Skipped(SkipReason::TooLarge));
        }
    }

    if settings.skip_binary && is_likely_binary(&bytes) {
        return Ok(Loaded::Skipped(SkipReason::Binary));
    }

    let version = fingerprint(&bytes);
    let text = String::from_utf8(bytes).map_err(|e| EngineError::InvalidUtf8 {
        valid_up_to: e.utf8_error().valid_up_to(),
    })?;
    Ok(Loaded::Text(LoadedText { text, version }))
}

fn is_likely_binary(content: &[u8]) -> bool {
    content.iter().take(BINARY_PROBE_LEN).any(|&b| b == 0)
}

/// 文件内容指纹，作为磁盘文件的“版本号”
pub fn fingerprint(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_usize(bytes.len());
    hasher.write(bytes);
    hasher.finish()
}

#[cfg(test)]
#[path = "../../../../../tests/unit/kernel/services/adapters/search/engine.rs"]
mod tests;
