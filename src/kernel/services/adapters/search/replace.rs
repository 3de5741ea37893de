//! 替换执行器
//!
//! 同一来源内的编辑按偏移从高到低应用，较早（文档顺序靠前）的偏移不受影响。
//! 文档在写锁内校验版本并一次性应用；文件校验内容指纹后经临时文件 + rename 写回。

use super::engine::fingerprint;
use super::pattern::Pattern;
use super::results::AppliedEdit;
use crate::kernel::services::ports::search::{DocumentId, MatchSpan, ReplaceError, SourceId};
use crate::models::{write_atomic, DocumentHandle, TextEdit};
use rustc_hash::FxHashMap;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplaceMode {
    /// 只替换，不重新匹配
    #[default]
    ReplaceOnly,
    /// 替换后重新扫描被编辑的来源
    ReplaceAndContinue,
}

/// 单个来源的替换结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUpdate {
    pub source: SourceId,
    pub replacements: usize,
    pub new_version: u64,
    /// 该来源中剩余（已平移或重新扫描得到）的匹配
    pub remaining: Vec<MatchSpan>,
}

pub type UpdatedSources = Vec<SourceUpdate>;

/// 已应用到某个来源的编辑
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEdit {
    pub source: SourceId,
    pub new_version: u64,
    pub edits: Vec<AppliedEdit>,
}

pub struct ReplaceExecutor<'a> {
    pattern: &'a Pattern,
    documents: &'a FxHashMap<DocumentId, DocumentHandle>,
}

impl<'a> ReplaceExecutor<'a> {
    pub fn new(
        pattern: &'a Pattern,
        documents: &'a FxHashMap<DocumentId, DocumentHandle>,
    ) -> Self {
        Self { pattern, documents }
    }

    /// 按来源分组，保持首次出现的顺序
    pub fn group(spans: &[MatchSpan]) -> Vec<(SourceId, Vec<&MatchSpan>)> {
        let mut groups: Vec<(SourceId, Vec<&MatchSpan>)> = Vec::new();
        let mut index: FxHashMap<&SourceId, usize> = FxHashMap::default();
        for span in spans {
            match index.get(&span.source) {
                Some(&i) => groups[i].1.push(span),
                None => {
                    index.insert(&span.source, groups.len());
                    groups.push((span.source.clone(), vec![span]));
                }
            }
        }
        groups
    }

    /// 预检：所有来源的版本都与匹配一致才开始写
    pub fn check_versions(
        &self,
        groups: &[(SourceId, Vec<&MatchSpan>)],
    ) -> Result<(), ReplaceError> {
        for (source, spans) in groups {
            let expected = spans_version(source, spans)?;
            let actual = self.current_version(source)?;
            if actual != expected {
                return Err(ReplaceError::Stale {
                    source: source.clone(),
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    fn current_version(&self, source: &SourceId) -> Result<u64, ReplaceError> {
        match source {
            SourceId::Document(id) => {
                let handle = self.document(source, *id)?;
                let doc = handle.read().map_err(|_| unavailable(source))?;
                Ok(doc.version())
            }
            SourceId::File(path) => {
                let bytes = std::fs::read(path).map_err(|e| io_error(source, e))?;
                Ok(fingerprint(&bytes))
            }
        }
    }

    fn document(
        &self,
        source: &SourceId,
        id: DocumentId,
    ) -> Result<&'a DocumentHandle, ReplaceError> {
        self.documents.get(&id).ok_or_else(|| unavailable(source))
    }

    /// 在单个来源上应用一组替换（原子：要么全部应用，要么不改动）
    pub fn replace_in_source(
        &self,
        source: &SourceId,
        spans: &[&MatchSpan],
        replacement: &str,
    ) -> Result<SourceEdit, ReplaceError> {
        let expected = spans_version(source, spans)?;
        match source {
            SourceId::Document(id) => {
                let handle = self.document(source, *id)?;
                let mut doc = handle.write().map_err(|_| unavailable(source))?;
                check_version(source, expected, doc.version())?;

                let edits = {
                    let text = doc.text();
                    self.plan(source, &text, spans, replacement)?
                };
                let new_version = doc.apply_edits(&edits);
                Ok(SourceEdit {
                    source: source.clone(),
                    new_version,
                    edits: applied(&edits),
                })
            }
            SourceId::File(path) => {
                let bytes = std::fs::read(path).map_err(|e| io_error(source, e))?;
                check_version(source, expected, fingerprint(&bytes))?;
                let mut text = String::from_utf8(bytes).map_err(|_| unavailable(source))?;

                let edits = self.plan(source, &text, spans, replacement)?;
                for edit in &edits {
                    text.replace_range(edit.range.clone(), &edit.text);
                }
                write_atomic(path, |w| w.write_all(text.as_bytes()))
                    .map_err(|e| io_error(source, e))?;
                Ok(SourceEdit {
                    source: source.clone(),
                    new_version: fingerprint(text.as_bytes()),
                    edits: applied(&edits),
                })
            }
        }
    }

    /// 校验匹配并生成按偏移降序排列的编辑
    fn plan(
        &self,
        source: &SourceId,
        text: &str,
        spans: &[&MatchSpan],
        replacement: &str,
    ) -> Result<Vec<TextEdit>, ReplaceError> {
        let mut sorted: Vec<&MatchSpan> = spans.to_vec();
        sorted.sort_by_key(|s| (s.start, s.end));
        sorted.dedup_by_key(|s| (s.start, s.end));

        for pair in sorted.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(ReplaceError::OverlappingSpans {
                    source: source.clone(),
                });
            }
        }

        let mut edits = Vec::with_capacity(sorted.len());
        for span in sorted.iter().rev() {
            let invalid = || ReplaceError::InvalidSpan {
                source: source.clone(),
                start: span.start,
                end: span.end,
            };
            if span.start >= span.end {
                return Err(invalid());
            }
            let current = text.get(span.range()).ok_or_else(invalid)?;
            if current != span.matched_text {
                return Err(invalid());
            }
            edits.push(TextEdit {
                range: span.range(),
                text: self.pattern.expand_replacement(span, replacement),
            });
        }
        Ok(edits)
    }
}

fn spans_version(source: &SourceId, spans: &[&MatchSpan]) -> Result<u64, ReplaceError> {
    let first = spans.first().ok_or_else(|| unavailable(source))?;
    if let Some(other) = spans.iter().find(|s| s.version != first.version) {
        return Err(ReplaceError::Stale {
            source: source.clone(),
            expected: first.version,
            actual: other.version,
        });
    }
    Ok(first.version)
}

fn check_version(source: &SourceId, expected: u64, actual: u64) -> Result<(), ReplaceError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ReplaceError::Stale {
            source: source.clone(),
            expected,
            actual,
        })
    }
}

fn applied(edits: &[TextEdit]) -> Vec<AppliedEdit> {
    edits
        .iter()
        .rev()
        .map(|e| AppliedEdit {
            start: e.range.start,
            old_end: e.range.end,
            new_len: e.text.len(),
        })
        .collect()
}

fn unavailable(source: &SourceId) -> ReplaceError {
    ReplaceError::SourceUnavailable {
        source: source.clone(),
    }
}

fn io_error(source: &SourceId, e: std::io::Error) -> ReplaceError {
    ReplaceError::Io {
        source: source.clone(),
        message: e.to_string(),
    }
}

#[cfg(test)]
#[path = "../../../../../tests/unit/kernel/services/adapters/search/replace.rs"]
mod tests;
