//! 查找/替换的数据契约
//!
//! - SearchConfig: 一次搜索的不可变配置快照
//! - MatchSpan / ResultTree / SearchStatus: 交给 UI 层的结果数据
//! - 错误分类：PatternError / ScopeError / EngineError / ReplaceError

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::ops::Range;
use std::path::PathBuf;

pub type DocumentId = u64;

/// 文本来源标识：编辑器中的文档，或磁盘上的文件
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceId {
    Document(DocumentId),
    File(PathBuf),
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Document(id) => write!(f, "document #{}", id),
            SourceId::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    #[default]
    Document,
    Selection,
    OpenFiles,
    Folder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub find_string: String,
    pub replace_string: String,
    pub scope: SearchScope,
    /// 文件名过滤（仅 Folder 范围），多个 glob 用 `;` 分隔，空串表示全部文件
    pub glob_pattern: String,
    pub ignore_case: bool,
    pub ignore_whitespace: bool,
    pub regular_expression: bool,
    pub wrap_around: bool,
    pub follow_links: bool,
    pub full_words: bool,
    pub search_hidden_folders: bool,
    /// 遍历目录时遵守 .gitignore / .ignore
    pub respect_ignore_files: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            find_string: String::new(),
            replace_string: String::new(),
            scope: SearchScope::Document,
            glob_pattern: String::new(),
            ignore_case: false,
            ignore_whitespace: false,
            regular_expression: false,
            wrap_around: true,
            follow_links: false,
            full_words: false,
            search_hidden_folders: false,
            respect_ignore_files: true,
        }
    }
}

impl SearchConfig {
    pub fn new(find_string: impl Into<String>, scope: SearchScope) -> Self {
        Self {
            find_string: find_string.into(),
            scope,
            ..Self::default()
        }
    }
}

/// 一个已定位的匹配
///
/// `start`/`end` 是整个来源文本中的 UTF-8 字节偏移，`version` 是匹配时
/// 来源的版本（文档版本号或文件内容指纹），用于替换时检测过期偏移。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSpan {
    pub source: SourceId,
    pub version: u64,
    pub start: usize,
    pub end: usize,
    pub matched_text: String,
    /// 正则捕获组 1..n（不含整体匹配），字面量模式为空
    pub captures: Vec<Option<String>>,
}

impl MatchSpan {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Binary,
    TooLarge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceResults {
    pub source: SourceId,
    pub spans: Vec<MatchSpan>,
    pub error: Option<EngineError>,
}

/// 按枚举顺序组织的结果树：来源 -> 该来源内按文档顺序排列的匹配
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultTree {
    sources: Vec<SourceResults>,
    index: FxHashMap<SourceId, usize>,
    /// 所有扫描过的来源（包括没有匹配的）在枚举中的序号
    order: FxHashMap<SourceId, usize>,
}

impl ResultTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sources(&self) -> &[SourceResults] {
        &self.sources
    }

    pub fn get(&self, source: &SourceId) -> Option<&SourceResults> {
        self.index.get(source).map(|&i| &self.sources[i])
    }

    pub fn spans(&self, source: &SourceId) -> &[MatchSpan] {
        self.get(source).map(|r| r.spans.as_slice()).unwrap_or(&[])
    }

    pub fn iter_spans(&self) -> impl Iterator<Item = &MatchSpan> {
        self.sources.iter().flat_map(|r| r.spans.iter())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&SourceId, &EngineError)> {
        self.sources
            .iter()
            .filter_map(|r| Some((&r.source, r.error.as_ref()?)))
    }

    pub fn match_count(&self) -> usize {
        self.sources.iter().map(|r| r.spans.len()).sum()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// 记录来源已被扫描，返回它的枚举序号
    pub(crate) fn visit(&mut self, source: &SourceId) -> usize {
        let next = self.order.len();
        *self.order.entry(source.clone()).or_insert(next)
    }

    fn ordinal(&self, source: &SourceId) -> usize {
        self.order.get(source).copied().unwrap_or(usize::MAX)
    }

    pub(crate) fn insert(
        &mut self,
        source: SourceId,
        spans: Vec<MatchSpan>,
        error: Option<EngineError>,
    ) {
        if let Some(&i) = self.index.get(&source) {
            let entry = &mut self.sources[i];
            entry.spans = spans;
            entry.error = error;
            return;
        }
        // 按枚举序号插入：被删掉的来源重新扫描后回到原来的位置
        let ordinal = self.visit(&source);
        let order = &self.order;
        let at = self
            .sources
            .partition_point(|r| order.get(&r.source).is_some_and(|&o| o < ordinal));
        self.sources.insert(
            at,
            SourceResults {
                source,
                spans,
                error,
            },
        );
        self.reindex();
    }

    pub(crate) fn get_mut(&mut self, source: &SourceId) -> Option<&mut SourceResults> {
        let i = *self.index.get(source)?;
        self.sources.get_mut(i)
    }

    /// 删除既没有匹配也没有错误的来源，并重建索引
    pub(crate) fn prune(&mut self) {
        let before = self.sources.len();
        self.sources.retain(|r| !r.spans.is_empty() || r.error.is_some());
        if self.sources.len() != before {
            self.reindex();
        }
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, r) in self.sources.iter().enumerate() {
            self.index.insert(r.source.clone(), i);
        }
    }

    pub fn clear(&mut self) {
        self.sources.clear();
        self.index.clear();
        self.order.clear();
    }

    /// 查找下一个：光标之后（start >= offset）的第一个匹配；越过最后一个时按 wrap 回绕
    ///
    /// 光标所在来源没有匹配时，从枚举顺序中它之后的来源继续。
    pub fn next_after(&self, cursor: Option<&FindCursor>, wrap_around: bool) -> Navigation {
        let first = self.iter_spans().next();
        let Some(cursor) = cursor else {
            return first.cloned().map_or(Navigation::NoMoreMatches, Navigation::Found);
        };
        let Some(&ordinal) = self.order.get(&cursor.source) else {
            return first.cloned().map_or(Navigation::NoMoreMatches, Navigation::Found);
        };

        let in_source = self
            .get(&cursor.source)
            .and_then(|r| r.spans.iter().find(|s| s.start >= cursor.offset));
        let later = self
            .sources
            .iter()
            .filter(|r| self.ordinal(&r.source) > ordinal)
            .flat_map(|r| r.spans.iter())
            .next();

        match in_source.or(later) {
            Some(span) => Navigation::Found(span.clone()),
            None if wrap_around => first
                .cloned()
                .map_or(Navigation::NoMoreMatches, Navigation::Wrapped),
            None => Navigation::NoMoreMatches,
        }
    }

    /// 查找上一个：光标之前（start < offset）的最后一个匹配
    pub fn previous_before(&self, cursor: Option<&FindCursor>, wrap_around: bool) -> Navigation {
        let last = self.iter_spans().last();
        let Some(cursor) = cursor else {
            return last.cloned().map_or(Navigation::NoMoreMatches, Navigation::Found);
        };
        let Some(&ordinal) = self.order.get(&cursor.source) else {
            return last.cloned().map_or(Navigation::NoMoreMatches, Navigation::Found);
        };

        let in_source = self
            .get(&cursor.source)
            .and_then(|r| r.spans.iter().rfind(|s| s.start < cursor.offset));
        let earlier = self
            .sources
            .iter()
            .filter(|r| self.ordinal(&r.source) < ordinal)
            .flat_map(|r| r.spans.iter())
            .last();

        match in_source.or(earlier) {
            Some(span) => Navigation::Found(span.clone()),
            None if wrap_around => last
                .cloned()
                .map_or(Navigation::NoMoreMatches, Navigation::Wrapped),
            None => Navigation::NoMoreMatches,
        }
    }
}

/// 导航光标：某个来源中的字节位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindCursor {
    pub source: SourceId,
    pub offset: usize,
}

impl FindCursor {
    pub fn new(source: SourceId, offset: usize) -> Self {
        Self { source, offset }
    }

    /// 位于匹配末尾，供“查找下一个”使用
    pub fn after(span: &MatchSpan) -> Self {
        Self::new(span.source.clone(), span.end)
    }

    /// 位于匹配开头，供“查找上一个”使用
    pub fn before(span: &MatchSpan) -> Self {
        Self::new(span.source.clone(), span.start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Found(MatchSpan),
    /// 越过末尾（或开头）后回绕得到的匹配
    Wrapped(MatchSpan),
    NoMoreMatches,
}

impl Navigation {
    pub fn span(&self) -> Option<&MatchSpan> {
        match self {
            Navigation::Found(span) | Navigation::Wrapped(span) => Some(span),
            Navigation::NoMoreMatches => None,
        }
    }

    pub fn is_wrapped(&self) -> bool {
        matches!(self, Navigation::Wrapped(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Pattern,
    Scope,
    Engine,
    Replace,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchStatus {
    pub busy: bool,
    pub state: RunState,
    pub match_count: usize,
    /// 已处理的来源数（含失败和跳过）
    pub source_count: usize,
    pub sources_with_matches: usize,
    pub failed_sources: usize,
    pub skipped_sources: usize,
    pub message: String,
    pub last_error: Option<ErrorClass>,
}

/// 后台搜索推送给订阅者的消息
#[derive(Debug, Clone)]
pub enum SearchEvent {
    SourceMatches {
        search_id: u64,
        source: SourceId,
        spans: Vec<MatchSpan>,
    },
    SourceFailed {
        search_id: u64,
        source: SourceId,
        error: EngineError,
    },
    Progress {
        search_id: u64,
        sources_searched: usize,
        sources_with_matches: usize,
    },
    Complete {
        search_id: u64,
        total_sources: usize,
        total_matches: usize,
    },
    Cancelled {
        search_id: u64,
    },
    Error {
        search_id: u64,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    Empty,
    InvalidRegex {
        message: String,
        /// 出错位置（模式串中的字节偏移），能从正则错误中推出时才有
        position: Option<usize>,
    },
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternError::Empty => write!(f, "Find string is empty"),
            PatternError::InvalidRegex {
                message,
                position: Some(pos),
            } => write!(f, "Invalid regex at offset {}: {}", pos, message),
            PatternError::InvalidRegex { message, .. } => write!(f, "Invalid regex: {}", message),
        }
    }
}

impl std::error::Error for PatternError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    MissingDocument,
    MissingSelection,
    InvalidSelection { start: usize, end: usize, len: usize },
    MissingFolder,
    FolderInaccessible { path: PathBuf, message: String },
    InvalidGlob { glob: String, message: String },
}

impl fmt::Display for ScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeError::MissingDocument => write!(f, "No document to search"),
            ScopeError::MissingSelection => write!(f, "No selection to search"),
            ScopeError::InvalidSelection { start, end, len } => write!(
                f,
                "Invalid selection {}..{} for document of {} bytes",
                start, end, len
            ),
            ScopeError::MissingFolder => write!(f, "No search folder set"),
            ScopeError::FolderInaccessible { path, message } => {
                write!(f, "Cannot search folder {}: {}", path.display(), message)
            }
            ScopeError::InvalidGlob { glob, message } => {
                write!(f, "Invalid glob '{}': {}", glob, message)
            }
        }
    }
}

impl std::error::Error for ScopeError {}

/// 单个来源读取失败；记录在该来源上，不中断整次搜索
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    Io { kind: io::ErrorKind, message: String },
    InvalidUtf8 { valid_up_to: usize },
    /// 选区在范围校验之后被编辑，已不在文档内
    SelectionOutOfRange { start: usize, end: usize, len: usize },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Io { message, .. } => write!(f, "IO error: {}", message),
            EngineError::InvalidUtf8 { valid_up_to } => {
                write!(f, "Not valid UTF-8 (after byte {})", valid_up_to)
            }
            EngineError::SelectionOutOfRange { start, end, len } => write!(
                f,
                "Selection {}..{} is outside the document ({} bytes)",
                start, end, len
            ),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<io::Error> for EngineError {
    fn from(e: io::Error) -> Self {
        EngineError::Io {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceError {
    /// 来源在匹配之后被修改过，需要重新搜索
    Stale {
        source: SourceId,
        expected: u64,
        actual: u64,
    },
    InvalidSpan {
        source: SourceId,
        start: usize,
        end: usize,
    },
    OverlappingSpans {
        source: SourceId,
    },
    SourceUnavailable {
        source: SourceId,
    },
    Io {
        source: SourceId,
        message: String,
    },
}

impl ReplaceError {
    pub fn source_id(&self) -> &SourceId {
        match self {
            ReplaceError::Stale { source, .. }
            | ReplaceError::InvalidSpan { source, .. }
            | ReplaceError::OverlappingSpans { source }
            | ReplaceError::SourceUnavailable { source }
            | ReplaceError::Io { source, .. } => source,
        }
    }
}

impl fmt::Display for ReplaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplaceError::Stale {
                source,
                expected,
                actual,
            } => write!(
                f,
                "{} changed since it was searched (version {} != {})",
                source, actual, expected
            ),
            ReplaceError::InvalidSpan { source, start, end } => {
                write!(f, "Invalid match {}..{} in {}", start, end, source)
            }
            ReplaceError::OverlappingSpans { source } => {
                write!(f, "Overlapping matches in {}", source)
            }
            ReplaceError::SourceUnavailable { source } => {
                write!(f, "{} is not available for replace", source)
            }
            ReplaceError::Io { source, message } => {
                write!(f, "IO error in {}: {}", source, message)
            }
        }
    }
}

impl std::error::Error for ReplaceError {}

/// startSearch 的同步失败：搜索根本没有开始
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    Pattern(PatternError),
    Scope(ScopeError),
}

impl StartError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StartError::Pattern(_) => ErrorClass::Pattern,
            StartError::Scope(_) => ErrorClass::Scope,
        }
    }
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::Pattern(e) => write!(f, "{}", e),
            StartError::Scope(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for StartError {}

impl From<PatternError> for StartError {
    fn from(e: PatternError) -> Self {
        StartError::Pattern(e)
    }
}

impl From<ScopeError> for StartError {
    fn from(e: ScopeError) -> Self {
        StartError::Scope(e)
    }
}

#[cfg(test)]
#[path = "../../../../tests/unit/kernel/services/ports/search.rs"]
mod tests;
