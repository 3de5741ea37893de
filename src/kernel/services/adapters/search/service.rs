//! 查找服务
//!
//! 对 UI 层暴露的进程内接口：启动/取消搜索、轮询或订阅状态、导航、替换。
//! 每次搜索一个后台 worker（tokio 任务 + spawn_blocking），按来源顺序扫描。

use super::engine::{load_source, Loaded, MatchEngine, RunOutcome, ScanOutcome};
use super::pattern::Pattern;
use super::replace::{ReplaceExecutor, ReplaceMode, SourceUpdate, UpdatedSources};
use super::results::ResultAggregator;
use super::scope::{ScopePlan, SearchTargets, TextSource};
use crate::kernel::services::ports::search::{
    DocumentId, EngineError, FindCursor, MatchSpan, Navigation, PatternError, ReplaceError,
    ResultTree, SearchConfig, SearchEvent, SearchScope, SearchStatus, SourceId, StartError,
};
use crate::kernel::services::ports::FindSettings;
use crate::models::{Document, DocumentHandle};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::time::Duration;

static SEARCH_ID: AtomicU64 = AtomicU64::new(0);

fn next_search_id() -> u64 {
    SEARCH_ID.fetch_add(1, Ordering::Relaxed)
}

/// 一次搜索运行共享的状态
struct SearchRun {
    config: SearchConfig,
    pattern: Pattern,
    settings: FindSettings,
    documents: FxHashMap<DocumentId, DocumentHandle>,
    results: ResultAggregator,
}

/// 匹配附近的文本，供结果列表/弹出预览显示
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPreview {
    /// 0-based 行号
    pub line: usize,
    /// 匹配在行内的字节列
    pub column: usize,
    pub before: String,
    pub matched: String,
    pub after: String,
}

impl MatchPreview {
    pub fn line_text(&self) -> String {
        format!("{}{}{}", self.before, self.matched, self.after)
    }
}

/// 搜索句柄：取消、查询快照、导航、替换都经由它
#[derive(Clone)]
pub struct SearchHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
    run: Arc<SearchRun>,
}

impl SearchHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &SearchConfig {
        &self.run.config
    }

    /// 本次搜索可以替换的已打开文档
    pub fn document_handles(&self) -> impl Iterator<Item = DocumentHandle> + '_ {
        self.run.documents.values().cloned()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn current_status(&self) -> SearchStatus {
        self.run.results.status()
    }

    pub fn current_results(&self) -> ResultTree {
        self.run.results.snapshot()
    }

    /// 阻塞等待后台运行结束，超时返回 false
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.run.results.wait_idle(timeout)
    }

    pub fn clear(&self) {
        self.run.results.clear();
    }

    pub fn find_next(&self, cursor: Option<&FindCursor>) -> Navigation {
        self.run
            .results
            .snapshot()
            .next_after(cursor, self.run.config.wrap_around)
    }

    pub fn find_previous(&self, cursor: Option<&FindCursor>) -> Navigation {
        self.run
            .results
            .snapshot()
            .previous_before(cursor, self.run.config.wrap_around)
    }

    /// 替换指定的匹配
    ///
    /// 先校验所有涉及来源的版本，任何一个过期则整个调用失败、不做改动。
    pub fn replace(
        &self,
        spans: &[MatchSpan],
        replacement: &str,
        mode: ReplaceMode,
    ) -> Result<UpdatedSources, ReplaceError> {
        let run = &self.run;
        let executor = ReplaceExecutor::new(&run.pattern, &run.documents);
        let groups = ReplaceExecutor::group(spans);

        if let Err(e) = executor.check_versions(&groups) {
            tracing::warn!(search_id = self.id, error = %e, "replace rejected");
            run.results.record_replace_error(e.to_string());
            return Err(e);
        }

        let mut updated = Vec::with_capacity(groups.len());
        for (source, group) in &groups {
            let edit = match executor.replace_in_source(source, group, replacement) {
                Ok(edit) => edit,
                Err(e) => {
                    tracing::warn!(
                        search_id = self.id,
                        source = %source,
                        error = %e,
                        "replace failed"
                    );
                    run.results.record_replace_error(e.to_string());
                    return Err(e);
                }
            };

            let mut remaining = run
                .results
                .apply_edits(source, &edit.edits, edit.new_version);
            // 选区范围不重新扫描：整篇文档的新匹配不属于本次搜索
            if mode == ReplaceMode::ReplaceAndContinue
                && run.config.scope != SearchScope::Selection
            {
                remaining = self.rescan(source);
            }

            tracing::info!(
                search_id = self.id,
                source = %source,
                replacements = edit.edits.len(),
                "replaced"
            );
            updated.push(SourceUpdate {
                source: source.clone(),
                replacements: edit.edits.len(),
                new_version: edit.new_version,
                remaining,
            });
        }
        Ok(updated)
    }

    /// 用配置中的替换串替换当前结果树中的全部匹配
    pub fn replace_all(&self, mode: ReplaceMode) -> Result<UpdatedSources, ReplaceError> {
        let spans: Vec<MatchSpan> = self.current_results().iter_spans().cloned().collect();
        if spans.is_empty() {
            return Ok(Vec::new());
        }
        self.replace(&spans, &self.run.config.replace_string, mode)
    }

    fn text_source(&self, source: &SourceId) -> Option<TextSource> {
        match source {
            SourceId::Document(id) => self.run.documents.get(id).map(|handle| TextSource::Document {
                id: *id,
                handle: handle.clone(),
                range: None,
            }),
            SourceId::File(path) => Some(TextSource::File { path: path.clone() }),
        }
    }

    fn rescan(&self, source: &SourceId) -> Vec<MatchSpan> {
        let run = &self.run;
        let Some(text_source) = self.text_source(source) else {
            return Vec::new();
        };

        let never = AtomicBool::new(false);
        let engine = MatchEngine::new(&run.pattern, &run.settings, &never);
        match engine.scan_source(&text_source) {
            Ok(ScanOutcome::Matches(spans)) => {
                run.results.replace_source(source.clone(), spans.clone());
                spans
            }
            Ok(_) => Vec::new(),
            Err(e) => {
                tracing::warn!(source = %source, error = %e, "rescan failed");
                Vec::new()
            }
        }
    }

    /// 匹配所在行及其前后最多 `context` 字节的文本
    pub fn preview(&self, span: &MatchSpan, context: usize) -> Result<MatchPreview, EngineError> {
        let never = AtomicBool::new(false);
        let source = self.text_source(&span.source).ok_or_else(|| EngineError::Io {
            kind: std::io::ErrorKind::NotFound,
            message: format!("{} is no longer open", span.source),
        })?;
        let text = match load_source(&source, &self.run.settings, &never)? {
            Loaded::Text(loaded) => loaded.text,
            Loaded::Skipped(_) | Loaded::Cancelled => String::new(),
        };
        preview_in(&text, span, context).ok_or_else(|| EngineError::Io {
            kind: std::io::ErrorKind::InvalidData,
            message: format!("match {}..{} is out of date", span.start, span.end),
        })
    }
}

/// 在给定文本上生成预览；偏移越界或不在字符边界上时返回 None
pub fn preview_in(text: &str, span: &MatchSpan, context: usize) -> Option<MatchPreview> {
    let matched = text.get(span.range())?;
    let line_start = text[..span.start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = text[span.end..]
        .find('\n')
        .map_or(text.len(), |i| span.end + i);

    let mut before_start = line_start.max(span.start.saturating_sub(context));
    while !text.is_char_boundary(before_start) {
        before_start += 1;
    }
    let mut after_end = line_end.min(span.end.saturating_add(context));
    while !text.is_char_boundary(after_end) {
        after_end -= 1;
    }

    Some(MatchPreview {
        line: text[..line_start].matches('\n').count(),
        column: span.start - line_start,
        before: text[before_start..span.start].to_string(),
        matched: matched.to_string(),
        after: text[span.end..after_end]
            .trim_end_matches('\r')
            .to_string(),
    })
}

pub struct FindService {
    runtime: tokio::runtime::Handle,
    settings: FindSettings,
}

impl FindService {
    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self::with_settings(runtime, FindSettings::default())
    }

    pub fn with_settings(runtime: tokio::runtime::Handle, settings: FindSettings) -> Self {
        Self { runtime, settings }
    }

    pub fn settings(&self) -> &FindSettings {
        &self.settings
    }

    /// 启动后台搜索（不阻塞）
    ///
    /// 模式或范围不合法时同步返回错误，搜索不会开始。
    pub fn start_search(
        &self,
        config: SearchConfig,
        targets: SearchTargets,
    ) -> Result<SearchHandle, StartError> {
        self.spawn_search(config, targets, None)
    }

    /// 同 `start_search`，并把增量结果推送到 `tx`
    pub fn start_search_with_events(
        &self,
        config: SearchConfig,
        targets: SearchTargets,
        tx: SyncSender<SearchEvent>,
    ) -> Result<SearchHandle, StartError> {
        self.spawn_search(config, targets, Some(tx))
    }

    fn spawn_search(
        &self,
        config: SearchConfig,
        targets: SearchTargets,
        events: Option<SyncSender<SearchEvent>>,
    ) -> Result<SearchHandle, StartError> {
        let pattern = Pattern::compile(&config).inspect_err(|e| {
            tracing::debug!(error = %e, "search rejected");
        })?;
        let plan = ScopePlan::resolve(&config, &targets, &self.settings).inspect_err(|e| {
            tracing::debug!(error = %e, "search rejected");
        })?;

        let search_id = next_search_id();
        let cancelled = Arc::new(AtomicBool::new(false));
        let run = Arc::new(SearchRun {
            documents: targets.documents(),
            results: ResultAggregator::new(search_id, events, self.settings.progress_interval),
            pattern,
            settings: self.settings.clone(),
            config,
        });

        tracing::info!(
            search_id,
            scope = ?run.config.scope,
            regex = run.config.regular_expression,
            "search started"
        );

        let run_for_task = run.clone();
        let cancelled_for_task = cancelled.clone();
        self.runtime.spawn(async move {
            let run_for_blocking = run_for_task.clone();
            let cancelled_for_blocking = cancelled_for_task.clone();
            let result = tokio::task::spawn_blocking(move || {
                let engine = MatchEngine::new(
                    &run_for_blocking.pattern,
                    &run_for_blocking.settings,
                    &cancelled_for_blocking,
                );
                engine.run(plan.sources(), &run_for_blocking.results)
            })
            .await;

            match result {
                Ok(outcome) => {
                    let status = run_for_task.results.status();
                    match outcome {
                        RunOutcome::Completed => tracing::info!(
                            search_id,
                            sources = status.source_count,
                            matches = status.match_count,
                            failed = status.failed_sources,
                            "search complete"
                        ),
                        RunOutcome::Cancelled => tracing::info!(search_id, "search cancelled"),
                    }
                    run_for_task.results.finish(outcome);
                }
                Err(e) => {
                    if cancelled_for_task.load(Ordering::Relaxed) {
                        run_for_task.results.finish(RunOutcome::Cancelled);
                    } else {
                        tracing::error!(search_id, error = %e, "search task failed");
                        run_for_task
                            .results
                            .abort(format!("Search task failed: {}", e));
                    }
                }
            }
        });

        Ok(SearchHandle {
            id: search_id,
            cancelled,
            run,
        })
    }

    /// 同步搜索单个文档（编辑器内搜索，文本已在内存中）
    pub fn search_sync(
        document: &Document,
        config: &SearchConfig,
    ) -> Result<Vec<MatchSpan>, PatternError> {
        let pattern = Pattern::compile(config)?;
        let text = document.text();
        let source = document.source_id();
        Ok(pattern
            .find_all_in(&text)
            .map(|m| m.to_span(&source, document.version(), 0))
            .collect())
    }

    /// 查找下一个：`from_byte` 处或之后的第一个匹配，按配置决定是否回绕
    pub fn find_next_in(
        document: &Document,
        config: &SearchConfig,
        from_byte: usize,
    ) -> Result<Navigation, PatternError> {
        let mut tree = ResultTree::new();
        tree.insert(document.source_id(), Self::search_sync(document, config)?, None);
        let cursor = FindCursor::new(document.source_id(), from_byte);
        Ok(tree.next_after(Some(&cursor), config.wrap_around))
    }

    /// 查找上一个：`from_byte` 之前的最后一个匹配
    pub fn find_previous_in(
        document: &Document,
        config: &SearchConfig,
        from_byte: usize,
    ) -> Result<Navigation, PatternError> {
        let mut tree = ResultTree::new();
        tree.insert(document.source_id(), Self::search_sync(document, config)?, None);
        let cursor = FindCursor::new(document.source_id(), from_byte);
        Ok(tree.previous_before(Some(&cursor), config.wrap_around))
    }
}

#[cfg(test)]
#[path = "../../../../../tests/unit/kernel/services/adapters/search/service.rs"]
mod tests;
