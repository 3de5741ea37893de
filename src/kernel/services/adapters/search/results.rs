//! 结果聚合
//!
//! 匹配引擎写、UI 线程读：结果树和状态放在同一把锁里，读取方拿到的是克隆快照。

use super::engine::{ResultSink, RunOutcome};
use crate::kernel::services::ports::search::{
    EngineError, ErrorClass, MatchSpan, ResultTree, RunState, SearchEvent, SearchStatus,
    SkipReason, SourceId,
};
use std::sync::mpsc::SyncSender;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Aggregate {
    tree: ResultTree,
    status: SearchStatus,
}

/// 一次替换在某个来源上造成的偏移变化（按原文偏移）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedEdit {
    pub start: usize,
    pub old_end: usize,
    pub new_len: usize,
}

impl AppliedEdit {
    fn delta(&self) -> isize {
        self.new_len as isize - (self.old_end - self.start) as isize
    }
}

pub struct ResultAggregator {
    search_id: u64,
    state: Mutex<Aggregate>,
    idle: Condvar,
    events: Option<SyncSender<SearchEvent>>,
    progress_interval: usize,
}

impl ResultAggregator {
    pub fn new(
        search_id: u64,
        events: Option<SyncSender<SearchEvent>>,
        progress_interval: usize,
    ) -> Self {
        let status = SearchStatus {
            busy: true,
            state: RunState::Running,
            message: "Searching…".to_string(),
            ..SearchStatus::default()
        };
        Self {
            search_id,
            state: Mutex::new(Aggregate {
                tree: ResultTree::new(),
                status,
            }),
            idle: Condvar::new(),
            events,
            progress_interval: progress_interval.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Aggregate> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, event: SearchEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    pub fn snapshot(&self) -> ResultTree {
        self.lock().tree.clone()
    }

    pub fn status(&self) -> SearchStatus {
        self.lock().status.clone()
    }

    /// 结束本次运行：busy 置 false，唤醒等待者
    pub fn finish(&self, outcome: RunOutcome) {
        let (total_sources, total_matches) = {
            let mut agg = self.lock();
            let status = &mut agg.status;
            status.busy = false;
            match outcome {
                RunOutcome::Completed => {
                    status.state = RunState::Completed;
                    status.message = completion_message(status);
                }
                RunOutcome::Cancelled => {
                    status.state = RunState::Cancelled;
                    status.message = format!("Search cancelled. {}", summary(status));
                }
            }
            (status.source_count, status.match_count)
        };
        self.idle.notify_all();

        match outcome {
            RunOutcome::Completed => self.send(SearchEvent::Complete {
                search_id: self.search_id,
                total_sources,
                total_matches,
            }),
            RunOutcome::Cancelled => self.send(SearchEvent::Cancelled {
                search_id: self.search_id,
            }),
        }
    }

    /// worker 自身异常退出
    pub fn abort(&self, message: String) {
        {
            let mut agg = self.lock();
            agg.status.busy = false;
            agg.status.state = RunState::Failed;
            agg.status.last_error = Some(ErrorClass::Engine);
            agg.status.message = message.clone();
        }
        self.idle.notify_all();
        self.send(SearchEvent::Error {
            search_id: self.search_id,
            message,
        });
    }

    /// 阻塞直到运行结束或超时；返回是否已结束
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut agg = self.lock();
        while agg.status.busy {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            agg = match self.idle.wait_timeout(agg, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    pub fn clear(&self) {
        let mut agg = self.lock();
        agg.tree.clear();
        agg.status.match_count = 0;
        agg.status.sources_with_matches = 0;
    }

    pub fn record_replace_error(&self, message: String) {
        let mut agg = self.lock();
        agg.status.last_error = Some(ErrorClass::Replace);
        agg.status.message = message;
    }

    /// 替换后更新某个来源：删去被替换的匹配，其余匹配按之前编辑的净长度变化平移
    ///
    /// `edits` 使用替换前的偏移；与编辑区间相交的残留匹配已失效，一并删除。
    pub fn apply_edits(
        &self,
        source: &SourceId,
        edits: &[AppliedEdit],
        new_version: u64,
    ) -> Vec<MatchSpan> {
        let mut agg = self.lock();
        let Some(entry) = agg.tree.get_mut(source) else {
            return Vec::new();
        };

        let spans = std::mem::take(&mut entry.spans);
        entry.spans = spans
            .into_iter()
            .filter(|span| {
                !edits
                    .iter()
                    .any(|e| span.start < e.old_end && e.start < span.end)
            })
            .map(|mut span| {
                let delta: isize = edits
                    .iter()
                    .filter(|e| e.old_end <= span.start)
                    .map(AppliedEdit::delta)
                    .sum();
                span.start = span.start.saturating_add_signed(delta);
                span.end = span.end.saturating_add_signed(delta);
                span.version = new_version;
                span
            })
            .collect();
        let remaining = entry.spans.clone();

        agg.tree.prune();
        Self::recount(&mut agg);
        remaining
    }

    /// 用重新扫描的结果替换某个来源的匹配
    pub fn replace_source(&self, source: SourceId, spans: Vec<MatchSpan>) {
        let mut agg = self.lock();
        agg.tree.insert(source, spans, None);
        agg.tree.prune();
        Self::recount(&mut agg);
    }

    fn recount(agg: &mut Aggregate) {
        agg.status.match_count = agg.tree.match_count();
        agg.status.sources_with_matches = agg
            .tree
            .sources()
            .iter()
            .filter(|r| !r.spans.is_empty())
            .count();
    }

    fn progress_event(&self, agg: &Aggregate) -> Option<SearchEvent> {
        let searched = agg.status.source_count;
        (searched % self.progress_interval == 0).then(|| SearchEvent::Progress {
            search_id: self.search_id,
            sources_searched: searched,
            sources_with_matches: agg.status.sources_with_matches,
        })
    }
}

// 事件在释放锁之后再发送：有界通道满时不能阻塞读取快照的一方
impl ResultSink for ResultAggregator {
    fn commit_source(&self, source: SourceId, spans: Vec<MatchSpan>) {
        let (matches, progress) = {
            let mut agg = self.lock();
            agg.status.source_count += 1;
            let matches = if spans.is_empty() {
                agg.tree.visit(&source);
                None
            } else {
                agg.status.match_count += spans.len();
                agg.status.sources_with_matches += 1;
                agg.status.message = summary(&agg.status);
                agg.tree.insert(source.clone(), spans.clone(), None);
                Some(SearchEvent::SourceMatches {
                    search_id: self.search_id,
                    source,
                    spans,
                })
            };
            (matches, self.progress_event(&agg))
        };
        matches.into_iter().chain(progress).for_each(|e| self.send(e));
    }

    fn fail_source(&self, source: SourceId, error: EngineError) {
        let progress = {
            let mut agg = self.lock();
            agg.status.source_count += 1;
            agg.status.failed_sources += 1;
            agg.status.last_error = Some(ErrorClass::Engine);
            agg.status.message = format!("{}: {}", source, error);
            agg.tree.insert(source.clone(), Vec::new(), Some(error.clone()));
            self.progress_event(&agg)
        };
        self.send(SearchEvent::SourceFailed {
            search_id: self.search_id,
            source,
            error,
        });
        if let Some(event) = progress {
            self.send(event);
        }
    }

    fn skip_source(&self, source: SourceId, _reason: SkipReason) {
        let progress = {
            let mut agg = self.lock();
            agg.status.source_count += 1;
            agg.tree.visit(&source);
            agg.status.skipped_sources += 1;
            self.progress_event(&agg)
        };
        if let Some(event) = progress {
            self.send(event);
        }
    }
}

fn summary(status: &SearchStatus) -> String {
    let matches = if status.match_count == 1 {
        "1 match".to_string()
    } else {
        format!("{} matches", status.match_count)
    };
    format!(
        "{} in {} of {} sources",
        matches, status.sources_with_matches, status.source_count
    )
}

fn completion_message(status: &SearchStatus) -> String {
    let mut message = if status.match_count == 0 {
        "No results.".to_string()
    } else {
        format!("{}.", summary(status))
    };
    if status.failed_sources > 0 {
        message.push_str(&format!(" {} unreadable.", status.failed_sources));
    }
    message
}

#[cfg(test)]
#[path = "../../../../../tests/unit/kernel/services/adapters/search/results.rs"]
mod tests;
