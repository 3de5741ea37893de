//! 查找/替换引擎
//!
//! - pattern: 模式编译（字面量 memchr / 正则 regex）
//! - scope: 搜索范围解析与来源枚举（文档、选区、打开的文件、目录）
//! - engine: 匹配引擎，逐来源扫描，支持取消
//! - results: 结果聚合，状态快照与事件推送
//! - replace: 替换执行器（逆序编辑、版本校验）
//! - service: FindService / SearchHandle 对外接口

mod engine;
mod pattern;
mod replace;
mod results;
mod scope;
mod service;

pub use engine::{fingerprint, MatchEngine, ResultSink, RunOutcome, ScanOutcome};
pub use pattern::{Matches, Pattern, PatternMatch};
pub use replace::{ReplaceExecutor, ReplaceMode, SourceEdit, SourceUpdate, UpdatedSources};
pub use results::{AppliedEdit, ResultAggregator};
pub use scope::{FolderWalk, ScopePlan, SearchTargets, SourceEntry, SourceFailure, TextSource};
pub use service::{preview_in, FindService, MatchPreview, SearchHandle};
