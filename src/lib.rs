//! zfind - 文本查找/替换引擎
//!
//! 模块结构：
//! - kernel: 查找服务（ports 数据契约 + adapters 实现）
//! - models: 数据模型（Document）

pub mod kernel;
pub mod models;

pub use kernel::services::adapters::{FindService, ReplaceMode, SearchHandle, SearchTargets};
pub use kernel::services::ports::{
    FindCursor, MatchSpan, Navigation, SearchConfig, SearchScope, SearchStatus,
};
pub use models::{Document, DocumentHandle};
