//! Service ports: data contracts shared by the find engine and its callers.

pub mod search;
pub mod settings;

pub use search::{
    DocumentId, EngineError, ErrorClass, FindCursor, MatchSpan, Navigation, PatternError,
    ReplaceError, ResultTree, RunState, ScopeError, SearchConfig, SearchEvent, SearchScope,
    SearchStatus, SkipReason, SourceId, SourceResults, StartError,
};
pub use settings::{FindSettings, Settings};
