//! Service adapters: OS/runtime specific implementations (IO/async).

pub mod runtime;
pub mod search;
pub mod settings;

pub use runtime::FindRuntime;
pub use search::{
    FindService, MatchPreview, ReplaceMode, SearchHandle, SearchTargets, SourceUpdate,
    UpdatedSources,
};
pub use settings::{
    ensure_log_dir, ensure_settings_file, get_log_dir, get_settings_path, load_settings,
    load_settings_from,
};
