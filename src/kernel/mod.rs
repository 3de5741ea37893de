//! Headless find/replace core.

pub mod services;

pub use services::adapters::{FindService, SearchHandle, SearchTargets};
pub use services::ports::{SearchConfig, SearchScope};
