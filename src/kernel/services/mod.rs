//! Services layer (ports + adapters).
//!
//! - `ports`: pure contracts/types shared with callers (UI, CLI).
//! - `adapters`: OS/runtime specific implementations (IO/async).

pub mod adapters;
pub mod ports;
