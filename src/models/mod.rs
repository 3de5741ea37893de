//! 数据模型层

pub mod document;

pub use document::{slice_to_cow, write_atomic, Document, DocumentHandle, TextEdit};
