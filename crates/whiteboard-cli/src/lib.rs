//! whiteboard-cli: native host for whiteboard rooms.
//!
//! Provides file-backed room persistence, SVG export, and a scripted
//! classroom demo on top of `whiteboard-core`.

pub mod config;
pub mod demo;
pub mod file_store;
pub mod svg_export;

pub use config::{Config, ConfigError};
pub use demo::{DemoOptions, DemoSummary, run_demo};
pub use file_store::FileStore;
pub use svg_export::SvgExporter;
