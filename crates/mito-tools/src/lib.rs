//! External tool layer for Mito-Forge stages.
//!
//! Provides the `ToolRunner` trait with a process-backed `ProcessRunner` (no shell,
//! bounded by timeout and cancellation), the project `ToolRegistry`, the tool
//! `catalog` of argument templates, and the uniform output `parsers`.

pub mod cancel;
pub mod catalog;
pub mod parsers;
pub mod registry;
pub mod runner;
pub mod truncation;

pub use cancel::CancelToken;
pub use catalog::{lookup, Invocation, OutputFamily, ToolContext, ToolSpec};
pub use parsers::{parser_for, OutputParser, ParsedOutput};
pub use registry::{is_executable, ToolRegistry};
pub use runner::{write_synthetic_run, ProcessRunner, ToolCommand, ToolRun, ToolRunner};
