//! Stage-graph execution for Mito-Forge.
//!
//! Resolves a tool plan from the inputs, then walks
//! `supervisor → qc → assembly → {polish | annotation} → annotation → report`
//! with the agents from `mito-agent`, checkpointing after every node.
//!
//! A minimal run:
//!
//! ```no_run
//! # async fn demo() -> mito_types::Result<()> {
//! use std::sync::Arc;
//! use mito_agent::AgentDeps;
//! use mito_pipeline::{PipelineExecutor, Settings};
//! use mito_tools::{CancelToken, ProcessRunner, ToolRegistry};
//! use mito_types::{PipelineInputs, PipelineState};
//!
//! let settings = Settings::default();
//! let runner = ProcessRunner::new(Arc::new(ToolRegistry::default())).dry_run(true);
//! let mut state = PipelineState::new(
//!     PipelineInputs::new("reads_R1.fastq"),
//!     settings.runtime_config(),
//!     "work",
//! );
//! let mut executor = PipelineExecutor::new(AgentDeps::new(Arc::new(runner)), settings.paused_dir());
//! let outcome = executor.run(&mut state, &CancelToken::new()).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod engine;
pub mod events;
pub mod migrate;
pub mod plan;
pub mod report;
pub mod routing;
pub mod settings;

pub use checkpoint::{
    find_paused, load_checkpoint, resume, save_checkpoint, search_dirs, CheckpointEnvelope, CHECKPOINT_FILE,
    SCHEMA_VERSION,
};
pub use engine::{resolve_annotator, PipelineExecutor, RunOutcome};
pub use events::{EventEmitter, PipelineEvent};
pub use plan::{detect_input_formats, detect_seq_type, plan_for_inputs, resolve_plan};
pub use report::{build_summary, progress, HtmlReport, Progress, ReportRenderer, RunSummary};
pub use routing::{route, Decision};
pub use settings::{LlmSettings, Settings, PROJECT_REGISTRY};
