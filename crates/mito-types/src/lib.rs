//! Shared types, errors, state, and stage results for the Mito-Forge orchestration core.
//!
//! This crate provides the foundational types used across all other Mito-Forge crates:
//! - `MitoError`: unified error taxonomy
//! - [`stage`]: closed enums for stages, statuses, routes and failure kinds
//! - [`state`]: the serializable `PipelineState` record
//! - [`result`]: `StageResult` and `Diagnosis`, the values agents hand back
//! - [`plan`]: the resolved tool plan

pub mod plan;
pub mod result;
pub mod stage;
pub mod state;

pub use plan::{AssemblerChoice, InputFormat, PlanCandidates, PlanExtras, PlanHints, ToolPlan};
pub use result::{
    Diagnosis, DiagnosisSource, FixStrategy, ParamAdjustment, StageFailure, StageResult,
    StageSuccess,
};
pub use stage::{DetailLevel, FailureKind, Kingdom, NodeId, SeqType, StageName, StageRoute, StageStatus};
pub use state::{
    round_to, ErrorRecord, PipelineInputs, PipelineState, RuntimeConfig, StageMetrics,
    StageOutput, StageView, ToolChain,
};

use std::path::PathBuf;

/// Unified error type for all Mito-Forge subsystems.
#[derive(Debug, thiserror::Error)]
pub enum MitoError {
    // === LLM Provider Errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout { provider: String, timeout_ms: u64 },

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("LLM response does not match schema: {0}")]
    SchemaMismatch(String),

    // === Tool Errors ===
    #[error("Tool '{tool}' not found")]
    ToolNotFound { tool: String },

    #[error("Tool '{tool}' timed out after {timeout_secs}s")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool '{tool}' error: {message}")]
    ToolError { tool: String, message: String },

    #[error("Execution cancelled")]
    Cancelled,

    // === Pipeline Errors ===
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stage '{stage}' failed: {message}")]
    StageFailed { stage: StageName, message: String },

    // === Checkpoint Errors ===
    #[error("Checkpoint error at {}: {message}", path.display())]
    Checkpoint { path: PathBuf, message: String },

    #[error("Unsupported checkpoint schema version {found} (supported: {supported})")]
    UnsupportedSchema { found: String, supported: String },

    #[error("No paused checkpoint found for task '{0}'")]
    PausedTaskNotFound(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl MitoError {
    /// Returns `true` if the error is transient and the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MitoError::RateLimited { .. }
                | MitoError::RequestTimeout { .. }
                | MitoError::ToolTimeout { .. }
                | MitoError::SchemaMismatch(_)
                | MitoError::ProviderError { retryable: true, .. }
        )
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MitoError::AuthError { .. }
                | MitoError::LlmUnavailable(_)
                | MitoError::InvalidInput(_)
                | MitoError::Config(_)
                | MitoError::Cancelled
                | MitoError::UnsupportedSchema { .. }
        )
    }
}

/// A convenience alias for `Result<T, MitoError>`.
pub type Result<T> = std::result::Result<T, MitoError>;

/// Current wall-clock time as fractional epoch seconds.
pub fn now_epoch() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
