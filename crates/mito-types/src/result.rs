use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::stage::FailureKind;
use crate::state::StageOutput;

// ---------------------------------------------------------------------------
// Diagnosis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStrategy {
    Retry,
    AdjustParams,
    SwitchTool,
    Abort,
}

impl FixStrategy {
    pub fn from_label(label: &str) -> FixStrategy {
        match label.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "retry" => FixStrategy::Retry,
            "adjust_params" | "adjust_parameters" => FixStrategy::AdjustParams,
            "switch_tool" | "fallback" => FixStrategy::SwitchTool,
            _ => FixStrategy::Abort,
        }
    }
}

/// A requested change to one tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum ParamAdjustment {
    /// Halve a numeric value, never below 1.
    ReduceHalf,
    /// Double a numeric value, subject to a cap chosen by the caller.
    Increase,
    Set(serde_json::Value),
}

impl ParamAdjustment {
    /// Interpret a raw classifier value: known verbs map to operations,
    /// anything else is a literal assignment.
    pub fn from_json(value: &serde_json::Value) -> ParamAdjustment {
        match value.as_str().map(|s| s.trim().to_ascii_lowercase()) {
            Some(verb) if verb == "reduce_half" || verb == "halve" => ParamAdjustment::ReduceHalf,
            Some(verb) if verb == "increase" || verb == "double" => ParamAdjustment::Increase,
            _ => ParamAdjustment::Set(value.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisSource {
    Llm,
    Rules,
}

/// Classified failure with a proposed fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub error_type: FailureKind,
    pub root_cause: String,
    pub can_fix: bool,
    #[serde(rename = "fix_strategy")]
    pub strategy: FixStrategy,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub param_adjustments: BTreeMap<String, ParamAdjustment>,
    #[serde(default)]
    pub alternative_tool: Option<String>,
    pub source: DiagnosisSource,
}

impl Diagnosis {
    pub fn new(
        error_type: FailureKind,
        root_cause: impl Into<String>,
        strategy: FixStrategy,
        source: DiagnosisSource,
    ) -> Self {
        Self {
            error_type,
            root_cause: root_cause.into(),
            can_fix: strategy != FixStrategy::Abort,
            strategy,
            suggestions: Vec::new(),
            param_adjustments: BTreeMap::new(),
            alternative_tool: None,
            source,
        }
    }

    pub fn with_adjustment(mut self, key: impl Into<String>, adjustment: ParamAdjustment) -> Self {
        self.param_adjustments.insert(key.into(), adjustment);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// `true` when the loop should stop without another attempt.
    pub fn is_abort(&self) -> bool {
        !self.can_fix || self.strategy == FixStrategy::Abort
    }
}

// ---------------------------------------------------------------------------
// StageResult: what an agent hands back to the executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSuccess {
    pub output: StageOutput,
    /// Tool that produced the output, after any switches.
    pub tool: Option<String>,
    /// Re-attempts spent inside the stage before it succeeded.
    pub reattempts: u32,
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub kind: FailureKind,
    pub message: String,
    pub diagnosis: Option<Diagnosis>,
    pub tool: Option<String>,
    pub reattempts: u32,
    /// `false` when another attempt cannot help (bad input, aborted diagnosis).
    pub recoverable: bool,
    pub stdout_log: Option<PathBuf>,
    pub stderr_log: Option<PathBuf>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl StageFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            diagnosis: None,
            tool: None,
            reattempts: 0,
            recoverable: !kind.is_input_problem(),
            stdout_log: None,
            stderr_log: None,
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageResult {
    Ok(StageSuccess),
    Failed(StageFailure),
    Paused { task_id: String, reason: String },
    Skipped { reason: String },
}

impl StageResult {
    pub fn ok(output: StageOutput, tool: Option<String>) -> Self {
        StageResult::Ok(StageSuccess {
            output,
            tool,
            reattempts: 0,
            exit_code: None,
            warnings: Vec::new(),
        })
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        StageResult::Failed(StageFailure::new(kind, message))
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, StageResult::Ok(_))
    }

    /// Re-attempts consumed inside the stage, whatever the outcome.
    pub fn reattempts(&self) -> u32 {
        match self {
            StageResult::Ok(success) => success.reattempts,
            StageResult::Failed(failure) => failure.reattempts,
            StageResult::Paused { .. } | StageResult::Skipped { .. } => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_strategy_from_label_defaults_to_abort() {
        assert_eq!(FixStrategy::from_label("adjust-params"), FixStrategy::AdjustParams);
        assert_eq!(FixStrategy::from_label("switch_tool"), FixStrategy::SwitchTool);
        assert_eq!(FixStrategy::from_label("give up"), FixStrategy::Abort);
    }

    #[test]
    fn param_adjustment_from_json_recognises_verbs() {
        assert_eq!(
            ParamAdjustment::from_json(&serde_json::json!("reduce_half")),
            ParamAdjustment::ReduceHalf
        );
        assert_eq!(
            ParamAdjustment::from_json(&serde_json::json!("Increase")),
            ParamAdjustment::Increase
        );
        assert_eq!(
            ParamAdjustment::from_json(&serde_json::json!(21)),
            ParamAdjustment::Set(serde_json::json!(21))
        );
    }

    #[test]
    fn diagnosis_abort_cannot_fix() {
        let d = Diagnosis::new(
            FailureKind::DataFormat,
            "not a FASTQ file",
            FixStrategy::Abort,
            DiagnosisSource::Rules,
        );
        assert!(!d.can_fix);
        assert!(d.is_abort());
    }

    #[test]
    fn diagnosis_serializes_fix_strategy_key() {
        let d = Diagnosis::new(
            FailureKind::OutOfMemory,
            "killed",
            FixStrategy::AdjustParams,
            DiagnosisSource::Rules,
        )
        .with_adjustment("threads", ParamAdjustment::ReduceHalf);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["fix_strategy"], "adjust_params");
        assert_eq!(json["error_type"], "out_of_memory");
        assert_eq!(json["param_adjustments"]["threads"]["op"], "reduce_half");
    }

    #[test]
    fn stage_failure_for_input_problem_is_not_recoverable() {
        assert!(!StageFailure::new(FailureKind::SequenceFormat, "bad").recoverable);
        assert!(StageFailure::new(FailureKind::Unknown, "boom").recoverable);
    }

    #[test]
    fn stage_result_reports_reattempts() {
        let mut failure = StageFailure::new(FailureKind::Unknown, "boom");
        failure.reattempts = 2;
        assert_eq!(StageResult::Failed(failure).reattempts(), 2);
        let paused = StageResult::Paused {
            task_id: "t1".into(),
            reason: "waiting".into(),
        };
        assert_eq!(paused.reattempts(), 0);
    }
}
