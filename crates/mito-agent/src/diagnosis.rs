//! Failure diagnosis: classify a failed attempt and propose a fix.
//!
//! [`RuleDiagnoser`] is the deterministic baseline. [`LlmDiagnoser`] asks the
//! model for a schema-checked classification and falls back to the rules on any
//! LLM failure.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use mito_llm::{FieldKind, LlmClient, ResponseSchema};
use mito_types::{
    Diagnosis, DiagnosisSource, FailureKind, FixStrategy, ParamAdjustment, StageName,
};
use regex::Regex;
use serde_json::{json, Value};

use crate::events::{AgentEventKind, EventEmitter};

/// What the diagnoser sees of one failed attempt.
#[derive(Debug, Clone)]
pub struct FailureContext {
    pub task_id: String,
    pub stage: StageName,
    pub tool: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stderr_tail: String,
    pub stdout_tail: String,
    pub parser_errors: Vec<String>,
    /// Remaining tool candidates for this stage, in plan order.
    pub candidates: Vec<String>,
}

impl FailureContext {
    /// Next candidate after the failing tool.
    pub fn next_candidate(&self) -> Option<&str> {
        let pos = self
            .candidates
            .iter()
            .position(|c| c.eq_ignore_ascii_case(&self.tool));
        let start = pos.map(|p| p + 1).unwrap_or(0);
        self.candidates[start..]
            .iter()
            .find(|c| !c.eq_ignore_ascii_case(&self.tool))
            .map(String::as_str)
    }
}

#[async_trait]
pub trait Diagnoser: Send + Sync {
    async fn diagnose(&self, failure: &FailureContext) -> Diagnosis;
}

// ---------------------------------------------------------------------------
// RuleDiagnoser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Rule {
    Timeout,
    OutOfMemory,
    ToolNotFound,
    DataFormat,
    SequenceFormat,
}

const RULES: &[(&str, Rule)] = &[
    (r"(?i)\btimed? ?out\b|\btimeout\b", Rule::Timeout),
    (
        r"(?i)out of memory|cannot allocate memory|std::bad_alloc|memoryerror|\bkilled\b",
        Rule::OutOfMemory,
    ),
    (r"(?i)command not found|\bnot found\b", Rule::ToolNotFound),
    (
        r"(?i)not a fasta|invalid sequence|unexpected character in sequence",
        Rule::SequenceFormat,
    ),
    (
        r"(?i)invalid fastq|malformed|truncated|unexpected end of file|bad fastq",
        Rule::DataFormat,
    ),
];

/// Keyword rules over stderr, stdout, and parser errors.
pub struct RuleDiagnoser {
    rules: Vec<(Regex, Rule)>,
}

impl RuleDiagnoser {
    pub fn new() -> Self {
        let rules = RULES
            .iter()
            .filter_map(|(pattern, rule)| Regex::new(pattern).ok().map(|re| (re, *rule)))
            .collect();
        Self { rules }
    }

    pub fn classify(&self, failure: &FailureContext) -> Diagnosis {
        let text = format!(
            "{}\n{}\n{}",
            failure.stderr_tail,
            failure.stdout_tail,
            failure.parser_errors.join("\n")
        );

        let matched = if failure.timed_out {
            Some(Rule::Timeout)
        } else if matches!(failure.exit_code, Some(126 | 127)) {
            Some(Rule::ToolNotFound)
        } else {
            self.rules
                .iter()
                .find(|(re, _)| re.is_match(&text))
                .map(|(_, rule)| *rule)
        };

        let source = DiagnosisSource::Rules;
        match matched {
            Some(Rule::Timeout) => Diagnosis::new(
                FailureKind::Timeout,
                format!("{} exceeded its time limit", failure.tool),
                FixStrategy::AdjustParams,
                source,
            )
            .with_adjustment("timeout", ParamAdjustment::Increase)
            .with_suggestion("Increase the tool timeout or reduce the input size"),
            Some(Rule::OutOfMemory) => Diagnosis::new(
                FailureKind::OutOfMemory,
                format!("{} ran out of memory", failure.tool),
                FixStrategy::AdjustParams,
                source,
            )
            .with_adjustment("threads", ParamAdjustment::ReduceHalf)
            .with_suggestion("Reduce threads or raise the memory limit"),
            Some(Rule::ToolNotFound) => {
                let root_cause = if failure.exit_code == Some(126) {
                    format!("{} is installed but cannot be executed", failure.tool)
                } else {
                    format!("{} is not installed or not on PATH", failure.tool)
                };
                let mut d = Diagnosis::new(
                    FailureKind::ToolNotFound,
                    root_cause,
                    FixStrategy::SwitchTool,
                    source,
                )
                .with_suggestion(format!("Install {} or run `mito doctor --fix`", failure.tool));
                d.alternative_tool = failure.next_candidate().map(String::from);
                d
            }
            Some(Rule::DataFormat) => Diagnosis::new(
                FailureKind::DataFormat,
                "input reads are malformed or truncated",
                FixStrategy::Abort,
                source,
            )
            .with_suggestion("Check the input files for truncation or a wrong format"),
            Some(Rule::SequenceFormat) => Diagnosis::new(
                FailureKind::SequenceFormat,
                "sequence input is not valid FASTA/FASTQ",
                FixStrategy::Abort,
                source,
            )
            .with_suggestion("Verify the input sequence format"),
            None => Diagnosis::new(
                FailureKind::Unknown,
                last_line(&failure.stderr_tail)
                    .unwrap_or_else(|| format!("{} failed without a recognizable error", failure.tool)),
                FixStrategy::Retry,
                source,
            )
            .with_suggestion(format!("Inspect the {} logs", failure.tool)),
        }
    }
}

impl Default for RuleDiagnoser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Diagnoser for RuleDiagnoser {
    async fn diagnose(&self, failure: &FailureContext) -> Diagnosis {
        self.classify(failure)
    }
}

fn last_line(text: &str) -> Option<String> {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.chars().take(200).collect())
}

// ---------------------------------------------------------------------------
// LlmDiagnoser
// ---------------------------------------------------------------------------

const DIAGNOSIS_SYSTEM: &str = "You diagnose failures of bioinformatics command-line tools \
in a mitochondrial genome assembly pipeline. Classify the failure and propose the smallest fix.";

pub fn diagnosis_schema() -> ResponseSchema {
    let kinds: Vec<&str> = FailureKind::ALL.iter().map(|k| k.as_str()).collect();
    ResponseSchema::new("diagnosis")
        .one_of("error_type", &kinds)
        .required("root_cause", FieldKind::String)
        .required("can_fix", FieldKind::Bool)
        .one_of("fix_strategy", &["retry", "adjust_params", "switch_tool", "abort"])
        .required("suggestions", FieldKind::Array)
        .optional("param_adjustments", FieldKind::Object)
        .optional("alternative_tool", FieldKind::String)
}

pub struct LlmDiagnoser {
    llm: Arc<LlmClient>,
    rules: RuleDiagnoser,
    events: Option<EventEmitter>,
}

impl LlmDiagnoser {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self {
            llm,
            rules: RuleDiagnoser::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    fn prompt(failure: &FailureContext) -> String {
        format!(
            "Stage: {stage}\nTool: {tool}\nExit code: {exit}\nTimed out: {timed_out}\n\
             Alternative tools: {alts}\n\nstderr (tail):\n{stderr}\n\nstdout (tail):\n{stdout}\n\n\
             Parser errors:\n{parser}\n\n\
             param_adjustments maps parameter names to \"reduce_half\", \"increase\", or a literal value.",
            stage = failure.stage,
            tool = failure.tool,
            exit = failure
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".into()),
            timed_out = failure.timed_out,
            alts = failure.candidates.join(", "),
            stderr = failure.stderr_tail,
            stdout = failure.stdout_tail,
            parser = failure.parser_errors.join("\n"),
        )
    }

    fn emit(&self, failure: &FailureContext, kind: AgentEventKind, payload: Value) {
        if let Some(events) = &self.events {
            events.send(kind, failure.stage, &failure.task_id, payload);
        }
    }
}

/// Convert a schema-valid classifier reply into a [`Diagnosis`].
pub fn diagnosis_from_json(value: &Value) -> Diagnosis {
    let kind = FailureKind::from_label(value["error_type"].as_str().unwrap_or_default());
    let strategy = FixStrategy::from_label(value["fix_strategy"].as_str().unwrap_or_default());
    let mut diagnosis = Diagnosis::new(
        kind,
        value["root_cause"].as_str().unwrap_or_default(),
        strategy,
        DiagnosisSource::Llm,
    );
    diagnosis.can_fix = value["can_fix"].as_bool().unwrap_or(false) && strategy != FixStrategy::Abort;
    diagnosis.suggestions = value["suggestions"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|s| s.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    if let Some(adjustments) = value["param_adjustments"].as_object() {
        diagnosis.param_adjustments = adjustments
            .iter()
            .map(|(k, v)| (k.clone(), ParamAdjustment::from_json(v)))
            .collect::<BTreeMap<_, _>>();
    }
    diagnosis.alternative_tool = value["alternative_tool"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_lowercase());
    diagnosis
}

#[async_trait]
impl Diagnoser for LlmDiagnoser {
    async fn diagnose(&self, failure: &FailureContext) -> Diagnosis {
        if !self.llm.is_available() {
            return self.rules.classify(failure);
        }
        self.emit(failure, AgentEventKind::LlmCall, json!({ "purpose": "diagnosis", "tool": failure.tool }));
        match self
            .llm
            .generate_json(&Self::prompt(failure), &diagnosis_schema(), Some(DIAGNOSIS_SYSTEM))
            .await
        {
            Ok(value) => {
                let diagnosis = diagnosis_from_json(&value);
                tracing::info!(
                    stage = %failure.stage,
                    tool = %failure.tool,
                    kind = %diagnosis.error_type,
                    strategy = ?diagnosis.strategy,
                    "LLM diagnosis"
                );
                diagnosis
            }
            Err(e) => {
                tracing::warn!(stage = %failure.stage, error = %e, "LLM diagnosis failed, using rules");
                self.emit(failure, AgentEventKind::LlmError, json!({ "purpose": "diagnosis", "error": e.to_string() }));
                self.rules.classify(failure)
            }
        }
    }
}
