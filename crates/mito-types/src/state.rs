//! The pipeline state record and the read-only view handed to stage agents.
//!
//! Maps are `BTreeMap` so that serialization order is stable and a checkpoint
//! that is loaded and saved again produces the same bytes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::plan::ToolPlan;
use crate::result::Diagnosis;
use crate::stage::{DetailLevel, FailureKind, Kingdom, NodeId, SeqType, StageName, StageRoute, StageStatus};

// ---------------------------------------------------------------------------
// Inputs and configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineInputs {
    pub reads: PathBuf,
    #[serde(default)]
    pub reads2: Option<PathBuf>,
    #[serde(default)]
    pub long_reads: Option<PathBuf>,
    #[serde(default)]
    pub kingdom: Kingdom,
    #[serde(default)]
    pub species: Option<String>,
    /// User-supplied tool hints such as `--genome-size`.
    #[serde(default)]
    pub hints: BTreeMap<String, serde_json::Value>,
}

impl PipelineInputs {
    pub fn new(reads: impl Into<PathBuf>) -> Self {
        Self {
            reads: reads.into(),
            reads2: None,
            long_reads: None,
            kingdom: Kingdom::default(),
            species: None,
            hints: BTreeMap::new(),
        }
    }

    /// Every read file in declaration order.
    pub fn read_paths(&self) -> Vec<&Path> {
        let mut paths = vec![self.reads.as_path()];
        paths.extend(self.reads2.as_deref());
        paths.extend(self.long_reads.as_deref());
        paths
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolChain {
    pub qc: Option<String>,
    pub assembly: Option<String>,
    pub polishing: Option<String>,
    pub annotation: Option<String>,
}

impl ToolChain {
    pub fn for_stage(&self, stage: StageName) -> Option<&str> {
        match stage {
            StageName::Qc => self.qc.as_deref(),
            StageName::Assembly => self.assembly.as_deref(),
            StageName::Polish => self.polishing.as_deref(),
            StageName::Annotation => self.annotation.as_deref(),
            StageName::Supervisor | StageName::Report => None,
        }
    }

    pub fn set_for_stage(&mut self, stage: StageName, tool: String) {
        match stage {
            StageName::Qc => self.qc = Some(tool),
            StageName::Assembly => self.assembly = Some(tool),
            StageName::Polish => self.polishing = Some(tool),
            StageName::Annotation => self.annotation = Some(tool),
            StageName::Supervisor | StageName::Report => {}
        }
    }
}

pub const DEFAULT_THREADS: u32 = 4;
pub const DEFAULT_MEMORY: &str = "8G";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_MAX_TOOL_TIMEOUT_SECS: u64 = 48 * 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub threads: u32,
    pub memory: String,
    pub seq_type: SeqType,
    #[serde(default)]
    pub tool_chain: ToolChain,
    #[serde(default)]
    pub tool_parameters: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub tool_plan: Option<ToolPlan>,
    #[serde(default)]
    pub detail_level: DetailLevel,
    pub max_retries: u32,
    pub tool_timeout_secs: u64,
    pub max_tool_timeout_secs: u64,
    /// Explicit annotator; resolved by the supervisor when absent.
    #[serde(default)]
    pub annotator: Option<String>,
    #[serde(default)]
    pub interactive: bool,
    #[serde(default)]
    pub dry_run: bool,
    /// Polish short-read-only assemblies with pilon.
    #[serde(default)]
    pub polish_short_reads: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            memory: DEFAULT_MEMORY.to_string(),
            seq_type: SeqType::Auto,
            tool_chain: ToolChain::default(),
            tool_parameters: BTreeMap::new(),
            tool_plan: None,
            detail_level: DetailLevel::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            max_tool_timeout_secs: DEFAULT_MAX_TOOL_TIMEOUT_SECS,
            annotator: None,
            interactive: false,
            dry_run: false,
            polish_short_reads: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-stage records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    #[serde(default)]
    pub files: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub ai_analysis: Option<serde_json::Value>,
    #[serde(default)]
    pub tool: Option<String>,
}

impl StageOutput {
    pub fn file(&self, key: &str) -> Option<&Path> {
        self.files.get(key).map(PathBuf::as_path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub started_at: f64,
    #[serde(default)]
    pub finished_at: Option<f64>,
    #[serde(default)]
    pub duration_sec: Option<f64>,
    pub attempts: u32,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub stage: StageName,
    pub kind: FailureKind,
    pub message: String,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub diagnosis: Option<Diagnosis>,
    #[serde(default)]
    pub stdout_log: Option<PathBuf>,
    #[serde(default)]
    pub stderr_log: Option<PathBuf>,
    pub timestamp: f64,
    #[serde(default)]
    pub elapsed_sec: Option<f64>,
}

// ---------------------------------------------------------------------------
// PipelineState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub pipeline_id: String,
    pub inputs: PipelineInputs,
    pub config: RuntimeConfig,
    pub workdir: PathBuf,
    pub current_stage: NodeId,
    #[serde(default)]
    pub completed_stages: Vec<StageName>,
    #[serde(default)]
    pub failed_stages: Vec<StageName>,
    #[serde(default)]
    pub stage_status: BTreeMap<StageName, StageStatus>,
    #[serde(default)]
    pub stage_outputs: BTreeMap<StageName, StageOutput>,
    #[serde(default)]
    pub stage_metrics: BTreeMap<StageName, StageMetrics>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub retries: BTreeMap<StageName, u32>,
    #[serde(default)]
    pub route: Option<StageRoute>,
    #[serde(default)]
    pub done: bool,
    pub start_time: f64,
    #[serde(default)]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub paused_task_id: Option<String>,
}

impl PipelineState {
    /// Fresh state positioned at the supervisor with every stage pending.
    pub fn new(inputs: PipelineInputs, config: RuntimeConfig, workdir: impl Into<PathBuf>) -> Self {
        let stage_status = StageName::ALL
            .into_iter()
            .map(|stage| (stage, StageStatus::Pending))
            .collect();
        Self {
            pipeline_id: uuid::Uuid::new_v4().to_string(),
            inputs,
            config,
            workdir: workdir.into(),
            current_stage: NodeId::Supervisor,
            completed_stages: Vec::new(),
            failed_stages: Vec::new(),
            stage_status,
            stage_outputs: BTreeMap::new(),
            stage_metrics: BTreeMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            retries: BTreeMap::new(),
            route: None,
            done: false,
            start_time: crate::now_epoch(),
            end_time: None,
            paused_task_id: None,
        }
    }

    pub fn status_of(&self, stage: StageName) -> StageStatus {
        self.stage_status
            .get(&stage)
            .copied()
            .unwrap_or(StageStatus::Pending)
    }

    pub fn retries_for(&self, stage: StageName) -> u32 {
        self.retries.get(&stage).copied().unwrap_or(0)
    }

    pub fn stage_dir(&self, stage: StageName) -> PathBuf {
        self.workdir.join(stage.dir_name())
    }

    /// The assembly downstream stages should consume: polished when polish ran.
    pub fn primary_assembly(&self) -> Option<&Path> {
        self.stage_outputs
            .get(&StageName::Assembly)
            .and_then(|out| out.file("assembly"))
    }

    /// Stages that finished or terminally failed, plus the in-flight one.
    pub fn touched_stages(&self) -> Vec<StageName> {
        let mut touched: Vec<StageName> = self
            .completed_stages
            .iter()
            .chain(self.failed_stages.iter())
            .copied()
            .collect();
        if let Some(stage) = self.current_stage.stage() {
            if !touched.contains(&stage) {
                touched.push(stage);
            }
        }
        touched
    }

    /// Share of non-skipped stages that completed, in percent.
    pub fn progress_percent(&self) -> f64 {
        let total = StageName::ALL
            .iter()
            .filter(|s| self.status_of(**s) != StageStatus::Skipped)
            .count();
        if total == 0 {
            return 0.0;
        }
        round_to(self.completed_stages.len() as f64 * 100.0 / total as f64, 1)
    }

    /// Build the bounded, read-only view an agent receives.
    pub fn view(&self, stage: StageName) -> StageView<'_> {
        StageView {
            pipeline_id: &self.pipeline_id,
            stage,
            inputs: &self.inputs,
            config: &self.config,
            workdir: &self.workdir,
            upstream: &self.stage_outputs,
            retries_used: self.retries_for(stage),
        }
    }
}

/// Round to a fixed number of decimal places so floats survive a JSON round trip.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

// ---------------------------------------------------------------------------
// StageView
// ---------------------------------------------------------------------------

/// What a stage agent may see of the pipeline state.
#[derive(Debug, Clone, Copy)]
pub struct StageView<'a> {
    pub pipeline_id: &'a str,
    pub stage: StageName,
    pub inputs: &'a PipelineInputs,
    pub config: &'a RuntimeConfig,
    pub workdir: &'a Path,
    pub upstream: &'a BTreeMap<StageName, StageOutput>,
    pub retries_used: u32,
}

impl StageView<'_> {
    pub fn stage_dir(&self) -> PathBuf {
        self.workdir.join(self.stage.dir_name())
    }

    /// Re-attempts still allowed for this stage.
    pub fn retry_budget(&self) -> u32 {
        self.config.max_retries.saturating_sub(self.retries_used)
    }

    pub fn upstream_file(&self, stage: StageName, key: &str) -> Option<&Path> {
        self.upstream.get(&stage).and_then(|out| out.file(key))
    }

    /// Tool configured for this stage in the tool chain.
    pub fn configured_tool(&self) -> Option<&str> {
        self.config.tool_chain.for_stage(self.stage)
    }

    pub fn tool_params(&self, tool: &str) -> BTreeMap<String, serde_json::Value> {
        self.config
            .tool_parameters
            .get(tool)
            .cloned()
            .unwrap_or_default()
    }
}
