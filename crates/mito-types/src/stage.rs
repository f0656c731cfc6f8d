//! Closed enums for the stage graph: stage names, statuses, routing decisions,
//! failure taxonomy, and the run-level knobs (sequencing type, kingdom, detail level).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::MitoError;

// ---------------------------------------------------------------------------
// StageName
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Supervisor,
    Qc,
    Assembly,
    Polish,
    Annotation,
    Report,
}

impl StageName {
    /// All stages in graph order.
    pub const ALL: [StageName; 6] = [
        StageName::Supervisor,
        StageName::Qc,
        StageName::Assembly,
        StageName::Polish,
        StageName::Annotation,
        StageName::Report,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Supervisor => "supervisor",
            StageName::Qc => "qc",
            StageName::Assembly => "assembly",
            StageName::Polish => "polish",
            StageName::Annotation => "annotation",
            StageName::Report => "report",
        }
    }

    /// Name of the stage's subdirectory inside the workdir.
    pub fn dir_name(&self) -> &'static str {
        match self {
            StageName::Supervisor => "00_supervisor",
            StageName::Qc => "01_qc",
            StageName::Assembly => "02_assembly",
            StageName::Polish => "03_polish",
            StageName::Annotation => "04_annotation",
            StageName::Report => "05_report",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = MitoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageName::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MitoError::InvalidInput(format!("unknown stage '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// NodeId: graph cursor, a stage or the terminal sentinel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Supervisor,
    Qc,
    Assembly,
    Polish,
    Annotation,
    Report,
    End,
}

impl NodeId {
    /// The stage this node executes, `None` for the terminal sentinel.
    pub fn stage(&self) -> Option<StageName> {
        match self {
            NodeId::Supervisor => Some(StageName::Supervisor),
            NodeId::Qc => Some(StageName::Qc),
            NodeId::Assembly => Some(StageName::Assembly),
            NodeId::Polish => Some(StageName::Polish),
            NodeId::Annotation => Some(StageName::Annotation),
            NodeId::Report => Some(StageName::Report),
            NodeId::End => None,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, NodeId::End)
    }
}

impl From<StageName> for NodeId {
    fn from(stage: StageName) -> Self {
        match stage {
            StageName::Supervisor => NodeId::Supervisor,
            StageName::Qc => NodeId::Qc,
            StageName::Assembly => NodeId::Assembly,
            StageName::Polish => NodeId::Polish,
            StageName::Annotation => NodeId::Annotation,
            StageName::Report => NodeId::Report,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage() {
            Some(stage) => f.write_str(stage.as_str()),
            None => f.write_str("end"),
        }
    }
}

// ---------------------------------------------------------------------------
// StageStatus / StageRoute
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Paused,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
            StageStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing decision taken by the executor after a stage returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRoute {
    Continue,
    Retry,
    Fallback,
    Skip,
    Pause,
    Terminate,
}

// ---------------------------------------------------------------------------
// FailureKind: error taxonomy shared by the diagnoser and the executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ToolNotFound,
    OutOfMemory,
    Timeout,
    ParameterError,
    DataFormat,
    DataQuality,
    InputQuality,
    ResourceLimit,
    ToolBug,
    SequenceFormat,
    Unknown,
}

impl FailureKind {
    pub const ALL: [FailureKind; 11] = [
        FailureKind::ToolNotFound,
        FailureKind::OutOfMemory,
        FailureKind::Timeout,
        FailureKind::ParameterError,
        FailureKind::DataFormat,
        FailureKind::DataQuality,
        FailureKind::InputQuality,
        FailureKind::ResourceLimit,
        FailureKind::ToolBug,
        FailureKind::SequenceFormat,
        FailureKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ToolNotFound => "tool_not_found",
            FailureKind::OutOfMemory => "out_of_memory",
            FailureKind::Timeout => "timeout",
            FailureKind::ParameterError => "parameter_error",
            FailureKind::DataFormat => "data_format",
            FailureKind::DataQuality => "data_quality",
            FailureKind::InputQuality => "input_quality",
            FailureKind::ResourceLimit => "resource_limit",
            FailureKind::ToolBug => "tool_bug",
            FailureKind::SequenceFormat => "sequence_format",
            FailureKind::Unknown => "unknown",
        }
    }

    /// Lenient parse used for classifier output; unrecognised labels map to `Unknown`.
    pub fn from_label(label: &str) -> FailureKind {
        let normalized = label.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "oom" | "memory" | "memory_error" => FailureKind::OutOfMemory,
            "not_found" | "missing_tool" | "command_not_found" => FailureKind::ToolNotFound,
            "timed_out" => FailureKind::Timeout,
            "format_error" | "invalid_format" => FailureKind::DataFormat,
            other => FailureKind::ALL
                .into_iter()
                .find(|kind| kind.as_str() == other)
                .unwrap_or(FailureKind::Unknown),
        }
    }

    /// Failures caused by the input data itself; no retry or tool switch helps.
    pub fn is_input_problem(&self) -> bool {
        matches!(
            self,
            FailureKind::DataFormat
                | FailureKind::DataQuality
                | FailureKind::InputQuality
                | FailureKind::SequenceFormat
        )
    }

    /// Failures tied to the specific tool, where another candidate may succeed.
    pub fn favours_fallback(&self) -> bool {
        matches!(
            self,
            FailureKind::ToolNotFound | FailureKind::ToolBug | FailureKind::ParameterError
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Run-level knobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SeqType {
    Illumina,
    Ont,
    PacbioHifi,
    PacbioClr,
    Hybrid,
    #[default]
    Auto,
}

impl SeqType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeqType::Illumina => "illumina",
            SeqType::Ont => "ont",
            SeqType::PacbioHifi => "pacbio-hifi",
            SeqType::PacbioClr => "pacbio-clr",
            SeqType::Hybrid => "hybrid",
            SeqType::Auto => "auto",
        }
    }

    pub fn is_long_read(&self) -> bool {
        matches!(self, SeqType::Ont | SeqType::PacbioHifi | SeqType::PacbioClr)
    }
}

impl fmt::Display for SeqType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeqType {
    type Err = MitoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "illumina" => Ok(SeqType::Illumina),
            "ont" | "nanopore" => Ok(SeqType::Ont),
            "pacbio-hifi" | "hifi" => Ok(SeqType::PacbioHifi),
            "pacbio-clr" | "clr" => Ok(SeqType::PacbioClr),
            "hybrid" => Ok(SeqType::Hybrid),
            "auto" => Ok(SeqType::Auto),
            _ => Err(MitoError::InvalidInput(format!(
                "unknown sequencing type '{s}' (expected illumina, ont, pacbio-hifi, pacbio-clr, hybrid or auto)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Kingdom {
    #[default]
    Animal,
    Plant,
    Fungi,
}

impl Kingdom {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kingdom::Animal => "animal",
            Kingdom::Plant => "plant",
            Kingdom::Fungi => "fungi",
        }
    }
}

impl fmt::Display for Kingdom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kingdom {
    type Err = MitoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "animal" => Ok(Kingdom::Animal),
            "plant" => Ok(Kingdom::Plant),
            "fungi" | "fungus" => Ok(Kingdom::Fungi),
            _ => Err(MitoError::InvalidInput(format!(
                "unknown kingdom '{s}' (expected animal, plant or fungi)"
            ))),
        }
    }
}

/// How much context goes into LLM prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    Quick,
    #[default]
    Detailed,
    Expert,
}

impl DetailLevel {
    /// Number of trailing log lines forwarded to the classifier.
    pub fn log_tail_lines(&self) -> usize {
        match self {
            DetailLevel::Quick => 20,
            DetailLevel::Detailed => 60,
            DetailLevel::Expert => 200,
        }
    }
}

impl FromStr for DetailLevel {
    type Err = MitoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(DetailLevel::Quick),
            "detailed" => Ok(DetailLevel::Detailed),
            "expert" => Ok(DetailLevel::Expert),
            _ => Err(MitoError::InvalidInput(format!(
                "unknown detail level '{s}' (expected quick, detailed or expert)"
            ))),
        }
    }
}
