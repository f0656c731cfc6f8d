//! Data shape of a resolved tool plan. Resolution lives in the pipeline crate.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::stage::{Kingdom, SeqType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InputFormat {
    Fastq,
    Fasta,
    Bam,
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InputFormat::Fastq => "FASTQ",
            InputFormat::Fasta => "FASTA",
            InputFormat::Bam => "BAM",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblerChoice {
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanCandidates {
    #[serde(default)]
    pub qc: Vec<String>,
    #[serde(default)]
    pub assembler: Vec<String>,
    #[serde(default)]
    pub polishers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanExtras {
    #[serde(default)]
    pub mappers: Vec<String>,
    #[serde(default)]
    pub baiting_tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanHints {
    pub kingdom: Kingdom,
    pub seq_type: SeqType,
    pub input_formats: Vec<InputFormat>,
}

/// Ordered tool choices for one run. Tool ids are lowercase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPlan {
    pub qc: Vec<String>,
    pub assembler: AssemblerChoice,
    pub polishers: Vec<String>,
    pub candidates: PlanCandidates,
    #[serde(default)]
    pub extras: PlanExtras,
    pub hints: PlanHints,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ToolPlan {
    /// Next assembler candidate after `current`, compared case-insensitively.
    pub fn next_assembler_after(&self, current: &str) -> Option<&str> {
        let position = self
            .candidates
            .assembler
            .iter()
            .position(|name| name.eq_ignore_ascii_case(current))?;
        self.candidates
            .assembler
            .get(position + 1)
            .map(String::as_str)
    }
}
