//! The four tool-running stages.

mod annotation;
mod assembly;
mod polish;
mod qc;

pub use annotation::{AnnotationTask, GUIDANCE_FILE};
pub use assembly::AssemblyTask;
pub use polish::{polisher_chain, PolishTask};
pub use qc::QcTask;

use std::path::{Path, PathBuf};

use mito_types::{StageName, StageResult, StageSuccess, StageView};

use crate::agent::{Agent, AgentDeps, StageAgent};
use crate::healing::{JobInputs, JobSuccess};
use crate::knowledge::MemoryAdapter;

pub type QcAgent = Agent<QcTask>;
pub type AssemblyAgent = Agent<AssemblyTask>;
pub type PolishAgent = Agent<PolishTask>;
pub type AnnotationAgent = Agent<AnnotationTask>;

/// Agent for `stage`, or `None` for the executor-owned supervisor and report nodes.
pub fn agent_for(stage: StageName, deps: AgentDeps, memory: Box<dyn MemoryAdapter>) -> Option<Box<dyn StageAgent>> {
    let agent: Box<dyn StageAgent> = match stage {
        StageName::Qc => Box::new(Agent::new(QcTask, deps, memory)),
        StageName::Assembly => Box::new(Agent::new(AssemblyTask, deps, memory)),
        StageName::Polish => Box::new(Agent::new(PolishTask, deps, memory)),
        StageName::Annotation => Box::new(Agent::new(AnnotationTask, deps, memory)),
        StageName::Supervisor | StageName::Report => return None,
    };
    Some(agent)
}

fn missing(label: &str, path: &Path) -> Option<String> {
    (!path.exists()).then(|| format!("{label} not found: {}", path.display()))
}

/// Problems with the raw read files.
fn read_issues(view: &StageView<'_>) -> Vec<String> {
    let inputs = view.inputs;
    let mut issues = Vec::new();
    issues.extend(missing("reads", &inputs.reads));
    if let Some(r2) = &inputs.reads2 {
        issues.extend(missing("reads2", r2));
    }
    if let Some(long) = &inputs.long_reads {
        issues.extend(missing("long reads", long));
    }
    issues
}

/// Reads for assembly and polishing: QC-cleaned reads when QC produced them.
fn working_reads(view: &StageView<'_>) -> JobInputs {
    let cleaned = view.upstream_file(StageName::Qc, "clean_reads");
    let (reads, reads2) = match cleaned {
        Some(clean) => (
            clean.to_path_buf(),
            view.upstream_file(StageName::Qc, "clean_reads2")
                .map(Path::to_path_buf)
                .or_else(|| view.inputs.reads2.clone()),
        ),
        None => (view.inputs.reads.clone(), view.inputs.reads2.clone()),
    };
    JobInputs {
        reads,
        reads2,
        long_reads: view.inputs.long_reads.clone(),
        assembly: view
            .upstream_file(StageName::Assembly, "assembly")
            .map(PathBuf::from),
    }
}

fn into_result(success: JobSuccess) -> StageResult {
    let mut warnings = success.warnings;
    warnings.extend(success.parsed.errors.iter().cloned());
    let exit_code = success.exit_code;
    let reattempts = success.reattempts;
    let tool = success.tool;
    let output = success.parsed.into_stage_output(&tool);
    StageResult::Ok(StageSuccess {
        output,
        tool: Some(tool),
        reattempts,
        exit_code,
        warnings,
    })
}
