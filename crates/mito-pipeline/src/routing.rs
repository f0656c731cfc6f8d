//! Edge selection for the fixed stage graph
//! `supervisor → qc → assembly → {polish | annotation} → annotation → report → END`.
//!
//! Routing is a pure function of the node's result and the state *after* the
//! result's in-stage re-attempts have been counted.

use mito_types::{NodeId, PipelineState, StageFailure, StageName, StageResult, StageRoute};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub route: StageRoute,
    pub next: NodeId,
    /// Assembler to switch to on `Fallback`.
    pub fallback_tool: Option<String>,
}

impl Decision {
    fn to(route: StageRoute, next: NodeId) -> Self {
        Self {
            route,
            next,
            fallback_tool: None,
        }
    }
}

fn under_limit(state: &PipelineState, stage: StageName) -> bool {
    state.retries_for(stage) < state.config.max_retries
}

fn retry_or(state: &PipelineState, stage: StageName, failure: &StageFailure, otherwise: NodeId) -> Decision {
    if failure.recoverable && under_limit(state, stage) {
        Decision::to(StageRoute::Retry, stage.into())
    } else {
        Decision::to(StageRoute::Terminate, otherwise)
    }
}

fn assembly_fallback(state: &PipelineState, failure: &StageFailure) -> Option<String> {
    let plan = state.config.tool_plan.as_ref()?;
    let current = failure
        .tool
        .as_deref()
        .or(state.config.tool_chain.assembly.as_deref())
        .unwrap_or(&plan.assembler.name);
    plan.next_assembler_after(current).map(str::to_string)
}

pub fn route(stage: StageName, result: &StageResult, state: &PipelineState) -> Decision {
    use StageRoute::*;

    match (stage, result) {
        (StageName::Supervisor, StageResult::Ok(_)) => Decision::to(Continue, NodeId::Qc),
        (StageName::Supervisor, _) => Decision::to(Terminate, NodeId::End),

        (StageName::Qc, StageResult::Ok(_)) => Decision::to(Continue, NodeId::Assembly),
        (StageName::Qc, StageResult::Skipped { .. }) => Decision::to(Skip, NodeId::Assembly),
        (StageName::Qc, StageResult::Failed(f)) => retry_or(state, stage, f, NodeId::End),

        (StageName::Assembly, StageResult::Ok(_)) => {
            if state.config.tool_chain.polishing.is_some() {
                Decision::to(Continue, NodeId::Polish)
            } else {
                Decision::to(Skip, NodeId::Annotation)
            }
        }
        (StageName::Assembly, StageResult::Failed(f)) => {
            if !under_limit(state, stage) || f.kind.is_input_problem() {
                return Decision::to(Terminate, NodeId::End);
            }
            if f.kind.favours_fallback() {
                return match assembly_fallback(state, f) {
                    Some(tool) => Decision {
                        route: Fallback,
                        next: NodeId::Assembly,
                        fallback_tool: Some(tool),
                    },
                    None => Decision::to(Terminate, NodeId::End),
                };
            }
            retry_or(state, stage, f, NodeId::End)
        }

        (StageName::Polish, _) => Decision::to(Continue, NodeId::Annotation),

        (StageName::Annotation, StageResult::Ok(_)) => Decision::to(Continue, NodeId::Report),
        (StageName::Annotation, StageResult::Paused { .. }) => Decision::to(Pause, NodeId::Annotation),
        (StageName::Annotation, StageResult::Skipped { .. }) => Decision::to(Skip, NodeId::Report),
        (StageName::Annotation, StageResult::Failed(f)) => retry_or(state, stage, f, NodeId::Report),

        (StageName::Report, _) => Decision::to(Continue, NodeId::End),

        // only annotation may pause; assembly never skips
        (_, StageResult::Paused { .. }) | (StageName::Assembly, StageResult::Skipped { .. }) => {
            Decision::to(Terminate, NodeId::End)
        }
    }
}
