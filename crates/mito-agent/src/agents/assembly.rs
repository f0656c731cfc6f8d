use async_trait::async_trait;
use mito_tools::CancelToken;
use mito_types::{Result, StageName, StageResult, StageView};
use serde_json::json;

use super::{into_result, read_issues, working_reads};
use crate::agent::{StageTask, TaskContext};
use crate::healing::{JobOutcome, ToolJob};
use crate::params::AttemptParams;

const DEFAULT_ASSEMBLER: &str = "spades";

pub struct AssemblyTask;

impl AssemblyTask {
    fn assembler(view: &StageView<'_>) -> String {
        view.configured_tool()
            .map(str::to_string)
            .or_else(|| view.config.tool_plan.as_ref().map(|p| p.assembler.name.clone()))
            .unwrap_or_else(|| DEFAULT_ASSEMBLER.to_string())
    }
}

#[async_trait]
impl StageTask for AssemblyTask {
    fn stage(&self) -> StageName {
        StageName::Assembly
    }

    fn input_issues(&self, view: &StageView<'_>) -> Vec<String> {
        read_issues(view)
    }

    async fn run(&self, ctx: &TaskContext<'_>, cancel: &CancelToken) -> Result<StageResult> {
        let view = ctx.view;
        let tool = Self::assembler(view);
        let mut candidates = view
            .config
            .tool_plan
            .as_ref()
            .map(|p| p.candidates.assembler.clone())
            .unwrap_or_default();
        if candidates.is_empty() {
            candidates.push(tool.clone());
        }
        let mut inputs = working_reads(view);
        inputs.assembly = None;

        let job = ToolJob {
            dir: view.stage_dir(),
            tool: tool.clone(),
            candidates,
            params: AttemptParams::for_tool(view, &tool),
            inputs,
            budget: view.retry_budget(),
        };
        Ok(match ctx.healing_loop().run(job, cancel).await? {
            JobOutcome::Succeeded(success) => {
                let assembler = success.tool.clone();
                let mut result = into_result(success);
                if let StageResult::Ok(ok) = &mut result {
                    ok.output.metrics.insert("assembler".to_string(), json!(assembler));
                }
                result
            }
            JobOutcome::Failed(failure) => StageResult::Failed(failure),
        })
    }
}
