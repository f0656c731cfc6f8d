use std::path::PathBuf;

use async_trait::async_trait;
use mito_tools::CancelToken;
use mito_types::{Result, StageFailure, StageName, StageOutput, StageResult, StageSuccess, StageView};
use serde_json::{json, Value};

use super::working_reads;
use crate::agent::{StageTask, TaskContext};
use crate::healing::{JobOutcome, ToolJob};
use crate::params::AttemptParams;

/// Polishers to apply in order. `tool_chain.polishing` holds a comma-separated
/// chain such as `racon,medaka`; without it the plan's polishers are used.
pub fn polisher_chain(view: &StageView<'_>) -> Vec<String> {
    match view.config.tool_chain.polishing.as_deref() {
        Some(chain) => chain
            .split(',')
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect(),
        None => view
            .config
            .tool_plan
            .as_ref()
            .map(|p| p.polishers.clone())
            .unwrap_or_default(),
    }
}

/// Successive polishing rounds, each consuming the previous round's consensus.
pub struct PolishTask;

#[async_trait]
impl StageTask for PolishTask {
    fn stage(&self) -> StageName {
        StageName::Polish
    }

    fn input_issues(&self, view: &StageView<'_>) -> Vec<String> {
        let mut issues = Vec::new();
        match view.upstream_file(StageName::Assembly, "assembly") {
            Some(path) if path.exists() => {}
            Some(path) => issues.push(format!("assembly not found: {}", path.display())),
            None => issues.push("no assembly to polish".to_string()),
        }
        if polisher_chain(view).is_empty() {
            issues.push("no polishers configured".to_string());
        }
        issues
    }

    async fn run(&self, ctx: &TaskContext<'_>, cancel: &CancelToken) -> Result<StageResult> {
        let view = ctx.view;
        let chain = polisher_chain(view);
        let stage_dir = view.stage_dir();
        let mut inputs = working_reads(view);
        let mut budget = view.retry_budget();
        let mut reattempts = 0;
        let mut warnings = Vec::new();
        let mut rounds: Vec<Value> = Vec::new();
        let mut applied: Vec<String> = Vec::new();
        let mut last: Option<(PathBuf, StageOutput)> = None;

        for (index, polisher) in chain.iter().enumerate() {
            let round = index + 1;
            let job = ToolJob {
                dir: stage_dir.join(format!("round_{round}_{polisher}")),
                tool: polisher.clone(),
                candidates: Vec::new(),
                params: AttemptParams::for_tool(view, polisher),
                inputs: inputs.clone(),
                budget,
            };
            match ctx.healing_loop().run(job, cancel).await? {
                JobOutcome::Succeeded(success) => {
                    reattempts += success.reattempts;
                    budget = budget.saturating_sub(success.reattempts);
                    warnings.extend(success.warnings);
                    let Some(polished) = success.parsed.files.get("polished").cloned() else {
                        warnings.push(format!("round {round} ({polisher}) reported no polished file"));
                        break;
                    };
                    tracing::info!(stage = %view.stage, round, polisher = %polisher, "Polishing round finished");
                    rounds.push(json!({
                        "round": round,
                        "polisher": polisher,
                        "polished": polished,
                        "metrics": success.parsed.metrics,
                    }));
                    applied.push(polisher.clone());
                    inputs.assembly = Some(polished.clone());
                    last = Some((polished, success.parsed.into_stage_output(polisher)));
                }
                JobOutcome::Failed(mut failure) => {
                    reattempts += failure.reattempts;
                    if applied.is_empty() {
                        failure.reattempts = reattempts;
                        failure.warnings.splice(0..0, warnings);
                        return Ok(StageResult::Failed(failure));
                    }
                    let warning = format!(
                        "polishing stopped at round {round} ({polisher}): {}; keeping round {} output",
                        failure.message,
                        round - 1
                    );
                    tracing::warn!(stage = %view.stage, "{warning}");
                    warnings.push(warning);
                    break;
                }
            }
        }

        let Some((round_polished, round_output)) = last else {
            return Ok(StageResult::Failed(StageFailure::new(
                mito_types::FailureKind::Unknown,
                "no polishing round produced output",
            )));
        };
        let polished = stage_dir.join("polished.fasta");
        tokio::fs::copy(&round_polished, &polished).await?;

        let metrics_path = stage_dir.join("polish_metrics.json");
        let doc = json!({ "polishers_applied": applied, "rounds": rounds });
        tokio::fs::write(&metrics_path, serde_json::to_vec_pretty(&doc)?).await?;

        let tool = applied.join("+");
        let mut output = round_output;
        output.files.clear();
        output.files.insert("polished".to_string(), polished.clone());
        output.files.insert("assembly".to_string(), polished);
        output.files.insert("metrics".to_string(), metrics_path);
        output.metrics.insert("polishers_applied".to_string(), json!(applied));
        output.metrics.insert("rounds".to_string(), json!(applied.len()));
        output.tool = Some(tool.clone());

        Ok(StageResult::Ok(StageSuccess {
            output,
            tool: Some(tool),
            reattempts,
            exit_code: Some(0),
            warnings,
        }))
    }
}
