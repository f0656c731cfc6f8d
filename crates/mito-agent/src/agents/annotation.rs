use std::path::Path;

use async_trait::async_trait;
use mito_tools::{lookup, CancelToken};
use mito_types::{Result, StageName, StageResult, StageView};
use serde_json::json;

use super::{into_result, working_reads};
use crate::agent::{StageTask, TaskContext};
use crate::events::AgentEventKind;
use crate::healing::{JobOutcome, ToolJob};
use crate::params::AttemptParams;

const DEFAULT_ANNOTATOR: &str = "mitos";
pub const GUIDANCE_FILE: &str = "GESEQ_INSTRUCTIONS.txt";

/// Gene annotation. Web-only annotators pause the pipeline until the user
/// brings back a GenBank file.
pub struct AnnotationTask;

impl AnnotationTask {
    fn annotator(view: &StageView<'_>) -> String {
        view.config
            .annotator
            .clone()
            .or_else(|| view.configured_tool().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_ANNOTATOR.to_string())
            .to_ascii_lowercase()
    }
}

fn new_task_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn guidance(task_id: &str, assembly: &Path, workdir: &Path, annotator: &str) -> String {
    format!(
        "Manual annotation required ({annotator})\n\
         =====================================\n\n\
         Task ID:  {task_id}\n\
         Assembly: {assembly}\n\n\
         1. Open https://chlorobox.mpimp-golm.mpg.de/geseq.html\n\
         2. Upload the assembly above and select the mitochondrial reference set.\n\
         3. Run the annotation and download the GenBank (.gb/.gbk) result.\n\
         4. Continue the pipeline:\n\n\
         \x20  mito resume {task_id} --annotation <downloaded.gbk> --workdir {workdir}\n",
        assembly = assembly.display(),
        workdir = workdir.display(),
    )
}

#[async_trait]
impl StageTask for AnnotationTask {
    fn stage(&self) -> StageName {
        StageName::Annotation
    }

    fn can_pause(&self) -> bool {
        true
    }

    fn input_issues(&self, view: &StageView<'_>) -> Vec<String> {
        match view.upstream_file(StageName::Assembly, "assembly") {
            Some(path) if path.exists() => Vec::new(),
            Some(path) => vec![format!("assembly not found: {}", path.display())],
            None => vec!["no assembly to annotate".to_string()],
        }
    }

    async fn run(&self, ctx: &TaskContext<'_>, cancel: &CancelToken) -> Result<StageResult> {
        let view = ctx.view;
        let annotator = Self::annotator(view);
        let inputs = working_reads(view);

        if lookup(&annotator).is_some_and(|spec| spec.external) {
            let task_id = new_task_id();
            let assembly = inputs.assembly.clone().unwrap_or_default();
            let path = view.stage_dir().join(GUIDANCE_FILE);
            tokio::fs::write(&path, guidance(&task_id, &assembly, view.workdir, &annotator)).await?;
            tracing::info!(stage = %view.stage, task_id = %task_id, annotator = %annotator, "Waiting for external annotation");
            ctx.emit(
                AgentEventKind::Log,
                json!({ "paused": true, "task_id": task_id, "guidance": path }),
            );
            return Ok(StageResult::Paused {
                task_id,
                reason: format!("{annotator} runs as a web service; follow {}", path.display()),
            });
        }

        let job = ToolJob {
            dir: view.stage_dir(),
            tool: annotator.clone(),
            candidates: vec![annotator.clone()],
            params: AttemptParams::for_tool(view, &annotator),
            inputs,
            budget: view.retry_budget(),
        };
        Ok(match ctx.healing_loop().run(job, cancel).await? {
            JobOutcome::Succeeded(success) => into_result(success),
            JobOutcome::Failed(failure) => StageResult::Failed(failure),
        })
    }
}
