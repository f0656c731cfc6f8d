//! Optional LLM commentary on a finished stage.
//!
//! Never fails the stage: an unavailable LLM, a `quick` detail level, or a
//! rejected reply simply yields no analysis.

use mito_llm::{FieldKind, ResponseSchema};
use mito_types::{DetailLevel, StageOutput, StageView};
use serde_json::{json, Value};

use crate::agent::AgentDeps;
use crate::events::AgentEventKind;
use crate::knowledge::MemoryAdapter;

const ANALYSIS_SYSTEM: &str = "You review intermediate results of a mitochondrial genome \
assembly pipeline. Be concise and concrete.";

const RAG_TOP_K: usize = 3;
const MEMORY_TOP_K: usize = 3;

pub fn analysis_schema() -> ResponseSchema {
    ResponseSchema::new("stage_analysis")
        .required("summary", FieldKind::String)
        .one_of("quality", &["good", "acceptable", "poor"])
        .required("recommendations", FieldKind::Array)
}

fn build_prompt(view: &StageView<'_>, output: &StageOutput, tool: &str, history: &[String]) -> String {
    let metrics = serde_json::to_string_pretty(&output.metrics).unwrap_or_default();
    let mut prompt = format!(
        "Stage: {stage}\nTool: {tool}\nKingdom: {kingdom}\nSequencing type: {seq}\n\nMetrics:\n{metrics}\n",
        stage = view.stage,
        kingdom = view.inputs.kingdom,
        seq = view.config.seq_type,
    );
    if view.config.detail_level == DetailLevel::Expert {
        let files: Vec<String> = output.files.keys().cloned().collect();
        prompt.push_str(&format!("\nOutput files: {}\n", files.join(", ")));
    }
    if !history.is_empty() {
        prompt.push_str("\nEarlier runs of this stage:\n");
        for line in history {
            prompt.push_str(&format!("- {line}\n"));
        }
    }
    prompt
}

/// Ask the LLM to assess `output`; writes `<stage>_ai_analysis.json` on success.
pub async fn analyze_stage(
    deps: &AgentDeps,
    memory: &dyn MemoryAdapter,
    view: &StageView<'_>,
    output: &StageOutput,
    tool: &str,
) -> Option<Value> {
    if !deps.llm.is_available() || view.config.detail_level == DetailLevel::Quick {
        return None;
    }

    let tags = vec![view.stage.to_string(), tool.to_string()];
    let history: Vec<String> = match memory.query(&tags, MEMORY_TOP_K).await {
        Ok(records) => records.into_iter().map(|r| r.content).collect(),
        Err(e) => {
            tracing::debug!(stage = %view.stage, error = %e, "Memory query failed");
            Vec::new()
        }
    };
    let base = build_prompt(view, output, tool, &history);
    let (prompt, citations) = match deps.rag.augment(&base, RAG_TOP_K).await {
        Ok(augmented) => augmented,
        Err(e) => {
            tracing::debug!(stage = %view.stage, error = %e, "Retrieval failed");
            (base, Vec::new())
        }
    };

    deps.events.send(
        AgentEventKind::LlmCall,
        view.stage,
        view.pipeline_id,
        json!({ "purpose": "analysis", "tool": tool }),
    );
    let mut analysis = match deps
        .llm
        .generate_json(&prompt, &analysis_schema(), Some(ANALYSIS_SYSTEM))
        .await
    {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(stage = %view.stage, error = %e, "Stage analysis unavailable");
            deps.events.send(
                AgentEventKind::LlmError,
                view.stage,
                view.pipeline_id,
                json!({ "purpose": "analysis", "error": e.to_string() }),
            );
            return None;
        }
    };
    if !citations.is_empty() {
        analysis["citations"] = json!(citations);
    }

    let path = view.stage_dir().join(format!("{}_ai_analysis.json", view.stage));
    match serde_json::to_vec_pretty(&analysis) {
        Ok(bytes) => {
            if let Err(e) = tokio::fs::write(&path, bytes).await {
                tracing::warn!(path = %path.display(), error = %e, "Cannot write stage analysis");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Cannot serialize stage analysis"),
    }
    Some(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mito_llm::{LlmClient, ScriptedProvider};
    use mito_tools::{ProcessRunner, ToolRegistry};
    use mito_types::{PipelineInputs, PipelineState, RuntimeConfig, StageName};

    use crate::knowledge::{InMemoryMemory, SimulatedRag};

    fn deps(replies: Vec<Result<String, mito_types::MitoError>>) -> AgentDeps {
        let runner = Arc::new(ProcessRunner::new(Arc::new(ToolRegistry::default())).dry_run(true));
        AgentDeps::new(runner)
            .with_llm(Arc::new(LlmClient::new(ScriptedProvider::new(replies)).with_max_retries(0)))
            .with_rag(Arc::new(SimulatedRag))
    }

    fn state(dir: &std::path::Path) -> PipelineState {
        PipelineState::new(PipelineInputs::new("/d/r1.fq"), RuntimeConfig::default(), dir)
    }

    #[tokio::test]
    async fn writes_analysis_with_citations() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(dir.path());
        let view = s.view(StageName::Qc);
        tokio::fs::create_dir_all(view.stage_dir()).await.unwrap();
        let reply = r#"{"summary":"clean reads","quality":"good","recommendations":[]}"#;
        let deps = deps(vec![Ok(reply.to_string())]);

        let analysis = analyze_stage(&deps, &InMemoryMemory::new(), &view, &StageOutput::default(), "fastp")
            .await
            .unwrap();
        assert_eq!(analysis["quality"], "good");
        assert_eq!(analysis["citations"].as_array().unwrap().len(), 3);
        assert!(view.stage_dir().join("qc_ai_analysis.json").exists());
    }

    #[tokio::test]
    async fn quick_detail_level_skips_llm() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = state(dir.path());
        s.config.detail_level = DetailLevel::Quick;
        let deps = deps(vec![]);
        let view = s.view(StageName::Qc);
        assert!(analyze_stage(&deps, &InMemoryMemory::new(), &view, &StageOutput::default(), "fastp")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn invalid_reply_yields_none_and_llm_error_event() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(dir.path());
        let deps = deps(vec![Ok(r#"{"summary":"x","quality":"excellent","recommendations":[]}"#.into())]);
        let mut rx = deps.events.subscribe();
        let view = s.view(StageName::Assembly);

        let out = analyze_stage(&deps, &InMemoryMemory::new(), &view, &StageOutput::default(), "spades").await;
        assert!(out.is_none());
        assert_eq!(rx.recv().await.unwrap().kind, AgentEventKind::LlmCall);
        assert_eq!(rx.recv().await.unwrap().kind, AgentEventKind::LlmError);
    }
}
