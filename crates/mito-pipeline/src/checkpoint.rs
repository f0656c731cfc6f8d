//! Checkpoint save/load, paused-run lookup, and resume after external annotation.
//!
//! The executor writes `workdir/checkpoint.json` after every node. A paused run
//! additionally leaves `checkpoint_<task_id>.json` in the workdir and in the
//! paused-checkpoint directory so `mito resume <task_id>` can find it from
//! anywhere.

use std::path::{Path, PathBuf};

use mito_tools::parsers::summarize_genbank;
use mito_types::{
    now_epoch, round_to, MitoError, NodeId, PipelineState, Result, StageName, StageOutput, StageRoute, StageStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::migrate::migrate_legacy_state;

pub const SCHEMA_VERSION: &str = "1.1";
pub const LEGACY_SCHEMA_VERSION: &str = "1.0";
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Name the resumed annotation artifact is stored under.
pub const ANNOTATION_ARTIFACT: &str = "annotation.gbk";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEnvelope {
    pub schema_version: String,
    /// RFC 3339 timestamp of the write.
    pub saved_at: String,
    pub state: PipelineState,
}

pub fn paused_file_name(task_id: &str) -> String {
    format!("checkpoint_{task_id}.json")
}

fn checkpoint_error(path: &Path, message: impl Into<String>) -> MitoError {
    MitoError::Checkpoint {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// Write `state` to `path` atomically: a temp file in the same directory, then rename.
pub async fn save_checkpoint(state: &PipelineState, path: &Path) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir).await?;

    let envelope = CheckpointEnvelope {
        schema_version: SCHEMA_VERSION.to_string(),
        saved_at: chrono::Utc::now().to_rfc3339(),
        state: state.clone(),
    };
    let json = serde_json::to_string_pretty(&envelope)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| CHECKPOINT_FILE.to_string());
    let temp = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&temp, json).await?;
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(checkpoint_error(path, format!("rename failed: {e}")));
    }
    tracing::debug!(path = %path.display(), stage = %state.current_stage, "Checkpoint saved");
    Ok(())
}

/// Load a checkpoint, upgrading legacy documents.
pub async fn load_checkpoint(path: &Path) -> Result<PipelineState> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| checkpoint_error(path, format!("cannot read: {e}")))?;
    let document: Value =
        serde_json::from_str(&text).map_err(|e| checkpoint_error(path, format!("not valid JSON: {e}")))?;

    let version = document
        .get("schema_version")
        .or_else(|| document.get("version"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    if version == SCHEMA_VERSION {
        let envelope: CheckpointEnvelope = serde_json::from_value(document)
            .map_err(|e| checkpoint_error(path, format!("malformed state: {e}")))?;
        return Ok(envelope.state);
    }
    let is_legacy = version == LEGACY_SCHEMA_VERSION || version.starts_with("1.0.");
    match document.get("state") {
        Some(state) if is_legacy => {
            tracing::info!(path = %path.display(), version = %version, "Migrating legacy checkpoint");
            migrate_legacy_state(state)
        }
        _ => Err(MitoError::UnsupportedSchema {
            found: version,
            supported: format!("{SCHEMA_VERSION}, {LEGACY_SCHEMA_VERSION}"),
        }),
    }
}

/// Remove the workdir checkpoint. Missing files are fine.
pub async fn clear_checkpoint(workdir: &Path) -> Result<()> {
    let path = workdir.join(CHECKPOINT_FILE);
    if tokio::fs::try_exists(&path).await? {
        tokio::fs::remove_file(&path).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Paused runs
// ---------------------------------------------------------------------------

/// Write the paused copies. The workdir copy must succeed; a failed copy in
/// `paused_dir` is reported back as a warning message.
pub async fn save_paused(state: &PipelineState, task_id: &str, paused_dir: &Path) -> Result<(PathBuf, Option<String>)> {
    let local = state.workdir.join(paused_file_name(task_id));
    save_checkpoint(state, &local).await?;
    let shared = paused_dir.join(paused_file_name(task_id));
    let warning = match save_checkpoint(state, &shared).await {
        Ok(()) => None,
        Err(e) => {
            tracing::warn!(path = %shared.display(), error = %e, "Could not write shared paused checkpoint");
            Some(format!("paused checkpoint not copied to {}: {e}", paused_dir.display()))
        }
    };
    Ok((local, warning))
}

/// Directories searched for `checkpoint_<task_id>.json`, in order.
pub fn search_dirs(explicit: Option<&Path>, cwd: &Path, paused_dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = explicit.map(Path::to_path_buf).into_iter().collect();
    dirs.push(cwd.to_path_buf());
    dirs.push(cwd.join("work"));
    dirs.push(paused_dir.to_path_buf());
    dirs.dedup();
    dirs
}

pub async fn find_paused(task_id: &str, dirs: &[PathBuf]) -> Result<PathBuf> {
    let name = paused_file_name(task_id);
    for dir in dirs {
        let candidate = dir.join(&name);
        if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return Ok(candidate);
        }
    }
    Err(MitoError::PausedTaskNotFound(task_id.to_string()))
}

/// Inject an externally produced GenBank annotation into a paused run.
///
/// The paused checkpoint itself is left untouched, so resuming twice with the
/// same artifact yields the same annotation output.
pub async fn resume(task_id: &str, artifact: &Path, dirs: &[PathBuf]) -> Result<PipelineState> {
    let paused = find_paused(task_id, dirs).await?;
    let mut state = load_checkpoint(&paused).await?;
    if state.paused_task_id.as_deref() != Some(task_id) {
        return Err(MitoError::InvalidInput(format!(
            "checkpoint {} is not paused on task '{task_id}'",
            paused.display()
        )));
    }
    let text = tokio::fs::read_to_string(artifact)
        .await
        .map_err(|e| MitoError::InvalidInput(format!("cannot read annotation {}: {e}", artifact.display())))?;

    let stage_dir = state.stage_dir(StageName::Annotation);
    tokio::fs::create_dir_all(&stage_dir).await?;
    let genbank = stage_dir.join(ANNOTATION_ARTIFACT);
    if genbank != artifact {
        tokio::fs::write(&genbank, &text).await?;
    }

    let summary = summarize_genbank(&text);
    let annotator = state
        .config
        .tool_chain
        .annotation
        .clone()
        .or_else(|| state.config.annotator.clone())
        .unwrap_or_else(|| "geseq".to_string());
    let stats = stage_dir.join("annotation_stats.json");
    let stats_doc = json!({ "annotator": annotator, "task_id": task_id, "summary": summary });
    tokio::fs::write(&stats, serde_json::to_string_pretty(&stats_doc)?).await?;

    let mut output = StageOutput {
        tool: Some(annotator.clone()),
        metrics: summary.to_metrics(),
        ..StageOutput::default()
    };
    output.files.insert("genbank".into(), genbank);
    output.files.insert("stats".into(), stats);
    state.stage_outputs.insert(StageName::Annotation, output);

    state.stage_status.insert(StageName::Annotation, StageStatus::Completed);
    if !state.completed_stages.contains(&StageName::Annotation) {
        state.completed_stages.push(StageName::Annotation);
    }
    let now = now_epoch();
    if let Some(metrics) = state.stage_metrics.get_mut(&StageName::Annotation) {
        metrics.finished_at = Some(now);
        metrics.duration_sec = Some(round_to(now - metrics.started_at, 3));
        metrics.tool = Some(annotator);
    }
    state.current_stage = NodeId::Report;
    state.paused_task_id = None;
    state.route = Some(StageRoute::Continue);
    state.done = false;

    save_checkpoint(&state, &state.workdir.join(CHECKPOINT_FILE)).await?;
    tracing::info!(task_id, genes = summary.genes, "Resumed paused run with external annotation");
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mito_types::{PipelineInputs, RuntimeConfig};

    fn state(workdir: &Path) -> PipelineState {
        PipelineState::new(PipelineInputs::new("/data/r1.fq"), RuntimeConfig::default(), workdir)
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);
        let mut original = state(dir.path());
        original.warnings.push("w".into());
        original.retries.insert(StageName::Qc, 1);

        save_checkpoint(&original, &path).await.unwrap();
        let loaded = load_checkpoint(&path).await.unwrap();
        assert_eq!(loaded, original);

        // saving again differs only in the envelope timestamp
        let again = dir.path().join("again.json");
        save_checkpoint(&loaded, &again).await.unwrap();
        let a: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let b: Value = serde_json::from_str(&std::fs::read_to_string(&again).unwrap()).unwrap();
        assert_eq!(a["state"], b["state"]);
    }

    #[tokio::test]
    async fn save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        save_checkpoint(&state(dir.path()), &dir.path().join(CHECKPOINT_FILE))
            .await
            .unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![CHECKPOINT_FILE.to_string()]);
    }

    #[tokio::test]
    async fn rejects_unknown_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);
        std::fs::write(&path, r#"{"schema_version": "2.0", "saved_at": "x", "state": {}}"#).unwrap();
        match load_checkpoint(&path).await {
            Err(MitoError::UnsupportedSchema { found, .. }) => assert_eq!(found, "2.0"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn loads_legacy_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);
        let legacy = json!({
            "state": {
                "inputs": {"reads": "/data/x_ont.fq", "read_type": "nanopore", "kingdom": "animal"},
                "config": {"threads": 2, "memory": "4G", "timeout": 60, "max_retries": 3},
                "workdir": dir.path(),
                "current_stage": "qc",
                "stage_info": {},
                "completed_stages": ["supervisor"],
                "failed_stages": [],
                "stage_outputs": {},
                "route": "continue",
                "retries": {},
                "errors": [],
                "warnings": [],
                "pipeline_id": "old",
                "version": "1.0.0",
                "start_time": 1.0,
                "done": false
            },
            "timestamp": 1.0,
            "version": "1.0.0"
        });
        std::fs::write(&path, legacy.to_string()).unwrap();
        let state = load_checkpoint(&path).await.unwrap();
        assert_eq!(state.pipeline_id, "old");
        assert_eq!(state.current_stage, NodeId::Qc);
        assert_eq!(state.completed_stages, vec![StageName::Supervisor]);
    }

    #[tokio::test]
    async fn missing_file_is_a_checkpoint_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_checkpoint(&dir.path().join("nope.json")).await.unwrap_err();
        assert!(matches!(err, MitoError::Checkpoint { .. }));
    }

    #[test]
    fn search_order() {
        let dirs = search_dirs(Some(Path::new("/w")), Path::new("/cwd"), Path::new("/paused"));
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/w"),
                PathBuf::from("/cwd"),
                PathBuf::from("/cwd/work"),
                PathBuf::from("/paused")
            ]
        );
    }

    #[tokio::test]
    async fn find_paused_reports_unknown_task() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_paused("deadbeef", &[dir.path().to_path_buf()]).await.unwrap_err();
        assert!(matches!(err, MitoError::PausedTaskNotFound(id) if id == "deadbeef"));
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        save_checkpoint(&state(dir.path()), &dir.path().join(CHECKPOINT_FILE))
            .await
            .unwrap();
        clear_checkpoint(dir.path()).await.unwrap();
        clear_checkpoint(dir.path()).await.unwrap();
        assert!(!dir.path().join(CHECKPOINT_FILE).exists());
    }
}
