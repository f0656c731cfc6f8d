//! Upgrade of legacy (schema 1.0) checkpoints.
//!
//! The legacy document is `{"state": {...}, "timestamp": f64, "version": "1.0.x"}`
//! where the state keeps per-stage bookkeeping in a `stage_info` map, errors as
//! plain strings, and output files as `{path, size_bytes, ...}` objects.

use std::collections::BTreeMap;
use std::path::PathBuf;

use mito_types::{
    ErrorRecord, FailureKind, Kingdom, MitoError, NodeId, PipelineInputs, PipelineState, Result, RuntimeConfig,
    SeqType, StageMetrics, StageName, StageOutput, StageRoute, StageStatus,
};
use serde_json::{Map, Value};

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

fn f64_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    obj.get(key).and_then(Value::as_f64)
}

fn stage_list(value: Option<&Value>) -> Vec<StageName> {
    let mut stages = Vec::new();
    for stage in value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .filter_map(|s| s.parse::<StageName>().ok())
    {
        if !stages.contains(&stage) {
            stages.push(stage);
        }
    }
    stages
}

fn legacy_status(label: &str) -> StageStatus {
    match label {
        "success" | "completed" => StageStatus::Completed,
        "failed" => StageStatus::Failed,
        "skipped" => StageStatus::Skipped,
        "paused" => StageStatus::Paused,
        // an interrupted stage runs again from the start
        _ => StageStatus::Pending,
    }
}

fn legacy_route(label: &str) -> Option<StageRoute> {
    serde_json::from_value(Value::String(label.to_ascii_lowercase())).ok()
}

fn file_path(value: &Value) -> Option<PathBuf> {
    match value {
        Value::String(path) => Some(PathBuf::from(path)),
        Value::Object(info) => str_field(info, "path").map(PathBuf::from),
        _ => None,
    }
}

fn inputs(legacy: &Map<String, Value>) -> (PipelineInputs, Option<SeqType>) {
    let empty = Map::new();
    let raw = legacy.get("inputs").and_then(Value::as_object).unwrap_or(&empty);

    let mut reads: Vec<PathBuf> = match raw.get("reads") {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(PathBuf::from).collect(),
        Some(Value::String(path)) => vec![PathBuf::from(path)],
        _ => Vec::new(),
    };
    let first = if reads.is_empty() {
        PathBuf::new()
    } else {
        reads.remove(0)
    };
    let mut inputs = PipelineInputs::new(first);
    inputs.reads2 = str_field(raw, "reads2")
        .map(PathBuf::from)
        .or_else(|| reads.into_iter().next());
    inputs.kingdom = str_field(raw, "kingdom")
        .and_then(|k| k.parse::<Kingdom>().ok())
        .unwrap_or_default();
    inputs.species = str_field(raw, "species").map(str::to_string);
    if let Some(reference) = str_field(raw, "reference") {
        inputs.hints.insert("reference".into(), Value::String(reference.into()));
    }
    let seq_type = str_field(raw, "read_type").and_then(|t| t.parse::<SeqType>().ok());
    (inputs, seq_type)
}

fn config(legacy: &Map<String, Value>, seq_type: Option<SeqType>, warnings: &mut Vec<String>) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    let Some(raw) = legacy.get("config").and_then(Value::as_object) else {
        return config;
    };
    if let Some(threads) = raw.get("threads").and_then(Value::as_u64) {
        config.threads = threads.max(1) as u32;
    }
    if let Some(memory) = str_field(raw, "memory") {
        config.memory = memory.to_string();
    }
    if let Some(timeout) = raw.get("timeout").and_then(Value::as_u64) {
        config.tool_timeout_secs = timeout;
        config.max_tool_timeout_secs = config.max_tool_timeout_secs.max(timeout);
    }
    if let Some(retries) = raw.get("max_retries").and_then(Value::as_u64) {
        config.max_retries = retries as u32;
    }
    if let Some(Value::Object(params)) = raw.get("tool_params") {
        for (tool, values) in params {
            if let Value::Object(values) = values {
                config
                    .tool_parameters
                    .insert(tool.clone(), values.clone().into_iter().collect());
            }
        }
    }
    if raw.get("tools").and_then(Value::as_object).is_some_and(|t| !t.is_empty()) {
        warnings.push("legacy tool paths were not migrated; register them with `mito doctor --fix`".into());
    }
    config.seq_type = seq_type.unwrap_or(SeqType::Auto);
    config
}

/// Convert a legacy state object into the current record.
pub fn migrate_legacy_state(legacy: &Value) -> Result<PipelineState> {
    let legacy = legacy
        .as_object()
        .ok_or_else(|| MitoError::InvalidInput("legacy checkpoint state is not an object".into()))?;

    let mut warnings: Vec<String> = legacy
        .get("warnings")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();

    let (inputs, seq_type) = inputs(legacy);
    let config = config(legacy, seq_type, &mut warnings);
    let workdir = str_field(legacy, "workdir").map(PathBuf::from).unwrap_or_default();
    let mut state = PipelineState::new(inputs, config, workdir);

    if let Some(id) = str_field(legacy, "pipeline_id") {
        state.pipeline_id = id.to_string();
    }
    state.current_stage = match str_field(legacy, "current_stage") {
        Some(s) if s.eq_ignore_ascii_case("end") => NodeId::End,
        Some(s) => s.parse::<StageName>().map(NodeId::from).unwrap_or(NodeId::Supervisor),
        None => NodeId::Supervisor,
    };
    state.completed_stages = stage_list(legacy.get("completed_stages"));
    state.failed_stages = stage_list(legacy.get("failed_stages"))
        .into_iter()
        .filter(|s| !state.completed_stages.contains(s))
        .collect();

    let mut retries: BTreeMap<StageName, u32> = BTreeMap::new();
    if let Some(Value::Object(raw)) = legacy.get("retries") {
        for (stage, count) in raw {
            if let (Ok(stage), Some(count)) = (stage.parse::<StageName>(), count.as_u64()) {
                retries.insert(stage, count as u32);
            }
        }
    }

    let in_flight = state.current_stage.stage();
    if let Some(Value::Object(info)) = legacy.get("stage_info") {
        for (name, entry) in info {
            let (Ok(stage), Some(entry)) = (name.parse::<StageName>(), entry.as_object()) else {
                continue;
            };
            if let Some(status) = str_field(entry, "status") {
                state.stage_status.insert(stage, legacy_status(status));
            }
            let retry_count = entry.get("retry_count").and_then(Value::as_u64).unwrap_or(0) as u32;
            let count = retries.entry(stage).or_insert(0);
            *count = (*count).max(retry_count);

            let kept = state.completed_stages.contains(&stage) || in_flight == Some(stage);
            if let (true, Some(started_at)) = (kept, f64_field(entry, "start_time")) {
                state.stage_metrics.insert(
                    stage,
                    StageMetrics {
                        started_at,
                        finished_at: f64_field(entry, "end_time"),
                        duration_sec: f64_field(entry, "duration"),
                        attempts: retry_count + 1,
                        tool: str_field(entry, "tool_used").map(str::to_string),
                        exit_code: entry.get("exit_code").and_then(Value::as_i64).map(|c| c as i32),
                    },
                );
            }
        }
    }
    for stage in &state.completed_stages {
        state.stage_status.insert(*stage, StageStatus::Completed);
    }
    for stage in &state.failed_stages {
        state.stage_status.insert(*stage, StageStatus::Failed);
    }
    let max_retries = state.config.max_retries;
    state.retries = retries
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .map(|(s, n)| (s, n.min(max_retries)))
        .collect();

    if let Some(Value::Object(outputs)) = legacy.get("stage_outputs") {
        for (name, raw) in outputs {
            let (Ok(stage), Some(raw)) = (name.parse::<StageName>(), raw.as_object()) else {
                continue;
            };
            if !state.completed_stages.contains(&stage) {
                continue;
            }
            let mut output = StageOutput::default();
            if let Some(Value::Object(files)) = raw.get("files") {
                output.files = files
                    .iter()
                    .filter_map(|(key, value)| file_path(value).map(|p| (key.clone(), p)))
                    .collect();
            }
            if let Some(Value::Object(metrics)) = raw.get("metrics") {
                output.metrics = metrics.clone().into_iter().collect();
            }
            output.tool = raw
                .get("metadata")
                .and_then(Value::as_object)
                .and_then(|m| str_field(m, "tool"))
                .map(str::to_string);
            state.stage_outputs.insert(stage, output);
        }
    }

    let error_stage = in_flight
        .or_else(|| state.failed_stages.last().copied())
        .unwrap_or(StageName::Supervisor);
    state.errors = legacy
        .get("errors")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(|message| ErrorRecord {
            stage: error_stage,
            kind: FailureKind::Unknown,
            message: message.to_string(),
            tool: None,
            diagnosis: None,
            stdout_log: None,
            stderr_log: None,
            timestamp: 0.0,
            elapsed_sec: None,
        })
        .collect();

    state.warnings = warnings;
    state.route = str_field(legacy, "route").and_then(legacy_route);
    state.done = legacy.get("done").and_then(Value::as_bool).unwrap_or(false);
    if state.done {
        state.current_stage = NodeId::End;
    }
    if let Some(start) = f64_field(legacy, "start_time") {
        state.start_time = start;
    }
    state.end_time = f64_field(legacy, "end_time");
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn legacy() -> Value {
        json!({
            "inputs": {
                "reads": ["/data/s_R1.fq", "/data/s_R2.fq"],
                "read_type": "illumina",
                "kingdom": "plant",
                "species": "Arabidopsis thaliana",
                "reference": "/ref/mt.fa"
            },
            "config": {
                "threads": 8, "memory": "32G", "timeout": 7200, "max_retries": 2,
                "tools": {}, "tool_params": {"spades": {"-k": "21,33"}}
            },
            "workdir": "/work",
            "current_stage": "annotation",
            "stage_info": {
                "supervisor": {"name": "supervisor", "status": "success", "start_time": 10.0, "end_time": 11.0,
                               "duration": 1.0, "tool_used": null, "exit_code": 0, "retry_count": 0},
                "qc": {"name": "qc", "status": "success", "start_time": 11.0, "end_time": 20.0,
                       "duration": 9.0, "tool_used": "fastp", "exit_code": 0, "retry_count": 0},
                "assembly": {"name": "assembly", "status": "success", "start_time": 20.0, "end_time": 90.0,
                             "duration": 70.0, "tool_used": "spades", "exit_code": 0, "retry_count": 1},
                "annotation": {"name": "annotation", "status": "retrying", "start_time": 90.0,
                               "end_time": null, "duration": null, "retry_count": 1},
                "report": {"name": "report", "status": "pending", "retry_count": 0}
            },
            "completed_stages": ["supervisor", "qc", "assembly"],
            "failed_stages": [],
            "stage_outputs": {
                "assembly": {
                    "files": {"contigs": {"path": "/work/02_assembly/contigs.fasta", "size_bytes": 16000}},
                    "metrics": {"n50": 16000, "num_contigs": 1},
                    "metadata": {"tool": "spades"},
                    "summary": "ok",
                    "success": true
                }
            },
            "route": "retry",
            "retries": {"assembly": 1, "annotation": 1},
            "errors": ["mitos crashed"],
            "warnings": ["low coverage"],
            "pipeline_id": "legacy-1",
            "version": "1.0.0",
            "start_time": 10.0,
            "end_time": null,
            "checkpoint_path": "/work/checkpoint.json",
            "done": false
        })
    }

    #[test]
    fn migrates_inputs_and_config() {
        let state = migrate_legacy_state(&legacy()).unwrap();
        assert_eq!(state.pipeline_id, "legacy-1");
        assert_eq!(state.inputs.reads, PathBuf::from("/data/s_R1.fq"));
        assert_eq!(state.inputs.reads2, Some(PathBuf::from("/data/s_R2.fq")));
        assert_eq!(state.inputs.kingdom, Kingdom::Plant);
        assert_eq!(state.inputs.hints["reference"], json!("/ref/mt.fa"));
        assert_eq!(state.config.seq_type, SeqType::Illumina);
        assert_eq!(state.config.threads, 8);
        assert_eq!(state.config.tool_timeout_secs, 7200);
        assert_eq!(state.config.max_retries, 2);
        assert_eq!(state.config.tool_parameters["spades"]["-k"], json!("21,33"));
    }

    #[test]
    fn migrates_stage_bookkeeping() {
        let state = migrate_legacy_state(&legacy()).unwrap();
        assert_eq!(state.current_stage, NodeId::Annotation);
        assert_eq!(state.status_of(StageName::Assembly), StageStatus::Completed);
        assert_eq!(state.status_of(StageName::Annotation), StageStatus::Pending);
        // polish did not exist in the legacy graph
        assert_eq!(state.status_of(StageName::Polish), StageStatus::Pending);
        assert_eq!(state.retries_for(StageName::Assembly), 1);
        assert_eq!(state.stage_metrics[&StageName::Assembly].attempts, 2);
        assert_eq!(state.stage_metrics[&StageName::Assembly].tool.as_deref(), Some("spades"));
        assert!(state.stage_metrics.contains_key(&StageName::Annotation));
        assert!(!state.stage_metrics.contains_key(&StageName::Report));
        assert_eq!(state.route, Some(StageRoute::Retry));
    }

    #[test]
    fn flattens_file_info_and_errors() {
        let state = migrate_legacy_state(&legacy()).unwrap();
        let assembly = &state.stage_outputs[&StageName::Assembly];
        assert_eq!(assembly.file("contigs"), Some(PathBuf::from("/work/02_assembly/contigs.fasta").as_path()));
        assert_eq!(assembly.tool.as_deref(), Some("spades"));
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors[0].stage, StageName::Annotation);
        assert_eq!(state.errors[0].kind, FailureKind::Unknown);
        assert_eq!(state.warnings, vec!["low coverage".to_string()]);
    }

    #[test]
    fn done_state_points_at_end() {
        let mut raw = legacy();
        raw["done"] = json!(true);
        raw["current_stage"] = json!("END");
        let state = migrate_legacy_state(&raw).unwrap();
        assert_eq!(state.current_stage, NodeId::End);
    }

    #[test]
    fn rejects_non_object() {
        assert!(migrate_legacy_state(&json!([1, 2])).is_err());
    }
}
