//! Run summary and the HTML report written by the report node.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use mito_types::{now_epoch, round_to, ErrorRecord, PipelineState, StageMetrics, StageName, StageStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    /// Stages that are not skipped.
    pub total: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: StageName,
    pub status: StageStatus,
    pub tool: Option<String>,
    pub retries: u32,
    pub metrics: Option<StageMetrics>,
    pub outputs: BTreeMap<String, PathBuf>,
    pub key_metrics: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub pipeline_id: String,
    pub seq_type: String,
    pub kingdom: String,
    pub species: Option<String>,
    pub progress: Progress,
    /// Completed share of the stages that finished either way, in percent.
    pub success_rate: f64,
    pub total_runtime_sec: f64,
    pub completed_stages: Vec<StageName>,
    pub failed_stages: Vec<StageName>,
    pub stages: Vec<StageSummary>,
    pub errors: Vec<ErrorRecord>,
    pub warnings: Vec<String>,
}

pub fn progress(state: &PipelineState) -> Progress {
    let total = StageName::ALL
        .iter()
        .filter(|s| state.status_of(**s) != StageStatus::Skipped)
        .count();
    Progress {
        completed: state.completed_stages.len(),
        total,
        percent: state.progress_percent(),
    }
}

pub fn build_summary(state: &PipelineState) -> RunSummary {
    let finished = state.completed_stages.len() + state.failed_stages.len();
    let success_rate = if finished == 0 {
        0.0
    } else {
        round_to(state.completed_stages.len() as f64 * 100.0 / finished as f64, 1)
    };
    let end = state.end_time.unwrap_or_else(now_epoch);

    let stages = StageName::ALL
        .into_iter()
        .map(|stage| {
            let output = state.stage_outputs.get(&stage);
            StageSummary {
                stage,
                status: state.status_of(stage),
                tool: output
                    .and_then(|o| o.tool.clone())
                    .or_else(|| state.config.tool_chain.for_stage(stage).map(str::to_string)),
                retries: state.retries_for(stage),
                metrics: state.stage_metrics.get(&stage).cloned(),
                outputs: output.map(|o| o.files.clone()).unwrap_or_default(),
                key_metrics: output.map(|o| o.metrics.clone()).unwrap_or_default(),
            }
        })
        .collect();

    RunSummary {
        pipeline_id: state.pipeline_id.clone(),
        seq_type: state.config.seq_type.to_string(),
        kingdom: state.inputs.kingdom.to_string(),
        species: state.inputs.species.clone(),
        progress: progress(state),
        success_rate,
        total_runtime_sec: round_to((end - state.start_time).max(0.0), 3),
        completed_stages: state.completed_stages.clone(),
        failed_stages: state.failed_stages.clone(),
        stages,
        errors: state.errors.clone(),
        warnings: state.warnings.clone(),
    }
}

/// Turns a summary into a standalone document.
pub trait ReportRenderer: Send + Sync {
    fn file_name(&self) -> &str {
        "report.html"
    }

    fn render(&self, summary: &RunSummary) -> String;
}

/// Single-page HTML with no external assets.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlReport;

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn metric_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ReportRenderer for HtmlReport {
    fn render(&self, summary: &RunSummary) -> String {
        let mut html = String::new();
        let title = match &summary.species {
            Some(species) => format!("Mito-Forge report: {}", escape(species)),
            None => "Mito-Forge report".to_string(),
        };
        let _ = write!(
            html,
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n\
             <style>body{{font-family:sans-serif;margin:2em}}table{{border-collapse:collapse}}\
             td,th{{border:1px solid #ccc;padding:4px 8px;text-align:left}}\
             .failed{{color:#b00}}.completed{{color:#070}}</style>\n</head>\n<body>\n<h1>{title}</h1>\n"
        );
        let _ = writeln!(
            html,
            "<p>Run <code>{}</code> · {} · {} · progress {}/{} ({}%) · success rate {}% · runtime {:.1}s</p>",
            escape(&summary.pipeline_id),
            escape(&summary.seq_type),
            escape(&summary.kingdom),
            summary.progress.completed,
            summary.progress.total,
            summary.progress.percent,
            summary.success_rate,
            summary.total_runtime_sec,
        );

        html.push_str("<h2>Stages</h2>\n<table>\n<tr><th>Stage</th><th>Status</th><th>Tool</th><th>Retries</th><th>Metrics</th></tr>\n");
        for stage in &summary.stages {
            let metrics = stage
                .key_metrics
                .iter()
                .map(|(k, v)| format!("{}={}", escape(k), escape(&metric_text(v))))
                .collect::<Vec<_>>()
                .join(", ");
            let status = stage.status.as_str();
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td class=\"{status}\">{status}</td><td>{}</td><td>{}</td><td>{metrics}</td></tr>",
                stage.stage,
                escape(stage.tool.as_deref().unwrap_or("-")),
                stage.retries,
            );
        }
        html.push_str("</table>\n");

        if !summary.errors.is_empty() {
            html.push_str("<h2>Errors</h2>\n<ul>\n");
            for error in &summary.errors {
                let _ = writeln!(
                    html,
                    "<li class=\"failed\">{} [{}]: {}</li>",
                    error.stage,
                    error.kind,
                    escape(&error.message)
                );
            }
            html.push_str("</ul>\n");
        }
        if !summary.warnings.is_empty() {
            html.push_str("<h2>Warnings</h2>\n<ul>\n");
            for warning in &summary.warnings {
                let _ = writeln!(html, "<li>{}</li>", escape(warning));
            }
            html.push_str("</ul>\n");
        }
        html.push_str("</body>\n</html>\n");
        html
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mito_types::{FailureKind, PipelineInputs, RuntimeConfig, StageOutput};
    use serde_json::json;

    fn state() -> PipelineState {
        let mut state = PipelineState::new(PipelineInputs::new("/r1.fq"), RuntimeConfig::default(), "/w");
        state.completed_stages = vec![StageName::Supervisor, StageName::Qc, StageName::Assembly];
        for stage in &state.completed_stages.clone() {
            state.stage_status.insert(*stage, StageStatus::Completed);
        }
        state.stage_status.insert(StageName::Polish, StageStatus::Skipped);
        state.failed_stages = vec![StageName::Annotation];
        state.stage_status.insert(StageName::Annotation, StageStatus::Failed);
        let mut output = StageOutput {
            tool: Some("spades".into()),
            ..StageOutput::default()
        };
        output.metrics.insert("n50".into(), json!(16_299));
        state.stage_outputs.insert(StageName::Assembly, output);
        state.errors.push(ErrorRecord {
            stage: StageName::Annotation,
            kind: FailureKind::Unknown,
            message: "mitos <crashed>".into(),
            tool: Some("mitos".into()),
            diagnosis: None,
            stdout_log: None,
            stderr_log: None,
            timestamp: 0.0,
            elapsed_sec: None,
        });
        state
    }

    #[test]
    fn summary_rates() {
        let summary = build_summary(&state());
        assert_eq!(summary.progress.completed, 3);
        assert_eq!(summary.progress.total, 5);
        assert_eq!(summary.progress.percent, 60.0);
        assert_eq!(summary.success_rate, 75.0);
        let assembly = summary.stages.iter().find(|s| s.stage == StageName::Assembly).unwrap();
        assert_eq!(assembly.tool.as_deref(), Some("spades"));
        assert_eq!(assembly.key_metrics["n50"], json!(16_299));
    }

    #[test]
    fn html_escapes_and_lists_errors() {
        let html = HtmlReport.render(&build_summary(&state()));
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("mitos &lt;crashed&gt;"));
        assert!(html.contains("n50=16299"));
        assert!(html.contains("class=\"skipped\">skipped"));
    }
}
