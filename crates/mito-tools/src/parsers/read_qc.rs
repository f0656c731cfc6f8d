use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use mito_types::round_to;
use serde_json::{json, Value};

use super::{find_output, write_json, OutputParser, ParsedOutput};
use crate::catalog::ToolSpec;
use crate::runner::ToolRun;

/// fastp JSON, seqkit tables, and HTML reports from fastqc / nanoQC.
pub struct ReadQcParser;

#[async_trait]
impl OutputParser for ReadQcParser {
    async fn parse(&self, stage_dir: &Path, spec: &ToolSpec, _runs: &[ToolRun]) -> ParsedOutput {
        let report = match find_output(stage_dir, spec.outputs).await {
            Ok(Some(path)) => path,
            Ok(None) => return ParsedOutput::failed(format!("{} produced no report", spec.id)),
            Err(e) => return ParsedOutput::failed(e.to_string()),
        };

        let mut parsed = ParsedOutput {
            success: true,
            ..Default::default()
        };
        let text = tokio::fs::read_to_string(&report).await.unwrap_or_default();
        let name = report
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if name.ends_with(".json") {
            match serde_json::from_str::<Value>(&text) {
                Ok(doc) => parsed.metrics = fastp_metrics(&doc),
                Err(e) => {
                    parsed.success = false;
                    parsed.errors.push(format!("invalid fastp report: {e}"));
                }
            }
            for (key, file) in [("clean_reads", "clean_R1.fastq.gz"), ("clean_reads2", "clean_R2.fastq.gz")] {
                let path = stage_dir.join(file);
                if path.exists() {
                    parsed.files.insert(key.to_string(), path);
                }
            }
        } else if name.ends_with(".log") {
            parsed.metrics = seqkit_metrics(&text);
            if parsed.metrics.is_empty() {
                parsed.success = false;
                parsed.errors.push("seqkit stats output has no data rows".to_string());
            }
        } else {
            parsed
                .metrics
                .insert("report_format".to_string(), json!("html"));
        }
        parsed.files.insert("report".to_string(), report);

        let results = stage_dir.join("qc_results.json");
        let doc = json!({
            "tool": spec.id,
            "metrics": parsed.metrics,
            "files": parsed.files,
        });
        match write_json(&results, &doc).await {
            Ok(()) => {
                parsed.files.insert("qc_results".to_string(), results);
            }
            Err(e) => parsed.errors.push(format!("cannot write qc_results.json: {e}")),
        }
        parsed
    }
}

fn fastp_metrics(doc: &Value) -> BTreeMap<String, Value> {
    let mut metrics = BTreeMap::new();
    let summary = &doc["summary"];
    let before = &summary["before_filtering"];
    let after = &summary["after_filtering"];
    for (key, value) in [
        ("total_reads_before", &before["total_reads"]),
        ("total_reads", &after["total_reads"]),
        ("total_bases", &after["total_bases"]),
    ] {
        if let Some(n) = value.as_u64() {
            metrics.insert(key.to_string(), json!(n));
        }
    }
    for (key, value) in [("q30_rate", &after["q30_rate"]), ("gc_content", &after["gc_content"])] {
        if let Some(x) = value.as_f64() {
            metrics.insert(key.to_string(), json!(round_to(x, 4)));
        }
    }
    if let (Some(b), Some(a)) = (before["total_reads"].as_u64(), after["total_reads"].as_u64()) {
        let rate = if b == 0 { 0.0 } else { a as f64 / b as f64 };
        metrics.insert("pass_rate".to_string(), json!(round_to(rate, 4)));
    }
    metrics
}

/// Aggregate `seqkit stats -a -T` rows.
fn seqkit_metrics(text: &str) -> BTreeMap<String, Value> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return BTreeMap::new();
    };
    let columns: Vec<&str> = header.split('\t').collect();
    let col = |name: &str| columns.iter().position(|c| *c == name);

    let mut reads = 0u64;
    let mut bases = 0u64;
    let mut max_len = 0u64;
    let mut n50 = 0u64;
    let mut q30 = Vec::new();
    let mut rows = 0;
    for line in lines {
        let fields: Vec<&str> = line.split('\t').collect();
        let num = |name: &str| -> Option<f64> {
            col(name)
                .and_then(|i| fields.get(i))
                .and_then(|v| v.replace(',', "").parse().ok())
        };
        rows += 1;
        reads += num("num_seqs").unwrap_or(0.0) as u64;
        bases += num("sum_len").unwrap_or(0.0) as u64;
        max_len = max_len.max(num("max_len").unwrap_or(0.0) as u64);
        n50 = n50.max(num("N50").unwrap_or(0.0) as u64);
        if let Some(q) = num("Q30(%)") {
            q30.push(q);
        }
    }
    if rows == 0 {
        return BTreeMap::new();
    }

    let mut metrics = BTreeMap::new();
    metrics.insert("total_reads".to_string(), json!(reads));
    metrics.insert("total_bases".to_string(), json!(bases));
    metrics.insert("max_length".to_string(), json!(max_len));
    metrics.insert("n50".to_string(), json!(n50));
    let mean = if reads == 0 { 0.0 } else { bases as f64 / reads as f64 };
    metrics.insert("mean_length".to_string(), json!(round_to(mean, 1)));
    if !q30.is_empty() {
        let avg = q30.iter().sum::<f64>() / q30.len() as f64 / 100.0;
        metrics.insert("q30_rate".to_string(), json!(round_to(avg, 4)));
    }
    metrics
}
