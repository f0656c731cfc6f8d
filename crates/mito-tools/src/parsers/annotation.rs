use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{copy_into, find_output, write_json, OutputParser, ParsedOutput};
use crate::catalog::ToolSpec;
use crate::runner::ToolRun;

/// GFF3 annotations: copied to `annotation.gff` with per-type feature counts.
pub struct AnnotationParser;

#[async_trait]
impl OutputParser for AnnotationParser {
    async fn parse(&self, stage_dir: &Path, spec: &ToolSpec, _runs: &[ToolRun]) -> ParsedOutput {
        let raw = match find_output(stage_dir, spec.outputs).await {
            Ok(Some(path)) => path,
            Ok(None) => return ParsedOutput::failed(format!("{} produced no GFF file", spec.id)),
            Err(e) => return ParsedOutput::failed(e.to_string()),
        };
        let text = tokio::fs::read_to_string(&raw).await.unwrap_or_default();
        let counts = gff_feature_counts(&text);
        if counts.is_empty() {
            return ParsedOutput::failed(format!("{} contains no features", raw.display()));
        }

        let gff = stage_dir.join("annotation.gff");
        if let Err(e) = copy_into(&raw, &gff).await {
            return ParsedOutput::failed(format!("cannot write annotation.gff: {e}"));
        }

        let mut parsed = ParsedOutput {
            success: true,
            ..Default::default()
        };
        parsed.metrics = annotation_metrics(&counts);
        let stats_path = stage_dir.join("annotation_stats.json");
        let doc = json!({ "annotator": spec.id, "feature_counts": counts });
        match write_json(&stats_path, &doc).await {
            Ok(()) => {
                parsed.files.insert("stats".to_string(), stats_path);
            }
            Err(e) => parsed.errors.push(format!("cannot write annotation_stats.json: {e}")),
        }
        parsed.files.insert("gff".to_string(), gff);
        parsed
    }
}

/// Count GFF3 features by their type column.
pub fn gff_feature_counts(text: &str) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for line in text.lines() {
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        if let Some(kind) = line.split('\t').nth(2) {
            *counts.entry(kind.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

fn annotation_metrics(counts: &BTreeMap<String, u64>) -> BTreeMap<String, Value> {
    let get = |k: &str| counts.get(k).copied().unwrap_or(0);
    BTreeMap::from([
        ("genes".to_string(), json!(get("gene"))),
        ("cds".to_string(), json!(get("CDS"))),
        ("trna".to_string(), json!(get("tRNA"))),
        ("rrna".to_string(), json!(get("rRNA"))),
        ("total_features".to_string(), json!(counts.values().sum::<u64>())),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::lookup;

    const GFF: &str = "##gff-version 3\n\
seq1\tmitos\tgene\t1\t1500\t.\t+\t.\tName=cox1\n\
seq1\tmitos\tCDS\t1\t1500\t.\t+\t0\tName=cox1\n\
seq1\tmitos\ttRNA\t1501\t1570\t.\t+\t.\tName=trnS\n\
seq1\tmitos\trRNA\t1600\t2500\t.\t-\t.\tName=rrnL\n";

    #[test]
    fn counts_feature_types() {
        let counts = gff_feature_counts(GFF);
        assert_eq!(counts["gene"], 1);
        assert_eq!(counts["tRNA"], 1);
        assert_eq!(counts.len(), 4);
    }

    #[tokio::test]
    async fn mitos_nested_result_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("run");
        tokio::fs::create_dir_all(&nested).await.unwrap();
        tokio::fs::write(nested.join("result.gff"), GFF).await.unwrap();

        let parsed = AnnotationParser.parse(dir.path(), lookup("mitos").unwrap(), &[]).await;
        assert!(parsed.success);
        assert_eq!(parsed.metrics["total_features"], json!(4));
        assert_eq!(parsed.files["gff"], dir.path().join("annotation.gff"));
        assert!(dir.path().join("annotation_stats.json").exists());
    }

    #[tokio::test]
    async fn empty_gff_fails() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("result.gff"), "##gff-version 3\n").await.unwrap();
        let parsed = AnnotationParser.parse(dir.path(), lookup("mitos").unwrap(), &[]).await;
        assert!(!parsed.success);
    }
}
