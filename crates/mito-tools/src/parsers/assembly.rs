use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use super::fasta::{fasta_stats, gfa_to_fasta};
use super::{copy_into, find_output, write_json, OutputParser, ParsedOutput};
use crate::catalog::ToolSpec;
use crate::runner::ToolRun;

/// Normalizes assembler output to `contigs.fasta` plus `assembly_stats.json`.
pub struct AssemblyParser;

#[async_trait]
impl OutputParser for AssemblyParser {
    async fn parse(&self, stage_dir: &Path, spec: &ToolSpec, _runs: &[ToolRun]) -> ParsedOutput {
        let raw = match find_output(stage_dir, spec.outputs).await {
            Ok(Some(path)) => path,
            Ok(None) => {
                return ParsedOutput::failed(format!("{} produced no assembly file", spec.id))
            }
            Err(e) => return ParsedOutput::failed(e.to_string()),
        };
        let text = match tokio::fs::read_to_string(&raw).await {
            Ok(text) => text,
            Err(e) => return ParsedOutput::failed(format!("cannot read {}: {e}", raw.display())),
        };

        let contigs = stage_dir.join("contigs.fasta");
        let is_gfa = raw.extension().is_some_and(|ext| ext == "gfa");
        let write = if is_gfa {
            tokio::fs::write(&contigs, gfa_to_fasta(&text))
                .await
                .map_err(Into::into)
        } else {
            copy_into(&raw, &contigs).await
        };
        if let Err(e) = write {
            return ParsedOutput::failed(format!("cannot write contigs.fasta: {e}"));
        }

        let fasta = if is_gfa { gfa_to_fasta(&text) } else { text };
        let stats = fasta_stats(&fasta);
        if stats.num_contigs == 0 {
            return ParsedOutput::failed(format!(
                "{} assembly {} contains no sequences",
                spec.id,
                raw.display()
            ));
        }

        let mut parsed = ParsedOutput {
            success: true,
            metrics: stats.to_metrics(),
            ..Default::default()
        };
        let stats_path = stage_dir.join("assembly_stats.json");
        let doc = json!({ "assembler": spec.id, "stats": stats });
        if let Err(e) = write_json(&stats_path, &doc).await {
            parsed.errors.push(format!("cannot write assembly_stats.json: {e}"));
        } else {
            parsed.files.insert("stats".to_string(), stats_path);
        }
        parsed.files.insert("raw_output".to_string(), raw);
        parsed.files.insert("contigs".to_string(), contigs.clone());
        parsed.files.insert("assembly".to_string(), contigs);
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::lookup;

    #[tokio::test]
    async fn spades_contigs_are_kept_in_place() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("contigs.fasta"), ">NODE_1\nACGTACGTAA\n>NODE_2\nGGCC\n")
            .await
            .unwrap();

        let parsed = AssemblyParser.parse(dir.path(), lookup("spades").unwrap(), &[]).await;
        assert!(parsed.success);
        assert_eq!(parsed.metrics["num_contigs"], json!(2));
        assert_eq!(parsed.metrics["total_length"], json!(14));
        assert_eq!(parsed.files["assembly"], dir.path().join("contigs.fasta"));
        assert!(dir.path().join("assembly_stats.json").exists());
    }

    #[tokio::test]
    async fn flye_output_is_copied_to_contigs() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("assembly.fasta"), ">contig_1\nACGT\n")
            .await
            .unwrap();

        let parsed = AssemblyParser.parse(dir.path(), lookup("flye").unwrap(), &[]).await;
        assert!(parsed.success);
        let contigs = tokio::fs::read_to_string(dir.path().join("contigs.fasta")).await.unwrap();
        assert_eq!(contigs, ">contig_1\nACGT\n");
        assert_eq!(parsed.files["raw_output"], dir.path().join("assembly.fasta"));
    }

    #[tokio::test]
    async fn hifiasm_gfa_is_converted() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("mito.bp.p_ctg.gfa"), "S\tptg1\tACGTAC\n")
            .await
            .unwrap();

        let parsed = AssemblyParser.parse(dir.path(), lookup("hifiasm").unwrap(), &[]).await;
        assert!(parsed.success);
        let contigs = tokio::fs::read_to_string(dir.path().join("contigs.fasta")).await.unwrap();
        assert_eq!(contigs, ">ptg1\nACGTAC\n");
        assert_eq!(parsed.metrics["total_length"], json!(6));
    }

    #[tokio::test]
    async fn empty_assembly_fails() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("assembly.fasta"), "").await.unwrap();
        let parsed = AssemblyParser.parse(dir.path(), lookup("flye").unwrap(), &[]).await;
        assert!(!parsed.success);
        assert!(parsed.errors[0].contains("no sequences"));
    }
}
