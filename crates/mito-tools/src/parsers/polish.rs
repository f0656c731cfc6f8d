use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use super::fasta::fasta_stats;
use super::{copy_into, find_output, OutputParser, ParsedOutput};
use crate::catalog::ToolSpec;
use crate::runner::ToolRun;

/// One polishing round: the tool's consensus becomes `polished.fasta` in the round directory.
pub struct PolishParser;

#[async_trait]
impl OutputParser for PolishParser {
    async fn parse(&self, round_dir: &Path, spec: &ToolSpec, _runs: &[ToolRun]) -> ParsedOutput {
        let raw = match find_output(round_dir, spec.outputs).await {
            Ok(Some(path)) => path,
            Ok(None) => return ParsedOutput::failed(format!("{} produced no consensus", spec.id)),
            Err(e) => return ParsedOutput::failed(e.to_string()),
        };
        let text = tokio::fs::read_to_string(&raw).await.unwrap_or_default();
        let stats = fasta_stats(&text);
        if stats.num_contigs == 0 {
            return ParsedOutput::failed(format!(
                "{} consensus {} contains no sequences",
                spec.id,
                raw.display()
            ));
        }

        let polished = round_dir.join("polished.fasta");
        if let Err(e) = copy_into(&raw, &polished).await {
            return ParsedOutput::failed(format!("cannot write polished.fasta: {e}"));
        }

        let mut parsed = ParsedOutput {
            success: true,
            metrics: stats.to_metrics(),
            ..Default::default()
        };
        parsed.metrics.insert("polisher".to_string(), json!(spec.id));
        parsed.files.insert("polished".to_string(), polished);
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::lookup;

    #[tokio::test]
    async fn racon_stdout_becomes_polished_fasta() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("racon.stdout.log"), ">ctg1\nACGTTGCA\n")
            .await
            .unwrap();

        let parsed = PolishParser.parse(dir.path(), lookup("racon").unwrap(), &[]).await;
        assert!(parsed.success);
        assert_eq!(parsed.metrics["total_length"], json!(8));
        assert_eq!(parsed.files["polished"], dir.path().join("polished.fasta"));
    }

    #[tokio::test]
    async fn non_fasta_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("consensus.fasta"), "garbage\n").await.unwrap();
        let parsed = PolishParser.parse(dir.path(), lookup("medaka").unwrap(), &[]).await;
        assert!(!parsed.success);
    }
}
