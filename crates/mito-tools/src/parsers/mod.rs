//! Uniform output adapters: tool output on disk → `{success, files, metrics, errors}`.

mod annotation;
mod assembly;
pub mod fasta;
mod genbank;
mod polish;
mod read_qc;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use globset::{GlobBuilder, GlobSetBuilder};
use mito_types::{MitoError, Result, StageOutput};
use serde_json::Value;

use crate::catalog::{OutputFamily, ToolSpec};
use crate::runner::ToolRun;

pub use annotation::AnnotationParser;
pub use assembly::AssemblyParser;
pub use genbank::{summarize_genbank, GenBankSummary};
pub use polish::PolishParser;
pub use read_qc::ReadQcParser;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOutput {
    pub success: bool,
    pub files: BTreeMap<String, PathBuf>,
    pub metrics: BTreeMap<String, Value>,
    pub errors: Vec<String>,
}

impl ParsedOutput {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: vec![message.into()],
            ..Default::default()
        }
    }

    pub fn into_stage_output(self, tool: &str) -> StageOutput {
        StageOutput {
            files: self.files,
            metrics: self.metrics,
            ai_analysis: None,
            tool: Some(tool.to_string()),
        }
    }
}

#[async_trait]
pub trait OutputParser: Send + Sync {
    /// Inspect `stage_dir` after `runs` finished and normalize what the tool produced.
    async fn parse(&self, stage_dir: &Path, spec: &ToolSpec, runs: &[ToolRun]) -> ParsedOutput;
}

/// Parser for a tool family.
pub fn parser_for(family: OutputFamily) -> Box<dyn OutputParser> {
    match family {
        OutputFamily::ReadQc => Box::new(ReadQcParser),
        OutputFamily::Assembly => Box::new(AssemblyParser),
        OutputFamily::Polish => Box::new(PolishParser),
        OutputFamily::Annotation => Box::new(AnnotationParser),
    }
}

/// First file under `dir` matching any of `patterns`, tried in order.
pub async fn find_output(dir: &Path, patterns: &[&str]) -> Result<Option<PathBuf>> {
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(None);
    }
    let mut files = Vec::new();
    collect_files(dir, &mut files).await?;
    files.sort();

    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| MitoError::Other(format!("bad output pattern {pattern}: {e}")))?;
        let mut builder = GlobSetBuilder::new();
        builder.add(glob);
        let set = builder
            .build()
            .map_err(|e| MitoError::Other(format!("bad output pattern {pattern}: {e}")))?;
        let hit = files.iter().find(|path| {
            path.strip_prefix(dir)
                .map(|rel| set.is_match(rel))
                .unwrap_or(false)
        });
        if let Some(hit) = hit {
            return Ok(Some(hit.clone()));
        }
    }
    Ok(None)
}

async fn collect_files(current: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let meta = tokio::fs::metadata(current).await?;
    if meta.is_file() {
        files.push(current.to_path_buf());
    } else if meta.is_dir() {
        let mut read_dir = tokio::fs::read_dir(current).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            Box::pin(collect_files(&entry.path(), files)).await?;
        }
    }
    Ok(())
}

/// Copy `src` to `dest` unless they are the same file.
pub(crate) async fn copy_into(src: &Path, dest: &Path) -> Result<()> {
    if src != dest {
        tokio::fs::copy(src, dest).await?;
    }
    Ok(())
}

pub(crate) async fn write_json(path: &Path, value: &Value) -> Result<()> {
    tokio::fs::write(path, serde_json::to_string_pretty(value)?).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Dry-run placeholders
// ---------------------------------------------------------------------------

const PLACEHOLDER_SEQUENCE: &str = "ATGCGTACGTTAGCCGATCGGCTAAGCTTAGCGGCCGATATCGCGTAACGTACG";

const PLACEHOLDER_FASTP: &str = r#"{
  "summary": {
    "before_filtering": {"total_reads": 0, "total_bases": 0, "q30_rate": 0.0, "gc_content": 0.0},
    "after_filtering": {"total_reads": 0, "total_bases": 0, "q30_rate": 0.0, "gc_content": 0.0}
  }
}
"#;

const PLACEHOLDER_SEQKIT: &str = "file\tformat\ttype\tnum_seqs\tsum_len\tmin_len\tavg_len\tmax_len\tN50\tQ30(%)\n\
placeholder.fastq\tFASTQ\tDNA\t0\t0\t0\t0.0\t0\t0\t0.00\n";

const PLACEHOLDER_GFF: &str = "##gff-version 3\n\
placeholder\tdry-run\tgene\t1\t54\t.\t+\t.\tID=gene_cox1;Name=cox1\n\
placeholder\tdry-run\tCDS\t1\t54\t.\t+\t0\tParent=gene_cox1\n";

/// Write the stand-in primary output for a tool that did not really run.
pub async fn write_placeholder(spec: &ToolSpec, stage_dir: &Path) -> Result<PathBuf> {
    let path = stage_dir.join(spec.placeholder);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = match (spec.family, spec.placeholder.rsplit('.').next()) {
        (OutputFamily::ReadQc, Some("json")) => PLACEHOLDER_FASTP.to_string(),
        (OutputFamily::ReadQc, Some("html")) => "<html><body>dry-run</body></html>\n".to_string(),
        (OutputFamily::ReadQc, _) => PLACEHOLDER_SEQKIT.to_string(),
        (OutputFamily::Assembly, Some("gfa")) => {
            format!("H\tVN:Z:1.0\nS\tptg000001l\t{PLACEHOLDER_SEQUENCE}\n")
        }
        (OutputFamily::Annotation, Some("gbk")) => String::new(),
        (OutputFamily::Annotation, _) => PLACEHOLDER_GFF.to_string(),
        _ => format!(">contig_1 dry-run placeholder\n{PLACEHOLDER_SEQUENCE}\n"),
    };
    tokio::fs::write(&path, content).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::lookup;

    #[tokio::test]
    async fn find_output_respects_pattern_order() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("scaffolds.fasta"), ">a\nA\n").await.unwrap();
        tokio::fs::write(dir.path().join("contigs.fasta"), ">a\nA\n").await.unwrap();

        let found = find_output(dir.path(), &["contigs.fasta", "scaffolds.fasta"])
            .await
            .unwrap();
        assert_eq!(found, Some(dir.path().join("contigs.fasta")));
    }

    #[tokio::test]
    async fn find_output_searches_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("mito.result");
        tokio::fs::create_dir_all(&nested).await.unwrap();
        tokio::fs::write(nested.join("sample.fasta"), ">a\nA\n").await.unwrap();

        assert_eq!(find_output(dir.path(), &["*.fasta"]).await.unwrap(), None);
        let found = find_output(dir.path(), &["**/*.fasta"]).await.unwrap();
        assert_eq!(found, Some(nested.join("sample.fasta")));
    }

    #[tokio::test]
    async fn find_output_in_missing_dir_is_none() {
        let found = find_output(Path::new("/nonexistent/mito"), &["*"]).await.unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn placeholders_parse_successfully() {
        for id in ["fastp", "basic_stats", "spades", "hifiasm", "racon", "mitos"] {
            let dir = tempfile::tempdir().unwrap();
            let spec = lookup(id).unwrap();
            write_placeholder(spec, dir.path()).await.unwrap();
            let parsed = parser_for(spec.family).parse(dir.path(), spec, &[]).await;
            assert!(parsed.success, "{id}: {:?}", parsed.errors);
        }
    }
}
