//! Optional prompt augmentation (RAG) and per-agent memory.
//!
//! Both are injected: the RAG handle is shared read-only across agents, each
//! agent owns its memory. Failures in either are logged and ignored.

use async_trait::async_trait;
use mito_types::{MitoError, StageName};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub excerpt: String,
}

#[async_trait]
pub trait RagAdapter: Send + Sync {
    /// Return the prompt extended with retrieved context, plus what was cited.
    async fn augment(&self, prompt: &str, top_k: usize) -> Result<(String, Vec<Citation>), MitoError>;
}

/// No retrieval: prompts pass through unchanged.
pub struct NoRag;

#[async_trait]
impl RagAdapter for NoRag {
    async fn augment(&self, prompt: &str, _top_k: usize) -> Result<(String, Vec<Citation>), MitoError> {
        Ok((prompt.to_string(), Vec::new()))
    }
}

const SIMULATED_NOTES: &[(&str, &str)] = &[
    (
        "mitogenome-assembly-notes",
        "Animal mitogenomes are typically 15-18 kb and circular; expect 13 protein-coding genes, 22 tRNAs and 2 rRNAs.",
    ),
    (
        "plant-mitogenome-notes",
        "Plant mitogenomes range from 200 kb to over 2 Mb and often assemble as multiple contigs due to repeats.",
    ),
    (
        "read-qc-notes",
        "A Q30 rate above 0.85 is generally sufficient for organelle assembly from short reads.",
    ),
];

/// Canned retrieval used when `MITO_RAG_SIMULATE` is set.
pub struct SimulatedRag;

#[async_trait]
impl RagAdapter for SimulatedRag {
    async fn augment(&self, prompt: &str, top_k: usize) -> Result<(String, Vec<Citation>), MitoError> {
        let citations: Vec<Citation> = SIMULATED_NOTES
            .iter()
            .take(top_k)
            .map(|(source, excerpt)| Citation {
                source: source.to_string(),
                excerpt: excerpt.to_string(),
            })
            .collect();
        let mut augmented = prompt.to_string();
        if !citations.is_empty() {
            augmented.push_str("\n\nReference notes:\n");
            for c in &citations {
                augmented.push_str(&format!("- [{}] {}\n", c.source, c.excerpt));
            }
        }
        Ok((augmented, citations))
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub stage: StageName,
    pub tags: Vec<String>,
    pub content: String,
}

#[async_trait]
pub trait MemoryAdapter: Send + Sync {
    /// Most recent records sharing at least one tag.
    async fn query(&self, tags: &[String], top_k: usize) -> Result<Vec<MemoryRecord>, MitoError>;
    async fn write(&mut self, record: MemoryRecord) -> Result<(), MitoError>;
}

pub struct NoMemory;

#[async_trait]
impl MemoryAdapter for NoMemory {
    async fn query(&self, _tags: &[String], _top_k: usize) -> Result<Vec<MemoryRecord>, MitoError> {
        Ok(Vec::new())
    }

    async fn write(&mut self, _record: MemoryRecord) -> Result<(), MitoError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMemory {
    records: Vec<MemoryRecord>,
}

impl InMemoryMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl MemoryAdapter for InMemoryMemory {
    async fn query(&self, tags: &[String], top_k: usize) -> Result<Vec<MemoryRecord>, MitoError> {
        Ok(self
            .records
            .iter()
            .rev()
            .filter(|r| r.tags.iter().any(|t| tags.contains(t)))
            .take(top_k)
            .cloned()
            .collect())
    }

    async fn write(&mut self, record: MemoryRecord) -> Result<(), MitoError> {
        self.records.push(record);
        Ok(())
    }
}
