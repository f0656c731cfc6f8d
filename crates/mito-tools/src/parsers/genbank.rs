use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Feature counts from a GenBank flat file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenBankSummary {
    pub locus: Option<String>,
    pub length: Option<u64>,
    pub genes: u64,
    pub cds: u64,
    pub trna: u64,
    pub rrna: u64,
    pub total_features: u64,
}

impl GenBankSummary {
    pub fn to_metrics(&self) -> BTreeMap<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .collect(),
            _ => BTreeMap::new(),
        }
    }
}

pub fn summarize_genbank(text: &str) -> GenBankSummary {
    let mut summary = GenBankSummary::default();
    let mut in_features = false;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("LOCUS") {
            let mut fields = rest.split_whitespace();
            summary.locus = fields.next().map(String::from);
            summary.length = fields.next().and_then(|n| n.parse().ok());
            continue;
        }
        if line.starts_with("FEATURES") {
            in_features = true;
            continue;
        }
        if line.starts_with("ORIGIN") || line.starts_with("//") {
            in_features = false;
            continue;
        }
        if !in_features {
            continue;
        }
        // Feature keys sit at column 6; qualifiers are indented further.
        if line.len() > 5 && line.starts_with("     ") && !line[5..].starts_with(' ') {
            let key = line[5..].split_whitespace().next().unwrap_or_default();
            summary.total_features += 1;
            match key {
                "gene" => summary.genes += 1,
                "CDS" => summary.cds += 1,
                "tRNA" => summary.trna += 1,
                "rRNA" => summary.rrna += 1,
                _ => {}
            }
        }
    }
    summary
}
