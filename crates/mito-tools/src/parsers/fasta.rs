//! FASTA statistics and GFA segment extraction.

use std::collections::BTreeMap;

use mito_types::round_to;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FastaStats {
    pub num_contigs: usize,
    pub total_length: usize,
    pub largest_contig: usize,
    pub n50: usize,
    /// Percent G+C over unambiguous bases.
    pub gc_content: f64,
}

impl FastaStats {
    pub fn to_metrics(&self) -> BTreeMap<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        }
    }
}

pub fn fasta_stats(text: &str) -> FastaStats {
    let mut lengths = Vec::new();
    let mut gc = 0usize;
    let mut acgt = 0usize;
    let mut current: Option<usize> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('>') {
            if let Some(len) = current.take() {
                lengths.push(len);
            }
            current = Some(0);
        } else if let Some(len) = current.as_mut() {
            *len += line.len();
            for b in line.bytes() {
                match b.to_ascii_uppercase() {
                    b'G' | b'C' => {
                        gc += 1;
                        acgt += 1;
                    }
                    b'A' | b'T' => acgt += 1,
                    _ => {}
                }
            }
        }
    }
    if let Some(len) = current {
        lengths.push(len);
    }

    let total_length: usize = lengths.iter().sum();
    lengths.sort_unstable_by(|a, b| b.cmp(a));
    let mut running = 0;
    let mut n50 = 0;
    for len in &lengths {
        running += len;
        if running * 2 >= total_length {
            n50 = *len;
            break;
        }
    }

    FastaStats {
        num_contigs: lengths.len(),
        total_length,
        largest_contig: lengths.first().copied().unwrap_or(0),
        n50,
        gc_content: if acgt == 0 {
            0.0
        } else {
            round_to(gc as f64 * 100.0 / acgt as f64, 2)
        },
    }
}

/// Convert the `S` (segment) lines of a GFA file into FASTA records.
pub fn gfa_to_fasta(gfa: &str) -> String {
    let mut out = String::new();
    for line in gfa.lines() {
        let mut fields = line.split('\t');
        if fields.next() != Some("S") {
            continue;
        }
        if let (Some(name), Some(seq)) = (fields.next(), fields.next()) {
            if seq != "*" && !seq.is_empty() {
                out.push('>');
                out.push_str(name);
                out.push('\n');
                out.push_str(seq);
                out.push('\n');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_for_multi_record_fasta() {
        let text = ">c1\nAAAAGGGG\nCC\n>c2 desc\nATAT\n>c3\nGC\n";
        let stats = fasta_stats(text);
        assert_eq!(stats.num_contigs, 3);
        assert_eq!(stats.total_length, 16);
        assert_eq!(stats.largest_contig, 10);
        assert_eq!(stats.n50, 10);
        assert_eq!(stats.gc_content, 50.0);
    }

    #[test]
    fn n50_needs_half_the_length() {
        let stats = fasta_stats(">a\nAAAA\n>b\nAAAA\n>c\nAAAA\n>d\nAA\n");
        assert_eq!(stats.n50, 4);
    }

    #[test]
    fn empty_input() {
        let stats = fasta_stats("");
        assert_eq!(stats, FastaStats::default());
    }

    #[test]
    fn gfa_segments_become_records() {
        let gfa = "H\tVN:Z:1.0\nS\tptg1\tACGT\tLN:i:4\nL\tptg1\t+\tptg1\t+\t0M\nS\tptg2\t*\n";
        assert_eq!(gfa_to_fasta(gfa), ">ptg1\nACGT\n");
    }

    #[test]
    fn metrics_map_has_all_fields() {
        let metrics = fasta_stats(">a\nACGT\n").to_metrics();
        assert_eq!(metrics["num_contigs"], serde_json::json!(1));
        assert_eq!(metrics["gc_content"], serde_json::json!(50.0));
        assert_eq!(metrics.len(), 5);
    }
}
