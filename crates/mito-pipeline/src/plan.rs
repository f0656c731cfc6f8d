//! Tool-plan resolution: (sequencing type, kingdom, input formats) → ordered
//! QC tools, assembler with fallback candidates, and polishers.

use std::collections::BTreeMap;
use std::path::Path;

use mito_types::{
    AssemblerChoice, InputFormat, Kingdom, PipelineInputs, PlanCandidates, PlanExtras, PlanHints, SeqType, ToolPlan,
};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
struct Signals {
    short: bool,
    ont: bool,
    hifi: bool,
    clr: bool,
}

impl Signals {
    fn of(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        // hints only count as whole name tokens: `control_R1` is not ONT
        let tokens: Vec<&str> = name
            .split(|c: char| matches!(c, '_' | '.' | '-' | ' '))
            .filter(|t| !t.is_empty())
            .collect();
        let has = |words: &[&str]| tokens.iter().any(|t| words.contains(t));
        Self {
            short: has(&["r1", "r2", "1", "2"]),
            ont: has(&["ont", "nanopore"]),
            hifi: has(&["hifi", "ccs"]),
            clr: has(&["clr"]),
        }
    }

    fn long(&self) -> bool {
        self.ont || self.hifi || self.clr
    }
}

/// Guess the sequencing technology from file names alone.
///
/// Hybrid requires one file that only looks like short reads and another that
/// looks like long reads. Otherwise a long-read signal wins (ont, then HiFi,
/// then CLR) and illumina is the default.
pub fn detect_seq_type(paths: &[&Path]) -> SeqType {
    let signals: Vec<Signals> = paths.iter().map(|p| Signals::of(p)).collect();
    let has_short_file = signals.iter().any(|s| s.short && !s.long());
    let has_long_file = signals.iter().any(Signals::long);
    if has_short_file && has_long_file && paths.len() > 1 {
        return SeqType::Hybrid;
    }
    if signals.iter().any(|s| s.ont) {
        SeqType::Ont
    } else if signals.iter().any(|s| s.hifi) {
        SeqType::PacbioHifi
    } else if signals.iter().any(|s| s.clr) {
        SeqType::PacbioClr
    } else {
        SeqType::Illumina
    }
}

/// Formats present among `paths`, by extension (compression suffix ignored).
pub fn detect_input_formats(paths: &[&Path]) -> Vec<InputFormat> {
    let mut formats = Vec::new();
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        let format = if name.ends_with(".fastq") || name.ends_with(".fq") {
            Some(InputFormat::Fastq)
        } else if name.ends_with(".fasta") || name.ends_with(".fa") || name.ends_with(".fna") {
            Some(InputFormat::Fasta)
        } else if name.ends_with(".bam") {
            Some(InputFormat::Bam)
        } else {
            None
        };
        if let Some(format) = format {
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
    }
    formats.sort();
    formats
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn specialists(kingdom: Kingdom) -> &'static [&'static str] {
    match kingdom {
        Kingdom::Animal => &["mitoz", "getorganelle", "novoplasty"],
        Kingdom::Plant => &["getorganelle", "novoplasty"],
        Kingdom::Fungi => &["norgal", "novoplasty"],
    }
}

fn hifi_specialists(kingdom: Kingdom) -> &'static [&'static str] {
    match kingdom {
        Kingdom::Animal => &["mitohifi"],
        Kingdom::Plant => &["pmat"],
        Kingdom::Fungi => &[],
    }
}

/// Resolve the tool plan. `hints` keys starting with `-` become assembler params.
pub fn resolve_plan(
    seq_type: SeqType,
    kingdom: Kingdom,
    input_formats: &[InputFormat],
    hints: &BTreeMap<String, Value>,
) -> ToolPlan {
    let mut warnings = Vec::new();
    let seq_type = if seq_type == SeqType::Auto {
        warnings.push("sequencing type was not resolved before planning; assuming illumina".to_string());
        SeqType::Illumina
    } else {
        seq_type
    };

    let (qc, assembler, mode, fallbacks, extra_specialists, polishers): (
        &[&str],
        &str,
        Option<&str>,
        &[&str],
        &[&str],
        &[&str],
    ) = match seq_type {
        SeqType::Illumina | SeqType::Auto => (
            &["fastp", "fastqc"],
            "spades",
            Some("isolate"),
            &["unicycler"],
            specialists(kingdom),
            &["pilon"],
        ),
        SeqType::Ont => (&["nanoqc"], "flye", Some("ont"), &["canu"], &[], &["racon", "medaka"]),
        SeqType::PacbioHifi => (&["basic_stats"], "hifiasm", None, &["flye"], hifi_specialists(kingdom), &[]),
        SeqType::PacbioClr => (
            &["basic_stats"],
            "flye",
            Some("pacbio-raw"),
            &["canu"],
            &[],
            &["racon", "racon"],
        ),
        SeqType::Hybrid => (&["fastp", "longread_stats"], "unicycler", None, &["spades"], &[], &["racon", "pilon"]),
    };

    let mut candidates = vec![assembler.to_string()];
    for tool in fallbacks.iter().chain(extra_specialists) {
        if !candidates.iter().any(|c| c == tool) {
            candidates.push(tool.to_string());
        }
    }

    let mut params = BTreeMap::new();
    if let Some(mode) = mode {
        params.insert("mode".to_string(), json!(mode));
    }
    for (key, value) in hints.iter().filter(|(k, _)| k.starts_with('-')) {
        params.insert(key.clone(), value.clone());
    }

    let mut extras = PlanExtras::default();
    if input_formats.contains(&InputFormat::Bam) {
        extras.baiting_tools = strings(&["mitobim", "arc"]);
    }
    if input_formats.contains(&InputFormat::Fasta) {
        extras.mappers = strings(&["minimap2"]);
    }

    ToolPlan {
        qc: strings(qc),
        assembler: AssemblerChoice {
            name: assembler.to_string(),
            params,
        },
        polishers: strings(polishers),
        candidates: PlanCandidates {
            qc: strings(qc),
            assembler: candidates,
            polishers: strings(polishers),
        },
        extras,
        hints: PlanHints {
            kingdom,
            seq_type,
            input_formats: input_formats.to_vec(),
        },
        warnings,
    }
}

/// Detect (unless `seq_type` is given) and resolve in one step.
pub fn plan_for_inputs(inputs: &PipelineInputs, seq_type: SeqType) -> ToolPlan {
    let paths = inputs.read_paths();
    let seq_type = if seq_type == SeqType::Auto {
        detect_seq_type(&paths)
    } else {
        seq_type
    };
    resolve_plan(seq_type, inputs.kingdom, &detect_input_formats(&paths), &inputs.hints)
}
