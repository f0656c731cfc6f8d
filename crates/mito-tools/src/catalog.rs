//! Known external tools: executable, argument template, output family,
//! adjustable parameters, and where their primary output lands.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mito_types::{Kingdom, SeqType};
use serde_json::Value;

use crate::runner::ToolCommand;

/// Parameters every tool accepts regardless of its allowlist.
pub const UNIVERSAL_PARAMS: &[&str] = &["threads", "timeout", "memory"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFamily {
    ReadQc,
    Assembly,
    Polish,
    Annotation,
}

/// Everything a template needs to build command lines.
#[derive(Debug, Clone)]
pub struct ToolContext<'a> {
    pub out_dir: &'a Path,
    pub reads: &'a Path,
    pub reads2: Option<&'a Path>,
    pub long_reads: Option<&'a Path>,
    pub assembly: Option<&'a Path>,
    pub seq_type: SeqType,
    pub kingdom: Kingdom,
    pub threads: u32,
    pub memory: &'a str,
    pub params: &'a BTreeMap<String, Value>,
}

impl ToolContext<'_> {
    /// The long-read file: explicit long reads, or the primary reads for long-read runs.
    pub fn long_read_file(&self) -> &Path {
        self.long_reads.unwrap_or(self.reads)
    }

    fn threads_arg(&self) -> String {
        self.threads.max(1).to_string()
    }

    fn out(&self) -> String {
        self.out_dir.display().to_string()
    }

    fn assembly_arg(&self) -> String {
        self.assembly
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }

    fn param_str(&self, key: &str) -> Option<String> {
        self.params.get(key).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// One executable invocation inside a tool's command sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub exe: String,
    pub args: Vec<String>,
}

impl Invocation {
    fn new(exe: &str) -> Self {
        Self {
            exe: exe.to_string(),
            args: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn path(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }
}

pub struct ToolSpec {
    pub id: &'static str,
    pub exe: &'static str,
    pub family: OutputFamily,
    /// Tool-specific keys the diagnoser may change.
    pub adjustable: &'static [&'static str],
    /// Globs, relative to the stage directory, for the primary output in preference order.
    pub outputs: &'static [&'static str],
    /// File name written in place of real output during dry runs.
    pub placeholder: &'static str,
    pub install_hint: &'static str,
    /// Completed outside the pipeline; the stage pauses instead of running.
    pub external: bool,
    build: fn(&ToolContext) -> Vec<Invocation>,
    setup: Option<fn(&ToolContext) -> Vec<(PathBuf, String)>>,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("id", &self.id)
            .field("exe", &self.exe)
            .field("family", &self.family)
            .finish()
    }
}

impl ToolSpec {
    pub fn invocations(&self, ctx: &ToolContext) -> Vec<Invocation> {
        (self.build)(ctx)
    }

    /// Command sequence for this tool, run in `ctx.out_dir`.
    pub fn commands(&self, ctx: &ToolContext, timeout: Duration) -> Vec<ToolCommand> {
        self.invocations(ctx)
            .into_iter()
            .map(|inv| {
                ToolCommand::new(inv.exe, ctx.out_dir)
                    .args(inv.args)
                    .timeout(timeout)
            })
            .collect()
    }

    /// Auxiliary files (for example config files) the tool expects before it runs.
    pub fn setup_files(&self, ctx: &ToolContext) -> Vec<(PathBuf, String)> {
        self.setup.map(|f| f(ctx)).unwrap_or_default()
    }

    pub fn is_adjustable(&self, key: &str) -> bool {
        UNIVERSAL_PARAMS.contains(&key) || self.adjustable.contains(&key)
    }

    /// Every executable the tool needs on the machine.
    pub fn executables(&self) -> Vec<&'static str> {
        match self.id {
            "racon" => vec!["minimap2", "racon"],
            "pilon" => vec!["bwa", "samtools", "pilon"],
            _ if self.external => Vec::new(),
            _ => vec![self.exe],
        }
    }
}

/// Look a tool up by id, case-insensitively.
pub fn lookup(id: &str) -> Option<&'static ToolSpec> {
    CATALOG.iter().find(|spec| spec.id.eq_ignore_ascii_case(id))
}

pub fn all() -> &'static [ToolSpec] {
    CATALOG
}

/// `-`-prefixed parameters rendered as flags: `true` → bare flag, `false` → omitted.
fn extra_flags(params: &BTreeMap<String, Value>) -> Vec<String> {
    let mut out = Vec::new();
    for (key, value) in params.iter().filter(|(k, _)| k.starts_with('-')) {
        match value {
            Value::Bool(true) => out.push(key.clone()),
            Value::Bool(false) | Value::Null => {}
            Value::String(s) => {
                out.push(key.clone());
                out.push(s.clone());
            }
            other => {
                out.push(key.clone());
                out.push(other.to_string());
            }
        }
    }
    out
}

/// Memory string such as `8G` or `16000M` in whole gigabytes, at least 1.
pub fn memory_gb(memory: &str) -> u32 {
    let trimmed = memory.trim().to_ascii_uppercase();
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    let value: u32 = digits.parse().unwrap_or(8);
    let gb = match trimmed.trim_start_matches(|c: char| c.is_ascii_digit()) {
        "M" | "MB" => value / 1024,
        "T" | "TB" => value * 1024,
        _ => value,
    };
    gb.max(1)
}

fn minimap2_preset(seq_type: SeqType) -> &'static str {
    match seq_type {
        SeqType::PacbioClr => "map-pb",
        SeqType::PacbioHifi => "map-hifi",
        _ => "map-ont",
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

fn fastp(ctx: &ToolContext) -> Vec<Invocation> {
    let mut inv = Invocation::new("fastp")
        .arg("-i")
        .path(ctx.reads)
        .args(["-o", "clean_R1.fastq.gz"]);
    if let Some(r2) = ctx.reads2 {
        inv = inv.arg("-I").path(r2).args(["-O", "clean_R2.fastq.gz"]);
    }
    vec![inv
        .args(["-j", "fastp.json", "-h", "fastp.html", "-w"])
        .arg(ctx.threads_arg())
        .args(extra_flags(ctx.params))]
}

fn fastqc(ctx: &ToolContext) -> Vec<Invocation> {
    let mut inv = Invocation::new("fastqc")
        .args(["-o".to_string(), ctx.out(), "-t".to_string(), ctx.threads_arg()])
        .args(extra_flags(ctx.params))
        .path(ctx.reads);
    if let Some(r2) = ctx.reads2 {
        inv = inv.path(r2);
    }
    vec![inv]
}

fn nanoqc(ctx: &ToolContext) -> Vec<Invocation> {
    vec![Invocation::new("nanoQC")
        .args(["-o".to_string(), ctx.out()])
        .args(extra_flags(ctx.params))
        .path(ctx.long_read_file())]
}

fn seqkit_stats(ctx: &ToolContext) -> Vec<Invocation> {
    let mut inv = Invocation::new("seqkit")
        .args(["stats", "-a", "-T", "-j"])
        .arg(ctx.threads_arg())
        .path(ctx.reads);
    if let Some(long) = ctx.long_reads {
        inv = inv.path(long);
    }
    vec![inv]
}

fn spades(ctx: &ToolContext) -> Vec<Invocation> {
    let mut inv = Invocation::new("spades.py");
    match ctx.reads2 {
        Some(r2) => inv = inv.arg("-1").path(ctx.reads).arg("-2").path(r2),
        None => inv = inv.arg("-s").path(ctx.reads),
    }
    if ctx.param_str("mode").as_deref() == Some("isolate") {
        inv = inv.arg("--isolate");
    }
    vec![inv
        .args(["-o".to_string(), ctx.out()])
        .args(["-t".to_string(), ctx.threads_arg()])
        .args(["-m".to_string(), memory_gb(ctx.memory).to_string()])
        .args(extra_flags(ctx.params))]
}

fn unicycler(ctx: &ToolContext) -> Vec<Invocation> {
    let mut inv = Invocation::new("unicycler");
    match ctx.reads2 {
        Some(r2) => inv = inv.arg("-1").path(ctx.reads).arg("-2").path(r2),
        None if !ctx.seq_type.is_long_read() => inv = inv.arg("-s").path(ctx.reads),
        None => {}
    }
    if let Some(long) = ctx.long_reads {
        inv = inv.arg("-l").path(long);
    } else if ctx.seq_type.is_long_read() {
        inv = inv.arg("-l").path(ctx.reads);
    }
    vec![inv
        .args(["-o".to_string(), ctx.out()])
        .args(["-t".to_string(), ctx.threads_arg()])
        .args(extra_flags(ctx.params))]
}

fn flye(ctx: &ToolContext) -> Vec<Invocation> {
    let mode_flag = match ctx.param_str("mode").as_deref() {
        Some("pacbio-raw") => "--pacbio-raw",
        Some("pacbio-hifi") => "--pacbio-hifi",
        Some("ont") => "--nano-raw",
        _ => match ctx.seq_type {
            SeqType::PacbioClr => "--pacbio-raw",
            SeqType::PacbioHifi => "--pacbio-hifi",
            _ => "--nano-raw",
        },
    };
    vec![Invocation::new("flye")
        .arg(mode_flag)
        .path(ctx.long_read_file())
        .args(["--out-dir".to_string(), ctx.out()])
        .args(["--threads".to_string(), ctx.threads_arg()])
        .args(extra_flags(ctx.params))]
}

fn canu(ctx: &ToolContext) -> Vec<Invocation> {
    let read_flag = match ctx.seq_type {
        SeqType::PacbioClr => "-pacbio",
        SeqType::PacbioHifi => "-pacbio-hifi",
        _ => "-nanopore",
    };
    let genome_size = ctx
        .param_str("genomeSize")
        .or_else(|| ctx.param_str("--genome-size"))
        .unwrap_or_else(|| "16k".to_string());
    let mut inv = Invocation::new("canu")
        .args(["-p", "mito", "-d"])
        .arg(ctx.out())
        .arg(format!("genomeSize={genome_size}"))
        .arg(format!("maxThreads={}", ctx.threads_arg()));
    for key in ["corOutCoverage", "minReadLength"] {
        if let Some(value) = ctx.param_str(key) {
            inv = inv.arg(format!("{key}={value}"));
        }
    }
    vec![inv.arg(read_flag).path(ctx.long_read_file())]
}

fn hifiasm(ctx: &ToolContext) -> Vec<Invocation> {
    vec![Invocation::new("hifiasm")
        .arg("-o")
        .arg(ctx.out_dir.join("mito").display().to_string())
        .args(["-t".to_string(), ctx.threads_arg()])
        .args(extra_flags(ctx.params))
        .path(ctx.long_read_file())]
}

fn mitoz(ctx: &ToolContext) -> Vec<Invocation> {
    let mut inv = Invocation::new("mitoz")
        .args(["assemble", "--outprefix", "mito", "--thread_number"])
        .arg(ctx.threads_arg())
        .arg("--fq1")
        .path(ctx.reads);
    if let Some(r2) = ctx.reads2 {
        inv = inv.arg("--fq2").path(r2);
    }
    let clade = ctx
        .param_str("--clade")
        .unwrap_or_else(|| "Chordata".to_string());
    let params: BTreeMap<String, Value> = ctx
        .params
        .iter()
        .filter(|(k, _)| k.as_str() != "--clade")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    vec![inv.args(["--clade".to_string(), clade]).args(extra_flags(&params))]
}

fn getorganelle(ctx: &ToolContext) -> Vec<Invocation> {
    let target = match ctx.kingdom {
        Kingdom::Animal => "animal_mt",
        Kingdom::Plant => "embplant_mt",
        Kingdom::Fungi => "fungus_mt",
    };
    let mut inv = Invocation::new("get_organelle_from_reads.py");
    match ctx.reads2 {
        Some(r2) => inv = inv.arg("-1").path(ctx.reads).arg("-2").path(r2),
        None => inv = inv.arg("-u").path(ctx.reads),
    }
    let mut params = ctx.params.clone();
    let target = params
        .remove("-F")
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| target.to_string());
    vec![inv
        .args(["-o".to_string(), ctx.out(), "-F".to_string(), target])
        .args(["-t".to_string(), ctx.threads_arg(), "--overwrite".to_string()])
        .args(extra_flags(&params))]
}

fn novoplasty(ctx: &ToolContext) -> Vec<Invocation> {
    vec![Invocation::new("NOVOPlasty.pl")
        .arg("-c")
        .arg(ctx.out_dir.join("novoplasty_config.txt").display().to_string())]
}

fn novoplasty_config(ctx: &ToolContext) -> Vec<(PathBuf, String)> {
    let kmer = ctx.param_str("kmer").unwrap_or_else(|| "33".to_string());
    let range = ctx
        .param_str("genome_range")
        .unwrap_or_else(|| "12000-22000".to_string());
    let reads2 = ctx
        .reads2
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let config = format!(
        "Project:\n-----------------------\nProject name = mito\nType = mito\nGenome Range = {range}\nK-mer = {kmer}\nMax memory = {mem}\nOutput path = {out}/\n\nDataset 1:\n-----------------------\nRead Length = 150\nInsert size = 300\nPlatform = illumina\nSingle/Paired = PE\nForward reads = {r1}\nReverse reads = {reads2}\n",
        mem = memory_gb(ctx.memory),
        out = ctx.out(),
        r1 = ctx.reads.display(),
    );
    vec![(ctx.out_dir.join("novoplasty_config.txt"), config)]
}

fn norgal(ctx: &ToolContext) -> Vec<Invocation> {
    let mut inv = Invocation::new("norgal.py").arg("-i").path(ctx.reads);
    if let Some(r2) = ctx.reads2 {
        inv = inv.path(r2);
    }
    vec![inv
        .args(["-o".to_string(), ctx.out_dir.join("norgal_out").display().to_string()])
        .args(["-t".to_string(), ctx.threads_arg()])
        .args(extra_flags(ctx.params))]
}

fn mitohifi(ctx: &ToolContext) -> Vec<Invocation> {
    vec![Invocation::new("mitohifi.py")
        .arg("-r")
        .path(ctx.long_read_file())
        .args(["-t".to_string(), ctx.threads_arg()])
        .args(extra_flags(ctx.params))]
}

fn pmat(ctx: &ToolContext) -> Vec<Invocation> {
    vec![Invocation::new("PMAT")
        .args(["autoMito", "-i"])
        .path(ctx.long_read_file())
        .args(["-o".to_string(), ctx.out()])
        .args(["-st", "hifi", "-g", "500m", "-m", "-cpu"])
        .arg(ctx.threads_arg())
        .args(extra_flags(ctx.params))]
}

fn racon(ctx: &ToolContext) -> Vec<Invocation> {
    let assembly = ctx.assembly_arg();
    let reads = ctx.long_read_file().display().to_string();
    vec![
        Invocation::new("minimap2")
            .args(["-t".to_string(), ctx.threads_arg()])
            .args(["-x", minimap2_preset(ctx.seq_type)])
            .args([assembly.clone(), reads.clone()]),
        Invocation::new("racon")
            .args(["-t".to_string(), ctx.threads_arg()])
            .args(extra_flags(ctx.params))
            .args([
                reads,
                ctx.out_dir.join("minimap2.stdout.log").display().to_string(),
                assembly,
            ]),
    ]
}

fn medaka(ctx: &ToolContext) -> Vec<Invocation> {
    vec![Invocation::new("medaka_consensus")
        .arg("-i")
        .path(ctx.long_read_file())
        .args(["-d".to_string(), ctx.assembly_arg()])
        .args(["-o".to_string(), ctx.out()])
        .args(["-t".to_string(), ctx.threads_arg()])
        .args(extra_flags(ctx.params))]
}

fn pilon(ctx: &ToolContext) -> Vec<Invocation> {
    let assembly = ctx.assembly_arg();
    let sam = ctx.out_dir.join("bwa.stdout.log").display().to_string();
    let bam = ctx.out_dir.join("aligned.bam").display().to_string();
    let mut mem = Invocation::new("bwa")
        .args(["mem", "-t"])
        .arg(ctx.threads_arg())
        .arg(assembly.clone())
        .path(ctx.reads);
    if let Some(r2) = ctx.reads2 {
        mem = mem.path(r2);
    }
    vec![
        Invocation::new("bwa").args(["index".to_string(), assembly.clone()]),
        mem,
        Invocation::new("samtools")
            .args(["sort", "-@"])
            .arg(ctx.threads_arg())
            .args(["-o".to_string(), bam.clone(), sam]),
        Invocation::new("samtools").args(["index".to_string(), bam.clone()]),
        Invocation::new("pilon")
            .args(["--genome".to_string(), assembly, "--frags".to_string(), bam])
            .args(["--output", "pilon_polished", "--outdir"])
            .arg(ctx.out())
            .args(["--threads".to_string(), ctx.threads_arg()])
            .args(extra_flags(ctx.params)),
    ]
}

fn mitos(ctx: &ToolContext) -> Vec<Invocation> {
    let code = ctx.param_str("-c").unwrap_or_else(|| match ctx.kingdom {
        Kingdom::Animal => "2".to_string(),
        Kingdom::Plant => "1".to_string(),
        Kingdom::Fungi => "4".to_string(),
    });
    let params: BTreeMap<String, Value> = ctx
        .params
        .iter()
        .filter(|(k, _)| k.as_str() != "-c")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    vec![Invocation::new("runmitos.py")
        .args(["-i".to_string(), ctx.assembly_arg()])
        .args(["-c".to_string(), code])
        .args(["-o".to_string(), ctx.out()])
        .args(extra_flags(&params))]
}

fn no_commands(_ctx: &ToolContext) -> Vec<Invocation> {
    Vec::new()
}

static CATALOG: &[ToolSpec] = &[
    // --- read QC ---
    ToolSpec {
        id: "fastp",
        exe: "fastp",
        family: OutputFamily::ReadQc,
        adjustable: &["--qualified_quality_phred", "--length_required", "--cut_front", "--cut_tail", "--detect_adapter_for_pe"],
        outputs: &["fastp.json"],
        placeholder: "fastp.json",
        install_hint: "conda install -c bioconda fastp",
        external: false,
        build: fastp,
        setup: None,
    },
    ToolSpec {
        id: "fastqc",
        exe: "fastqc",
        family: OutputFamily::ReadQc,
        adjustable: &["--nogroup", "--kmers"],
        outputs: &["*_fastqc.html"],
        placeholder: "reads_fastqc.html",
        install_hint: "conda install -c bioconda fastqc",
        external: false,
        build: fastqc,
        setup: None,
    },
    ToolSpec {
        id: "nanoqc",
        exe: "nanoQC",
        family: OutputFamily::ReadQc,
        adjustable: &["--minlen"],
        outputs: &["nanoQC.html"],
        placeholder: "nanoQC.html",
        install_hint: "conda install -c bioconda nanoqc",
        external: false,
        build: nanoqc,
        setup: None,
    },
    ToolSpec {
        id: "basic_stats",
        exe: "seqkit",
        family: OutputFamily::ReadQc,
        adjustable: &[],
        outputs: &["seqkit.stdout.log"],
        placeholder: "seqkit.stdout.log",
        install_hint: "conda install -c bioconda seqkit",
        external: false,
        build: seqkit_stats,
        setup: None,
    },
    ToolSpec {
        id: "longread_stats",
        exe: "seqkit",
        family: OutputFamily::ReadQc,
        adjustable: &[],
        outputs: &["seqkit.stdout.log"],
        placeholder: "seqkit.stdout.log",
        install_hint: "conda install -c bioconda seqkit",
        external: false,
        build: seqkit_stats,
        setup: None,
    },
    // --- assemblers ---
    ToolSpec {
        id: "spades",
        exe: "spades.py",
        family: OutputFamily::Assembly,
        adjustable: &["--careful", "--cov-cutoff", "-k", "--only-assembler", "mode"],
        outputs: &["contigs.fasta", "scaffolds.fasta"],
        placeholder: "contigs.fasta",
        install_hint: "conda install -c bioconda spades",
        external: false,
        build: spades,
        setup: None,
    },
    ToolSpec {
        id: "unicycler",
        exe: "unicycler",
        family: OutputFamily::Assembly,
        adjustable: &["--mode", "--min_fasta_length", "--keep"],
        outputs: &["assembly.fasta"],
        placeholder: "assembly.fasta",
        install_hint: "conda install -c bioconda unicycler",
        external: false,
        build: unicycler,
        setup: None,
    },
    ToolSpec {
        id: "flye",
        exe: "flye",
        family: OutputFamily::Assembly,
        adjustable: &["--genome-size", "--iterations", "--min-overlap", "--meta", "--asm-coverage", "mode"],
        outputs: &["assembly.fasta"],
        placeholder: "assembly.fasta",
        install_hint: "conda install -c bioconda flye",
        external: false,
        build: flye,
        setup: None,
    },
    ToolSpec {
        id: "canu",
        exe: "canu",
        family: OutputFamily::Assembly,
        adjustable: &["genomeSize", "corOutCoverage", "minReadLength", "--genome-size"],
        outputs: &["mito.contigs.fasta"],
        placeholder: "mito.contigs.fasta",
        install_hint: "conda install -c bioconda canu",
        external: false,
        build: canu,
        setup: None,
    },
    ToolSpec {
        id: "hifiasm",
        exe: "hifiasm",
        family: OutputFamily::Assembly,
        adjustable: &["-l", "-f", "--primary"],
        outputs: &["mito.bp.p_ctg.gfa", "*.p_ctg.gfa"],
        placeholder: "mito.bp.p_ctg.gfa",
        install_hint: "conda install -c bioconda hifiasm",
        external: false,
        build: hifiasm,
        setup: None,
    },
    ToolSpec {
        id: "mitoz",
        exe: "mitoz",
        family: OutputFamily::Assembly,
        adjustable: &["--clade", "--genetic_code", "--requiring_taxa"],
        outputs: &["mito.result/*.fasta", "**/*mitogenome.fa", "**/*.fasta"],
        placeholder: "mito.fasta",
        install_hint: "conda install -c bioconda mitoz",
        external: false,
        build: mitoz,
        setup: None,
    },
    ToolSpec {
        id: "getorganelle",
        exe: "get_organelle_from_reads.py",
        family: OutputFamily::Assembly,
        adjustable: &["-R", "-k", "-F", "--max-reads"],
        outputs: &["*.path_sequence.fasta", "*.fasta"],
        placeholder: "mito.path_sequence.fasta",
        install_hint: "conda install -c bioconda getorganelle",
        external: false,
        build: getorganelle,
        setup: None,
    },
    ToolSpec {
        id: "novoplasty",
        exe: "NOVOPlasty.pl",
        family: OutputFamily::Assembly,
        adjustable: &["kmer", "genome_range"],
        outputs: &["Circularized_assembly_*.fasta", "Option_*.fasta", "Contigs_*.fasta"],
        placeholder: "Circularized_assembly_1_mito.fasta",
        install_hint: "conda install -c bioconda novoplasty",
        external: false,
        build: novoplasty,
        setup: Some(novoplasty_config),
    },
    ToolSpec {
        id: "norgal",
        exe: "norgal.py",
        family: OutputFamily::Assembly,
        adjustable: &["-b", "--blast"],
        outputs: &["norgal_out/circular.candidate.fa", "norgal_out/*.fa"],
        placeholder: "norgal_out/circular.candidate.fa",
        install_hint: "pip install norgal",
        external: false,
        build: norgal,
        setup: None,
    },
    ToolSpec {
        id: "mitohifi",
        exe: "mitohifi.py",
        family: OutputFamily::Assembly,
        adjustable: &["-o", "-a", "-f", "-g"],
        outputs: &["final_mitogenome.fasta"],
        placeholder: "final_mitogenome.fasta",
        install_hint: "docker pull ghcr.io/marcelauliano/mitohifi:master",
        external: false,
        build: mitohifi,
        setup: None,
    },
    ToolSpec {
        id: "pmat",
        exe: "PMAT",
        family: OutputFamily::Assembly,
        adjustable: &["-tp", "-cs", "-fc"],
        outputs: &["gfa_result/*.fa", "**/*.fasta"],
        placeholder: "gfa_result/PMAT_mt_master.fa",
        install_hint: "see https://github.com/bichangwei/PMAT",
        external: false,
        build: pmat,
        setup: None,
    },
    // --- polishers ---
    ToolSpec {
        id: "racon",
        exe: "racon",
        family: OutputFamily::Polish,
        adjustable: &["-m", "-x", "-g", "-w"],
        outputs: &["racon.stdout.log"],
        placeholder: "racon.stdout.log",
        install_hint: "conda install -c bioconda racon minimap2",
        external: false,
        build: racon,
        setup: None,
    },
    ToolSpec {
        id: "medaka",
        exe: "medaka_consensus",
        family: OutputFamily::Polish,
        adjustable: &["-m"],
        outputs: &["consensus.fasta"],
        placeholder: "consensus.fasta",
        install_hint: "conda install -c bioconda medaka",
        external: false,
        build: medaka,
        setup: None,
    },
    ToolSpec {
        id: "pilon",
        exe: "pilon",
        family: OutputFamily::Polish,
        adjustable: &["--fix", "--mindepth", "--changes"],
        outputs: &["pilon_polished.fasta"],
        placeholder: "pilon_polished.fasta",
        install_hint: "conda install -c bioconda pilon bwa samtools",
        external: false,
        build: pilon,
        setup: None,
    },
    // --- annotation ---
    ToolSpec {
        id: "mitos",
        exe: "runmitos.py",
        family: OutputFamily::Annotation,
        adjustable: &["-c", "--refseqver", "--best"],
        outputs: &["result.gff", "**/result.gff", "*.gff"],
        placeholder: "result.gff",
        install_hint: "conda install -c bioconda mitos",
        external: false,
        build: mitos,
        setup: None,
    },
    ToolSpec {
        id: "geseq",
        exe: "geseq",
        family: OutputFamily::Annotation,
        adjustable: &["--kingdom", "--genetic-code"],
        outputs: &["annotation.gbk"],
        placeholder: "annotation.gbk",
        install_hint: "web service: https://chlorobox.mpimp-golm.mpg.de/geseq.html",
        external: true,
        build: no_commands,
        setup: None,
    },
];
