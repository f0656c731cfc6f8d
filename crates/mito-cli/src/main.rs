//! CLI binary for running, resuming, and inspecting Mito-Forge pipelines.

mod doctor;
mod messages;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mito_agent::{AgentDeps, AgentEvent, AgentEventKind, LlmDiagnoser, SimulatedRag, Simulation, GUIDANCE_FILE};
use mito_pipeline::{
    build_summary, load_checkpoint, progress, resume, search_dirs, PipelineEvent, PipelineExecutor, RunOutcome,
    Settings, CHECKPOINT_FILE, PROJECT_REGISTRY,
};
use mito_tools::{CancelToken, ProcessRunner, ToolRegistry};
use mito_types::{
    DetailLevel, ErrorRecord, Kingdom, MitoError, PipelineInputs, PipelineState, SeqType, StageName, StageStatus,
};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use messages::{text, Lang, Msg};

/// Bad arguments or unusable inputs.
const EXIT_USAGE: i32 = 2;
/// `doctor` found tools that are still missing.
const EXIT_TOOLS_MISSING: i32 = 127;

#[derive(Parser)]
#[command(name = "mito", version, about = "Self-healing mitochondrial genome assembly pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run QC, assembly, polishing, annotation, and the report
    Pipeline(PipelineArgs),

    /// Show the progress recorded in a checkpoint
    Status {
        /// Path to checkpoint.json
        #[arg(long)]
        checkpoint: PathBuf,
    },

    /// Continue a run paused for manual annotation
    Resume {
        /// Task id printed when the run paused
        task_id: String,

        /// GenBank file produced by the annotation service
        #[arg(long)]
        annotation: PathBuf,

        /// Directory holding the paused checkpoint (searched first)
        #[arg(short, long)]
        workdir: Option<PathBuf>,

        /// Settings file (TOML, or JSON by extension)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Check that the external tools can be found
    Doctor {
        /// Comma-separated tool ids or executable names (default: the whole catalog)
        #[arg(long)]
        tools: Option<String>,

        /// Search conda and project tool directories and register what is found
        #[arg(long)]
        fix: bool,

        /// Settings file (TOML, or JSON by extension)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct PipelineArgs {
    /// Short reads (R1), or the only read file
    #[arg(long, required_unless_present = "resume")]
    reads: Option<PathBuf>,

    /// Mate file (R2) for paired short reads
    #[arg(long)]
    reads2: Option<PathBuf>,

    /// Long reads for hybrid runs
    #[arg(long)]
    long_reads: Option<PathBuf>,

    /// Working directory for stage outputs and the checkpoint
    #[arg(short, long, required_unless_present = "resume")]
    output: Option<PathBuf>,

    /// illumina, ont, pacbio-hifi, pacbio-clr, hybrid, or auto
    #[arg(long)]
    seq_type: Option<SeqType>,

    /// animal, plant, or fungi
    #[arg(long)]
    kingdom: Option<Kingdom>,

    /// Species name for the report
    #[arg(long)]
    species: Option<String>,

    /// Threads per tool
    #[arg(short, long)]
    threads: Option<u32>,

    /// Settings file (TOML, or JSON by extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Continue from an existing checkpoint.json
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Allow stages that need a human step (GeSeq for plants)
    #[arg(long)]
    interactive: bool,

    /// Annotation tool (mitos, geseq)
    #[arg(long)]
    annotator: Option<String>,

    /// Don't start external tools; write placeholder outputs
    #[arg(long)]
    dry_run: bool,

    /// quick, detailed, or expert log excerpts in diagnostics
    #[arg(long)]
    detail_level: Option<DetailLevel>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // --verbose wins over MITO_LOG
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("MITO_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let lang = Lang::from_env();
    let result = match cli.command {
        Commands::Pipeline(args) => cmd_pipeline(args, lang).await,
        Commands::Status { checkpoint } => cmd_status(&checkpoint, lang).await,
        Commands::Resume {
            task_id,
            annotation,
            workdir,
            config,
        } => cmd_resume(&task_id, &annotation, workdir.as_deref(), config.as_deref(), lang).await,
        Commands::Doctor { tools, fix, config } => cmd_doctor(tools.as_deref(), fix, config.as_deref(), lang),
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<MitoError>() {
        Some(
            MitoError::InvalidInput(_)
            | MitoError::Config(_)
            | MitoError::Checkpoint { .. }
            | MitoError::UnsupportedSchema { .. }
            | MitoError::PausedTaskNotFound(_),
        ) => EXIT_USAGE,
        _ => 1,
    }
}

async fn cmd_pipeline(args: PipelineArgs, lang: Lang) -> anyhow::Result<i32> {
    let mut settings = Settings::resolve(args.config.as_deref())?;
    if let Some(threads) = args.threads {
        settings.threads = threads;
    }
    if let Some(seq_type) = args.seq_type {
        settings.seq_type = seq_type;
    }
    if let Some(level) = args.detail_level {
        settings.detail_level = level;
    }
    if let Some(annotator) = &args.annotator {
        settings.annotator = Some(annotator.clone());
    }
    settings.interactive |= args.interactive;
    settings.dry_run |= args.dry_run;

    let mut state = match &args.resume {
        Some(path) => {
            let mut state = resumable_state(path).await?;
            state.config.dry_run |= settings.dry_run;
            state
        }
        None => fresh_state(&args, &settings)?,
    };

    let executor = build_executor(&settings, state.config.dry_run)?;
    println!("{}: {}", text(lang, Msg::Running), state.pipeline_id);
    println!("{}: {}", text(lang, Msg::Workdir), state.workdir.display());
    if state.config.dry_run {
        println!("{}", text(lang, Msg::DryRun));
    }
    drive(executor, &mut state, lang).await
}

fn existing(path: &Path) -> Result<PathBuf, MitoError> {
    std::fs::canonicalize(path)
        .map_err(|_| MitoError::InvalidInput(format!("read file not found: {}", path.display())))
}

fn fresh_state(args: &PipelineArgs, settings: &Settings) -> anyhow::Result<PipelineState> {
    let reads = args
        .reads
        .as_deref()
        .ok_or_else(|| MitoError::InvalidInput("--reads is required".into()))?;
    let output = args
        .output
        .as_deref()
        .ok_or_else(|| MitoError::InvalidInput("--output is required".into()))?;

    let mut inputs = PipelineInputs::new(existing(reads)?);
    inputs.reads2 = args.reads2.as_deref().map(existing).transpose()?;
    inputs.long_reads = args.long_reads.as_deref().map(existing).transpose()?;
    inputs.kingdom = args.kingdom.unwrap_or_default();
    inputs.species = args.species.clone();

    std::fs::create_dir_all(output)?;
    let workdir = std::fs::canonicalize(output)?;
    Ok(PipelineState::new(inputs, settings.runtime_config(), workdir))
}

async fn resumable_state(path: &Path) -> anyhow::Result<PipelineState> {
    let state = load_checkpoint(path).await?;
    if let Some(task_id) = &state.paused_task_id {
        return Err(MitoError::InvalidInput(format!(
            "run is paused for manual annotation; use `mito resume {task_id} --annotation <file>`"
        ))
        .into());
    }
    tracing::info!(
        pipeline_id = %state.pipeline_id,
        stage = %state.current_stage,
        "Resuming from checkpoint"
    );
    Ok(state)
}

fn build_executor(settings: &Settings, dry_run: bool) -> anyhow::Result<PipelineExecutor> {
    let cwd = std::env::current_dir()?;
    let registry = settings.registry(&cwd)?;
    let runner = ProcessRunner::new(Arc::new(registry)).dry_run(dry_run);

    let llm = settings.llm_client(|key| std::env::var(key).ok());
    let agent_events = mito_agent::EventEmitter::default();
    let mut deps = AgentDeps::new(Arc::new(runner))
        .with_llm(llm.clone())
        .with_events(agent_events.clone());
    if llm.is_available() {
        deps = deps.with_diagnoser(Arc::new(LlmDiagnoser::new(llm).with_events(agent_events.clone())));
    }
    if settings.rag_simulate {
        deps = deps.with_rag(Arc::new(SimulatedRag));
    }
    if let Some(spec) = &settings.simulation {
        tracing::info!(simulation = %spec, "Simulated tool runs enabled");
        deps = deps.with_simulation(Arc::new(Simulation::parse(spec)?));
    }

    forward_agent_events(&agent_events);
    let executor = PipelineExecutor::new(deps, settings.paused_dir());
    forward_pipeline_events(executor.events());
    Ok(executor)
}

fn forward_agent_events(events: &mito_agent::EventEmitter) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_agent_event(&event),
                Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "Agent event subscriber lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn log_agent_event(event: &AgentEvent) {
    let stage = event.stage.as_str();
    match event.kind {
        AgentEventKind::Error | AgentEventKind::LlmError => {
            tracing::warn!(stage, task_id = %event.task_id, kind = ?event.kind, payload = %event.payload, "Agent event")
        }
        AgentEventKind::Log | AgentEventKind::LlmCall => {
            tracing::debug!(stage, task_id = %event.task_id, kind = ?event.kind, payload = %event.payload, "Agent event")
        }
        _ => tracing::info!(stage, kind = ?event.kind, payload = %event.payload, "Agent event"),
    }
}

fn forward_pipeline_events(events: &mito_pipeline::EventEmitter) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(PipelineEvent::StageFailed { stage, kind, message }) => {
                    tracing::warn!(stage = %stage, kind = %kind, "Stage failed: {message}")
                }
                Ok(event) => tracing::debug!(event = ?event, "Pipeline event"),
                Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "Pipeline event subscriber lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Run to a stop and print the matching summary. Ctrl-C cancels the run.
async fn drive(mut executor: PipelineExecutor, state: &mut PipelineState, lang: Lang) -> anyhow::Result<i32> {
    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current tool");
            on_interrupt.cancel();
        }
    });

    let outcome = executor.run(state, &cancel).await?;
    match &outcome {
        RunOutcome::Completed => print_success(state, lang),
        RunOutcome::Failed { stage, error } => print_failure(state, *stage, error.as_ref(), lang),
        RunOutcome::Paused { task_id, checkpoint } => print_paused(state, task_id, checkpoint, lang),
        RunOutcome::Cancelled => {
            println!("\n{}", text(lang, Msg::PipelineCancelled));
            let checkpoint = state.workdir.join(CHECKPOINT_FILE);
            println!("  {}: {}", text(lang, Msg::Checkpoint), checkpoint.display());
            println!("  {}: mito pipeline --resume {}", text(lang, Msg::ResumeWith), checkpoint.display());
        }
    }
    Ok(outcome.exit_code())
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format!("{f:.2}"),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn print_success(state: &PipelineState, lang: Lang) {
    let summary = build_summary(state);
    println!("\n{}", text(lang, Msg::PipelineCompleted));
    println!(
        "  {}: {}/{} ({:.1}%)",
        text(lang, Msg::Progress),
        summary.progress.completed,
        summary.progress.total,
        summary.progress.percent
    );
    println!("  {}: {:.1}%", text(lang, Msg::SuccessRate), summary.success_rate);
    println!("  {}: {:.1}s", text(lang, Msg::Runtime), summary.total_runtime_sec);

    println!("\n{}:", text(lang, Msg::Metrics));
    for stage in summary
        .stages
        .iter()
        .filter(|s| s.status == StageStatus::Completed && !s.key_metrics.is_empty())
    {
        let metrics = stage
            .key_metrics
            .iter()
            .take(5)
            .map(|(k, v)| format!("{k}={}", compact(v)))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  {:<11} {:<12} {metrics}",
            stage.stage.as_str(),
            stage.tool.as_deref().unwrap_or("-")
        );
    }

    println!("\n{}:", text(lang, Msg::Outputs));
    for stage in &summary.stages {
        for (key, path) in &stage.outputs {
            println!("  {}.{key}: {}", stage.stage, path.display());
        }
    }
    println!("  {}: {}", text(lang, Msg::Checkpoint), state.workdir.join(CHECKPOINT_FILE).display());
    print_warnings(&summary.warnings, lang);
}

fn print_failure(state: &PipelineState, stage: StageName, error: Option<&ErrorRecord>, lang: Lang) {
    println!("\n{}", text(lang, Msg::PipelineFailed));
    println!("  {}: {stage}", text(lang, Msg::Stage));
    if let Some(error) = error {
        println!("  {}: {}", text(lang, Msg::ErrorType), error.kind);
        let root_cause = error
            .diagnosis
            .as_ref()
            .map(|d| d.root_cause.as_str())
            .filter(|r| !r.is_empty())
            .unwrap_or(&error.message);
        println!("  {}: {root_cause}", text(lang, Msg::RootCause));
        if let Some(tool) = &error.tool {
            println!("  {}: {tool}", text(lang, Msg::Tool));
        }
        if let Some(diagnosis) = error.diagnosis.as_ref().filter(|d| !d.suggestions.is_empty()) {
            println!("  {}:", text(lang, Msg::Suggestions));
            for suggestion in &diagnosis.suggestions {
                println!("    - {suggestion}");
            }
        }
        let logs: Vec<&PathBuf> = error.stdout_log.iter().chain(error.stderr_log.iter()).collect();
        if !logs.is_empty() {
            println!("  {}:", text(lang, Msg::Logs));
            for log in logs {
                println!("    {}", log.display());
            }
        }
    }
    println!("  {}: {}", text(lang, Msg::Checkpoint), state.workdir.join(CHECKPOINT_FILE).display());
    print_warnings(&state.warnings, lang);
}

fn print_paused(state: &PipelineState, task_id: &str, checkpoint: &Path, lang: Lang) {
    println!("\n{}", text(lang, Msg::PipelinePaused));
    println!("  {}: {task_id}", text(lang, Msg::TaskId));
    println!("  {}: {}", text(lang, Msg::Checkpoint), checkpoint.display());
    let guidance = state.stage_dir(StageName::Annotation).join(GUIDANCE_FILE);
    if guidance.is_file() {
        println!("  {}: {}", text(lang, Msg::Instructions), guidance.display());
    }
    println!(
        "  {}: mito resume {task_id} --annotation <annotation.gbk> --workdir {}",
        text(lang, Msg::ResumeWith),
        state.workdir.display()
    );
}

fn print_warnings(warnings: &[String], lang: Lang) {
    if warnings.is_empty() {
        return;
    }
    println!("\n{}:", text(lang, Msg::Warnings));
    for warning in warnings {
        println!("  - {warning}");
    }
}

async fn cmd_status(path: &Path, lang: Lang) -> anyhow::Result<i32> {
    let state = load_checkpoint(path).await?;
    let progress = progress(&state);

    println!("Pipeline {}", state.pipeline_id);
    println!(
        "{}: {}/{} ({:.1}%)",
        text(lang, Msg::Progress),
        progress.completed,
        progress.total,
        progress.percent
    );
    println!("{}: {}", text(lang, Msg::CurrentStage), state.current_stage);
    for stage in StageName::ALL {
        println!(
            "  {:<11} {:<10} retries={}",
            stage.as_str(),
            state.status_of(stage).as_str(),
            state.retries_for(stage)
        );
    }
    if let Some(task_id) = &state.paused_task_id {
        println!("{}: {task_id}", text(lang, Msg::TaskId));
    }
    if let Some(error) = state.errors.last() {
        println!("{}: [{}] {}: {}", text(lang, Msg::LastError), error.stage, error.kind, error.message);
    }
    Ok(0)
}

async fn cmd_resume(
    task_id: &str,
    annotation: &Path,
    workdir: Option<&Path>,
    config: Option<&Path>,
    lang: Lang,
) -> anyhow::Result<i32> {
    let settings = Settings::resolve(config)?;
    if !annotation.is_file() {
        return Err(MitoError::InvalidInput(format!("annotation file not found: {}", annotation.display())).into());
    }
    let cwd = std::env::current_dir()?;
    let dirs = search_dirs(workdir, &cwd, &settings.paused_dir());
    let mut state = resume(task_id, annotation, &dirs).await?;

    println!("{}: {}", text(lang, Msg::Running), state.pipeline_id);
    println!("{}: {}", text(lang, Msg::Workdir), state.workdir.display());
    let executor = build_executor(&settings, state.config.dry_run)?;
    drive(executor, &mut state, lang).await
}

fn cmd_doctor(tools: Option<&str>, fix: bool, config: Option<&Path>, lang: Lang) -> anyhow::Result<i32> {
    let settings = Settings::resolve(config)?;
    let cwd = std::env::current_dir()?;
    let registry = settings.registry(&cwd)?;
    let report = doctor::check(&registry, doctor::requirements(tools));

    for (exe, path) in &report.present {
        println!("  ok  {exe:<30} {}", path.display());
    }

    let mut missing = report.missing;
    if fix && !missing.is_empty() {
        let registry_path = cwd.join(PROJECT_REGISTRY);
        let mut project = ToolRegistry::load(&registry_path)?;
        let roots = doctor::search_roots(
            &cwd,
            std::env::var_os("CONDA_PREFIX").map(PathBuf::from),
            dirs::home_dir(),
        );
        let found = doctor::fix(&mut project, &missing, &roots);
        if !found.is_empty() {
            project.save(&registry_path)?;
            for (exe, path) in &found {
                println!("  {}  {exe:<30} {}", text(lang, Msg::Registered), path.display());
            }
            missing.retain(|req| !found.iter().any(|(exe, _)| *exe == req.exe));
        }
    }

    if missing.is_empty() {
        println!("{}", text(lang, Msg::AllToolsFound));
        return Ok(0);
    }
    println!("\n{}:", text(lang, Msg::MissingTools));
    for req in &missing {
        match (req.tool, req.install_hint) {
            (Some(tool), Some(hint)) => {
                println!("  {:<30} {tool}  {}: {hint}", req.exe, text(lang, Msg::InstallHint))
            }
            _ => println!("  {}", req.exe),
        }
    }
    Ok(EXIT_TOOLS_MISSING)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn pipeline_requires_reads_unless_resuming() {
        assert!(Cli::try_parse_from(["mito", "pipeline", "--output", "out"]).is_err());
        assert!(Cli::try_parse_from(["mito", "pipeline", "--resume", "out/checkpoint.json"]).is_ok());
    }

    #[test]
    fn typed_flags_reject_unknown_values() {
        let bad = Cli::try_parse_from(["mito", "pipeline", "--reads", "r.fq", "-o", "o", "--seq-type", "sanger"]);
        assert!(bad.is_err());
        let ok = Cli::try_parse_from(["mito", "pipeline", "--reads", "r.fq", "-o", "o", "--kingdom", "plant"]);
        assert!(ok.is_ok());
    }

    #[test]
    fn usage_errors_map_to_exit_two() {
        let invalid = anyhow::Error::from(MitoError::InvalidInput("x".into()));
        assert_eq!(exit_code_for(&invalid), EXIT_USAGE);
        let missing = anyhow::Error::from(MitoError::PausedTaskNotFound("abc".into()));
        assert_eq!(exit_code_for(&missing), EXIT_USAGE);
        let other = anyhow::Error::from(MitoError::Other("boom".into()));
        assert_eq!(exit_code_for(&other), 1);
    }

    #[test]
    fn missing_read_file_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let args = PipelineArgs {
            reads: Some(dir.path().join("absent_R1.fastq")),
            reads2: None,
            long_reads: None,
            output: Some(dir.path().join("out")),
            seq_type: None,
            kingdom: None,
            species: None,
            threads: None,
            config: None,
            resume: None,
            interactive: false,
            annotator: None,
            dry_run: true,
            detail_level: None,
        };
        let err = fresh_state(&args, &Settings::default()).unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_USAGE);
    }

    #[test]
    fn compact_formats_floats() {
        assert_eq!(compact(&serde_json::json!(16299)), "16299");
        assert_eq!(compact(&serde_json::json!(0.98765)), "0.99");
        assert_eq!(compact(&serde_json::json!("spades")), "spades");
    }
}
