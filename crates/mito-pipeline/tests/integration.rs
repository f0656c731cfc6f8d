//! End-to-end runs of the stage graph with dry-run and simulated tools.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use mito_agent::{AgentDeps, Simulation};
use mito_pipeline::checkpoint::paused_file_name;
use mito_pipeline::{
    load_checkpoint, resume, search_dirs, PipelineEvent, PipelineExecutor, RunOutcome, Settings, CHECKPOINT_FILE,
};
use mito_tools::{CancelToken, ProcessRunner, ToolRegistry};
use mito_types::{
    FailureKind, Kingdom, MitoError, NodeId, PipelineInputs, PipelineState, SeqType, StageName, StageRoute,
    StageStatus,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const FASTQ: &str = "@r1\nACGTACGT\n+\nIIIIIIII\n";

const GENBANK: &str = "\
LOCUS       mt_contig            16000 bp    DNA     circular
FEATURES             Location/Qualifiers
     source          1..16000
     gene            1..1500
                     /gene=\"cox1\"
     CDS             1..1500
                     /gene=\"cox1\"
     tRNA            1600..1670
     rRNA            2000..2900
ORIGIN
//
";

struct Run {
    _dir: tempfile::TempDir,
    root: PathBuf,
    state: PipelineState,
    paused_dir: PathBuf,
}

async fn illumina(kingdom: Kingdom) -> Run {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let r1 = root.join("sample_R1.fastq");
    let r2 = root.join("sample_R2.fastq");
    tokio::fs::write(&r1, FASTQ).await.unwrap();
    tokio::fs::write(&r2, FASTQ).await.unwrap();
    let mut inputs = PipelineInputs::new(&r1);
    inputs.reads2 = Some(r2);
    inputs.kingdom = kingdom;
    build(dir, root, inputs)
}

async fn nanopore() -> Run {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let reads = root.join("fly_ont.fastq");
    tokio::fs::write(&reads, FASTQ).await.unwrap();
    build(dir, root, PipelineInputs::new(&reads))
}

fn build(dir: tempfile::TempDir, root: PathBuf, inputs: PipelineInputs) -> Run {
    let settings = Settings {
        threads: 8,
        dry_run: true,
        ..Settings::default()
    };
    let state = PipelineState::new(inputs, settings.runtime_config(), root.join("work"));
    Run {
        _dir: dir,
        paused_dir: root.join("paused"),
        root,
        state,
    }
}

fn executor(run: &Run, sim: Option<Arc<Simulation>>) -> PipelineExecutor {
    let runner = Arc::new(ProcessRunner::new(Arc::new(ToolRegistry::default())).dry_run(true));
    let mut deps = AgentDeps::new(runner);
    if let Some(sim) = sim {
        deps = deps.with_simulation(sim);
    }
    PipelineExecutor::new(deps, &run.paused_dir)
}

fn sim(spec: &str) -> Arc<Simulation> {
    Arc::new(Simulation::parse(spec).unwrap())
}

/// Run to the next stop and return the outcome plus every stage that started.
async fn drive(executor: &mut PipelineExecutor, state: &mut PipelineState) -> (RunOutcome, BTreeSet<StageName>) {
    let mut rx = executor.events().subscribe();
    let outcome = executor.run(state, &CancelToken::new()).await.unwrap();
    let mut started = BTreeSet::new();
    while let Ok(event) = rx.try_recv() {
        if let PipelineEvent::StageStarted { stage, .. } = event {
            started.insert(stage);
        }
    }
    (outcome, started)
}

fn assert_invariants(state: &PipelineState, started: &BTreeSet<StageName>) {
    for stage in &state.completed_stages {
        assert!(!state.failed_stages.contains(stage), "{stage} both completed and failed");
    }
    let current = state.current_stage.stage();
    for stage in state.stage_outputs.keys().chain(state.stage_metrics.keys()) {
        assert!(
            state.completed_stages.contains(stage) || current == Some(*stage),
            "{stage} has outputs but is neither completed nor in flight"
        );
    }
    for (stage, n) in &state.retries {
        assert!(*n <= state.config.max_retries, "{stage} retried {n} times");
    }
    if state.done {
        assert_eq!(state.current_stage, NodeId::End);
        assert!(state.stage_status.values().all(|s| *s != StageStatus::Running));
    }
    let touched: BTreeSet<StageName> = state.touched_stages().into_iter().collect();
    assert_eq!(&touched, started);
}

// ---------------------------------------------------------------------------
// Test 1: Illumina happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn illumina_dry_run_completes_without_polish() {
    let mut run = illumina(Kingdom::Animal).await;
    let mut exec = executor(&run, None);
    let (outcome, started) = drive(&mut exec, &mut run.state).await;

    assert_eq!(outcome, RunOutcome::Completed);
    let state = &run.state;
    assert!(state.done);
    assert_eq!(
        state.completed_stages,
        vec![
            StageName::Supervisor,
            StageName::Qc,
            StageName::Assembly,
            StageName::Annotation,
            StageName::Report
        ]
    );
    assert_eq!(state.status_of(StageName::Polish), StageStatus::Skipped);
    assert_eq!(state.config.seq_type, SeqType::Illumina);
    assert_eq!(state.config.tool_chain.assembly.as_deref(), Some("spades"));
    assert_eq!(state.config.tool_chain.annotation.as_deref(), Some("mitos"));
    assert!(state.config.tool_chain.polishing.is_none());
    assert!(state.errors.is_empty());
    assert_invariants(state, &started);

    let work = &state.workdir;
    assert!(work.join("00_supervisor/execution_plan.json").exists());
    assert!(work.join("05_report/summary.json").exists());
    assert!(work.join("05_report/report.html").exists());

    let plan: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(work.join("00_supervisor/execution_plan.json")).unwrap())
            .unwrap();
    assert_eq!(plan["plan"]["assembler"]["name"], json!("spades"));
    assert_eq!(plan["annotator"], json!("mitos"));
}

#[tokio::test]
async fn checkpoint_matches_final_state() {
    let mut run = illumina(Kingdom::Animal).await;
    let mut exec = executor(&run, None);
    drive(&mut exec, &mut run.state).await;

    let loaded = load_checkpoint(&run.state.workdir.join(CHECKPOINT_FILE)).await.unwrap();
    assert_eq!(loaded, run.state);
}

// ---------------------------------------------------------------------------
// Test 2: ONT with a two-round polish
// ---------------------------------------------------------------------------

#[tokio::test]
async fn nanopore_run_polishes_with_racon_then_medaka() {
    let mut run = nanopore().await;
    let mut exec = executor(&run, None);
    let (outcome, started) = drive(&mut exec, &mut run.state).await;

    assert_eq!(outcome, RunOutcome::Completed);
    let state = &run.state;
    assert_eq!(state.config.seq_type, SeqType::Ont);
    assert_eq!(state.config.tool_chain.polishing.as_deref(), Some("racon,medaka"));
    assert!(state.completed_stages.contains(&StageName::Polish));

    let polish = &state.stage_outputs[&StageName::Polish];
    assert_eq!(polish.metrics["polishers_applied"], json!(["racon", "medaka"]));
    let polished = state.stage_dir(StageName::Polish).join("polished.fasta");
    assert_eq!(state.primary_assembly(), Some(polished.as_path()));
    assert_invariants(state, &started);
}

// ---------------------------------------------------------------------------
// Test 3: missing assembler switches to the next candidate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_assembler_switches_to_unicycler() {
    let mut run = illumina(Kingdom::Animal).await;
    let mut exec = executor(&run, Some(sim("assembly=assembler_not_found")));
    let (outcome, started) = drive(&mut exec, &mut run.state).await;

    assert_eq!(outcome, RunOutcome::Completed);
    let state = &run.state;
    assert_eq!(state.retries_for(StageName::Assembly), 1);
    assert_eq!(state.config.tool_chain.assembly.as_deref(), Some("unicycler"));
    assert_eq!(state.stage_outputs[&StageName::Assembly].tool.as_deref(), Some("unicycler"));
    assert_invariants(state, &started);
}

// ---------------------------------------------------------------------------
// Test 4: out of memory halves threads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn out_of_memory_retries_with_fewer_threads() {
    let mut run = illumina(Kingdom::Animal).await;
    let simulation = sim("assembly=oom");
    let mut exec = executor(&run, Some(simulation.clone()));
    let (outcome, started) = drive(&mut exec, &mut run.state).await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(run.state.retries_for(StageName::Assembly), 2);
    let threads: Vec<String> = simulation
        .commands(StageName::Assembly)
        .iter()
        .map(|c| {
            let pos = c.args.iter().position(|a| a == "-t").unwrap();
            c.args[pos + 1].clone()
        })
        .collect();
    assert_eq!(threads, ["8", "4", "2"]);
    assert_eq!(run.state.stage_metrics[&StageName::Assembly].attempts, 3);
    assert_invariants(&run.state, &started);
}

// ---------------------------------------------------------------------------
// Test 5: plant + GeSeq pauses, then resumes from the external annotation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn geseq_pause_then_resume_twice() {
    let mut run = illumina(Kingdom::Plant).await;
    run.state.config.interactive = true;
    let mut exec = executor(&run, None);
    let (outcome, started) = drive(&mut exec, &mut run.state).await;

    let RunOutcome::Paused { task_id, checkpoint } = outcome else {
        panic!("expected a pause, got {outcome:?}");
    };
    let state = &run.state;
    assert!(!state.done);
    assert_eq!(state.current_stage, NodeId::Annotation);
    assert_eq!(state.status_of(StageName::Annotation), StageStatus::Paused);
    assert_eq!(state.paused_task_id.as_deref(), Some(task_id.as_str()));
    assert_eq!(state.route, Some(StageRoute::Pause));
    assert_eq!(checkpoint, state.workdir.join(paused_file_name(&task_id)));
    assert!(checkpoint.exists());
    assert!(run.paused_dir.join(paused_file_name(&task_id)).exists());
    assert!(state.stage_dir(StageName::Annotation).join("GESEQ_INSTRUCTIONS.txt").exists());
    assert_invariants(state, &started);

    let gbk = run.root.join("downloaded.gbk");
    tokio::fs::write(&gbk, GENBANK).await.unwrap();
    let dirs = search_dirs(None, &run.root.join("elsewhere"), &run.paused_dir);

    let first = resume(&task_id, &gbk, &dirs).await.unwrap();
    let second = resume(&task_id, &gbk, &dirs).await.unwrap();
    assert_eq!(
        first.stage_outputs[&StageName::Annotation],
        second.stage_outputs[&StageName::Annotation]
    );

    let mut resumed = second;
    assert_eq!(resumed.current_stage, NodeId::Report);
    assert!(resumed.paused_task_id.is_none());
    let annotation = &resumed.stage_outputs[&StageName::Annotation];
    assert_eq!(annotation.metrics["genes"], json!(1));
    assert_eq!(annotation.metrics["trna"], json!(1));
    assert!(resumed
        .stage_dir(StageName::Annotation)
        .join("annotation.gbk")
        .exists());

    let before = resumed.completed_stages.clone();
    let mut exec = executor(&run, None);
    let (outcome, _) = drive(&mut exec, &mut resumed).await;
    assert_eq!(outcome, RunOutcome::Completed);
    assert!(resumed.done);
    assert!(before.iter().all(|s| resumed.completed_stages.contains(s)));
    assert_eq!(resumed.completed_stages.last(), Some(&StageName::Report));
}

#[tokio::test]
async fn resume_unknown_task_is_reported() {
    let run = illumina(Kingdom::Plant).await;
    let gbk = run.root.join("downloaded.gbk");
    tokio::fs::write(&gbk, GENBANK).await.unwrap();
    let err = resume("00000000", &gbk, &[run.root.clone()]).await.unwrap_err();
    assert!(matches!(err, MitoError::PausedTaskNotFound(_)));
}

// ---------------------------------------------------------------------------
// Test 6: retry budget exhausted
// ---------------------------------------------------------------------------

#[tokio::test]
async fn persistent_assembly_failure_exhausts_retries() {
    let mut run = illumina(Kingdom::Animal).await;
    let mut exec = executor(&run, Some(sim("assembly=unknown")));
    let (outcome, started) = drive(&mut exec, &mut run.state).await;

    let RunOutcome::Failed { stage, error } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(stage, StageName::Assembly);
    assert_eq!(error.map(|e| e.kind), Some(FailureKind::Unknown));

    let state = &run.state;
    assert_eq!(state.retries_for(StageName::Assembly), 3);
    assert_eq!(state.failed_stages, vec![StageName::Assembly]);
    assert_eq!(state.status_of(StageName::Assembly), StageStatus::Failed);
    assert!(state.done);
    assert_eq!(state.route, Some(StageRoute::Terminate));
    assert!(!state.stage_outputs.contains_key(&StageName::Annotation));
    assert_invariants(state, &started);
}

#[tokio::test]
async fn annotation_failure_still_writes_the_report() {
    let mut run = illumina(Kingdom::Animal).await;
    let mut exec = executor(&run, Some(sim("annotation=unknown")));
    let (outcome, started) = drive(&mut exec, &mut run.state).await;

    assert!(matches!(outcome, RunOutcome::Failed { stage: StageName::Annotation, .. }));
    let state = &run.state;
    assert_eq!(state.retries_for(StageName::Annotation), 3);
    assert_eq!(state.failed_stages, vec![StageName::Annotation]);
    assert!(state.completed_stages.contains(&StageName::Report));
    assert!(state.workdir.join("05_report/summary.json").exists());
    assert_invariants(state, &started);
}

// ---------------------------------------------------------------------------
// Test 7: input and cancellation edges
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_reads_stop_at_the_supervisor() {
    let mut run = illumina(Kingdom::Animal).await;
    run.state.inputs.reads = run.root.join("absent_R1.fastq");
    let mut exec = executor(&run, None);
    let (outcome, started) = drive(&mut exec, &mut run.state).await;

    assert!(matches!(outcome, RunOutcome::Failed { stage: StageName::Supervisor, .. }));
    let state = &run.state;
    assert!(state.done);
    assert_eq!(state.failed_stages, vec![StageName::Supervisor]);
    assert_eq!(state.errors[0].kind, FailureKind::InputQuality);
    assert_invariants(state, &started);
}

#[tokio::test]
async fn bad_input_aborts_qc_without_retries() {
    let mut run = illumina(Kingdom::Animal).await;
    let mut exec = executor(&run, Some(sim("qc=data_format")));
    let (outcome, _) = drive(&mut exec, &mut run.state).await;

    assert!(matches!(outcome, RunOutcome::Failed { stage: StageName::Qc, .. }));
    assert_eq!(run.state.retries_for(StageName::Qc), 0);
    assert_eq!(run.state.errors.last().map(|e| e.kind), Some(FailureKind::DataFormat));
}

#[tokio::test]
async fn cancelled_run_keeps_a_resumable_checkpoint() {
    let mut run = illumina(Kingdom::Animal).await;
    let mut exec = executor(&run, None);
    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = exec.run(&mut run.state, &cancel).await.unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled);
    assert!(!run.state.done);
    assert_eq!(run.state.current_stage, NodeId::Supervisor);

    let loaded = load_checkpoint(&run.state.workdir.join(CHECKPOINT_FILE)).await.unwrap();
    assert_eq!(loaded.pipeline_id, run.state.pipeline_id);

    let mut resumed = loaded;
    let mut exec = executor(&run, None);
    let (outcome, _) = drive(&mut exec, &mut resumed).await;
    assert_eq!(outcome, RunOutcome::Completed);
}

#[tokio::test]
async fn explicit_seq_type_overrides_detection() {
    let mut run = nanopore().await;
    run.state.config.seq_type = SeqType::PacbioHifi;
    let mut exec = executor(&run, None);
    let (outcome, _) = drive(&mut exec, &mut run.state).await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(run.state.config.tool_chain.assembly.as_deref(), Some("hifiasm"));
    // HiFi plans carry no polishers
    assert_eq!(run.state.status_of(StageName::Polish), StageStatus::Skipped);
}
