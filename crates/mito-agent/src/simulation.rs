//! Failure injection for demos and end-to-end tests (`MITO_SIM`).
//!
//! `MITO_SIM=assembly=oom,annotation=unknown:5` makes the named stages fail with
//! the given scenario a fixed number of times; afterwards (or for `ok`) every
//! command of that stage is a synthetic success.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mito_tools::runner::{write_synthetic_run, ToolCommand, ToolRun, ToolRunner, EXIT_TIMEOUT};
use mito_tools::CancelToken;
use mito_types::{MitoError, Result, StageName};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimScenario {
    Ok,
    ToolNotFound,
    OutOfMemory,
    Timeout,
    Unknown,
    DataFormat,
}

impl SimScenario {
    /// How many commands fail before the stage recovers; `None` means always.
    fn default_failures(&self) -> Option<u32> {
        match self {
            SimScenario::Ok => Some(0),
            SimScenario::ToolNotFound | SimScenario::Timeout => Some(1),
            SimScenario::OutOfMemory => Some(2),
            SimScenario::Unknown | SimScenario::DataFormat => None,
        }
    }
}

impl FromStr for SimScenario {
    type Err = MitoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ok" | "success" => Ok(SimScenario::Ok),
            "tool_not_found" | "assembler_not_found" | "not_found" => Ok(SimScenario::ToolNotFound),
            "oom" | "out_of_memory" => Ok(SimScenario::OutOfMemory),
            "timeout" => Ok(SimScenario::Timeout),
            "unknown" | "fail" => Ok(SimScenario::Unknown),
            "data_format" | "bad_input" => Ok(SimScenario::DataFormat),
            other => Err(MitoError::InvalidInput(format!("unknown simulation scenario '{other}'"))),
        }
    }
}

#[derive(Debug, Clone)]
struct SimEntry {
    scenario: SimScenario,
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
pub struct Simulation {
    entries: Mutex<BTreeMap<StageName, SimEntry>>,
    history: Mutex<Vec<(StageName, ToolCommand)>>,
}

impl Simulation {
    /// Parse `stage=scenario[:N]` pairs separated by commas.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (stage, scenario) = pair.split_once('=').ok_or_else(|| {
                MitoError::InvalidInput(format!("simulation entry '{pair}' must be stage=scenario"))
            })?;
            let stage: StageName = stage.trim().parse()?;
            let (scenario, count) = match scenario.split_once(':') {
                Some((name, n)) => {
                    let n: u32 = n.trim().parse().map_err(|_| {
                        MitoError::InvalidInput(format!("bad simulation count in '{pair}'"))
                    })?;
                    (name.parse::<SimScenario>()?, Some(n))
                }
                None => {
                    let scenario = scenario.parse::<SimScenario>()?;
                    (scenario, scenario.default_failures())
                }
            };
            entries.insert(
                stage,
                SimEntry {
                    scenario,
                    remaining: count,
                },
            );
        }
        Ok(Self {
            entries: Mutex::new(entries),
            history: Mutex::new(Vec::new()),
        })
    }

    pub fn covers(&self, stage: StageName) -> bool {
        self.entries
            .lock()
            .map(|e| e.contains_key(&stage))
            .unwrap_or(false)
    }

    /// Commands seen for `stage`, in order.
    pub fn commands(&self, stage: StageName) -> Vec<ToolCommand> {
        self.history
            .lock()
            .map(|h| {
                h.iter()
                    .filter(|(s, _)| *s == stage)
                    .map(|(_, c)| c.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn next_outcome(&self, stage: StageName, command: &ToolCommand) -> SimScenario {
        if let Ok(mut history) = self.history.lock() {
            history.push((stage, command.clone()));
        }
        let Ok(mut entries) = self.entries.lock() else {
            return SimScenario::Ok;
        };
        let Some(entry) = entries.get_mut(&stage) else {
            return SimScenario::Ok;
        };
        match entry.remaining.as_mut() {
            None => entry.scenario,
            Some(0) => SimScenario::Ok,
            Some(n) => {
                *n -= 1;
                entry.scenario
            }
        }
    }
}

/// Runner for one stage that injects the configured scenario.
pub struct SimulatedRunner {
    simulation: Arc<Simulation>,
    stage: StageName,
}

impl SimulatedRunner {
    pub fn new(simulation: Arc<Simulation>, stage: StageName) -> Self {
        Self { simulation, stage }
    }
}

#[async_trait]
impl ToolRunner for SimulatedRunner {
    async fn run(&self, command: &ToolCommand, cancel: &CancelToken) -> Result<ToolRun> {
        if cancel.is_cancelled() {
            return Err(MitoError::Cancelled);
        }
        let scenario = self.simulation.next_outcome(self.stage, command);
        tracing::debug!(stage = %self.stage, tool = %command.exe, ?scenario, "Simulated run");
        match scenario {
            SimScenario::Ok => write_synthetic_run(command, "simulated").await,
            SimScenario::ToolNotFound => Ok(ToolRun::unresolved(command)),
            SimScenario::OutOfMemory => {
                failed_run(command, "std::bad_alloc: out of memory while building graph", 137, false).await
            }
            SimScenario::Timeout => {
                let secs = command.timeout.map(|t| t.as_secs()).unwrap_or_default();
                let note = format!("[mito] command timed out after {secs}s");
                failed_run(command, &note, EXIT_TIMEOUT, true).await
            }
            SimScenario::Unknown => {
                failed_run(command, "simulated failure: assertion failed in graph simplification step", 1, false).await
            }
            SimScenario::DataFormat => {
                failed_run(command, "ERROR: invalid FASTQ record at line 4", 1, false).await
            }
        }
    }
}

async fn failed_run(command: &ToolCommand, stderr: &str, exit_code: i32, timed_out: bool) -> Result<ToolRun> {
    tokio::fs::create_dir_all(&command.cwd).await?;
    let stdout_path = command.stdout_path();
    let stderr_path = command.stderr_path();
    tokio::fs::write(&stdout_path, format!("[simulated] {}\n", command.display())).await?;
    tokio::fs::write(&stderr_path, format!("{stderr}\n")).await?;
    Ok(ToolRun {
        exe: command.exe.clone(),
        exit_code,
        stdout_path,
        stderr_path,
        elapsed_sec: 0.0,
        timed_out,
        synthetic: true,
    })
}
