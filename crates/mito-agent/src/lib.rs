//! Per-stage agents for Mito-Forge.
//!
//! Each tool-running stage (qc, assembly, polish, annotation) is an [`Agent`]
//! around a [`StageTask`]. Tool invocations go through the [`HealingLoop`]:
//! run → parse → diagnose → adjust parameters or switch tool → run again, bounded
//! by the stage's retry budget. Progress is broadcast as [`AgentEvent`]s.

pub mod agent;
pub mod agents;
pub mod analysis;
pub mod diagnosis;
pub mod events;
pub mod healing;
pub mod knowledge;
pub mod params;
pub mod simulation;

pub use agent::{Agent, AgentDeps, AgentState, StageAgent, StageTask, TaskContext};
pub use agents::{agent_for, polisher_chain, AnnotationAgent, AssemblyAgent, PolishAgent, QcAgent, GUIDANCE_FILE};
pub use diagnosis::{Diagnoser, FailureContext, LlmDiagnoser, RuleDiagnoser};
pub use events::{AgentEvent, AgentEventKind, EventEmitter};
pub use healing::{HealingLoop, JobInputs, JobOutcome, ToolJob};
pub use knowledge::{
    Citation, InMemoryMemory, MemoryAdapter, MemoryRecord, NoMemory, NoRag, RagAdapter, SimulatedRag,
};
pub use params::AttemptParams;
pub use simulation::{SimScenario, SimulatedRunner, Simulation};
