//! Agent event stream.
//!
//! Agents emit [`AgentEvent`]s through a [`tokio::sync::broadcast`] channel so
//! the CLI, tests, or any other observer can follow stage progress without
//! reaching into agent internals.

use chrono::{DateTime, Utc};
use mito_types::StageName;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEventKind {
    Started,
    Progress,
    Log,
    LlmCall,
    LlmError,
    StageComplete,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub kind: AgentEventKind,
    pub stage: StageName,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

impl AgentEvent {
    pub fn new(kind: AgentEventKind, stage: StageName, task_id: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            stage,
            task_id: task_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<AgentEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Send to all current subscribers. Dropped silently when nobody listens.
    pub fn emit(&self, event: AgentEvent) {
        let _ = self.sender.send(event);
    }

    pub fn send(&self, kind: AgentEventKind, stage: StageName, task_id: &str, payload: Value) {
        self.emit(AgentEvent::new(kind, stage, task_id, payload));
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.send(AgentEventKind::Started, StageName::Qc, "p-1", json!({"tool": "fastp"}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, AgentEventKind::Started);
        assert_eq!(event.stage, StageName::Qc);
        assert_eq!(event.payload["tool"], "fastp");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let emitter = EventEmitter::new(16);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter.send(AgentEventKind::StageComplete, StageName::Assembly, "p-1", Value::Null);

        assert_eq!(rx1.recv().await.unwrap().kind, AgentEventKind::StageComplete);
        assert_eq!(rx2.recv().await.unwrap().kind, AgentEventKind::StageComplete);
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let emitter = EventEmitter::default();
        emitter.send(AgentEventKind::Log, StageName::Report, "p-1", Value::Null);
    }

    #[test]
    fn event_kind_serializes_snake_case() {
        let event = AgentEvent::new(AgentEventKind::LlmError, StageName::Qc, "t", Value::Null);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "llm_error");
        assert_eq!(json["stage"], "qc");
    }
}
