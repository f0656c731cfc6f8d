//! Run-level events.
//!
//! The executor emits [`PipelineEvent`]s on a [`tokio::sync::broadcast`]
//! channel. Per-stage tool progress comes separately as agent events.

use mito_types::{FailureKind, StageName, StageRoute};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    PipelineStarted {
        pipeline_id: String,
        resumed: bool,
    },
    PipelineCompleted {
        pipeline_id: String,
        completed_stages: Vec<StageName>,
        failed_stages: Vec<StageName>,
        duration_ms: u64,
    },
    PipelinePaused {
        pipeline_id: String,
        task_id: String,
    },
    PipelineCancelled {
        pipeline_id: String,
    },
    StageStarted {
        stage: StageName,
        attempt: u32,
    },
    StageCompleted {
        stage: StageName,
        tool: Option<String>,
        duration_ms: u64,
    },
    StageSkipped {
        stage: StageName,
    },
    StageFailed {
        stage: StageName,
        kind: FailureKind,
        message: String,
    },
    RouteSelected {
        from: StageName,
        route: StageRoute,
        to: String,
    },
    CheckpointSaved {
        stage: StageName,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Dropped silently when nobody listens.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let emitter = EventEmitter::new(16);
        let mut a = emitter.subscribe();
        let mut b = emitter.subscribe();

        emitter.emit(PipelineEvent::StageStarted {
            stage: StageName::Qc,
            attempt: 1,
        });

        for rx in [&mut a, &mut b] {
            match rx.recv().await.unwrap() {
                PipelineEvent::StageStarted { stage, attempt } => {
                    assert_eq!(stage, StageName::Qc);
                    assert_eq!(attempt, 1);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        EventEmitter::default().emit(PipelineEvent::PipelineCancelled {
            pipeline_id: "p".into(),
        });
    }
}
