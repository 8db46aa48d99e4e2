use crate::types::Mode;

/// Progress notifications emitted while a run moves through the graph.
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        question_id: String,
    },
    Routed {
        question_id: String,
        mode: Mode,
        fallback: bool,
    },
    NodeStarted {
        question_id: String,
        node: &'static str,
    },
    NodeFinished {
        question_id: String,
        node: &'static str,
        outcome: String,
        elapsed_ms: u64,
    },
    RepairScheduled {
        question_id: String,
        attempt: u32,
        target: &'static str,
    },
    RunFinished {
        question_id: String,
        succeeded: bool,
        repair_attempts: u32,
    },
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: RunEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
