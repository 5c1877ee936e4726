use tokio::sync::mpsc;

use crate::types::AgentEvent;

/// Async event bus that decouples turn execution from the transport
/// layer. The orchestrator produces events; whatever owns the receiver
/// (SSE handler, CLI printer) consumes and forwards them.
pub struct TurnBus {
    tx: mpsc::Sender<AgentEvent>,
    rx: mpsc::Receiver<AgentEvent>,
}

impl TurnBus {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer_size);
        Self { tx, rx }
    }

    /// Get a sender handle for the orchestrator.
    pub fn sender(&self) -> mpsc::Sender<AgentEvent> {
        self.tx.clone()
    }

    /// Consume the next event (blocks until available; `None` once the
    /// turn finishes and all senders drop).
    pub async fn consume(&mut self) -> Option<AgentEvent> {
        self.rx.recv().await
    }

    /// Split into sender/receiver halves for concurrent use.
    pub fn split(self) -> (mpsc::Sender<AgentEvent>, mpsc::Receiver<AgentEvent>) {
        (self.tx, self.rx)
    }
}
