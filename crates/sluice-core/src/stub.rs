//! Toxic stub: the execution context of one stage on one connection.
//!
//! A stub owns the stage's input receiver, its output sender, an interrupt
//! receiver and a private state slot. The orchestrator keeps only the
//! matching [`InterruptHandle`]; the stub itself moves into the stage's
//! worker task and is handed back when the stage returns.

use std::any::Any;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::chunk::StreamChunk;

/// Opaque per-stub stage state. Only the stage that created it reads it.
pub type ToxicState = Box<dyn Any + Send>;

pub struct ToxicStub {
    /// Chunks from the previous stage. `None` from `recv` means the
    /// upstream side has closed for good.
    pub input: mpsc::Receiver<StreamChunk>,
    /// Fires once per interruption. A dropped handle also reads as an
    /// interrupt (`recv` returns `None`).
    pub interrupt: mpsc::Receiver<()>,
    output: Option<mpsc::Sender<StreamChunk>>,
    state: Option<ToxicState>,
}

/// Orchestrator-side handle used to stop a running stage.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    tx: mpsc::Sender<()>,
}

impl InterruptHandle {
    /// Ask the stage to stop. Never blocks; an interrupt already pending
    /// counts. Returns false once the stub has been dropped.
    pub fn interrupt(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => false,
        }
    }
}

impl ToxicStub {
    pub fn new(
        input: mpsc::Receiver<StreamChunk>,
        output: mpsc::Sender<StreamChunk>,
    ) -> (Self, InterruptHandle) {
        let (tx, interrupt) = mpsc::channel(1);
        let stub = Self {
            input,
            interrupt,
            output: Some(output),
            state: None,
        };
        (stub, InterruptHandle { tx })
    }

    /// Install the state produced by the stage's `new_state`.
    pub fn set_state(&mut self, state: Option<ToxicState>) {
        self.state = state;
    }

    /// Typed view of the state slot. `None` if empty or owned by another type.
    pub fn state_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.state.as_mut()?.downcast_mut::<T>()
    }

    /// Send a chunk to the next stage, waiting for capacity.
    ///
    /// Returns false when the stub is closed or the downstream side is gone;
    /// the caller should stop in that case.
    pub async fn forward(&mut self, chunk: StreamChunk) -> bool {
        match &self.output {
            Some(tx) => tx.send(chunk).await.is_ok(),
            None => false,
        }
    }

    /// End the stream for everything downstream. Safe to call twice.
    pub fn close(&mut self) {
        if self.output.take().is_some() {
            tracing::trace!("stub output closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.output.is_none()
    }

    /// Split the stub back into its channels so the orchestrator can rewire them.
    pub fn into_channels(
        self,
    ) -> (
        mpsc::Receiver<StreamChunk>,
        Option<mpsc::Sender<StreamChunk>>,
    ) {
        (self.input, self.output)
    }
}
