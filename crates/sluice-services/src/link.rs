//! Toxic link: the live stage chain for one direction of one connection.
//!
//! ```text
//!   socket ─▶ head reader ─▶ [noop] ─▶ [toxic 1] ─▶ … ─▶ [toxic n] ─▶ tail writer ─▶ socket
//! ```
//!
//! Every stage runs on its own task and owns its stub; the link keeps only
//! the interrupt handles and join handles. A rebuild stops the stages head
//! to tail, takes the stubs back, keeps the head channel and the tail
//! sender, and respawns a fresh chain between them. Chunks that were queued
//! inside the old chain are fed to the new one ahead of anything the reader
//! produces later, so every toxic still installed applies to them. The
//! leading noop stage means the head reader never has to be rewired.

use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

use sluice_core::toxic::chain_for;
use sluice_core::{
    ActiveToxic, InterruptHandle, NoopToxic, StreamChunk, StreamDirection, Toxic, ToxicStub,
};

const READ_BUFFER: usize = 32 * 1024;
const TAIL_CAPACITY: usize = 32;
const HEAD_STAGE: &str = "head";

struct Stage {
    name: String,
    toxic: Arc<dyn Toxic>,
    interrupt: InterruptHandle,
    worker: JoinHandle<ToxicStub>,
}

struct StoppedStage {
    name: String,
    toxic: Arc<dyn Toxic>,
    interrupt: InterruptHandle,
    stub: ToxicStub,
}

pub struct ToxicLink {
    direction: StreamDirection,
    stages: Vec<Stage>,
    reader: JoinHandle<()>,
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("stage {stage} failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: JoinError,
    },
}

impl ToxicLink {
    /// Start a link copying `reader` into `writer` through the toxics of
    /// `toxics` that apply to `direction`.
    ///
    /// The returned handle resolves once the tail has written everything and
    /// shut the writer down, with the number of bytes written.
    pub fn start<R, W>(
        reader: R,
        writer: W,
        toxics: &[ActiveToxic],
        direction: StreamDirection,
    ) -> (Self, JoinHandle<io::Result<u64>>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (head_tx, head_rx) = mpsc::channel(capacity(&NoopToxic));
        let (tail_tx, tail_rx) = mpsc::channel(TAIL_CAPACITY);

        let reader = tokio::spawn(read_loop(reader, head_tx, direction));
        let tail = tokio::spawn(write_loop(writer, tail_rx, direction));

        let mut link = Self {
            direction,
            stages: Vec::new(),
            reader,
        };
        link.spawn_chain(head_rx, tail_tx, &chain_for(toxics, direction), Vec::new());
        (link, tail)
    }

    pub fn direction(&self) -> StreamDirection {
        self.direction
    }

    /// Names of the running stages, head first.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Replace the chain with one built from `toxics`, keeping every
    /// buffered chunk and its order. State does not carry over.
    pub async fn rebuild(&mut self, toxics: &[ActiveToxic]) -> Result<(), LinkError> {
        let stopped = self.stop_stages().await?;

        // A closed stub means the stream ended: the closed stages form a
        // prefix, and the rest still hold data that must drain through the
        // old chain.
        if stopped.iter().any(|s| s.stub.is_closed()) {
            for stage in stopped.into_iter().filter(|s| !s.stub.is_closed()) {
                self.spawn_stage(stage.name, stage.toxic, stage.stub, stage.interrupt);
            }
            return Ok(());
        }

        let last = stopped.len().saturating_sub(1);
        let mut head_rx = None;
        let mut tail_tx = None;
        let mut between = Vec::new();
        for (i, stage) in stopped.into_iter().enumerate() {
            let (input, output) = stage.stub.into_channels();
            if i == 0 {
                head_rx = Some(input);
            } else {
                between.push(input);
            }
            if i == last {
                tail_tx = output;
            }
        }
        let (Some(head_rx), Some(tail_tx)) = (head_rx, tail_tx) else {
            return Ok(());
        };

        // Oldest data sits nearest the tail.
        let mut backlog = Vec::new();
        for rx in between.iter_mut().rev() {
            while let Ok(chunk) = rx.try_recv() {
                backlog.push(chunk);
            }
        }
        let requeued = backlog.len();

        let chain = chain_for(toxics, self.direction);
        if chain.is_empty() {
            for chunk in backlog.drain(..) {
                if tail_tx.send(chunk).await.is_err() {
                    tracing::debug!(direction = %self.direction, "tail gone during rebuild");
                    return Ok(());
                }
            }
        }

        self.spawn_chain(head_rx, tail_tx, &chain, backlog);
        tracing::debug!(
            direction = %self.direction,
            stages = self.stages.len(),
            requeued,
            "link rebuilt"
        );
        Ok(())
    }

    /// Interrupt every stage, head first, and take the stubs back.
    ///
    /// Stages downstream of the one being stopped keep running, so a stage
    /// flushing its pending chunk always finds a reader.
    async fn stop_stages(&mut self) -> Result<Vec<StoppedStage>, LinkError> {
        let mut stopped = Vec::with_capacity(self.stages.len());
        for stage in std::mem::take(&mut self.stages) {
            stage.interrupt.interrupt();
            let stub = stage.worker.await.map_err(|source| LinkError::StageFailed {
                stage: stage.name.clone(),
                source,
            })?;
            stopped.push(StoppedStage {
                name: stage.name,
                toxic: stage.toxic,
                interrupt: stage.interrupt,
                stub,
            });
        }
        Ok(stopped)
    }

    /// Spawn the head stage plus one stage per toxic in `chain`. `backlog`
    /// is queued in front of the first toxic, ahead of anything the head
    /// stage forwards.
    fn spawn_chain(
        &mut self,
        head_rx: mpsc::Receiver<StreamChunk>,
        tail_tx: mpsc::Sender<StreamChunk>,
        chain: &[ActiveToxic],
        mut backlog: Vec<StreamChunk>,
    ) {
        let head: Arc<dyn Toxic> = Arc::new(NoopToxic);
        let mut plan = vec![(HEAD_STAGE.to_string(), head)];
        for active in chain {
            let toxic: Arc<dyn Toxic> = if active.applies() {
                active.toxic.clone()
            } else {
                tracing::debug!(toxic = %active.name, "toxicity roll failed, passing through");
                Arc::new(NoopToxic)
            };
            plan.push((active.name.clone(), toxic));
        }

        let mut input = head_rx;
        let mut plan = plan.into_iter().peekable();
        while let Some((name, toxic)) = plan.next() {
            let (output, next_input) = match plan.peek() {
                Some((_, next)) => {
                    let size = capacity(&**next).max(backlog.len());
                    let (tx, rx) = mpsc::channel(size);
                    for chunk in backlog.drain(..) {
                        // Sized to fit and the receiver is held here.
                        let _ = tx.try_send(chunk);
                    }
                    (tx, Some(rx))
                }
                None => (tail_tx.clone(), None),
            };

            let (mut stub, interrupt) = ToxicStub::new(input, output);
            stub.set_state(toxic.new_state());
            self.spawn_stage(name, toxic, stub, interrupt);

            match next_input {
                Some(rx) => input = rx,
                None => break,
            }
        }
    }

    fn spawn_stage(
        &mut self,
        name: String,
        toxic: Arc<dyn Toxic>,
        stub: ToxicStub,
        interrupt: InterruptHandle,
    ) {
        let worker = tokio::spawn(run_stage(toxic.clone(), stub));
        self.stages.push(Stage {
            name,
            toxic,
            interrupt,
            worker,
        });
    }
}

impl Drop for ToxicLink {
    fn drop(&mut self) {
        // Without the reader the head channel closes and the chain unwinds.
        self.reader.abort();
    }
}

fn capacity(toxic: &dyn Toxic) -> usize {
    toxic.buffer_size().max(1)
}

async fn run_stage(toxic: Arc<dyn Toxic>, mut stub: ToxicStub) -> ToxicStub {
    toxic.pipe(&mut stub).await;
    stub
}

async fn read_loop<R>(mut reader: R, tx: mpsc::Sender<StreamChunk>, direction: StreamDirection)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_BUFFER);
    loop {
        buf.reserve(READ_BUFFER);
        match reader.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let chunk = StreamChunk::new(buf.split().freeze());
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(%direction, error = %e, "link read failed");
                break;
            }
        }
    }
    tracing::trace!(%direction, "link reader finished");
}

async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<StreamChunk>,
    direction: StreamDirection,
) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(chunk) = rx.recv().await {
        writer.write_all(&chunk.data).await?;
        written += chunk.len() as u64;
    }
    writer.shutdown().await?;
    tracing::debug!(%direction, bytes = written, "link drained");
    Ok(written)
}
