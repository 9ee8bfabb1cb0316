//! Latency toxic: holds each chunk back by `latency ± jitter` milliseconds.
//!
//! The delay engages only after a one-time onset period
//! (`onset_delay ± onset_jitter`) measured from the first pass of the
//! stage loop. Time a chunk already spent queued upstream is subtracted,
//! so the configured latency is the end-to-end delay, not an added one.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::stub::{ToxicState, ToxicStub};
use crate::timing;
use crate::toxic::{Toxic, ToxicError};

const BUFFER_SIZE: usize = 1024;

/// All values are milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyToxic {
    pub latency: i64,
    pub jitter: i64,
    pub onset_delay: i64,
    pub onset_jitter: i64,
}

/// Per-stub state. Starts `Pending`; the stage loop moves it to `Running`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LatencyState {
    #[default]
    Pending,
    Running {
        connection_start: Instant,
        onset: Instant,
    },
}

impl LatencyState {
    /// Initialize on first call; later calls return the stored onset.
    fn begin(&mut self, onset_delay: impl FnOnce() -> i64) -> Instant {
        match *self {
            LatencyState::Running { onset, .. } => onset,
            LatencyState::Pending => {
                let connection_start = Instant::now();
                let offset = onset_delay();
                let onset = if offset >= 0 {
                    connection_start + timing::as_wait(offset)
                } else {
                    connection_start
                        .checked_sub(timing::as_wait(offset.saturating_neg()))
                        .unwrap_or(connection_start)
                };
                *self = LatencyState::Running {
                    connection_start,
                    onset,
                };
                onset
            }
        }
    }
}

impl LatencyToxic {
    pub fn new(latency: i64, jitter: i64) -> Self {
        Self {
            latency,
            jitter,
            ..Self::default()
        }
    }

    pub fn with_onset(mut self, onset_delay: i64, onset_jitter: i64) -> Self {
        self.onset_delay = onset_delay;
        self.onset_jitter = onset_jitter;
        self
    }

    fn onset_delay(&self) -> i64 {
        timing::delay(self.onset_delay, self.onset_jitter)
    }

    fn chunk_delay(&self) -> i64 {
        timing::delay(self.latency, self.jitter)
    }

    fn validate(self) -> Result<Self, ToxicError> {
        let fields = [
            ("latency", self.latency),
            ("jitter", self.jitter),
            ("onset_delay", self.onset_delay),
            ("onset_jitter", self.onset_jitter),
        ];
        match fields.iter().find(|(_, v)| *v < 0) {
            Some((field, v)) => Err(ToxicError::InvalidAttributes {
                kind: "latency".to_string(),
                reason: format!("{field} must not be negative, got {v}"),
            }),
            None => Ok(self),
        }
    }

    async fn run(&self, stub: &mut ToxicStub) {
        let onset = match stub.state_mut::<LatencyState>() {
            Some(state) => state.begin(|| self.onset_delay()),
            None => {
                let mut state = LatencyState::default();
                let onset = state.begin(|| self.onset_delay());
                stub.set_state(Some(Box::new(state)));
                onset
            }
        };

        loop {
            tokio::select! {
                biased;

                _ = stub.interrupt.recv() => return,

                chunk = stub.input.recv() => {
                    let Some(mut chunk) = chunk else {
                        stub.close();
                        return;
                    };

                    let now = Instant::now();
                    if now < onset {
                        if !stub.forward(chunk).await {
                            return;
                        }
                        continue;
                    }

                    let since_arrival = now.saturating_duration_since(chunk.timestamp);
                    let sleep = timing::as_wait(self.chunk_delay()).saturating_sub(since_arrival);

                    tokio::select! {
                        biased;

                        _ = stub.interrupt.recv() => {
                            // Skip the rest of the delay but keep the data.
                            stub.forward(chunk).await;
                            return;
                        }

                        _ = tokio::time::sleep(sleep) => {
                            chunk.timestamp += sleep;
                            if !stub.forward(chunk).await {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

impl Toxic for LatencyToxic {
    fn new_state(&self) -> Option<ToxicState> {
        Some(Box::new(LatencyState::Pending))
    }

    fn buffer_size(&self) -> usize {
        BUFFER_SIZE
    }

    fn pipe<'a>(&'a self, stub: &'a mut ToxicStub) -> BoxFuture<'a, ()> {
        self.run(stub).boxed()
    }

    fn configure(&self, attributes: serde_json::Value) -> Result<Arc<dyn Toxic>, ToxicError> {
        let toxic: LatencyToxic =
            serde_json::from_value(attributes).map_err(|e| ToxicError::InvalidAttributes {
                kind: "latency".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Arc::new(toxic.validate()?))
    }

    fn attributes(&self) -> serde_json::Value {
        serde_json::json!({
            "latency": self.latency,
            "jitter": self.jitter,
            "onset_delay": self.onset_delay,
            "onset_jitter": self.onset_jitter,
        })
    }
}
