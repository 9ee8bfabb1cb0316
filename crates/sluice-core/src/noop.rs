//! Noop toxic: forwards every chunk untouched.
//!
//! Sits at the head of every chain so the socket reader never has to be
//! rewired, and stands in for a toxic whose toxicity roll failed.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::stub::ToxicStub;
use crate::toxic::{Toxic, ToxicError};

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopToxic;

impl NoopToxic {
    /// The pass-through loop, usable on any stub.
    pub async fn pass_through(stub: &mut ToxicStub) {
        loop {
            tokio::select! {
                biased;

                _ = stub.interrupt.recv() => return,

                chunk = stub.input.recv() => match chunk {
                    Some(chunk) => {
                        if !stub.forward(chunk).await {
                            return;
                        }
                    }
                    None => {
                        stub.close();
                        return;
                    }
                },
            }
        }
    }
}

impl Toxic for NoopToxic {
    fn pipe<'a>(&'a self, stub: &'a mut ToxicStub) -> BoxFuture<'a, ()> {
        Self::pass_through(stub).boxed()
    }

    fn configure(&self, _attributes: serde_json::Value) -> Result<Arc<dyn Toxic>, ToxicError> {
        Ok(Arc::new(NoopToxic))
    }

    fn attributes(&self) -> serde_json::Value {
        serde_json::json!({})
    }
}
