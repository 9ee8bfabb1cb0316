//! sluice-core — stream chunks, the toxic contract, the built-in toxics
//! and the registry that names them. Every other sluice crate depends on this one.

pub mod chunk;
pub mod config;
pub mod latency;
pub mod noop;
pub mod registry;
pub mod stub;
pub mod timing;
pub mod toxic;

pub use chunk::StreamChunk;
pub use latency::LatencyToxic;
pub use noop::NoopToxic;
pub use registry::ToxicRegistry;
pub use stub::{InterruptHandle, ToxicStub};
pub use toxic::{ActiveToxic, StreamDirection, Toxic, ToxicConfig, ToxicError, ToxicPatch};
