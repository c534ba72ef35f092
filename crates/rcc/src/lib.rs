//! Realtime Conferencing Core: the in-process control plane of a WebRTC SFU.
//!
//! See `registry` for the resource graph, `worker`/`rpc` for the subprocess
//! adapter and its typed RPC layer, `ortc` for RTP capability negotiation,
//! `graph` for the router/transport/producer/consumer entities built on top
//! of those, and `recording` for the per-producer export and post-processing
//! pipeline.

pub mod collaborators;
pub mod error;
pub mod graph;
pub mod ortc;
pub mod recording;
pub mod registry;
pub mod rpc;
pub mod worker;

pub use error::RccError;
