//! Per-producer export and room-level post-processing (spec.md §4.F).

pub mod controller;
pub mod export;
pub mod postprocess;
pub mod sdp;

pub use controller::RecordingController;
pub use export::{Export, ExportData};
