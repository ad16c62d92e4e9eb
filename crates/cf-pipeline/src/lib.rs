//! # cf-pipeline
//!
//! Orchestration of the clipforge operations.
//!
//! This crate provides:
//!
//! - **[`PipelinePlan`]** -- the ordered stages of one operation, checked so
//!   every stage only reads files that exist by the time it runs.
//! - **[`StageRunner`]** trait -- the seam between sequencing and the engine
//!   subprocess, with [`FfmpegRunner`] as the real implementation.
//! - **[`VideoPipeline`]** -- one entry point per operation (text overlay,
//!   image overlay, speed change, merge) that stages uploads, runs the plan,
//!   and guarantees that only the final artifact outlives a successful call.

pub mod orchestrator;
pub mod plan;
pub mod runner;

pub use orchestrator::{PipelineState, Upload, VideoPipeline, MIN_MERGE_CLIPS};
pub use plan::PipelinePlan;
pub use runner::{FfmpegRunner, StageRunner};
