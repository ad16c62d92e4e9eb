//! # cf-av
//!
//! External engine plumbing for the clipforge pipelines.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe, honouring configured overrides.
//! - **Command execution** ([`ToolCommand`]) -- async builder that runs one
//!   subprocess under a wall-clock timeout and classifies the result as an
//!   [`ExecutionOutcome`].
//! - **Scratch artifacts** ([`ScratchDir`], [`ArtifactScope`]) -- uniquely
//!   named transient files with guaranteed release and a leak sweeper.
//! - **Stage builders** ([`stages`]) -- pure functions producing the exact
//!   argument vector for overlay, speed change, normalization and
//!   concatenation stages.

pub mod command;
pub mod scratch;
pub mod stages;
pub mod tools;

// ---- Re-exports for convenience ----

pub use command::{ExecutionOutcome, ToolCommand};
pub use scratch::{ArtifactScope, AssetHandle, ScratchDir, SweepReport};
pub use stages::{Position, SpeedFactor, StageDescriptor, TextOverlay};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
