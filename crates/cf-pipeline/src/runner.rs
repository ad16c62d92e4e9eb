//! The seam between stage sequencing and the engine subprocess.

use std::path::PathBuf;

use async_trait::async_trait;

use cf_av::{ExecutionOutcome, StageDescriptor, ToolCommand, ToolRegistry};

/// Executes one stage and reports how it ended.
///
/// The orchestrator only depends on this trait, so sequencing and cleanup
/// can be exercised without an engine installed.
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Engine name reported in launch failures.
    fn engine(&self) -> &str;

    /// Run `stage` to completion or until its timeout expires.
    async fn run(&self, stage: &StageDescriptor) -> ExecutionOutcome;
}

/// Runs stages with the ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    program: PathBuf,
}

impl FfmpegRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use the ffmpeg located by `tools`, or the bare name if discovery did
    /// not find one (the launch then fails with a clear error).
    pub fn from_registry(tools: &ToolRegistry) -> Self {
        Self::new(tools.program("ffmpeg"))
    }
}

#[async_trait]
impl StageRunner for FfmpegRunner {
    fn engine(&self) -> &str {
        "ffmpeg"
    }

    async fn run(&self, stage: &StageDescriptor) -> ExecutionOutcome {
        let mut cmd = ToolCommand::new(self.program.clone());
        cmd.args(stage.args().iter().cloned())
            .timeout(stage.timeout());
        cmd.run().await
    }
}
