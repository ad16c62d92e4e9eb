//! Ordered stage plans.

use std::path::{Path, PathBuf};

use cf_av::StageDescriptor;

/// The stages needed to satisfy one operation, in execution order.
///
/// `sources` are files that exist before the first stage runs (staged
/// uploads, the concat manifest). Every stage input must be a source or the
/// output of an earlier stage, and the final artifact is written by exactly
/// the last stage.
#[derive(Debug, Clone, Default)]
pub struct PipelinePlan {
    sources: Vec<PathBuf>,
    stages: Vec<StageDescriptor>,
}

impl PipelinePlan {
    /// Empty plan over files that already exist.
    pub fn new(sources: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            sources: sources.into_iter().collect(),
            stages: Vec::new(),
        }
    }

    /// Append a stage to run after every stage already in the plan.
    pub fn push(&mut self, stage: StageDescriptor) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// Stages in execution order.
    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    /// Output of the last stage, if any.
    pub fn final_output(&self) -> Option<&Path> {
        self.stages.last().map(|s| s.output())
    }

    /// Check the dependency ordering of the plan.
    pub fn validate(&self) -> cf_core::Result<()> {
        let Some(final_output) = self.final_output() else {
            return Err(cf_core::Error::Internal("pipeline plan has no stages".into()));
        };

        let mut available: Vec<&Path> = self.sources.iter().map(PathBuf::as_path).collect();
        for (index, stage) in self.stages.iter().enumerate() {
            if let Some(missing) = stage
                .inputs()
                .iter()
                .find(|input| !available.contains(&input.as_path()))
            {
                return Err(cf_core::Error::Internal(format!(
                    "stage '{}' reads {} before it is produced",
                    stage.label(),
                    missing.file_name().unwrap_or_default().to_string_lossy()
                )));
            }
            if index + 1 < self.stages.len() && stage.output() == final_output {
                return Err(cf_core::Error::Internal(format!(
                    "stage '{}' writes the final artifact before the last stage",
                    stage.label()
                )));
            }
            available.push(stage.output());
        }
        Ok(())
    }
}
