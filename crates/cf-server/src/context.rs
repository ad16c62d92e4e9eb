//! Application context shared across all route handlers via Axum state.

use std::sync::Arc;

use cf_av::{ScratchDir, ToolRegistry};
use cf_core::config::Config;
use cf_pipeline::{FfmpegRunner, StageRunner, VideoPipeline};

use crate::middleware::rate_limit::{AdmissionControl, AllowAll, KeyedAdmission};

/// Central application context.
///
/// Cloning is cheap: everything is behind an `Arc` or is itself a cheap
/// handle.
#[derive(Clone)]
pub struct AppContext {
    /// Immutable application configuration snapshot.
    pub config: Arc<Config>,
    /// External tool registry.
    pub tools: Arc<ToolRegistry>,
    /// Operation entry points backed by the scratch directory.
    pub pipeline: VideoPipeline,
    /// Per-identity admission check for the processing routes.
    pub admission: Arc<dyn AdmissionControl>,
}

impl AppContext {
    /// Build a context that runs stages with the discovered ffmpeg.
    pub fn new(config: Config) -> cf_core::Result<Self> {
        let tools = ToolRegistry::discover(&config.tools);
        let runner: Arc<dyn StageRunner> = Arc::new(FfmpegRunner::from_registry(&tools));
        Self::build(config, tools, runner)
    }

    /// Build a context around a caller-supplied stage runner.
    pub fn with_runner(config: Config, runner: Arc<dyn StageRunner>) -> cf_core::Result<Self> {
        let tools = ToolRegistry::discover(&config.tools);
        Self::build(config, tools, runner)
    }

    fn build(
        config: Config,
        tools: ToolRegistry,
        runner: Arc<dyn StageRunner>,
    ) -> cf_core::Result<Self> {
        let scratch = ScratchDir::new(&config.scratch.dir)?;
        tracing::info!("Scratch directory: {}", scratch.root().display());

        let pipeline = VideoPipeline::new(runner, scratch, config.pipeline.stage_timeout());

        let admission: Arc<dyn AdmissionControl> = if config.rate_limit.enabled {
            Arc::new(KeyedAdmission::from_config(&config.rate_limit))
        } else {
            tracing::info!("Rate limiting disabled");
            Arc::new(AllowAll)
        };

        Ok(Self {
            config: Arc::new(config),
            tools: Arc::new(tools),
            pipeline,
            admission,
        })
    }
}
