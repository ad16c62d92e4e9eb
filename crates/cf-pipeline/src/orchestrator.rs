//! Operation entry points and stage sequencing.
//!
//! Each operation follows the same lifecycle:
//!
//! 1. **Staging** -- uploads are written into the scratch directory and every
//!    output name is reserved, all inside one [`ArtifactScope`].
//! 2. **Executing** -- the stages of the [`PipelinePlan`] run strictly in
//!    order; the first stage that does not exit cleanly aborts the rest.
//! 3. **Succeeded** / **Failed** -- on success the final artifact is taken
//!    out of the scope; in both cases dropping the scope deletes everything
//!    else that was created.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use cf_av::scratch::extension_of;
use cf_av::stages::{self, Position, SpeedFactor, StageDescriptor, TextOverlay};
use cf_av::{ArtifactScope, AssetHandle, ExecutionOutcome, ScratchDir};
use cf_core::error::diagnostic_excerpt;
use cf_core::{Error, Result};

use crate::plan::PipelinePlan;
use crate::runner::StageRunner;

/// Fewest clips a merge accepts.
pub const MIN_MERGE_CLIPS: usize = 2;

/// Raw bytes of one caller-supplied asset plus its original filename.
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Bytes,
    pub filename: Option<String>,
}

impl Upload {
    pub fn new(bytes: impl Into<Bytes>, filename: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            filename,
        }
    }

    /// Extension used for the staged copy, derived from the filename.
    pub fn extension(&self) -> String {
        extension_of(self.filename.as_deref())
    }
}

/// Lifecycle state of one invocation, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Staging,
    Executing { index: usize },
    Succeeded,
    Failed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Staging => f.write_str("staging"),
            PipelineState::Executing { index } => write!(f, "executing stage {index}"),
            PipelineState::Succeeded => f.write_str("succeeded"),
            PipelineState::Failed => f.write_str("failed"),
        }
    }
}

/// Runs clipforge operations against a shared scratch directory.
///
/// Invocations share nothing but the scratch directory, so one
/// `VideoPipeline` can serve any number of concurrent callers.
#[derive(Clone)]
pub struct VideoPipeline {
    runner: Arc<dyn StageRunner>,
    scratch: ScratchDir,
    stage_timeout: Duration,
}

impl VideoPipeline {
    /// Pipeline running stages through `runner`, each bounded by
    /// `stage_timeout`.
    pub fn new(runner: Arc<dyn StageRunner>, scratch: ScratchDir, stage_timeout: Duration) -> Self {
        Self {
            runner,
            scratch,
            stage_timeout,
        }
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    pub fn stage_timeout(&self) -> Duration {
        self.stage_timeout
    }

    /// Burn a text overlay into `video`.
    pub async fn add_text(&self, video: Upload, overlay: &TextOverlay) -> Result<AssetHandle> {
        let mut scope = self.scratch.scope();
        let result = self.stage_text(&mut scope, &video, overlay).await;
        self.conclude("add-text", &mut scope, result)
    }

    /// Composite `image` over `video` at `position`.
    pub async fn add_image(
        &self,
        video: Upload,
        image: Upload,
        position: Position,
    ) -> Result<AssetHandle> {
        let mut scope = self.scratch.scope();
        let result = self.stage_image(&mut scope, &video, &image, position).await;
        self.conclude("add-image", &mut scope, result)
    }

    /// Change the playback speed of `video` by `speed`, which must lie in
    /// `(0, 4]`. Out-of-range values fail before anything is staged.
    pub async fn change_speed(&self, video: Upload, speed: f64) -> Result<AssetHandle> {
        let speed = SpeedFactor::new(speed)?;
        let mut scope = self.scratch.scope();
        let result = self.stage_speed(&mut scope, &video, speed).await;
        self.conclude("change-speed", &mut scope, result)
    }

    /// Normalize every clip and concatenate them in order.
    pub async fn merge(&self, clips: Vec<Upload>) -> Result<AssetHandle> {
        if clips.len() < MIN_MERGE_CLIPS {
            return Err(Error::validation(format!(
                "at least {MIN_MERGE_CLIPS} videos are required for merging, got {}",
                clips.len()
            )));
        }
        let mut scope = self.scratch.scope();
        let result = self.stage_merge(&mut scope, &clips).await;
        self.conclude("merge", &mut scope, result)
    }

    async fn stage_text(
        &self,
        scope: &mut ArtifactScope,
        video: &Upload,
        overlay: &TextOverlay,
    ) -> Result<AssetHandle> {
        tracing::debug!("add-text: {}", PipelineState::Staging);
        let input = scope.materialize(&video.bytes, "input", &video.extension()).await?;
        let output = scope.allocate("text", ".mp4");

        let mut plan = PipelinePlan::new([input.path().to_path_buf()]);
        plan.push(self.timed(stages::text_overlay(input.path(), overlay, output.path())));
        self.execute("add-text", &plan).await?;
        Ok(output)
    }

    async fn stage_image(
        &self,
        scope: &mut ArtifactScope,
        video: &Upload,
        image: &Upload,
        position: Position,
    ) -> Result<AssetHandle> {
        tracing::debug!("add-image: {}", PipelineState::Staging);
        let video_file = scope.materialize(&video.bytes, "video", &video.extension()).await?;
        let image_file = scope.materialize(&image.bytes, "overlay", &image.extension()).await?;
        let output = scope.allocate("overlay", ".mp4");

        let mut plan = PipelinePlan::new([
            video_file.path().to_path_buf(),
            image_file.path().to_path_buf(),
        ]);
        plan.push(self.timed(stages::image_overlay(
            video_file.path(),
            image_file.path(),
            position,
            output.path(),
        )));
        self.execute("add-image", &plan).await?;
        Ok(output)
    }

    async fn stage_speed(
        &self,
        scope: &mut ArtifactScope,
        video: &Upload,
        speed: SpeedFactor,
    ) -> Result<AssetHandle> {
        tracing::debug!("change-speed: {}", PipelineState::Staging);
        let input = scope.materialize(&video.bytes, "input", &video.extension()).await?;
        let output = scope.allocate("speed", ".mp4");

        let mut plan = PipelinePlan::new([input.path().to_path_buf()]);
        plan.push(self.timed(stages::speed_change(input.path(), speed, output.path())));
        self.execute("change-speed", &plan).await?;
        Ok(output)
    }

    async fn stage_merge(&self, scope: &mut ArtifactScope, clips: &[Upload]) -> Result<AssetHandle> {
        tracing::debug!("merge: {} ({} clips)", PipelineState::Staging, clips.len());

        let mut inputs = Vec::with_capacity(clips.len());
        for (i, clip) in clips.iter().enumerate() {
            let handle = scope
                .materialize(&clip.bytes, &format!("merge_{i}"), &clip.extension())
                .await?;
            tracing::debug!("Staged clip {i} as {} ({} bytes)", handle.name(), clip.bytes.len());
            inputs.push(handle);
        }

        let normalized: Vec<AssetHandle> = (0..clips.len())
            .map(|i| scope.allocate(&format!("normalized_{i}"), ".mp4"))
            .collect();
        let normalized_paths: Vec<PathBuf> =
            normalized.iter().map(|h| h.path().to_path_buf()).collect();

        // Normalized names are reserved up front, so the manifest can be
        // written during staging.
        let manifest_text = stages::concat_manifest(&normalized_paths);
        let manifest = scope
            .materialize(manifest_text.as_bytes(), "filelist", ".txt")
            .await?;
        let output = scope.allocate("merged", ".mp4");

        let mut sources: Vec<PathBuf> = inputs.iter().map(|h| h.path().to_path_buf()).collect();
        sources.push(manifest.path().to_path_buf());

        let mut plan = PipelinePlan::new(sources);
        for (i, (input, target)) in inputs.iter().zip(&normalized).enumerate() {
            plan.push(self.timed(stages::normalize_clip(i, input.path(), target.path())));
        }
        plan.push(self.timed(stages::concat(
            manifest.path(),
            &normalized_paths,
            output.path(),
        )));

        self.execute("merge", &plan).await?;
        Ok(output)
    }

    fn timed(&self, stage: StageDescriptor) -> StageDescriptor {
        stage.with_timeout(self.stage_timeout)
    }

    /// Run every stage of `plan` in order, stopping at the first failure.
    async fn execute(&self, operation: &str, plan: &PipelinePlan) -> Result<()> {
        plan.validate()?;
        let total = plan.stages().len();

        for (index, stage) in plan.stages().iter().enumerate() {
            tracing::debug!(
                "{operation}: {} ({}/{total}, '{}')",
                PipelineState::Executing { index },
                index + 1,
                stage.label()
            );

            let outcome = self.runner.run(stage).await;
            self.check_outcome(stage, outcome)?;

            if !stage.output().is_file() {
                return Err(Error::StageExecution {
                    stage: stage.label().to_string(),
                    exit_code: Some(0),
                    excerpt: "engine reported success but wrote no output".into(),
                });
            }
            tracing::info!("{operation}: stage '{}' completed", stage.label());
        }

        Ok(())
    }

    /// Translate a runner outcome into the error taxonomy.
    fn check_outcome(&self, stage: &StageDescriptor, outcome: ExecutionOutcome) -> Result<()> {
        match outcome {
            ExecutionOutcome::Completed {
                exit_code: Some(0), ..
            } => Ok(()),
            ExecutionOutcome::Completed { exit_code, output } => {
                tracing::error!("Stage '{}' failed with {exit_code:?}", stage.label());
                tracing::debug!("Stage '{}' output:\n{output}", stage.label());
                Err(Error::StageExecution {
                    stage: stage.label().to_string(),
                    exit_code,
                    excerpt: diagnostic_excerpt(&output, Some(self.scratch.root())),
                })
            }
            ExecutionOutcome::TimedOut => Err(Error::StageTimeout {
                stage: stage.label().to_string(),
                timeout: stage.timeout(),
            }),
            ExecutionOutcome::LaunchFailed(e) => Err(Error::launch(self.runner.engine(), e.to_string())),
        }
    }

    /// Hand the final artifact to the caller on success. Whatever else the
    /// scope still owns is deleted when it drops.
    fn conclude(
        &self,
        operation: &str,
        scope: &mut ArtifactScope,
        result: Result<AssetHandle>,
    ) -> Result<AssetHandle> {
        match result {
            Ok(handle) => {
                scope.keep(&handle);
                tracing::info!(
                    "{operation}: {} -> {}",
                    PipelineState::Succeeded,
                    handle.name()
                );
                Ok(handle)
            }
            Err(e) => {
                tracing::warn!(
                    "{operation}: {} ({} artifacts to release): {e}",
                    PipelineState::Failed,
                    scope.owned().len()
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    type Script = Box<dyn Fn(&StageDescriptor) -> Option<ExecutionOutcome> + Send + Sync>;

    /// Records stage labels and writes each stage's output unless the script
    /// returns an outcome for it.
    struct FakeRunner {
        calls: Mutex<Vec<String>>,
        script: Script,
    }

    impl FakeRunner {
        fn succeeding() -> Arc<Self> {
            Self::scripted(|_| None)
        }

        fn scripted(
            script: impl Fn(&StageDescriptor) -> Option<ExecutionOutcome> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                script: Box::new(script),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StageRunner for FakeRunner {
        fn engine(&self) -> &str {
            "fake-engine"
        }

        async fn run(&self, stage: &StageDescriptor) -> ExecutionOutcome {
            self.calls.lock().unwrap().push(stage.label().to_string());

            if let Some(missing) = stage.inputs().iter().find(|p| !p.is_file()) {
                return ExecutionOutcome::Completed {
                    exit_code: Some(1),
                    output: format!("{}: No such file or directory", missing.display()),
                };
            }
            if let Some(outcome) = (self.script)(stage) {
                return outcome;
            }
            std::fs::write(stage.output(), stage.label()).unwrap();
            ExecutionOutcome::Completed {
                exit_code: Some(0),
                output: String::new(),
            }
        }
    }

    fn pipeline(runner: Arc<FakeRunner>) -> (tempfile::TempDir, VideoPipeline) {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path().join("temp")).unwrap();
        let pipeline = VideoPipeline::new(runner, scratch, Duration::from_secs(5));
        (dir, pipeline)
    }

    fn leftovers(pipeline: &VideoPipeline) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(pipeline.scratch().root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    fn clip(name: &str) -> Upload {
        Upload::new(Bytes::from_static(b"not really a video"), Some(name.to_string()))
    }

    #[tokio::test]
    async fn add_text_leaves_only_final_artifact() {
        let runner = FakeRunner::succeeding();
        let (_dir, pipeline) = pipeline(runner.clone());
        let overlay = TextOverlay::new("it's: ok", Position::Center, 24, "white").unwrap();

        let handle = pipeline.add_text(clip("a.mov"), &overlay).await.unwrap();

        assert_eq!(runner.calls(), vec!["text"]);
        assert!(handle.name().starts_with("text_"));
        assert_eq!(leftovers(&pipeline), vec![handle.name().to_string()]);
    }

    #[tokio::test]
    async fn add_image_leaves_only_final_artifact() {
        let runner = FakeRunner::succeeding();
        let (_dir, pipeline) = pipeline(runner.clone());

        let handle = pipeline
            .add_image(clip("a.mp4"), clip("logo.png"), Position::BottomRight)
            .await
            .unwrap();

        assert_eq!(runner.calls(), vec!["overlay"]);
        assert_eq!(leftovers(&pipeline), vec![handle.name().to_string()]);
    }

    #[tokio::test]
    async fn change_speed_out_of_range_launches_nothing() {
        let runner = FakeRunner::succeeding();
        let (_dir, pipeline) = pipeline(runner.clone());

        for bad in [0.0, -2.0, 4.5, f64::NAN] {
            let err = pipeline.change_speed(clip("a.mp4"), bad).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
        assert!(runner.calls().is_empty());
        assert!(leftovers(&pipeline).is_empty());
    }

    #[tokio::test]
    async fn change_speed_succeeds() {
        let runner = FakeRunner::succeeding();
        let (_dir, pipeline) = pipeline(runner.clone());

        let handle = pipeline.change_speed(clip("a.mp4"), 1.5).await.unwrap();
        assert_eq!(runner.calls(), vec!["speed"]);
        assert_eq!(leftovers(&pipeline), vec![handle.name().to_string()]);
    }

    #[tokio::test]
    async fn merge_normalizes_every_clip_before_concat() {
        let runner = FakeRunner::succeeding();
        let (_dir, pipeline) = pipeline(runner.clone());

        let handle = pipeline
            .merge(vec![clip("a.mp4"), clip("b.mov"), clip("c")])
            .await
            .unwrap();

        assert_eq!(
            runner.calls(),
            vec!["normalize[0]", "normalize[1]", "normalize[2]", "concat"]
        );
        assert!(handle.name().starts_with("merged_"));
        assert_eq!(leftovers(&pipeline), vec![handle.name().to_string()]);
    }

    #[tokio::test]
    async fn merge_requires_two_clips() {
        let runner = FakeRunner::succeeding();
        let (_dir, pipeline) = pipeline(runner.clone());

        let err = pipeline.merge(vec![clip("a.mp4")]).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = pipeline.merge(Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert!(runner.calls().is_empty());
        assert!(leftovers(&pipeline).is_empty());
    }

    #[tokio::test]
    async fn failed_normalization_skips_concat_and_cleans_up() {
        let runner = FakeRunner::scripted(|stage| {
            (stage.label() == "normalize[1]").then(|| ExecutionOutcome::Completed {
                exit_code: Some(1),
                output: format!("{}: Invalid data found", stage.inputs()[0].display()),
            })
        });
        let (_dir, pipeline) = pipeline(runner.clone());

        let err = pipeline
            .merge(vec![clip("a.mp4"), clip("b.mp4"), clip("c.mp4")])
            .await
            .unwrap_err();

        assert_eq!(runner.calls(), vec!["normalize[0]", "normalize[1]"]);
        match &err {
            Error::StageExecution {
                stage,
                exit_code,
                excerpt,
            } => {
                assert_eq!(stage, "normalize[1]");
                assert_eq!(*exit_code, Some(1));
                assert!(excerpt.starts_with("<scratch>/merge_1_"));
                assert!(excerpt.ends_with("Invalid data found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let root = pipeline.scratch().root().to_string_lossy().to_string();
        assert!(!err.to_string().contains(&root));
        assert!(leftovers(&pipeline).is_empty());
    }

    #[tokio::test]
    async fn partial_final_output_is_removed_on_failure() {
        let runner = FakeRunner::scripted(|stage| {
            (stage.label() == "concat").then(|| {
                std::fs::write(stage.output(), b"truncated").unwrap();
                ExecutionOutcome::Completed {
                    exit_code: None,
                    output: "killed".into(),
                }
            })
        });
        let (_dir, pipeline) = pipeline(runner.clone());

        let err = pipeline
            .merge(vec![clip("a.mp4"), clip("b.mp4")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StageExecution { exit_code: None, .. }));
        assert_eq!(runner.calls().len(), 3);
        assert!(leftovers(&pipeline).is_empty());
    }

    #[tokio::test]
    async fn timeout_is_reported_and_cleaned_up() {
        let runner = FakeRunner::scripted(|_| Some(ExecutionOutcome::TimedOut));
        let (_dir, pipeline) = pipeline(runner.clone());

        let err = pipeline.change_speed(clip("a.mp4"), 2.0).await.unwrap_err();
        match err {
            Error::StageTimeout { stage, timeout } => {
                assert_eq!(stage, "speed");
                assert_eq!(timeout, Duration::from_secs(5));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(leftovers(&pipeline).is_empty());
    }

    #[tokio::test]
    async fn launch_failure_names_the_engine() {
        let runner = FakeRunner::scripted(|_| {
            Some(ExecutionOutcome::LaunchFailed(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No such file or directory",
            )))
        });
        let (_dir, pipeline) = pipeline(runner.clone());

        let overlay = TextOverlay::new("hi", Position::TopLeft, 24, "white").unwrap();
        let err = pipeline.add_text(clip("a.mp4"), &overlay).await.unwrap_err();
        match err {
            Error::Launch { tool, .. } => assert_eq!(tool, "fake-engine"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(leftovers(&pipeline).is_empty());
    }

    #[tokio::test]
    async fn success_without_output_is_a_stage_failure() {
        let runner = FakeRunner::scripted(|_| {
            Some(ExecutionOutcome::Completed {
                exit_code: Some(0),
                output: String::new(),
            })
        });
        let (_dir, pipeline) = pipeline(runner.clone());

        let err = pipeline.change_speed(clip("a.mp4"), 0.5).await.unwrap_err();
        assert!(matches!(err, Error::StageExecution { exit_code: Some(0), .. }));
        assert!(leftovers(&pipeline).is_empty());
    }

    #[tokio::test]
    async fn concurrent_invocations_do_not_collide() {
        let runner = FakeRunner::succeeding();
        let (_dir, pipeline) = pipeline(runner.clone());

        let (a, b) = tokio::join!(
            pipeline.change_speed(clip("a.mp4"), 2.0),
            pipeline.merge(vec![clip("b.mp4"), clip("c.mp4")]),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let mut expected = vec![a.name().to_string(), b.name().to_string()];
        expected.sort();
        assert_eq!(leftovers(&pipeline), expected);
    }

    #[test]
    fn upload_extension_defaults() {
        assert_eq!(clip("x.MOV").extension(), ".mov");
        assert_eq!(Upload::new(Vec::<u8>::new(), None).extension(), ".mp4");
    }
}
