//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds an [`AppContext`] over a temporary
//! scratch directory with a [`FakeRunner`] standing in for ffmpeg, and can
//! start Axum on a random port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use cf_av::{ExecutionOutcome, StageDescriptor};
use cf_core::config::Config;
use cf_pipeline::StageRunner;
use cf_server::context::AppContext;
use cf_server::router::build_router;

/// Outcome the fake engine reports for every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehavior {
    /// Write the stage output and exit 0.
    Succeed,
    /// Exit 1 with a diagnostic mentioning the stage's first input path.
    Fail,
    /// Report a timeout.
    TimeOut,
}

/// Stage runner that records stage labels instead of launching ffmpeg.
pub struct FakeRunner {
    behavior: FakeBehavior,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new(behavior: FakeBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StageRunner for FakeRunner {
    fn engine(&self) -> &str {
        "ffmpeg"
    }

    async fn run(&self, stage: &StageDescriptor) -> ExecutionOutcome {
        self.calls.lock().unwrap().push(stage.label().to_string());
        match self.behavior {
            FakeBehavior::Succeed => {
                std::fs::write(stage.output(), b"fake video").unwrap();
                ExecutionOutcome::Completed {
                    exit_code: Some(0),
                    output: String::new(),
                }
            }
            FakeBehavior::Fail => ExecutionOutcome::Completed {
                exit_code: Some(1),
                output: format!(
                    "{}: Invalid data found when processing input",
                    stage.inputs()[0].display()
                ),
            },
            FakeBehavior::TimeOut => ExecutionOutcome::TimedOut,
        }
    }
}

/// Test harness wrapping an [`AppContext`] with its own scratch directory.
pub struct TestHarness {
    pub ctx: AppContext,
    pub runner: Arc<FakeRunner>,
    _scratch: tempfile::TempDir,
}

impl TestHarness {
    /// Create a harness whose fake engine always succeeds.
    pub fn new() -> Self {
        Self::with(Config::default(), FakeBehavior::Succeed)
    }

    pub fn with(mut config: Config, behavior: FakeBehavior) -> Self {
        let scratch = tempfile::tempdir().expect("failed to create scratch dir");
        config.scratch.dir = scratch.path().to_path_buf();

        let runner = FakeRunner::new(behavior);
        let ctx = AppContext::with_runner(config, runner.clone())
            .expect("failed to build context");

        Self {
            ctx,
            runner,
            _scratch: scratch,
        }
    }

    /// Start an Axum server with default config on a random port.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::with_server_config(Config::default(), FakeBehavior::Succeed).await
    }

    /// Start an Axum server with custom config on a random port.
    pub async fn with_server_config(config: Config, behavior: FakeBehavior) -> (Self, SocketAddr) {
        let harness = Self::with(config, behavior);
        let app = build_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .ok();
        });

        (harness, addr)
    }

    /// Names of every file currently in the scratch directory.
    pub fn scratch_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.ctx.pipeline.scratch().root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }
}

/// A multipart file part.
pub fn file_part(name: &str, bytes: &'static [u8]) -> reqwest::multipart::Part {
    reqwest::multipart::Part::bytes(bytes).file_name(name.to_string())
}
