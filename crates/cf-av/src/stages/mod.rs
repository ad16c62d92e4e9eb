//! Pipeline stage builders.
//!
//! Every builder is a pure function from operation parameters to a
//! [`StageDescriptor`]: the argument vector for one ffmpeg invocation plus
//! the files it reads and writes. Nothing here touches the filesystem or
//! spawns a process.

mod merge;
mod overlay;
mod speed;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::command::DEFAULT_TIMEOUT;

pub use merge::{concat, concat_manifest, normalize_clip, CANONICAL_FPS, CANONICAL_HEIGHT, CANONICAL_WIDTH};
pub use overlay::{escape_drawtext, escape_filtergraph, image_overlay, text_overlay, TextOverlay, OVERLAY_IMAGE_WIDTH};
pub use speed::{speed_change, SpeedFactor, MAX_SPEED};

/// One external engine invocation.
///
/// Descriptors are built fresh per invocation and never mutated after
/// construction; the runner only reads them.
#[derive(Debug, Clone, PartialEq)]
pub struct StageDescriptor {
    label: String,
    args: Vec<String>,
    inputs: Vec<PathBuf>,
    output: PathBuf,
    timeout: Duration,
}

impl StageDescriptor {
    pub(crate) fn new(
        label: impl Into<String>,
        args: Vec<String>,
        inputs: Vec<PathBuf>,
        output: &Path,
    ) -> Self {
        Self {
            label: label.into(),
            args,
            inputs,
            output: output.to_path_buf(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Replace the wall-clock ceiling for this stage.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Short name used in logs and errors, e.g. `normalize[1]`.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Arguments passed to the engine, excluding the program itself.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Files the stage reads.
    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    /// File the stage writes.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Wall-clock ceiling for this stage.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Placement keyword for overlays.
///
/// Text and image overlays share the keywords but map them to different
/// coordinate expressions and use different defaults; see
/// [`Position::text_expression`] and [`Position::overlay_expression`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

impl Position {
    /// Every placement, in keyword table order.
    pub const ALL: [Position; 5] = [
        Position::TopLeft,
        Position::TopRight,
        Position::BottomLeft,
        Position::BottomRight,
        Position::Center,
    ];

    /// Default placement for text overlays.
    pub const TEXT_DEFAULT: Position = Position::BottomLeft;

    /// Default placement for image overlays.
    pub const OVERLAY_DEFAULT: Position = Position::TopLeft;

    /// Parse a keyword (case-insensitive). Unknown keywords yield `None`;
    /// callers substitute their own default.
    pub fn parse(keyword: &str) -> Option<Self> {
        match keyword.trim().to_ascii_lowercase().as_str() {
            "top-left" => Some(Position::TopLeft),
            "top-right" => Some(Position::TopRight),
            "bottom-left" => Some(Position::BottomLeft),
            "bottom-right" => Some(Position::BottomRight),
            "center" => Some(Position::Center),
            _ => None,
        }
    }

    /// Parse a text-overlay keyword, falling back to [`Position::TEXT_DEFAULT`].
    pub fn for_text(keyword: Option<&str>) -> Self {
        keyword.and_then(Self::parse).unwrap_or(Self::TEXT_DEFAULT)
    }

    /// Parse an image-overlay keyword, falling back to [`Position::OVERLAY_DEFAULT`].
    pub fn for_overlay(keyword: Option<&str>) -> Self {
        keyword.and_then(Self::parse).unwrap_or(Self::OVERLAY_DEFAULT)
    }

    /// The keyword that selects this placement.
    pub fn keyword(&self) -> &'static str {
        match self {
            Position::TopLeft => "top-left",
            Position::TopRight => "top-right",
            Position::BottomLeft => "bottom-left",
            Position::BottomRight => "bottom-right",
            Position::Center => "center",
        }
    }

    /// `drawtext` coordinates, in terms of text width/height (`tw`/`th`).
    pub fn text_expression(&self) -> &'static str {
        match self {
            Position::TopLeft => "x=10:y=10",
            Position::TopRight => "x=w-tw-10:y=10",
            Position::BottomLeft => "x=10:y=h-th-10",
            Position::BottomRight => "x=w-tw-10:y=h-th-10",
            Position::Center => "x=(w-tw)/2:y=(h-th)/2",
        }
    }

    /// `overlay` filter coordinates, in terms of the main and overlay sizes.
    pub fn overlay_expression(&self) -> &'static str {
        match self {
            Position::TopLeft => "10:10",
            Position::TopRight => "main_w-overlay_w-10:10",
            Position::BottomLeft => "10:main_h-overlay_h-10",
            Position::BottomRight => "main_w-overlay_w-10:main_h-overlay_h-10",
            Position::Center => "(main_w-overlay_w)/2:(main_h-overlay_h)/2",
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
