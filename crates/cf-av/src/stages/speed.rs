//! Playback speed change stage.

use std::path::Path;

use super::{path_arg, StageDescriptor};

/// Largest accepted speed multiplier.
pub const MAX_SPEED: f64 = 4.0;

// Range a single `atempo` instance is guaranteed to accept.
const ATEMPO_MIN: f64 = 0.5;
const ATEMPO_MAX: f64 = 2.0;

/// A speed multiplier in `(0, 4]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedFactor(f64);

impl SpeedFactor {
    /// Accept a multiplier in `(0, MAX_SPEED]`.
    pub fn new(speed: f64) -> cf_core::Result<Self> {
        if !speed.is_finite() || speed <= 0.0 || speed > MAX_SPEED {
            return Err(cf_core::Error::validation(format!(
                "speed must be greater than 0 and at most {MAX_SPEED}, got {speed}"
            )));
        }
        Ok(Self(speed))
    }

    /// The multiplier as given.
    pub fn value(&self) -> f64 {
        self.0
    }

    /// Multiplier applied to video timestamps. Faster playback means
    /// shorter timestamps, hence the reciprocal.
    pub fn video_pts_factor(&self) -> f64 {
        1.0 / self.0
    }

    /// Multiplier applied to audio tempo: the speed itself.
    pub fn audio_tempo(&self) -> f64 {
        self.0
    }

    /// Split the audio tempo into `atempo` factors each within [0.5, 2.0]
    /// whose product is the tempo.
    pub fn atempo_chain(&self) -> Vec<f64> {
        let mut remaining = self.audio_tempo();
        let mut chain = Vec::new();
        while remaining > ATEMPO_MAX {
            chain.push(ATEMPO_MAX);
            remaining /= ATEMPO_MAX;
        }
        while remaining < ATEMPO_MIN {
            chain.push(ATEMPO_MIN);
            remaining /= ATEMPO_MIN;
        }
        chain.push(remaining);
        chain
    }

    /// The `-filter_complex` graph for this speed.
    pub fn filter(&self) -> String {
        let atempo = self
            .atempo_chain()
            .iter()
            .map(|f| format!("atempo={f:.4}"))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "[0:v]setpts={:.4}*PTS[v];[0:a]{atempo}[a]",
            self.video_pts_factor()
        )
    }
}

impl std::str::FromStr for SpeedFactor {
    type Err = cf_core::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let speed: f64 = s
            .trim()
            .parse()
            .map_err(|_| cf_core::Error::validation(format!("speed is not a number: {s:?}")))?;
        Self::new(speed)
    }
}

/// Retime both streams of `input` by `speed`.
pub fn speed_change(input: &Path, speed: SpeedFactor, output: &Path) -> StageDescriptor {
    let args = vec![
        "-y".to_string(),
        "-i".to_string(),
        path_arg(input),
        "-filter_complex".to_string(),
        speed.filter(),
        "-map".to_string(),
        "[v]".to_string(),
        "-map".to_string(),
        "[a]".to_string(),
        path_arg(output),
    ];
    StageDescriptor::new("speed", args, vec![input.to_path_buf()], output)
}
