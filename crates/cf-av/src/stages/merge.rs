//! Merge stages: per-clip normalization and lossless concatenation.

use std::path::{Path, PathBuf};

use super::{path_arg, StageDescriptor};

pub const CANONICAL_FPS: u32 = 30;
pub const CANONICAL_WIDTH: u32 = 1920;
pub const CANONICAL_HEIGHT: u32 = 1080;

// Mono so that any real audio track in the clip wins default stream
// selection; `-ac 2` upmixes the silence when it is the only audio.
const SILENT_AUDIO_SOURCE: &str = "anullsrc=channel_layout=mono:sample_rate=44100";

fn normalize_filter() -> String {
    format!(
        "fps={CANONICAL_FPS},\
         scale={CANONICAL_WIDTH}:{CANONICAL_HEIGHT}:force_original_aspect_ratio=decrease,\
         pad={CANONICAL_WIDTH}:{CANONICAL_HEIGHT}:(ow-iw)/2:(oh-ih)/2,\
         format=yuv420p"
    )
}

/// Bring clip `index` to the canonical format shared by every merge input:
/// 30 fps, 1920x1080 letterboxed, yuv420p H.264, stereo 44.1 kHz AAC.
///
/// A silent audio source is always supplied as a second input so clips
/// without audio still produce an audio track; `-shortest` keeps the
/// infinite silence from extending the clip.
pub fn normalize_clip(index: usize, input: &Path, output: &Path) -> StageDescriptor {
    let mut args: Vec<String> = vec!["-y".into(), "-i".into(), path_arg(input)];
    args.extend(
        [
            "-f",
            "lavfi",
            "-i",
            SILENT_AUDIO_SOURCE,
            "-vf",
        ]
        .map(String::from),
    );
    args.push(normalize_filter());
    args.extend(
        [
            "-c:v", "libx264", "-preset", "fast", "-crf", "23", "-pix_fmt", "yuv420p", "-c:a",
            "aac", "-b:a", "128k", "-ar", "44100", "-ac", "2", "-shortest",
        ]
        .map(String::from),
    );
    args.push(path_arg(output));

    StageDescriptor::new(
        format!("normalize[{index}]"),
        args,
        vec![input.to_path_buf()],
        output,
    )
}

/// Render the concat demuxer manifest for `clips`, in order.
///
/// Each line is `file '<path>'`; single quotes inside a path are written as
/// `'\''` so the demuxer reads the path back literally.
pub fn concat_manifest(clips: &[PathBuf]) -> String {
    clips
        .iter()
        .map(|clip| {
            let quoted = clip.to_string_lossy().replace('\'', "'\\''");
            format!("file '{quoted}'\n")
        })
        .collect()
}

/// Losslessly concatenate the clips listed in `manifest`.
///
/// Stream copy is only valid because every clip went through
/// [`normalize_clip`] first.
pub fn concat(manifest: &Path, clips: &[PathBuf], output: &Path) -> StageDescriptor {
    let args = vec![
        "-y".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        path_arg(manifest),
        "-c".to_string(),
        "copy".to_string(),
        path_arg(output),
    ];
    let mut inputs = Vec::with_capacity(clips.len() + 1);
    inputs.push(manifest.to_path_buf());
    inputs.extend(clips.iter().cloned());
    StageDescriptor::new("concat", args, inputs, output)
}
