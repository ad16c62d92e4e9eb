//! Text and image overlay stages.

use std::path::Path;

use super::{path_arg, Position, StageDescriptor};

/// Width in pixels the overlay image is scaled to; height follows the
/// image's aspect ratio.
pub const OVERLAY_IMAGE_WIDTH: u32 = 150;

const MAX_FONT_SIZE: u32 = 1000;

/// Escape text as the value of the `drawtext` `text` option.
///
/// Backslashes are doubled, `%` becomes `\%`, single quotes become `'\''`,
/// colons become `\:`, and the result is wrapped in single quotes. The quotes
/// protect the value from the option parser; the backslash escapes are
/// consumed by drawtext's own text expansion. Backslashes are doubled first so
/// the later escapes are not doubled again.
pub fn escape_drawtext(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('\'', "'\\''")
        .replace(':', "\\:");
    format!("'{escaped}'")
}

/// Escape a complete `name=options` filter description for the filtergraph
/// parser, which strips one level of quoting and escaping before the filter
/// parses its options.
pub fn escape_filtergraph(description: &str) -> String {
    let mut escaped = String::with_capacity(description.len() + 8);
    for c in description.chars() {
        if matches!(c, '\\' | '\'' | '[' | ']' | ',' | ';') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Validated parameters for a text overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct TextOverlay {
    text: String,
    position: Position,
    font_size: u32,
    color: String,
}

impl TextOverlay {
    pub const DEFAULT_FONT_SIZE: u32 = 24;
    pub const DEFAULT_COLOR: &'static str = "white";

    /// Validate overlay parameters.
    ///
    /// The color is restricted to names, `#rrggbb`/`0xrrggbb` forms and an
    /// optional `@alpha` suffix so it cannot inject extra filter options.
    pub fn new(
        text: impl Into<String>,
        position: Position,
        font_size: u32,
        color: impl Into<String>,
    ) -> cf_core::Result<Self> {
        let text = text.into();
        let color = color.into();

        if text.is_empty() {
            return Err(cf_core::Error::validation("text must not be empty"));
        }
        if font_size == 0 || font_size > MAX_FONT_SIZE {
            return Err(cf_core::Error::validation(format!(
                "font size must be between 1 and {MAX_FONT_SIZE}"
            )));
        }
        let color_ok = !color.is_empty()
            && color
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '#' | '@' | '.'));
        if !color_ok {
            return Err(cf_core::Error::validation(format!("invalid color: {color:?}")));
        }

        Ok(Self {
            text,
            position,
            font_size,
            color,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn font_size(&self) -> u32 {
        self.font_size
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    /// The complete `drawtext` filter expression, escaped for use as a
    /// `-vf` argument.
    pub fn filter(&self) -> String {
        escape_filtergraph(&format!(
            "drawtext=text={}:fontsize={}:fontcolor={}:{}",
            escape_drawtext(&self.text),
            self.font_size,
            self.color,
            self.position.text_expression()
        ))
    }
}

/// Burn `overlay` into the video at `input`, copying the audio stream.
pub fn text_overlay(input: &Path, overlay: &TextOverlay, output: &Path) -> StageDescriptor {
    let args = vec![
        "-y".to_string(),
        "-i".to_string(),
        path_arg(input),
        "-vf".to_string(),
        overlay.filter(),
        "-codec:a".to_string(),
        "copy".to_string(),
        path_arg(output),
    ];
    StageDescriptor::new("text", args, vec![input.to_path_buf()], output)
}

/// Composite the image at `image` over the video at `video`.
///
/// The image is scaled to [`OVERLAY_IMAGE_WIDTH`] before compositing; the
/// audio stream is copied.
pub fn image_overlay(
    video: &Path,
    image: &Path,
    position: Position,
    output: &Path,
) -> StageDescriptor {
    let filter = format!(
        "[1:v]scale={OVERLAY_IMAGE_WIDTH}:-1[ovrl];[0:v][ovrl]overlay={}",
        position.overlay_expression()
    );
    let args = vec![
        "-y".to_string(),
        "-i".to_string(),
        path_arg(video),
        "-i".to_string(),
        path_arg(image),
        "-filter_complex".to_string(),
        filter,
        "-codec:a".to_string(),
        "copy".to_string(),
        path_arg(output),
    ];
    StageDescriptor::new(
        "overlay",
        args,
        vec![video.to_path_buf(), image.to_path_buf()],
        output,
    )
}
