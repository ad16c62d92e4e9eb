use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "clipforge")]
#[command(author, version, about = "Video overlay, speed change and merge service driving ffmpeg")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Start {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Burn a text overlay into a video
    Text {
        /// Input video
        input: PathBuf,

        /// Text to draw
        #[arg(long)]
        text: String,

        /// top-left, top-right, bottom-left, bottom-right or center
        #[arg(long, default_value = "bottom-left")]
        position: String,

        /// Font size in pixels
        #[arg(long, default_value_t = 24)]
        font_size: u32,

        /// Font color (name, #rrggbb or 0xrrggbb, optional @alpha)
        #[arg(long, default_value = "white")]
        color: String,

        /// Where to write the result
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Composite an image over a video
    Overlay {
        /// Input video
        video: PathBuf,

        /// Image to overlay
        image: PathBuf,

        /// top-left, top-right, bottom-left, bottom-right or center
        #[arg(long, default_value = "top-left")]
        position: String,

        /// Where to write the result
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Change playback speed (0 < factor <= 4)
    Speed {
        /// Input video
        input: PathBuf,

        /// Speed multiplier
        factor: f64,

        /// Where to write the result
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Normalize and concatenate two or more clips in order
    Merge {
        /// Clips to merge
        #[arg(required = true, num_args = 1..)]
        clips: Vec<PathBuf>,

        /// Where to write the result
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Delete expired files from the scratch directory once
    Sweep,

    /// Display version information
    Version,
}
