use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "falkit",
    version,
    about = "Run fal.ai image, video and text jobs with uniform fallbacks"
)]
pub struct Cli {
    /// YAML config file (defaults to falkit.yaml or the user config dir)
    #[arg(long, global = true)]
    pub config: Option<String>,
    /// Write a JSON run summary here when the command finishes
    #[arg(long, global = true)]
    pub summary: Option<PathBuf>,
    /// Also write one NDJSON line per job here
    #[arg(long, global = true, requires = "summary")]
    pub events: Option<PathBuf>,
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Args, Debug)]
pub struct JobArgs {
    /// Endpoint path, e.g. fal-ai/flux/dev
    #[arg(long)]
    pub endpoint: String,
    /// Model label used in diagnostics
    #[arg(long)]
    pub label: Option<String>,
    /// JSON request body
    #[arg(long, default_value = "{}")]
    pub args: String,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadKind {
    Image,
    Video,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an image job and save the results as PNG files
    Image {
        #[command(flatten)]
        job: JobArgs,
        #[arg(short = 'o', long, default_value = "falkit-output")]
        output_dir: PathBuf,
        /// Keep only the first image of the batch
        #[arg(long, default_value_t = false)]
        single: bool,
    },
    /// Run a video job and print the video URL
    Video {
        #[command(flatten)]
        job: JobArgs,
    },
    /// Run a text job and print the output
    Text {
        #[command(flatten)]
        job: JobArgs,
    },
    /// Upload a local file and print its remote URL
    Upload {
        path: PathBuf,
        #[arg(long, value_enum)]
        kind: Option<UploadKind>,
        /// Frame rate hint recorded with video uploads
        #[arg(long)]
        fps: Option<f64>,
    },
    /// Upload one image and run every image-to-video provider on it
    CombinedVideo {
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        image: PathBuf,
        #[arg(long, default_value = "5")]
        kling_duration: String,
        #[arg(long, default_value = "16:9")]
        aspect_ratio: String,
        #[arg(long, default_value_t = false)]
        luma_loop: bool,
        #[arg(long, default_value = "auto")]
        veo2_aspect_ratio: String,
        #[arg(long, default_value = "5s")]
        veo2_duration: String,
        /// Slot to skip (klingpro, klingmaster, minimax, luma, veo2, wanpro)
        #[arg(long)]
        disable: Vec<String>,
    },
}
