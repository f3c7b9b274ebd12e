use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use image::RgbImage;
use tracing::debug;

use crate::constants::DEFAULT_VIDEO_FPS;
use crate::core::VideoInfo;
use crate::error::EncodingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSpec {
    pub codec: &'static str,
    pub args: &'static [&'static str],
}

static ENCODER_SPECS: &[EncoderSpec] = &[
    EncoderSpec {
        codec: "libx264",
        args: &["-c:v", "libx264", "-preset", "medium", "-crf", "18"],
    },
    EncoderSpec {
        codec: "mpeg4",
        args: &["-c:v", "mpeg4", "-q:v", "2"],
    },
];

/// Caller metadata wins when it carries a positive frame rate.
pub fn resolve_fps(info: Option<&VideoInfo>) -> f64 {
    info.and_then(|info| {
        [info.loaded_fps, info.source_fps]
            .into_iter()
            .flatten()
            .find(|fps| fps.is_finite() && *fps > 0.0)
    })
    .unwrap_or(DEFAULT_VIDEO_FPS)
}

/// Encodes RGB frame sequences to MP4 by piping raw frames into `ffmpeg`.
#[derive(Debug, Clone, Default)]
pub struct VideoEncoder {
    binary: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
}

impl VideoEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    /// Directory for the intermediate file; defaults to the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    fn locate(&self) -> Result<PathBuf, EncodingError> {
        match &self.binary {
            Some(path) => Ok(path.clone()),
            None => which::which("ffmpeg")
                .map_err(|err| EncodingError::EncoderUnavailable(format!("ffmpeg: {err}"))),
        }
    }

    pub fn encode_mp4(&self, frames: &[RgbImage], fps: f64) -> Result<Vec<u8>, EncodingError> {
        let (width, height) = check_frames(frames)?;
        let binary = self.locate()?;

        let mut builder = tempfile::Builder::new();
        builder.prefix("falkit-").suffix(".mp4");
        // Removed on drop, including every error return below.
        let output = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        let mut last_err: Option<EncodingError> = None;
        for spec in ENCODER_SPECS {
            match run_encoder(&binary, spec, frames, width, height, fps, output.path()) {
                Ok(()) => {
                    let mut data = Vec::new();
                    output.reopen()?.read_to_end(&mut data)?;
                    if data.is_empty() {
                        return Err(EncodingError::EmptyOutput);
                    }
                    debug!(codec = spec.codec, frames = frames.len(), fps, "encoded video");
                    return Ok(data);
                }
                Err(err) => {
                    debug!(codec = spec.codec, error = %err, "encoder attempt failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| EncodingError::EncoderFailed("no encoder configured".into())))
    }
}

fn check_frames(frames: &[RgbImage]) -> Result<(u32, u32), EncodingError> {
    let Some(first) = frames.first() else {
        return Err(EncodingError::NoFrames);
    };
    let (width, height) = first.dimensions();
    for (index, frame) in frames.iter().enumerate().skip(1) {
        let (found_width, found_height) = frame.dimensions();
        if (found_width, found_height) != (width, height) {
            return Err(EncodingError::InconsistentFrames {
                index,
                width,
                height,
                found_width,
                found_height,
            });
        }
    }
    Ok((width, height))
}

fn run_encoder(
    binary: &Path,
    spec: &EncoderSpec,
    frames: &[RgbImage],
    width: u32,
    height: u32,
    fps: f64,
    output: &Path,
) -> Result<(), EncodingError> {
    let mut cmd = Command::new(binary);
    cmd.args(["-y", "-hide_banner", "-loglevel", "error"]);
    cmd.args(["-f", "rawvideo", "-pix_fmt", "rgb24"]);
    cmd.args(["-s", &format!("{width}x{height}"), "-r", &format!("{fps}")]);
    cmd.args(["-i", "-"]);
    cmd.args(spec.args);
    cmd.args([
        "-vf",
        "pad=ceil(iw/2)*2:ceil(ih/2)*2",
        "-pix_fmt",
        "yuv420p",
        "-movflags",
        "+faststart",
        "-f",
        "mp4",
    ]);
    cmd.arg(output);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|err| {
        EncodingError::EncoderUnavailable(format!("{}: {err}", binary.display()))
    })?;

    let mut write_err = None;
    if let Some(mut stdin) = child.stdin.take() {
        for frame in frames {
            if let Err(err) = stdin.write_all(frame.as_raw()) {
                write_err = Some(err);
                break;
            }
        }
    }

    let result = child.wait_with_output()?;
    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(EncodingError::EncoderFailed(format!(
            "{} exited with {} ({}) {}",
            binary.display(),
            result.status,
            spec.codec,
            stderr.trim()
        )));
    }
    if let Some(err) = write_err {
        return Err(EncodingError::EncoderFailed(format!(
            "writing frames to {}: {err}",
            spec.codec
        )));
    }
    Ok(())
}
