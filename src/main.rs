mod cli;

use anyhow::{bail, Context};
use clap::Parser;
use falkit::config::AppConfig;
use falkit::core::{MediaKind, MediaReference, VideoInfo};
use falkit::fanout::{generate_combined, CombinedVideoRequest, COMBINED_SLOTS};
use falkit::pixels::{encode_png, to_rgb_frames};
use falkit::service::JobService;
use falkit::utils::{ensure_dir, image_output_path};
use serde_json::Value;
use std::fs;
use std::path::Path;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = cli::Cli::parse();
    let cfg = AppConfig::load(cli.config.as_deref())?;
    let service = JobService::from_config(&cfg).context("building API client")?;

    match cli.cmd {
        cli::Command::Image {
            job,
            output_dir,
            single,
        } => {
            let arguments = parse_arguments(&job.args)?;
            let label = job.label.as_deref().unwrap_or(&job.endpoint);
            let batch = if single {
                service
                    .run_single_image_job(label, &job.endpoint, &arguments)
                    .await
            } else {
                service.run_image_job(label, &job.endpoint, &arguments).await
            };
            let mut frames = to_rgb_frames(&batch).context("converting result images")?;
            if single {
                frames.truncate(1);
            }
            ensure_dir(&output_dir)
                .with_context(|| format!("creating {}", output_dir.display()))?;
            for (index, frame) in frames.iter().enumerate() {
                let path = image_output_path(&output_dir, label, index);
                fs::write(&path, encode_png(frame)?)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("{}", path.display());
            }
        }
        cli::Command::Video { job } => {
            let arguments = parse_arguments(&job.args)?;
            let label = job.label.as_deref().unwrap_or(&job.endpoint);
            println!(
                "{}",
                service.run_video_job(label, &job.endpoint, &arguments).await
            );
        }
        cli::Command::Text { job } => {
            let arguments = parse_arguments(&job.args)?;
            let label = job.label.as_deref().unwrap_or(&job.endpoint);
            println!(
                "{}",
                service.run_text_job(label, &job.endpoint, &arguments).await
            );
        }
        cli::Command::Upload { path, kind, fps } => {
            let kind = match kind {
                Some(cli::UploadKind::Image) => MediaKind::Image,
                Some(cli::UploadKind::Video) => MediaKind::Video,
                None => guess_kind(&path),
            };
            let info = VideoInfo {
                loaded_fps: fps,
                source_fps: None,
            };
            match service
                .upload(MediaReference::FilePath(path.clone()), kind, Some(&info))
                .await
            {
                Some(url) => println!("{url}"),
                None => bail!("upload of {} failed", path.display()),
            }
        }
        cli::Command::CombinedVideo {
            prompt,
            image,
            kling_duration,
            aspect_ratio,
            luma_loop,
            veo2_aspect_ratio,
            veo2_duration,
            disable,
        } => {
            for name in &disable {
                if !COMBINED_SLOTS.contains(&name.as_str()) {
                    bail!(
                        "Unknown provider '{name}'. Expected one of: {}",
                        COMBINED_SLOTS.join(", ")
                    );
                }
            }
            let request = CombinedVideoRequest {
                prompt,
                kling_duration,
                aspect_ratio,
                luma_loop,
                veo2_aspect_ratio,
                veo2_duration,
                disabled: disable.into_iter().collect(),
            };
            let results =
                generate_combined(&service, &request, MediaReference::FilePath(image)).await;
            for (name, result) in COMBINED_SLOTS.iter().zip(results) {
                println!("{name}: {result}");
            }
        }
    }

    if let Some(summary) = cli.summary.as_deref() {
        service
            .monitor()
            .flush_summary(summary, cli.events.as_deref())
            .with_context(|| format!("writing {}", summary.display()))?;
    }
    Ok(())
}

fn parse_arguments(raw: &str) -> anyhow::Result<Value> {
    let value: Value = serde_json::from_str(raw).context("parsing --args as JSON")?;
    if !value.is_object() {
        bail!("--args must be a JSON object");
    }
    Ok(value)
}

fn guess_kind(path: &Path) -> MediaKind {
    match mime_guess::from_path(path).first() {
        Some(mime) if mime.type_() == mime::VIDEO => MediaKind::Video,
        _ => MediaKind::Image,
    }
}
