use std::collections::HashSet;

use futures::future::join_all;
use serde_json::{json, Value};
use tracing::info;

use crate::constants::{
    KLING_MASTER_ENDPOINT, KLING_PRO_ENDPOINT, LUMA_ENDPOINT, MINIMAX_ENDPOINT, SERVICE_DISABLED,
    UPLOAD_FAILED_MESSAGE, VEO2_ENDPOINT, WAN_PRO_ENDPOINT,
};
use crate::core::{MediaKind, MediaReference, Modality};
use crate::fallback::report;
use crate::service::JobService;

/// One position in a fan-out batch.
#[derive(Debug, Clone)]
pub struct VideoSlot {
    pub label: String,
    pub endpoint: String,
    pub arguments: Value,
    pub enabled: bool,
}

pub fn slot_error_message(label: &str) -> String {
    format!("Error: Unable to generate {label} video.")
}

/// Runs every enabled slot concurrently. The output has one entry per slot,
/// in slot order; a failed slot holds its error text and never affects
/// its siblings.
pub async fn fan_out(service: &JobService, slots: &[VideoSlot]) -> Vec<String> {
    let jobs = slots.iter().map(|slot| async move {
        if !slot.enabled {
            return SERVICE_DISABLED.to_string();
        }
        match service
            .video_url(&slot.label, &slot.endpoint, &slot.arguments)
            .await
        {
            Ok(url) => url,
            Err(err) => {
                report(
                    service.site(&slot.label, &slot.endpoint),
                    Modality::Video,
                    &err,
                );
                slot_error_message(&slot.label)
            }
        }
    });
    join_all(jobs).await
}

/// Image-to-video request fanned out to six providers.
#[derive(Debug, Clone)]
pub struct CombinedVideoRequest {
    pub prompt: String,
    pub kling_duration: String,
    pub aspect_ratio: String,
    pub luma_loop: bool,
    pub veo2_aspect_ratio: String,
    pub veo2_duration: String,
    pub disabled: HashSet<String>,
}

impl Default for CombinedVideoRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            kling_duration: "5".into(),
            aspect_ratio: "16:9".into(),
            luma_loop: false,
            veo2_aspect_ratio: "auto".into(),
            veo2_duration: "5s".into(),
            disabled: HashSet::new(),
        }
    }
}

/// Slot keys accepted by `disabled`, in output order.
pub const COMBINED_SLOTS: [&str; 6] = ["klingpro", "klingmaster", "minimax", "luma", "veo2", "wanpro"];

impl CombinedVideoRequest {
    pub fn slots(&self, image_url: &str) -> Vec<VideoSlot> {
        let prompt = self.prompt.as_str();
        let kling = json!({
            "prompt": prompt,
            "image_url": image_url,
            "duration": self.kling_duration,
            "aspect_ratio": self.aspect_ratio,
        });
        let plain = json!({"prompt": prompt, "image_url": image_url});
        let entries = [
            ("klingpro", "KlingPro", KLING_PRO_ENDPOINT, kling.clone()),
            ("klingmaster", "KlingMaster", KLING_MASTER_ENDPOINT, kling),
            ("minimax", "MiniMax", MINIMAX_ENDPOINT, plain),
            (
                "luma",
                "Luma",
                LUMA_ENDPOINT,
                json!({
                    "prompt": prompt,
                    "image_url": image_url,
                    "aspect_ratio": self.aspect_ratio,
                    "loop": self.luma_loop,
                }),
            ),
            (
                "veo2",
                "Veo2",
                VEO2_ENDPOINT,
                json!({
                    "prompt": prompt,
                    "image_url": image_url,
                    "aspect_ratio": self.veo2_aspect_ratio,
                    "duration": self.veo2_duration,
                }),
            ),
            (
                "wanpro",
                "Wan Pro",
                WAN_PRO_ENDPOINT,
                json!({
                    "prompt": prompt,
                    "image_url": image_url,
                    "enable_safety_checker": true,
                }),
            ),
        ];
        entries
            .into_iter()
            .map(|(key, label, endpoint, arguments)| VideoSlot {
                label: label.to_string(),
                endpoint: endpoint.to_string(),
                arguments,
                enabled: !self.disabled.contains(key),
            })
            .collect()
    }
}

/// Uploads `image` once and fans the request out; an upload failure fills
/// every slot with the upload error.
pub async fn generate_combined(
    service: &JobService,
    request: &CombinedVideoRequest,
    image: MediaReference,
) -> Vec<String> {
    let Some(image_url) = service.upload(image, MediaKind::Image, None).await else {
        return vec![UPLOAD_FAILED_MESSAGE.to_string(); COMBINED_SLOTS.len()];
    };
    let slots = request.slots(&image_url);
    info!(
        enabled = slots.iter().filter(|slot| slot.enabled).count(),
        "starting combined video generation"
    );
    fan_out(service, &slots).await
}
