//! Turns raw job payloads into canonical results.
//!
//! Each modality has an ordered list of matcher rules; the first rule that
//! yields something wins.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::{CanonicalResult, MediaFetch, Modality, PixelBuffer};
use crate::error::ExtractionError;
use crate::pixels::{decode_rgb, stack_batch};

type Object = Map<String, Value>;

struct Rule<T> {
    name: &'static str,
    probe: fn(&Object) -> Option<T>,
}

const IMAGE_RULES: &[Rule<Vec<String>>] = &[
    Rule {
        name: "images",
        probe: |map| non_empty(urls_in(map.get("images")?)),
    },
    Rule {
        name: "image",
        probe: |map| url_of(map.get("image")?).map(|url| vec![url]),
    },
    Rule {
        name: "output",
        probe: |map| non_empty(urls_in(map.get("output")?)),
    },
];

const VIDEO_RULES: &[Rule<String>] = &[
    Rule {
        name: "video",
        probe: |map| match map.get("video")? {
            Value::Array(items) => url_of(items.first()?),
            other => object_url(other),
        },
    },
    Rule {
        name: "output",
        probe: |map| match map.get("output")? {
            Value::Array(items) => items.iter().find_map(url_of),
            other => url_of(other),
        },
    },
    Rule {
        name: "url",
        probe: |map| string_url(map.get("url")?),
    },
];

fn first_match<T>(rules: &[Rule<T>], map: &Object) -> Option<T> {
    rules.iter().find_map(|rule| {
        let found = (rule.probe)(map);
        if found.is_some() {
            debug!(rule = rule.name, "result rule matched");
        }
        found
    })
}

fn string_url(value: &Value) -> Option<String> {
    value
        .as_str()
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

fn object_url(value: &Value) -> Option<String> {
    string_url(value.as_object()?.get("url")?)
}

/// An object carrying `url`, or a bare URL string.
fn url_of(value: &Value) -> Option<String> {
    object_url(value).or_else(|| string_url(value))
}

/// A list of URL-bearing entries, or a single one.
fn urls_in(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(url_of).collect(),
        other => url_of(other).into_iter().collect(),
    }
}

fn non_empty(urls: Vec<String>) -> Option<Vec<String>> {
    (!urls.is_empty()).then_some(urls)
}

fn dedupe(urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// Image URLs in payload order, without duplicates.
pub fn image_urls(raw: &Value) -> Vec<String> {
    raw.as_object()
        .and_then(|map| first_match(IMAGE_RULES, map))
        .map(dedupe)
        .unwrap_or_default()
}

pub fn video_url(raw: &Value) -> Option<String> {
    first_match(VIDEO_RULES, raw.as_object()?)
}

pub fn text_output(raw: &Value) -> Option<String> {
    match raw.as_object()?.get("output")? {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| match item {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string(),
        ),
        _ => None,
    }
}

pub fn extract(raw: &Value, modality: Modality) -> Result<CanonicalResult, ExtractionError> {
    match modality {
        Modality::Image => {
            let urls = image_urls(raw);
            if urls.is_empty() {
                return Err(ExtractionError::NoImageUrls);
            }
            Ok(CanonicalResult::Images(urls))
        }
        Modality::Video => video_url(raw)
            .map(CanonicalResult::Video)
            .ok_or(ExtractionError::NoVideoUrl),
        Modality::Text => text_output(raw)
            .map(CanonicalResult::Text)
            .ok_or(ExtractionError::NoTextOutput),
    }
}

/// Extraction plus image download, decode and stacking.
#[derive(Clone)]
pub struct ResultNormalizer {
    fetcher: Arc<dyn MediaFetch>,
}

impl ResultNormalizer {
    pub fn new(fetcher: Arc<dyn MediaFetch>) -> Self {
        Self { fetcher }
    }

    pub fn extract(&self, raw: &Value, modality: Modality) -> Result<CanonicalResult, ExtractionError> {
        extract(raw, modality)
    }

    /// Extracts image URLs and returns them as one `[n, h, w, 3]` batch.
    pub async fn images(&self, raw: &Value) -> Result<PixelBuffer, ExtractionError> {
        match self.extract(raw, Modality::Image)? {
            CanonicalResult::Images(urls) => self.download_images(&urls).await,
            _ => Err(ExtractionError::NoImageUrls),
        }
    }

    /// Fails as a whole if any single download or decode fails.
    pub async fn download_images(&self, urls: &[String]) -> Result<PixelBuffer, ExtractionError> {
        let frames = try_join_all(urls.iter().map(|url| async move {
            let bytes = self
                .fetcher
                .fetch(url)
                .await
                .map_err(|err| ExtractionError::Download {
                    url: url.clone(),
                    message: err.to_string(),
                })?;
            decode_rgb(url, &bytes)
        }))
        .await?;
        debug!(count = frames.len(), "downloaded result images");
        stack_batch(&frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::testing::{png_bytes, StaticFetcher};

    #[test]
    fn image_rules_apply_in_order() {
        let raw = json!({
            "images": [{"url": "a"}, "b", {"url": "a"}, {"content_type": "x"}],
            "image": {"url": "ignored"},
            "output": "ignored too",
        });
        assert_eq!(image_urls(&raw), vec!["a", "b"]);

        assert_eq!(
            image_urls(&json!({"images": {"url": "single"}})),
            vec!["single"]
        );
        assert_eq!(
            image_urls(&json!({"images": [], "image": "https://x/1.png"})),
            vec!["https://x/1.png"]
        );
        assert_eq!(
            image_urls(&json!({"output": [{"url": "o1"}, "o2", "o1"]})),
            vec!["o1", "o2"]
        );
        assert_eq!(image_urls(&json!({"output": {"url": "o"}})), vec!["o"]);
        assert!(image_urls(&json!({"seed": 4})).is_empty());
        assert!(matches!(
            extract(&json!({"images": []}), Modality::Image),
            Err(ExtractionError::NoImageUrls)
        ));
    }

    #[test]
    fn video_rules_apply_in_order() {
        assert_eq!(
            video_url(&json!({"video": {"url": "v"}, "url": "top"})).as_deref(),
            Some("v")
        );
        assert_eq!(
            video_url(&json!({"video": ["first", "second"]})).as_deref(),
            Some("first")
        );
        assert_eq!(
            video_url(&json!({"video": {"file_name": "x"}, "output": [{"seed": 1}, {"url": "o"}]}))
                .as_deref(),
            Some("o")
        );
        assert_eq!(
            video_url(&json!({"output": "plain"})).as_deref(),
            Some("plain")
        );
        assert_eq!(video_url(&json!({"url": "top"})).as_deref(), Some("top"));
        assert!(matches!(
            extract(&json!({"status": "ok"}), Modality::Video),
            Err(ExtractionError::NoVideoUrl)
        ));
    }

    #[test]
    fn text_output_is_verbatim_or_joined() {
        assert_eq!(
            text_output(&json!({"output": "  keep spaces "})).as_deref(),
            Some("  keep spaces ")
        );
        assert_eq!(
            text_output(&json!({"output": ["line one", "line two", 3, ""]})).as_deref(),
            Some("line one\nline two\n3")
        );
        assert!(matches!(
            extract(&json!({"output": {"text": "nested"}}), Modality::Text),
            Err(ExtractionError::NoTextOutput)
        ));
    }

    #[tokio::test]
    async fn downloads_stack_in_url_order() {
        let fetcher = StaticFetcher::default()
            .with("https://cdn/red.png", png_bytes(2, 1, [255, 0, 0]))
            .with("https://cdn/blue.png", png_bytes(2, 1, [0, 0, 255]));
        let normalizer = ResultNormalizer::new(Arc::new(fetcher));
        let raw = json!({"images": [{"url": "https://cdn/blue.png"}, {"url": "https://cdn/red.png"}]});
        let batch = normalizer.images(&raw).await.unwrap();
        assert_eq!(batch.shape(), &[2, 1, 2, 3]);
        let values = batch.as_f32().unwrap();
        assert_eq!(&values[..3], &[0.0, 0.0, 1.0]);
        assert_eq!(&values[6..9], &[1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn one_failed_download_fails_the_batch() {
        let fetcher =
            StaticFetcher::default().with("https://cdn/ok.png", png_bytes(1, 1, [0, 0, 0]));
        let normalizer = ResultNormalizer::new(Arc::new(fetcher));
        let raw = json!({"images": ["https://cdn/ok.png", "https://cdn/missing.png"]});
        let err = normalizer.images(&raw).await.unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::Download { ref url, .. } if url == "https://cdn/missing.png"
        ));

        let fetcher = StaticFetcher::default().with("https://cdn/bad.png", b"not an image".to_vec());
        let normalizer = ResultNormalizer::new(Arc::new(fetcher));
        let err = normalizer
            .download_images(&["https://cdn/bad.png".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Decode { .. }));
    }
}
