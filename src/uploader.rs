use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use image::RgbImage;
use mime::Mime;
use tracing::{debug, warn};
use url::Url;

use crate::core::{MediaKind, MediaReference, MediaStream, VideoInfo};
use crate::credentials::ClientProvider;
use crate::error::{EncodingError, UploadError};
use crate::pixels::{encode_png, to_rgb_frames};
use crate::video::{resolve_fps, VideoEncoder};

/// Bytes ready for the storage API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMedia {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub file_name: String,
}

/// Turns any supported media reference into a remote URL.
pub struct MediaUploader {
    provider: Arc<ClientProvider>,
    encoder: VideoEncoder,
}

impl MediaUploader {
    pub fn new(provider: Arc<ClientProvider>) -> Self {
        Self {
            provider,
            encoder: VideoEncoder::new(),
        }
    }

    pub fn with_encoder(mut self, encoder: VideoEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    pub async fn upload(
        &self,
        media: MediaReference,
        kind: MediaKind,
        info: Option<&VideoInfo>,
    ) -> Result<String, UploadError> {
        if let MediaReference::Url(url) = media {
            return validate_url(&url);
        }
        let api = self.provider.get_client()?;
        let encoded = self.prepare(media, kind, info).await?;
        if encoded.bytes.is_empty() {
            return Err(UploadError::Empty(kind.as_str()));
        }
        debug!(
            kind = kind.as_str(),
            file_name = %encoded.file_name,
            bytes = encoded.bytes.len(),
            "uploading media"
        );
        let url = api
            .upload(encoded.bytes, &encoded.content_type, &encoded.file_name)
            .await?;
        validate_url(&url)
    }

    /// Like [`upload`](Self::upload), but logs the failure and yields `None`.
    pub async fn try_upload(
        &self,
        media: MediaReference,
        kind: MediaKind,
        info: Option<&VideoInfo>,
    ) -> Option<String> {
        match self.upload(media, kind, info).await {
            Ok(url) => Some(url),
            Err(err) => {
                warn!(kind = kind.as_str(), error = %err, "media upload failed");
                None
            }
        }
    }

    pub async fn upload_image(&self, media: MediaReference) -> Option<String> {
        self.try_upload(media, MediaKind::Image, None).await
    }

    pub async fn upload_video(
        &self,
        media: MediaReference,
        info: Option<&VideoInfo>,
    ) -> Option<String> {
        self.try_upload(media, MediaKind::Video, info).await
    }

    async fn prepare(
        &self,
        media: MediaReference,
        kind: MediaKind,
        info: Option<&VideoInfo>,
    ) -> Result<EncodedMedia, UploadError> {
        match media {
            MediaReference::Pixels(buffer) => {
                let frames = to_rgb_frames(&buffer)?;
                self.encode_frames(frames, kind, info).await
            }
            MediaReference::Frames(buffers) => {
                let mut frames = Vec::new();
                for buffer in &buffers {
                    frames.extend(to_rgb_frames(buffer)?);
                }
                self.encode_frames(frames, kind, info).await
            }
            MediaReference::FilePath(path) => read_file(&path, kind).await,
            MediaReference::RawBytes {
                bytes,
                content_type,
            } => {
                let content_type = match content_type {
                    Some(raw) => raw
                        .parse::<Mime>()
                        .map_err(|err| UploadError::Source(format!("content type {raw:?}: {err}")))?
                        .essence_str()
                        .to_string(),
                    None => kind.content_type().to_string(),
                };
                Ok(EncodedMedia {
                    bytes,
                    content_type,
                    file_name: kind.default_filename().to_string(),
                })
            }
            MediaReference::Stream { stream, name } => {
                let bytes = tokio::task::spawn_blocking(move || read_stream(stream))
                    .await
                    .map_err(|err| UploadError::Source(format!("stream reader panicked: {err}")))??;
                let file_name = name
                    .as_deref()
                    .and_then(base_name)
                    .unwrap_or_else(|| kind.default_filename().to_string());
                Ok(EncodedMedia {
                    bytes,
                    content_type: content_type_for(&file_name, kind),
                    file_name,
                })
            }
            MediaReference::Url(url) => Err(UploadError::Source(format!(
                "{url} is already remote"
            ))),
        }
    }

    async fn encode_frames(
        &self,
        frames: Vec<RgbImage>,
        kind: MediaKind,
        info: Option<&VideoInfo>,
    ) -> Result<EncodedMedia, UploadError> {
        let bytes = match kind {
            MediaKind::Image => {
                let first = frames.first().ok_or(EncodingError::NoFrames)?;
                encode_png(first)?
            }
            MediaKind::Video => {
                let fps = resolve_fps(info);
                let encoder = self.encoder.clone();
                tokio::task::spawn_blocking(move || encoder.encode_mp4(&frames, fps))
                    .await
                    .map_err(|err| {
                        EncodingError::EncoderFailed(format!("encoder task failed: {err}"))
                    })??
            }
        };
        Ok(EncodedMedia {
            bytes,
            content_type: kind.content_type().to_string(),
            file_name: kind.default_filename().to_string(),
        })
    }
}

fn validate_url(raw: &str) -> Result<String, UploadError> {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(parsed) if !parsed.cannot_be_a_base() => Ok(trimmed.to_string()),
        _ => Err(UploadError::InvalidUrl(raw.to_string())),
    }
}

async fn read_file(path: &Path, kind: MediaKind) -> Result<EncodedMedia, UploadError> {
    if !path.is_file() {
        return Err(UploadError::Source(format!(
            "{} file not found: {}",
            kind.as_str(),
            path.display()
        )));
    }
    let bytes = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| kind.default_filename().to_string());
    Ok(EncodedMedia {
        bytes,
        content_type: content_type_for(&file_name, kind),
        file_name,
    })
}

fn read_stream(stream: MediaStream) -> Result<Vec<u8>, UploadError> {
    let mut bytes = Vec::new();
    match stream {
        MediaStream::Seekable(mut reader) => {
            reader.seek(SeekFrom::Start(0))?;
            reader.read_to_end(&mut bytes)?;
        }
        MediaStream::Forward(mut reader) => {
            reader.read_to_end(&mut bytes)?;
        }
    }
    Ok(bytes)
}

fn base_name(name: &str) -> Option<String> {
    Path::new(name)
        .file_name()
        .map(|base| base.to_string_lossy().to_string())
        .filter(|base| !base.is_empty())
}

fn content_type_for(file_name: &str, kind: MediaKind) -> String {
    mime_guess::from_path(file_name)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| kind.content_type().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::core::PixelBuffer;
    use crate::testing::{CountingFactory, ScriptedApi};

    fn uploader(api: ScriptedApi) -> (MediaUploader, Arc<ScriptedApi>) {
        let api = Arc::new(api);
        let provider = ClientProvider::new(
            Box::new(CountingFactory::new(api.clone())),
            Some("key".into()),
        );
        (MediaUploader::new(Arc::new(provider)), api)
    }

    #[tokio::test]
    async fn pixel_buffer_uploads_as_png() {
        let (uploader, api) = uploader(ScriptedApi::default());
        let buffer = PixelBuffer::from_f32(vec![2, 2, 2, 3], vec![0.5; 24]).unwrap();
        let url = uploader
            .upload(buffer.into(), MediaKind::Image, None)
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example/upload.png");
        let records = api.upload_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content_type, "image/png");
    }

    #[tokio::test]
    async fn file_path_keeps_its_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"not really a video").unwrap();
        let (uploader, api) = uploader(ScriptedApi::default());
        let url = uploader
            .upload(MediaReference::FilePath(path), MediaKind::Video, None)
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example/clip.mp4");
        assert_eq!(api.upload_records()[0].content_type, "video/mp4");
    }

    #[tokio::test]
    async fn seekable_stream_is_rewound() {
        let mut cursor = Cursor::new(b"abcdef".to_vec());
        cursor.set_position(4);
        let (uploader, api) = uploader(ScriptedApi::default());
        uploader
            .upload(
                MediaReference::Stream {
                    stream: MediaStream::Seekable(Box::new(cursor)),
                    name: Some("/tmp/renders/out.mp4".into()),
                },
                MediaKind::Video,
                None,
            )
            .await
            .unwrap();
        let record = &api.upload_records()[0];
        assert_eq!(record.file_name, "out.mp4");
        assert_eq!(record.size, 6);
    }

    #[tokio::test]
    async fn raw_bytes_get_default_name() {
        let (uploader, api) = uploader(ScriptedApi::default());
        uploader
            .upload(
                MediaReference::RawBytes {
                    bytes: vec![1, 2, 3],
                    content_type: None,
                },
                MediaKind::Video,
                None,
            )
            .await
            .unwrap();
        assert_eq!(api.upload_records()[0].file_name, "upload.mp4");
    }

    #[tokio::test]
    async fn raw_bytes_content_type_is_validated() {
        let (uploader, api) = uploader(ScriptedApi::default());
        uploader
            .upload(
                MediaReference::RawBytes {
                    bytes: vec![1],
                    content_type: Some("video/webm; codecs=vp9".into()),
                },
                MediaKind::Video,
                None,
            )
            .await
            .unwrap();
        assert_eq!(api.upload_records()[0].content_type, "video/webm");

        let err = uploader
            .upload(
                MediaReference::RawBytes {
                    bytes: vec![1],
                    content_type: Some("not a mime".into()),
                },
                MediaKind::Video,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Source(_)));
    }

    #[tokio::test]
    async fn invalid_returned_url_is_a_failure() {
        let (uploader, _) = uploader(ScriptedApi::default().with_upload_url(""));
        let err = uploader
            .upload(
                MediaReference::RawBytes {
                    bytes: vec![1],
                    content_type: None,
                },
                MediaKind::Image,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn failures_degrade_to_none() {
        let (uploader, api) = uploader(ScriptedApi::default().failing_upload("storage down"));
        let raw = MediaReference::RawBytes {
            bytes: vec![1],
            content_type: None,
        };
        assert_eq!(uploader.upload_image(raw).await, None);

        let empty = MediaReference::RawBytes {
            bytes: Vec::new(),
            content_type: None,
        };
        assert_eq!(uploader.upload_video(empty, None).await, None);

        let missing = MediaReference::FilePath("/definitely/not/here.mp4".into());
        assert_eq!(uploader.upload_video(missing, None).await, None);
        assert_eq!(api.upload_records().len(), 1);
    }

    #[tokio::test]
    async fn inconsistent_frames_never_reach_the_api() {
        let scratch = tempfile::tempdir().unwrap();
        let (uploader, api) = uploader(ScriptedApi::default());
        let uploader =
            uploader.with_encoder(VideoEncoder::new().with_scratch_dir(scratch.path()));
        let frames = vec![
            PixelBuffer::from_u8(vec![2, 2, 3], vec![0; 12]).unwrap(),
            PixelBuffer::from_u8(vec![4, 2, 3], vec![0; 24]).unwrap(),
        ];
        let err = uploader
            .upload(MediaReference::Frames(frames), MediaKind::Video, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::Encoding(EncodingError::InconsistentFrames { .. })
        ));
        assert!(api.upload_records().is_empty());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn remote_url_passes_through() {
        let (uploader, api) = uploader(ScriptedApi::default());
        let url = uploader
            .upload(
                MediaReference::Url("https://example.com/a.png".into()),
                MediaKind::Image,
                None,
            )
            .await
            .unwrap();
        assert_eq!(url, "https://example.com/a.png");
        assert_eq!(api.submit_count() + api.upload_records().len(), 0);
    }
}
