//! Conversions between host pixel buffers and 8-bit RGB frames.

use std::io::Cursor;

use image::{ImageFormat, RgbImage};

use crate::core::{PixelBuffer, PixelData};
use crate::error::{EncodingError, ExtractionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    frames: usize,
    height: usize,
    width: usize,
    channels: usize,
    channels_first: bool,
}

impl Layout {
    fn index(&self, frame: usize, y: usize, x: usize, channel: usize) -> usize {
        if self.channels_first {
            ((frame * self.channels + channel) * self.height + y) * self.width + x
        } else {
            ((frame * self.height + y) * self.width + x) * self.channels + channel
        }
    }
}

fn is_channel_dim(dim: usize) -> bool {
    matches!(dim, 1 | 3 | 4)
}

fn detect_layout(shape: &[usize]) -> Result<Layout, EncodingError> {
    let layout = match *shape {
        [h, w] => Layout {
            frames: 1,
            height: h,
            width: w,
            channels: 1,
            channels_first: false,
        },
        // A leading 3 wins over a trailing channel axis.
        [3, h, w] => Layout {
            frames: 1,
            height: h,
            width: w,
            channels: 3,
            channels_first: true,
        },
        [h, w, c] if is_channel_dim(c) => Layout {
            frames: 1,
            height: h,
            width: w,
            channels: c,
            channels_first: false,
        },
        [c, h, w] if is_channel_dim(c) => Layout {
            frames: 1,
            height: h,
            width: w,
            channels: c,
            channels_first: true,
        },
        [n, h, w, c] if is_channel_dim(c) => Layout {
            frames: n,
            height: h,
            width: w,
            channels: c,
            channels_first: false,
        },
        [n, c, h, w] if is_channel_dim(c) => Layout {
            frames: n,
            height: h,
            width: w,
            channels: c,
            channels_first: true,
        },
        _ => {
            return Err(EncodingError::UnsupportedLayout(format!(
                "shape {shape:?} has no 1, 3 or 4 channel axis"
            )))
        }
    };
    if layout.frames > 0 && (layout.height == 0 || layout.width == 0) {
        return Err(EncodingError::UnsupportedLayout(format!(
            "shape {shape:?} has an empty spatial axis"
        )));
    }
    Ok(layout)
}

/// Splits a buffer into 8-bit RGB frames.
///
/// Grayscale is replicated, alpha is dropped and channel-first input is
/// transposed. Float input is treated as `[-1, 1]` when any sample is
/// negative, otherwise `[0, 1]`; both are clamped and scaled to `0..=255`.
pub fn to_rgb_frames(buffer: &PixelBuffer) -> Result<Vec<RgbImage>, EncodingError> {
    let layout = detect_layout(buffer.shape())?;
    let width = u32::try_from(layout.width)
        .map_err(|_| EncodingError::UnsupportedLayout("frame too wide".into()))?;
    let height = u32::try_from(layout.height)
        .map_err(|_| EncodingError::UnsupportedLayout("frame too tall".into()))?;

    let sample: Box<dyn Fn(usize) -> u8 + '_> = match buffer.data() {
        PixelData::U8(values) => Box::new(move |i| values[i]),
        PixelData::F32(values) => {
            let signed = values.iter().any(|v| *v < 0.0);
            Box::new(move |i| float_to_u8(values[i], signed))
        }
    };

    let mut frames = Vec::with_capacity(layout.frames);
    for frame in 0..layout.frames {
        let mut raw = Vec::with_capacity(layout.width * layout.height * 3);
        for y in 0..layout.height {
            for x in 0..layout.width {
                for channel in 0..3 {
                    let source = if layout.channels == 1 { 0 } else { channel };
                    raw.push(sample(layout.index(frame, y, x, source)));
                }
            }
        }
        let image = RgbImage::from_raw(width, height, raw).ok_or_else(|| {
            EncodingError::UnsupportedLayout(format!("frame {frame} has the wrong sample count"))
        })?;
        frames.push(image);
    }
    Ok(frames)
}

fn float_to_u8(value: f32, signed: bool) -> u8 {
    let value = if value.is_nan() { 0.0 } else { value };
    let unit = if signed { (value + 1.0) / 2.0 } else { value };
    (unit.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub fn encode_png(frame: &RgbImage) -> Result<Vec<u8>, EncodingError> {
    let mut bytes = Vec::new();
    frame.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Decodes any supported container into RGB, dropping alpha.
pub fn decode_rgb(url: &str, bytes: &[u8]) -> Result<RgbImage, ExtractionError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|err| ExtractionError::Decode {
            url: url.to_string(),
            message: err.to_string(),
        })
}

/// Stacks same-sized frames into a `[n, h, w, 3]` float batch in `[0, 1]`.
pub fn stack_batch(frames: &[RgbImage]) -> Result<PixelBuffer, ExtractionError> {
    let Some(first) = frames.first() else {
        return Err(ExtractionError::NoImageUrls);
    };
    let (first_width, first_height) = first.dimensions();
    let mut values =
        Vec::with_capacity(frames.len() * first_width as usize * first_height as usize * 3);
    for frame in frames {
        let (width, height) = frame.dimensions();
        if (width, height) != (first_width, first_height) {
            return Err(ExtractionError::MismatchedImages {
                first_width,
                first_height,
                width,
                height,
            });
        }
        values.extend(frame.as_raw().iter().map(|v| f32::from(*v) / 255.0));
    }
    Ok(PixelBuffer::rgb_batch(
        frames.len(),
        first_height as usize,
        first_width as usize,
        values,
    ))
}
