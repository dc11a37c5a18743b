use std::borrow::Cow;

use base64::Engine as _;
use image::RgbaImage;
use image::imageops::FilterType;

use crate::foundation::core::SurfaceSize;
use crate::foundation::error::{ReelError, ReelResult};
use crate::program::FrameImage;
use crate::render::FrameRGBA;

/// Raw encoded bytes of a frame payload.
///
/// Base64 payloads may carry a `data:<mime>;base64,` prefix.
pub fn frame_bytes(image: &FrameImage) -> ReelResult<Cow<'_, [u8]>> {
    match image {
        FrameImage::Missing => Err(ReelError::frame_decode("frame payload is missing")),
        FrameImage::Bytes(b) if b.is_empty() => {
            Err(ReelError::frame_decode("frame payload is empty"))
        }
        FrameImage::Bytes(b) => Ok(Cow::Borrowed(b.as_slice())),
        FrameImage::Base64(text) => {
            let payload = strip_data_url(text.trim());
            base64::engine::general_purpose::STANDARD
                .decode(payload)
                .map(Cow::Owned)
                .map_err(|e| ReelError::frame_decode(format!("invalid base64 payload: {e}")))
        }
    }
}

fn strip_data_url(text: &str) -> &str {
    if text.starts_with("data:")
        && let Some((_, rest)) = text.split_once(";base64,")
    {
        return rest;
    }
    text
}

/// Decode a frame payload into straight-alpha RGBA8. The raster format is sniffed.
pub fn decode_frame(image: &FrameImage) -> ReelResult<RgbaImage> {
    let bytes = frame_bytes(image)?;
    let dyn_img = image::load_from_memory(&bytes)
        .map_err(|e| ReelError::frame_decode(format!("decode image from memory: {e}")))?;
    let rgba = dyn_img.to_rgba8();
    if rgba.width() == 0 || rgba.height() == 0 {
        return Err(ReelError::frame_decode("decoded image has zero size"));
    }
    Ok(rgba)
}

/// Scale a decoded frame to exactly `size`, as a canvas `drawImage(img, 0, 0, w, h)` would.
pub fn scale_to_surface(img: RgbaImage, size: SurfaceSize) -> FrameRGBA {
    let img = if img.dimensions() == (size.width, size.height) {
        img
    } else {
        image::imageops::resize(&img, size.width, size.height, FilterType::Triangle)
    };
    FrameRGBA {
        width: size.width,
        height: size.height,
        data: img.into_raw(),
        premultiplied: false,
    }
}
