pub mod ffmpeg;
pub mod mjpeg;

use serde::{Deserialize, Serialize};

use crate::foundation::core::{Fps, SurfaceSize, mul_div255};
use crate::foundation::error::{ReelError, ReelResult};
use crate::render::FrameRGBA;

pub use ffmpeg::{FfmpegEncoder, is_ffmpeg_on_path};
pub use mjpeg::MjpegEncoder;

/// Configuration handed to a [`FrameEncoder`] when capture begins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncoderConfig {
    pub size: SurfaceSize,
    pub fps: Fps,
    /// Background used to flatten alpha (straight RGBA8).
    pub bg_rgba: [u8; 4],
}

/// Continuous frame-to-container encoder driven by the recorder.
///
/// Ordering contract: `begin` once, then `encode_sample` in capture order, then exactly one
/// of `finish` or `abort`. Every returned chunk is appended to the capture buffer as is; the
/// artifact is the concatenation of all chunks.
pub trait FrameEncoder: Send {
    fn mime_type(&self) -> &'static str;
    fn file_extension(&self) -> &'static str;
    fn begin(&mut self, cfg: EncoderConfig) -> ReelResult<()>;
    /// Encode one surface sample and return any chunks that became available.
    fn encode_sample(&mut self, frame: &FrameRGBA) -> ReelResult<Vec<Vec<u8>>>;
    /// Flush the stream and return the trailing chunks.
    fn finish(&mut self) -> ReelResult<Vec<Vec<u8>>>;
    /// Tear down without producing output.
    fn abort(&mut self);
}

/// Available encoder back-ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    /// Software Motion-JPEG, one JPEG per sample. No external tools.
    #[default]
    Mjpeg,
    /// VP8 WebM through the system `ffmpeg`.
    Ffmpeg,
}

impl EncoderKind {
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Mjpeg => mjpeg::MIME_TYPE,
            Self::Ffmpeg => ffmpeg::MIME_TYPE,
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Mjpeg => mjpeg::FILE_EXTENSION,
            Self::Ffmpeg => ffmpeg::FILE_EXTENSION,
        }
    }
}

pub fn create_encoder(kind: EncoderKind, jpeg_quality: u8) -> Box<dyn FrameEncoder> {
    match kind {
        EncoderKind::Mjpeg => Box::new(MjpegEncoder::new(jpeg_quality)),
        EncoderKind::Ffmpeg => Box::new(FfmpegEncoder::new()),
    }
}

pub(crate) fn check_frame(cfg: &EncoderConfig, frame: &FrameRGBA) -> ReelResult<()> {
    if frame.width != cfg.size.width || frame.height != cfg.size.height {
        return Err(ReelError::validation(format!(
            "frame size mismatch: got {}x{}, expected {}x{}",
            frame.width, frame.height, cfg.size.width, cfg.size.height
        )));
    }
    if frame.data.len() != cfg.size.rgba_len() {
        return Err(ReelError::validation(
            "frame.data size mismatch with width*height*4",
        ));
    }
    Ok(())
}

pub(crate) fn flatten_to_opaque_rgba8(
    dst: &mut [u8],
    src: &[u8],
    src_is_premul: bool,
    bg_rgba: [u8; 4],
) -> ReelResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) {
        return Err(ReelError::validation(
            "flatten_to_opaque_rgba8 expects equal-length rgba8 buffers",
        ));
    }

    let bg_r = bg_rgba[0] as u16;
    let bg_g = bg_rgba[1] as u16;
    let bg_b = bg_rgba[2] as u16;

    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let a = s[3] as u16;
        if a == 255 {
            d.copy_from_slice(s);
            continue;
        }

        let inv = 255u16 - a;

        let (r, g, b) = if src_is_premul {
            (
                s[0] as u16 + mul_div255(bg_r, inv),
                s[1] as u16 + mul_div255(bg_g, inv),
                s[2] as u16 + mul_div255(bg_b, inv),
            )
        } else {
            (
                mul_div255(s[0] as u16, a) + mul_div255(bg_r, inv),
                mul_div255(s[1] as u16, a) + mul_div255(bg_g, inv),
                mul_div255(s[2] as u16, a) + mul_div255(bg_b, inv),
            )
        };

        d[0] = r.min(255) as u8;
        d[1] = g.min(255) as u8;
        d[2] = b.min(255) as u8;
        d[3] = 255;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_premul_over_black_produces_expected_rgb() {
        // Premultiplied red @ 50% alpha => rgb is 128,0,0 when premul.
        let src = vec![128u8, 0u8, 0u8, 128u8];
        let mut dst = vec![0u8; 4];
        flatten_to_opaque_rgba8(&mut dst, &src, true, [0, 0, 0, 255]).unwrap();
        assert_eq!(dst, vec![128u8, 0u8, 0u8, 255u8]);
    }

    #[test]
    fn flatten_straight_transparent_returns_background() {
        let src = vec![200u8, 10u8, 10u8, 0u8];
        let mut dst = vec![0u8; 4];
        flatten_to_opaque_rgba8(&mut dst, &src, false, [10, 20, 30, 255]).unwrap();
        assert_eq!(dst, vec![10u8, 20u8, 30u8, 255u8]);
    }

    #[test]
    fn encoder_kind_names_match_container() {
        assert_eq!(EncoderKind::Ffmpeg.file_extension(), "webm");
        assert_eq!(EncoderKind::Ffmpeg.mime_type(), "video/webm");
        assert_eq!(EncoderKind::Mjpeg.file_extension(), "mjpeg");
        let kind: EncoderKind = serde_json::from_str("\"ffmpeg\"").unwrap();
        assert_eq!(kind, EncoderKind::Ffmpeg);
    }
}
