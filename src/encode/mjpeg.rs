use image::ImageEncoder as _;
use image::codecs::jpeg::JpegEncoder;

use crate::encode::{EncoderConfig, FrameEncoder, check_frame, flatten_to_opaque_rgba8};
use crate::foundation::error::{ReelError, ReelResult};
use crate::render::FrameRGBA;

pub const MIME_TYPE: &str = "video/x-motion-jpeg";
pub const FILE_EXTENSION: &str = "mjpeg";

/// Software Motion-JPEG encoder: every sample becomes one self-contained JPEG chunk.
///
/// The concatenated stream plays with `ffplay -f mjpeg -framerate <fps>`.
pub struct MjpegEncoder {
    quality: u8,
    cfg: Option<EncoderConfig>,
    opaque: Vec<u8>,
    rgb: Vec<u8>,
    samples: u64,
}

impl MjpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            cfg: None,
            opaque: Vec::new(),
            rgb: Vec::new(),
            samples: 0,
        }
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

impl FrameEncoder for MjpegEncoder {
    fn mime_type(&self) -> &'static str {
        MIME_TYPE
    }

    fn file_extension(&self) -> &'static str {
        FILE_EXTENSION
    }

    fn begin(&mut self, cfg: EncoderConfig) -> ReelResult<()> {
        let len = cfg.size.rgba_len();
        self.opaque = vec![0u8; len];
        self.rgb = vec![0u8; len / 4 * 3];
        self.samples = 0;
        self.cfg = Some(cfg);
        Ok(())
    }

    fn encode_sample(&mut self, frame: &FrameRGBA) -> ReelResult<Vec<Vec<u8>>> {
        let cfg = self
            .cfg
            .ok_or_else(|| ReelError::encode("mjpeg encoder not started"))?;
        check_frame(&cfg, frame)?;

        flatten_to_opaque_rgba8(&mut self.opaque, &frame.data, frame.premultiplied, cfg.bg_rgba)?;
        for (d, s) in self.rgb.chunks_exact_mut(3).zip(self.opaque.chunks_exact(4)) {
            d.copy_from_slice(&s[..3]);
        }

        let mut chunk = Vec::new();
        JpegEncoder::new_with_quality(&mut chunk, self.quality)
            .write_image(
                &self.rgb,
                cfg.size.width,
                cfg.size.height,
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| ReelError::encode(format!("jpeg encode failed: {e}")))?;
        self.samples += 1;
        Ok(vec![chunk])
    }

    fn finish(&mut self) -> ReelResult<Vec<Vec<u8>>> {
        if self.cfg.take().is_none() {
            return Err(ReelError::encode("mjpeg encoder not started"));
        }
        Ok(Vec::new())
    }

    fn abort(&mut self) {
        self.cfg = None;
    }
}
