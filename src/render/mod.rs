pub mod decode;
pub mod renderer;
pub mod surface;

pub use renderer::{DrawnFrame, FramePos, FrameRenderer, RenderPhase, RenderStats};
pub use surface::{RenderSurface, SurfaceReader};

/// One full surface image, tightly packed RGBA8, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRGBA {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub premultiplied: bool,
}
