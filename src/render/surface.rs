use std::sync::Arc;

use tokio::sync::watch;

use crate::foundation::core::SurfaceSize;
use crate::foundation::error::{ReelError, ReelResult};
use crate::render::FrameRGBA;

/// Fixed-size drawable target.
///
/// The draw loop is the only mutator. Readers observe the latest drawn contents through
/// a [`SurfaceReader`]; each draw publishes a new immutable frame instead of mutating a
/// shared buffer.
#[derive(Debug)]
pub struct RenderSurface {
    size: SurfaceSize,
    tx: watch::Sender<Arc<FrameRGBA>>,
    draws: u64,
}

impl RenderSurface {
    /// A surface cleared to transparent black.
    pub fn new(size: SurfaceSize) -> Self {
        let blank = FrameRGBA {
            width: size.width,
            height: size.height,
            data: vec![0u8; size.rgba_len()],
            premultiplied: false,
        };
        let (tx, _rx) = watch::channel(Arc::new(blank));
        Self { size, tx, draws: 0 }
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    /// Number of draws applied so far.
    pub fn draw_count(&self) -> u64 {
        self.draws
    }

    /// Replace the surface contents with `frame`, which must match the bound size.
    pub fn draw(&mut self, frame: FrameRGBA) -> ReelResult<()> {
        if frame.width != self.size.width || frame.height != self.size.height {
            return Err(ReelError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, self.size.width, self.size.height
            )));
        }
        if frame.data.len() != self.size.rgba_len() {
            return Err(ReelError::validation(
                "frame.data size mismatch with width*height*4",
            ));
        }
        self.tx.send_replace(Arc::new(frame));
        self.draws += 1;
        Ok(())
    }

    /// Read-only handle for sampling the surface.
    pub fn reader(&self) -> SurfaceReader {
        SurfaceReader {
            size: self.size,
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only view of a [`RenderSurface`], used by the recorder to sample it.
#[derive(Clone, Debug)]
pub struct SurfaceReader {
    size: SurfaceSize,
    rx: watch::Receiver<Arc<FrameRGBA>>,
}

impl SurfaceReader {
    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    /// Current visual contents. Stays valid after the surface itself is dropped.
    pub fn snapshot(&self) -> Arc<FrameRGBA> {
        Arc::clone(&self.rx.borrow())
    }
}
