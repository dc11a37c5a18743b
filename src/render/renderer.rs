use std::time::Duration;

use image::RgbaImage;
use tokio::time::Instant;

use crate::foundation::core::{MIN_FRAME_SECS, SurfaceSize, secs_to_duration};
use crate::foundation::error::{ReelError, ReelResult};
use crate::program::FrameProgram;
use crate::render::FrameRGBA;
use crate::render::decode::{decode_frame, scale_to_surface};
use crate::render::surface::{RenderSurface, SurfaceReader};

/// Position of a frame inside a program: `(word index, frame index)`.
pub type FramePos = (usize, usize);

/// Where the draw loop currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderPhase {
    /// Surface bound, nothing drawn yet.
    Ready,
    DecodingFrame(FramePos),
    WaitingFrame(FramePos),
    Advancing,
    Done,
}

/// One completed draw.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawnFrame {
    pub word: usize,
    pub frame: usize,
    /// 0-based order among drawn frames.
    pub seq: u64,
    /// How long the frame stays up before the next one.
    pub hold: Duration,
    pub drawn_at: Instant,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub frames_total: u64,
    pub frames_drawn: u64,
    pub frames_skipped: u64,
}

/// Sequentially decodes and draws a [`FrameProgram`] onto its own fixed-size surface.
///
/// Draws are produced lazily through [`FrameRenderer::next_draw`], one at a time and in
/// program order. A renderer runs once; a fresh render needs a fresh renderer.
pub struct FrameRenderer {
    program: FrameProgram,
    surface: RenderSurface,
    min_frame: f64,
    next: FramePos,
    /// First decodable frame, decoded while binding the surface.
    primed: Option<(FramePos, RgbaImage)>,
    pending_hold: Option<(FramePos, Duration)>,
    phase: RenderPhase,
    stats: RenderStats,
}

impl FrameRenderer {
    /// Bind the surface to the first decodable frame of the whole program.
    ///
    /// Fails with [`ReelError::NoFrames`] when the first word has no frames or when no
    /// frame in the program decodes. Nothing is drawn here.
    pub fn new(program: FrameProgram) -> ReelResult<Self> {
        Self::with_min_frame_secs(program, MIN_FRAME_SECS)
    }

    pub fn with_min_frame_secs(program: FrameProgram, min_frame_secs: f64) -> ReelResult<Self> {
        let first_word = program
            .words
            .first()
            .ok_or_else(|| ReelError::no_frames("program has no word batches"))?;
        if first_word.frames.is_empty() {
            return Err(ReelError::no_frames("first word batch has no frames"));
        }

        let (pos, img) = find_first_decodable(&program)
            .ok_or_else(|| ReelError::no_frames("no frame in the program could be decoded"))?;
        let size = SurfaceSize::new(img.width(), img.height())?;
        tracing::debug!(
            width = size.width,
            height = size.height,
            word = pos.0,
            frame = pos.1,
            "bound render surface"
        );

        let stats = RenderStats {
            frames_total: program.frame_count() as u64,
            ..RenderStats::default()
        };

        Ok(Self {
            program,
            surface: RenderSurface::new(size),
            min_frame: min_frame_secs.max(0.0),
            next: (0, 0),
            primed: Some((pos, img)),
            pending_hold: None,
            phase: RenderPhase::Ready,
            stats,
        })
    }

    pub fn size(&self) -> SurfaceSize {
        self.surface.size()
    }

    /// Read-only handle for the recorder. Must be handed out before the first draw.
    pub fn surface(&self) -> SurfaceReader {
        self.surface.reader()
    }

    pub fn phase(&self) -> RenderPhase {
        self.phase
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn program(&self) -> &FrameProgram {
        &self.program
    }

    /// Advance to the next completed draw.
    ///
    /// Waits out the previous frame's display duration first, then decodes frames in order
    /// until one draws. Undecodable frames are logged and skipped without waiting.
    /// Returns `None` once the last frame's duration has elapsed.
    pub async fn next_draw(&mut self) -> Option<DrawnFrame> {
        if self.phase == RenderPhase::Done {
            return None;
        }

        if let Some((pos, hold)) = self.pending_hold.take() {
            self.phase = RenderPhase::WaitingFrame(pos);
            tokio::time::sleep(hold).await;
            self.phase = RenderPhase::Advancing;
        }

        while let Some(pos) = self.advance_cursor() {
            self.phase = RenderPhase::DecodingFrame(pos);
            let frame = match self.decode_at(pos).await {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(word = pos.0, frame = pos.1, error = %e, "skipping frame");
                    self.stats.frames_skipped += 1;
                    continue;
                }
            };

            if let Err(e) = self.surface.draw(frame) {
                tracing::warn!(word = pos.0, frame = pos.1, error = %e, "skipping frame");
                self.stats.frames_skipped += 1;
                continue;
            }

            let hold = self.hold_for(pos);
            let drawn = DrawnFrame {
                word: pos.0,
                frame: pos.1,
                seq: self.stats.frames_drawn,
                hold,
                drawn_at: Instant::now(),
            };
            self.stats.frames_drawn += 1;
            self.pending_hold = Some((pos, hold));
            self.phase = RenderPhase::WaitingFrame(pos);
            tracing::debug!(
                word = pos.0,
                frame = pos.1,
                seq = drawn.seq,
                hold_ms = hold.as_millis() as u64,
                "drew frame"
            );
            return Some(drawn);
        }

        self.phase = RenderPhase::Done;
        tracing::debug!(
            drawn = self.stats.frames_drawn,
            skipped = self.stats.frames_skipped,
            "render finished"
        );
        None
    }

    /// Drive the renderer to completion.
    pub async fn run_to_end(&mut self) -> RenderStats {
        while self.next_draw().await.is_some() {}
        self.stats
    }

    fn hold_for(&self, (word, frame): FramePos) -> Duration {
        let secs = self.program.words[word].duration_at(frame).max(self.min_frame);
        secs_to_duration(secs)
    }

    /// Decode and scale the frame at `pos` on the blocking pool.
    async fn decode_at(&mut self, pos: FramePos) -> ReelResult<FrameRGBA> {
        let size = self.surface.size();
        if self.primed.as_ref().is_some_and(|(p, _)| *p == pos)
            && let Some((_, img)) = self.primed.take()
        {
            return Ok(scale_to_surface(img, size));
        }
        let image = self.program.words[pos.0].frames[pos.1].clone();
        tokio::task::spawn_blocking(move || {
            decode_frame(&image).map(|img| scale_to_surface(img, size))
        })
        .await
        .map_err(|e| ReelError::frame_decode(format!("decode task failed: {e}")))?
    }

    /// Return the current position and move the cursor past it.
    fn advance_cursor(&mut self) -> Option<FramePos> {
        let (mut word, mut frame) = self.next;
        while word < self.program.words.len() {
            if frame < self.program.words[word].frames.len() {
                self.next = (word, frame + 1);
                return Some((word, frame));
            }
            word += 1;
            frame = 0;
        }
        self.next = (word, frame);
        None
    }
}

fn find_first_decodable(program: &FrameProgram) -> Option<(FramePos, RgbaImage)> {
    program.words.iter().enumerate().find_map(|(w, batch)| {
        batch.frames.iter().enumerate().find_map(|(f, image)| {
            if image.is_missing() {
                return None;
            }
            decode_frame(image).ok().map(|img| ((w, f), img))
        })
    })
}
