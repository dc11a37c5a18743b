//! Surface capture: samples a render surface on a wall-clock cadence into an encoded stream.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, Sleep};

use crate::artifact::{Artifact, ArtifactManager};
use crate::encode::{EncoderConfig, FrameEncoder};
use crate::foundation::core::{Fps, secs_to_duration};
use crate::foundation::error::{ReelError, ReelResult};
use crate::render::{FrameRGBA, SurfaceReader};

/// Recorder lifecycle. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CaptureState {
    Idle,
    Capturing,
    Finalizing,
    Complete,
    /// Cancelled or failed; holds no partial output.
    Aborted,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub samples: u64,
    pub chunks: usize,
    /// Wall-clock time between `begin` and the stop of sampling.
    pub elapsed: Duration,
}

/// How the sampler should wind down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Control {
    /// Flush the encoder and hand back the stream.
    Stop,
    /// Tear the encoder down and discard everything.
    Abort,
}

struct SamplerOutput {
    chunks: Vec<Vec<u8>>,
    samples: u64,
}

type Sampler = JoinHandle<ReelResult<SamplerOutput>>;

/// Captures a [`SurfaceReader`] into an [`Artifact`].
///
/// Sampling runs as its own task at a fixed rate, independent of when the surface is drawn.
/// Encoder calls run on the blocking pool, so a slow encoder delays neither the draw loop nor
/// the stop timer. The encoder and the chunk list are owned by the sampler while capturing;
/// the sampler also makes the encoder's final `finish` or `abort` call.
pub struct StreamRecorder {
    state: CaptureState,
    fps: Fps,
    bg_rgba: [u8; 4],
    mime_type: &'static str,
    file_extension: &'static str,
    encoder: Option<Box<dyn FrameEncoder>>,
    sampler: Option<Sampler>,
    control_tx: Option<oneshot::Sender<Control>>,
    started_at: Option<Instant>,
    artifact: Option<Arc<Artifact>>,
    stats: CaptureStats,
}

impl StreamRecorder {
    pub fn new(encoder: Box<dyn FrameEncoder>, fps: Fps, bg_rgba: [u8; 4]) -> Self {
        Self {
            state: CaptureState::Idle,
            fps,
            bg_rgba,
            mime_type: encoder.mime_type(),
            file_extension: encoder.file_extension(),
            encoder: Some(encoder),
            sampler: None,
            control_tx: None,
            started_at: None,
            artifact: None,
            stats: CaptureStats::default(),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    pub fn file_extension(&self) -> &'static str {
        self.file_extension
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// Start capturing `surface`.
    ///
    /// The surface is snapshotted before this returns and that snapshot is the first sample,
    /// so capture is active before any draw. Must be called from within a tokio runtime.
    pub fn begin(&mut self, surface: SurfaceReader) -> ReelResult<()> {
        if self.state != CaptureState::Idle {
            return Err(ReelError::validation(format!(
                "recorder cannot begin from state {:?}",
                self.state
            )));
        }
        let mut encoder = self
            .encoder
            .take()
            .ok_or_else(|| ReelError::encode("recorder has no encoder"))?;

        let cfg = EncoderConfig {
            size: surface.size(),
            fps: self.fps,
            bg_rgba: self.bg_rgba,
        };
        if let Err(e) = encoder.begin(cfg) {
            self.state = CaptureState::Aborted;
            return Err(e);
        }

        let started_at = Instant::now();
        let first = surface.snapshot();
        let (control_tx, control_rx) = oneshot::channel();
        self.sampler = Some(tokio::spawn(run_sampler(
            encoder,
            surface,
            first,
            started_at,
            self.fps.interval(),
            control_rx,
        )));
        self.control_tx = Some(control_tx);
        self.started_at = Some(started_at);
        self.state = CaptureState::Capturing;
        tracing::info!(
            fps = self.fps.as_f64(),
            mime = self.mime_type,
            width = cfg.size.width,
            height = cfg.size.height,
            "capture started"
        );
        Ok(())
    }

    /// Stop sampling and turn the accumulated chunks into one immutable artifact.
    ///
    /// Returns the same artifact on every call once complete. Fails with
    /// [`ReelError::NotCapturing`] while idle.
    pub async fn finalize(&mut self, manager: &mut ArtifactManager) -> ReelResult<Arc<Artifact>> {
        match self.state {
            CaptureState::Idle => return Err(ReelError::NotCapturing),
            CaptureState::Complete => {
                return self
                    .artifact
                    .clone()
                    .ok_or_else(|| ReelError::encode("complete recorder lost its artifact"));
            }
            CaptureState::Aborted => return Err(ReelError::Cancelled),
            CaptureState::Finalizing => {
                return Err(ReelError::validation("finalize is already in progress"));
            }
            CaptureState::Capturing => {}
        }

        self.state = CaptureState::Finalizing;
        if let Some(control_tx) = self.control_tx.take() {
            let _ = control_tx.send(Control::Stop);
        }
        let stopped_at = Instant::now();

        let Some(sampler) = self.sampler.take() else {
            self.state = CaptureState::Aborted;
            return Err(ReelError::encode("capture task missing"));
        };
        let SamplerOutput { chunks, samples } = match sampler.await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                self.state = CaptureState::Aborted;
                return Err(e);
            }
            Err(e) => {
                self.state = CaptureState::Aborted;
                return Err(ReelError::encode(format!("capture task failed: {e}")));
            }
        };

        self.stats = CaptureStats {
            samples,
            chunks: chunks.len(),
            elapsed: self
                .started_at
                .map(|t| stopped_at.duration_since(t))
                .unwrap_or_default(),
        };
        let artifact = manager.create(chunks, self.mime_type);
        self.artifact = Some(Arc::clone(&artifact));
        self.state = CaptureState::Complete;
        tracing::info!(
            samples,
            elapsed_ms = self.stats.elapsed.as_millis() as u64,
            size_bytes = artifact.size_bytes(),
            "capture finalized"
        );
        Ok(artifact)
    }

    /// Stop capture and drop everything captured so far. No artifact is produced.
    ///
    /// Waits until the encoder has been torn down. A completed recorder keeps its artifact.
    pub async fn abort(&mut self) {
        if self.state == CaptureState::Complete || self.state == CaptureState::Aborted {
            return;
        }
        if let Some(control_tx) = self.control_tx.take() {
            let _ = control_tx.send(Control::Abort);
        }
        if let Some(sampler) = self.sampler.take() {
            match sampler.await {
                Ok(Err(ReelError::Cancelled)) | Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "capture failed before abort"),
                Err(e) => tracing::debug!(error = %e, "capture task ended abnormally"),
            }
        }
        if let Some(mut encoder) = self.encoder.take() {
            encoder.abort();
        }
        tracing::info!(from = ?self.state, "capture aborted");
        self.state = CaptureState::Aborted;
    }
}

impl Drop for StreamRecorder {
    fn drop(&mut self) {
        // Dropping the control sender tells a live sampler to abort its encoder.
        drop(self.control_tx.take());
    }
}

/// Run `f` against the encoder on the blocking pool and hand the encoder back.
async fn on_encoder_thread<T, F>(
    mut encoder: Box<dyn FrameEncoder>,
    f: F,
) -> ReelResult<(Box<dyn FrameEncoder>, T)>
where
    T: Send + 'static,
    F: FnOnce(&mut Box<dyn FrameEncoder>) -> T + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let out = f(&mut encoder);
        (encoder, out)
    })
    .await
    .map_err(|e| ReelError::encode(format!("encoder task failed: {e}")))
}

async fn run_sampler(
    mut encoder: Box<dyn FrameEncoder>,
    surface: SurfaceReader,
    first: Arc<FrameRGBA>,
    started_at: Instant,
    period: Duration,
    mut control_rx: oneshot::Receiver<Control>,
) -> ReelResult<SamplerOutput> {
    let mut chunks = Vec::new();
    let mut samples = 0u64;
    let mut ticker = tokio::time::interval_at(started_at + period, period);
    // Catch up on late ticks so the sample count tracks elapsed time.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let mut pending = Some(first);

    let control = loop {
        if let Some(frame) = pending.take() {
            let (enc, encoded) =
                on_encoder_thread(encoder, move |enc| enc.encode_sample(&frame)).await?;
            encoder = enc;
            match encoded {
                Ok(new) => chunks.extend(new.into_iter().filter(|c| !c.is_empty())),
                Err(e) => {
                    tracing::warn!(error = %e, samples, "capture sample failed");
                    let _ = on_encoder_thread(encoder, |enc| enc.abort()).await;
                    return Err(e);
                }
            }
            samples += 1;
        }

        tokio::select! {
            biased;
            // A dropped recorder counts as an abort.
            control = &mut control_rx => break control.unwrap_or(Control::Abort),
            _ = ticker.tick() => pending = Some(surface.snapshot()),
        }
    };

    match control {
        Control::Stop => {
            let (_, tail) = on_encoder_thread(encoder, |enc| enc.finish()).await?;
            chunks.extend(tail?.into_iter().filter(|c| !c.is_empty()));
            Ok(SamplerOutput { chunks, samples })
        }
        Control::Abort => {
            on_encoder_thread(encoder, |enc| enc.abort()).await?;
            Err(ReelError::Cancelled)
        }
    }
}

/// The single timer that decides when capture stops.
///
/// Fires at `start + total_duration + margin`, independent of draw completion.
pub struct StopTimer {
    deadline: Instant,
    sleep: Pin<Box<Sleep>>,
}

impl StopTimer {
    pub fn schedule(start: Instant, total_duration_secs: f64, margin: Duration) -> Self {
        let deadline = start + secs_to_duration(total_duration_secs) + margin;
        Self {
            deadline,
            sleep: Box::pin(tokio::time::sleep_until(deadline)),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_elapsed(&self) -> bool {
        self.sleep.is_elapsed()
    }

    /// Wait until the deadline. Cancel-safe; dropping the timer cancels it.
    pub async fn fired(&mut self) {
        self.sleep.as_mut().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::MjpegEncoder;
    use crate::foundation::core::SurfaceSize;
    use crate::render::{FrameRGBA, RenderSurface};

    fn recorder() -> StreamRecorder {
        StreamRecorder::new(
            Box::new(MjpegEncoder::new(80)),
            Fps::new(30, 1).unwrap(),
            [0, 0, 0, 255],
        )
    }

    fn surface() -> RenderSurface {
        RenderSurface::new(SurfaceSize::new(4, 4).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_while_idle_is_not_capturing() {
        let mut rec = recorder();
        let mut mgr = ArtifactManager::new();
        assert!(matches!(
            rec.finalize(&mut mgr).await,
            Err(ReelError::NotCapturing)
        ));
        assert_eq!(rec.state(), CaptureState::Idle);
        assert_eq!(mgr.live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn samples_follow_wall_clock_not_draws() {
        let surface = surface();
        let mut rec = recorder();
        let mut mgr = ArtifactManager::new();

        rec.begin(surface.reader()).unwrap();
        assert_eq!(rec.state(), CaptureState::Capturing);
        tokio::time::sleep(Duration::from_secs(1)).await;
        let artifact = rec.finalize(&mut mgr).await.unwrap();

        let stats = rec.stats();
        // Initial sample plus one per 1/30 s tick, without a single draw.
        assert!((30..=32).contains(&stats.samples), "{stats:?}");
        assert_eq!(stats.chunks as u64, stats.samples);
        assert!(stats.elapsed >= Duration::from_secs(1));
        assert!(stats.elapsed <= Duration::from_millis(1002));
        assert!(artifact.size_bytes() > 0);
        assert_eq!(artifact.mime_type(), "video/x-motion-jpeg");
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_is_idempotent() {
        let surface = surface();
        let mut rec = recorder();
        let mut mgr = ArtifactManager::new();
        rec.begin(surface.reader()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let a = rec.finalize(&mut mgr).await.unwrap();
        let b = rec.finalize(&mut mgr).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.ephemeral_ref(), b.ephemeral_ref());
        assert_eq!(a.size_bytes(), b.size_bytes());
        assert_eq!(mgr.live_count(), 1);
        assert_eq!(rec.state(), CaptureState::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn begin_twice_is_rejected() {
        let surface = surface();
        let mut rec = recorder();
        rec.begin(surface.reader()).unwrap();
        assert!(rec.begin(surface.reader()).is_err());
        assert_eq!(rec.state(), CaptureState::Capturing);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_discards_partial_capture() {
        let surface = surface();
        let mut rec = recorder();
        let mut mgr = ArtifactManager::new();
        rec.begin(surface.reader()).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        rec.abort().await;
        assert_eq!(rec.state(), CaptureState::Aborted);
        assert!(matches!(
            rec.finalize(&mut mgr).await,
            Err(ReelError::Cancelled)
        ));
        assert_eq!(mgr.live_count(), 0);
        assert!(rec.begin(surface.reader()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn captured_samples_reflect_latest_draw() {
        let size = SurfaceSize::new(4, 4).unwrap();
        let mut surface = RenderSurface::new(size);
        let mut rec = recorder();
        let mut mgr = ArtifactManager::new();
        rec.begin(surface.reader()).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        surface
            .draw(FrameRGBA {
                width: 4,
                height: 4,
                data: [255u8, 255, 255, 255].repeat(16),
                premultiplied: false,
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let artifact = rec.finalize(&mut mgr).await.unwrap();

        // First JPEG is the blank surface, the last one is white.
        let bytes = artifact.bytes();
        let first_eoi = bytes.windows(2).position(|w| w == [0xFF, 0xD9]).unwrap();
        let first = image::load_from_memory(&bytes[..first_eoi + 2])
            .unwrap()
            .to_rgb8();
        assert!(first.get_pixel(0, 0).0[0] < 30);
        let last_soi = bytes
            .windows(3)
            .rposition(|w| w == [0xFF, 0xD8, 0xFF])
            .unwrap();
        let last = image::load_from_memory(&bytes[last_soi..]).unwrap().to_rgb8();
        assert!(last.get_pixel(0, 0).0[0] > 225);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_timer_fires_after_total_plus_margin() {
        let start = Instant::now();
        let mut timer = StopTimer::schedule(start, 2.0, Duration::from_millis(100));
        assert_eq!(timer.deadline() - start, Duration::from_millis(2100));
        assert!(!timer.is_elapsed());
        timer.fired().await;
        assert!(start.elapsed() >= Duration::from_millis(2100));
        assert!(timer.is_elapsed());
    }
}
