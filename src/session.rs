//! One generation request, end to end: text → program → render + capture → artifact.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::artifact::{Artifact, ArtifactManager, EphemeralRef};
use crate::config::GeneratorConfig;
use crate::encode::{FrameEncoder, create_encoder};
use crate::foundation::error::{ReelError, ReelResult};
use crate::program::FrameProgram;
use crate::record::{CaptureStats, StopTimer, StreamRecorder};
use crate::render::{FrameRenderer, RenderStats};
use crate::source::FrameSource;

/// Loading indicator for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationStatus {
    Idle,
    Loading,
    Ready,
    Failed,
    Cancelled,
}

impl GenerationStatus {
    pub fn is_loading(self) -> bool {
        self == Self::Loading
    }
}

/// Aborts an in-flight generation, e.g. when its dialog is closed.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

#[derive(Clone, Debug)]
pub struct GenerationOutcome {
    pub artifact: Arc<Artifact>,
    pub sign_grammar: String,
    pub total_duration: f64,
    pub download_filename: String,
    pub capture: CaptureStats,
    pub render: RenderStats,
    /// Draws still pending when the stop timer fired. They are not in the artifact.
    pub late_draws_abandoned: bool,
}

impl GenerationOutcome {
    /// The lines shown under the player.
    pub fn summary(&self) -> String {
        format!(
            "Duration: {:.2} sec\nFile Size: {:.2} MB",
            self.total_duration,
            self.artifact.size_mb()
        )
    }
}

/// State of exactly one generation request. Build a fresh one per request.
pub struct GenerationSession {
    config: GeneratorConfig,
    encoder: Option<Box<dyn FrameEncoder>>,
    status: watch::Sender<GenerationStatus>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl GenerationSession {
    pub fn new(config: GeneratorConfig) -> Self {
        let (status, _) = watch::channel(GenerationStatus::Idle);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            config,
            encoder: None,
            status,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    /// Use `encoder` instead of the one named by the config.
    pub fn with_encoder(mut self, encoder: Box<dyn FrameEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn status(&self) -> watch::Receiver<GenerationStatus> {
        self.status.subscribe()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    /// Request a program for `text` and turn it into an artifact.
    ///
    /// `on_ready` is called exactly once, with the artifact's reference, after capture is
    /// finalized. It is never called on failure or cancellation.
    #[tracing::instrument(skip_all, fields(text_len = text.len()))]
    pub async fn generate<F>(
        mut self,
        source: &dyn FrameSource,
        text: &str,
        manager: &mut ArtifactManager,
        on_ready: F,
    ) -> ReelResult<GenerationOutcome>
    where
        F: FnOnce(&EphemeralRef),
    {
        self.status.send_replace(GenerationStatus::Loading);
        let result = self.request_and_run(source, text, manager, on_ready).await;
        self.settle(result)
    }

    /// Render and capture an already obtained program.
    pub async fn generate_from_program<F>(
        mut self,
        program: FrameProgram,
        manager: &mut ArtifactManager,
        on_ready: F,
    ) -> ReelResult<GenerationOutcome>
    where
        F: FnOnce(&EphemeralRef),
    {
        self.status.send_replace(GenerationStatus::Loading);
        let result = match self.config.validate() {
            Ok(()) => self.run_program(program, manager, on_ready).await,
            Err(e) => Err(e),
        };
        self.settle(result)
    }

    fn settle(&self, result: ReelResult<GenerationOutcome>) -> ReelResult<GenerationOutcome> {
        let status = match &result {
            Ok(_) => GenerationStatus::Ready,
            Err(ReelError::Cancelled) => GenerationStatus::Cancelled,
            Err(e) => {
                tracing::error!(error = %e, "generation failed");
                GenerationStatus::Failed
            }
        };
        self.status.send_replace(status);
        result
    }

    async fn request_and_run<F>(
        &mut self,
        source: &dyn FrameSource,
        text: &str,
        manager: &mut ArtifactManager,
        on_ready: F,
    ) -> ReelResult<GenerationOutcome>
    where
        F: FnOnce(&EphemeralRef),
    {
        self.config.validate()?;
        let mut cancel_rx = self.cancel_rx.clone();
        let program = tokio::select! {
            biased;
            _ = cancelled(&mut cancel_rx) => return Err(ReelError::Cancelled),
            program = source.request_program(text) => program?,
        };
        self.run_program(program, manager, on_ready).await
    }

    async fn run_program<F>(
        &mut self,
        program: FrameProgram,
        manager: &mut ArtifactManager,
        on_ready: F,
    ) -> ReelResult<GenerationOutcome>
    where
        F: FnOnce(&EphemeralRef),
    {
        let fps = self.config.fps()?;
        program.check_duration_divergence(fps.frame_duration_secs());
        let sign_grammar = program.sign_grammar.clone();
        let total_duration = program.total_duration;

        // Binding the surface can fail with NoFrames; nothing is captured yet at that point.
        let mut renderer = FrameRenderer::with_min_frame_secs(program, self.config.min_frame_secs)?;

        let encoder = match self.encoder.take() {
            Some(encoder) => encoder,
            None => create_encoder(self.config.encoder, self.config.jpeg_quality),
        };
        let mut recorder = StreamRecorder::new(encoder, fps, self.config.background_rgba);
        let mut cancel_rx = self.cancel_rx.clone();
        if *cancel_rx.borrow() {
            return Err(ReelError::Cancelled);
        }

        recorder.begin(renderer.surface())?;
        let started_at = recorder.started_at().unwrap_or_else(Instant::now);
        let mut timer = StopTimer::schedule(started_at, total_duration, self.config.stop_margin());

        let mut draws_done = false;
        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel_rx) => {
                    recorder.abort().await;
                    return Err(ReelError::Cancelled);
                }
                _ = timer.fired() => break,
                next = renderer.next_draw(), if !draws_done => {
                    if next.is_none() {
                        draws_done = true;
                        tracing::debug!("all frames drawn, waiting for stop timer");
                    }
                }
            }
        }

        if !draws_done {
            tracing::warn!(
                phase = ?renderer.phase(),
                drawn = renderer.stats().frames_drawn,
                "stop timer fired with draws pending; abandoning the rest"
            );
        }
        let render = renderer.stats();
        drop(renderer);

        let artifact = tokio::select! {
            biased;
            _ = cancelled(&mut cancel_rx) => {
                recorder.abort().await;
                return Err(ReelError::Cancelled);
            }
            artifact = recorder.finalize(manager) => artifact?,
        };

        on_ready(artifact.ephemeral_ref());

        Ok(GenerationOutcome {
            download_filename: self.config.download_filename(recorder.file_extension()),
            artifact,
            sign_grammar,
            total_duration,
            capture: recorder.stats(),
            render,
            late_draws_abandoned: !draws_done,
        })
    }
}

/// Resolves once cancellation is requested. Never resolves if it cannot be requested anymore.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}
