#![forbid(unsafe_code)]

pub mod artifact;
pub mod config;
pub mod encode;
pub mod foundation;
pub mod playback;
pub mod program;
pub mod record;
pub mod render;
pub mod session;
pub mod source;

pub use artifact::{Artifact, ArtifactManager, ArtifactSlot, EphemeralRef};
pub use config::GeneratorConfig;
pub use encode::{
    EncoderConfig, EncoderKind, FfmpegEncoder, FrameEncoder, MjpegEncoder, create_encoder,
    is_ffmpeg_on_path,
};
pub use foundation::core::{Fps, MIN_FRAME_SECS, SurfaceSize};
pub use foundation::error::{ReelError, ReelResult};
pub use playback::{PlaybackState, PlaybackSubscription, PlaybackTracker, Playhead};
pub use program::{FrameImage, FrameProgram, FramesRequest, FramesResponse, WordFrameBatch};
pub use record::{CaptureState, CaptureStats, StopTimer, StreamRecorder};
pub use render::{
    DrawnFrame, FramePos, FrameRGBA, FrameRenderer, RenderPhase, RenderStats, RenderSurface,
    SurfaceReader,
};
pub use session::{CancelHandle, GenerationOutcome, GenerationSession, GenerationStatus};
pub use source::{FrameSource, HttpFrameSource, StaticFrameSource};
