use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use signreel::{
    ArtifactManager, EncoderKind, FrameProgram, GenerationOutcome, GenerationSession,
    GeneratorConfig, HttpFrameSource, PlaybackTracker, Playhead,
};
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "signreel", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Request frames for a sentence and record them into a video.
    Generate(GenerateArgs),
    /// Record a saved service response into a video, without touching the network.
    Render(RenderArgs),
    /// Record a saved service response in memory and play it back with time-left telemetry.
    Play(PlayArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Generator config JSON. Flags below override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sign-generation endpoint URL.
    #[arg(long)]
    endpoint: Option<String>,

    /// Output encoding.
    #[arg(long, value_enum)]
    encoder: Option<EncoderChoice>,

    /// Capture samples per second.
    #[arg(long)]
    fps: Option<u32>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct GenerateArgs {
    /// Sentence to translate.
    #[arg(long)]
    text: String,

    /// Output video path. Defaults to the configured download name.
    #[arg(long)]
    out: Option<PathBuf>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Saved `get_frames` response JSON.
    #[arg(long)]
    program: PathBuf,

    /// Output video path. Defaults to the configured download name.
    #[arg(long)]
    out: Option<PathBuf>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Parser, Debug)]
struct PlayArgs {
    /// Saved `get_frames` response JSON.
    #[arg(long)]
    program: PathBuf,

    /// Telemetry update interval in milliseconds.
    #[arg(long, default_value_t = 250)]
    tick_ms: u64,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EncoderChoice {
    Mjpeg,
    Ffmpeg,
}

impl From<EncoderChoice> for EncoderKind {
    fn from(choice: EncoderChoice) -> Self {
        match choice {
            EncoderChoice::Mjpeg => EncoderKind::Mjpeg,
            EncoderChoice::Ffmpeg => EncoderKind::Ffmpeg,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Generate(args) => cmd_generate(args).await,
        Command::Render(args) => cmd_render(args).await,
        Command::Play(args) => cmd_play(args).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(common: &CommonArgs) -> anyhow::Result<GeneratorConfig> {
    init_tracing(common.verbose);

    let mut cfg = match &common.config {
        Some(path) => GeneratorConfig::from_json_path(path)?,
        None => GeneratorConfig::default(),
    }
    .with_env_overrides();

    if let Some(endpoint) = &common.endpoint {
        cfg.endpoint = endpoint.clone();
    }
    if let Some(encoder) = common.encoder {
        cfg.encoder = encoder.into();
    }
    if let Some(fps) = common.fps {
        cfg.capture_fps = fps;
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Cancel the session's generation on the first Ctrl-C.
fn cancel_on_ctrl_c(session: &GenerationSession) {
    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for ctrl-c");
            return;
        }
        tracing::warn!("interrupted, cancelling generation");
        cancel.cancel();
    });
}

fn read_program_json(path: &Path) -> anyhow::Result<FrameProgram> {
    let bytes = std::fs::read(path).with_context(|| format!("open program '{}'", path.display()))?;
    let program = FrameProgram::from_json_slice(&bytes)
        .with_context(|| format!("parse program '{}'", path.display()))?;
    Ok(program)
}

fn print_outcome(outcome: &GenerationOutcome) {
    if !outcome.sign_grammar.is_empty() {
        println!("Sign Grammar: {}", outcome.sign_grammar);
    }
    println!("{}", outcome.summary());
}

fn export(
    manager: &mut ArtifactManager,
    outcome: &GenerationOutcome,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let out = out.unwrap_or_else(|| PathBuf::from(&outcome.download_filename));
    let path = manager.export(&outcome.artifact, &out)?;
    manager.release(&outcome.artifact);
    eprintln!("wrote {}", path.display());
    Ok(())
}

async fn cmd_generate(args: GenerateArgs) -> anyhow::Result<()> {
    let cfg = load_config(&args.common)?;
    let source = HttpFrameSource::new(cfg.endpoint.clone(), cfg.request_timeout())?;

    let mut manager = ArtifactManager::new();
    let session = GenerationSession::new(cfg);
    cancel_on_ctrl_c(&session);
    let outcome = session
        .generate(&source, &args.text, &mut manager, |r| {
            tracing::info!(reference = %r, "video ready");
        })
        .await
        .context("generate sign video")?;

    print_outcome(&outcome);
    export(&mut manager, &outcome, args.out)
}

async fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let cfg = load_config(&args.common)?;
    let program = read_program_json(&args.program)?;

    let mut manager = ArtifactManager::new();
    let session = GenerationSession::new(cfg);
    cancel_on_ctrl_c(&session);
    let outcome = session
        .generate_from_program(program, &mut manager, |r| {
            tracing::info!(reference = %r, "video ready");
        })
        .await
        .context("render sign video")?;

    print_outcome(&outcome);
    export(&mut manager, &outcome, args.out)
}

async fn cmd_play(args: PlayArgs) -> anyhow::Result<()> {
    let cfg = load_config(&args.common)?;
    let program = read_program_json(&args.program)?;
    let tick = Duration::from_millis(args.tick_ms.max(1));

    let mut manager = ArtifactManager::new();
    let session = GenerationSession::new(cfg);
    cancel_on_ctrl_c(&session);
    let outcome = session
        .generate_from_program(program, &mut manager, |_| {})
        .await
        .context("render sign video")?;
    print_outcome(&outcome);

    let playhead = Playhead::new(outcome.artifact.clone());
    let mut telemetry = PlaybackTracker::new(outcome.total_duration).attach(&playhead);
    println!("Time Left: {:.2} sec", telemetry.state().time_remaining);

    let play = playhead.play_realtime(outcome.total_duration, tick);
    let report = async {
        while let Some(state) = telemetry.next_update().await {
            println!("Time Left: {:.2} sec", state.time_remaining);
            if state.time_remaining <= 0.0 {
                break;
            }
        }
    };
    tokio::join!(play, report);
    telemetry.detach();

    manager.release(&outcome.artifact);
    Ok(())
}
