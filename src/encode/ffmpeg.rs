use std::io::Read;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;

use crate::encode::{EncoderConfig, FrameEncoder, check_frame, flatten_to_opaque_rgba8};
use crate::foundation::error::{ReelError, ReelResult};
use crate::render::FrameRGBA;

pub const MIME_TYPE: &str = "video/webm";
pub const FILE_EXTENSION: &str = "webm";

const READ_CHUNK_BYTES: usize = 64 * 1024;

type Drain<T> = JoinHandle<std::io::Result<T>>;

/// Streams raw samples into the system `ffmpeg` and collects the WebM it writes to stdout.
///
/// Output chunks are read on a drain thread while capture runs and handed back from
/// [`FrameEncoder::finish`], in the order ffmpeg produced them.
pub struct FfmpegEncoder {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout_drain: Option<Drain<Vec<Vec<u8>>>>,
    stderr_drain: Option<Drain<Vec<u8>>>,
    scratch: Vec<u8>,
    cfg: Option<EncoderConfig>,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self {
            child: None,
            stdin: None,
            stdout_drain: None,
            stderr_drain: None,
            scratch: Vec::new(),
            cfg: None,
        }
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder for FfmpegEncoder {
    fn mime_type(&self) -> &'static str {
        MIME_TYPE
    }

    fn file_extension(&self) -> &'static str {
        FILE_EXTENSION
    }

    fn begin(&mut self, cfg: EncoderConfig) -> ReelResult<()> {
        if !cfg.size.width.is_multiple_of(2) || !cfg.size.height.is_multiple_of(2) {
            // yuv420p needs even dimensions; pad on the encoder side instead of failing.
            tracing::debug!(
                width = cfg.size.width,
                height = cfg.size.height,
                "odd surface size, ffmpeg will pad to even"
            );
        }

        if !is_ffmpeg_on_path() {
            return Err(ReelError::encode(
                "ffmpeg is required for WebM encoding, but was not found on PATH",
            ));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.size.width, cfg.size.height),
            "-r",
            &format!("{}/{}", cfg.fps.num, cfg.fps.den),
            "-i",
            "pipe:0",
            "-an",
            "-vf",
            "pad=ceil(iw/2)*2:ceil(ih/2)*2",
            "-c:v",
            "libvpx",
            "-b:v",
            "1M",
            "-deadline",
            "realtime",
            "-pix_fmt",
            "yuv420p",
            "-f",
            "webm",
            "pipe:1",
        ]);

        let mut child = cmd.spawn().map_err(|e| {
            ReelError::encode(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ReelError::encode("failed to open ffmpeg stdin (unexpected)"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ReelError::encode("failed to open ffmpeg stdout (unexpected)"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ReelError::encode("failed to open ffmpeg stderr (unexpected)"))?;

        let stdout_drain = std::thread::spawn(move || {
            let mut chunks = Vec::new();
            let mut buf = vec![0u8; READ_CHUNK_BYTES];
            loop {
                let n = stdout.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                chunks.push(buf[..n].to_vec());
            }
            Ok(chunks)
        });
        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        self.scratch = vec![0u8; cfg.size.rgba_len()];
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout_drain = Some(stdout_drain);
        self.stderr_drain = Some(stderr_drain);
        self.cfg = Some(cfg);
        Ok(())
    }

    fn encode_sample(&mut self, frame: &FrameRGBA) -> ReelResult<Vec<Vec<u8>>> {
        let cfg = self
            .cfg
            .ok_or_else(|| ReelError::encode("ffmpeg encoder not started"))?;
        check_frame(&cfg, frame)?;

        flatten_to_opaque_rgba8(&mut self.scratch, &frame.data, frame.premultiplied, cfg.bg_rgba)?;

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ReelError::encode("ffmpeg encoder is already finalized"));
        };

        use std::io::Write as _;
        stdin.write_all(&self.scratch).map_err(|e| {
            ReelError::encode(format!("failed to write frame to ffmpeg stdin: {e}"))
        })?;

        // Output is collected by the drain thread and returned from `finish`.
        Ok(Vec::new())
    }

    fn finish(&mut self) -> ReelResult<Vec<Vec<u8>>> {
        drop(self.stdin.take());
        let mut child = self
            .child
            .take()
            .ok_or_else(|| ReelError::encode("ffmpeg encoder not started"))?;

        let status = child
            .wait()
            .map_err(|e| ReelError::encode(format!("failed to wait for ffmpeg to finish: {e}")))?;
        let chunks = join_drain(self.stdout_drain.take(), "stdout")?;
        let stderr_bytes = join_drain(self.stderr_drain.take(), "stderr")?;
        self.cfg = None;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            return Err(ReelError::encode(format!(
                "ffmpeg exited with status {}: {}",
                status,
                stderr.trim()
            )));
        }

        Ok(chunks)
    }

    fn abort(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                tracing::debug!(error = %e, "ffmpeg already exited");
            }
            let _ = child.wait();
        }
        // Pipes are closed now, so the drains return promptly.
        let _ = join_drain(self.stdout_drain.take(), "stdout");
        let _ = join_drain(self.stderr_drain.take(), "stderr");
        self.cfg = None;
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.abort();
        }
    }
}

fn join_drain<T: Default>(handle: Option<Drain<T>>, stream: &str) -> ReelResult<T> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| ReelError::encode(format!("ffmpeg {stream} drain thread panicked")))?
            .map_err(|e| ReelError::encode(format!("ffmpeg {stream} read failed: {e}"))),
        None => Ok(T::default()),
    }
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::{Fps, SurfaceSize};

    #[test]
    fn sample_before_begin_fails() {
        let mut enc = FfmpegEncoder::new();
        let frame = FrameRGBA {
            width: 2,
            height: 2,
            data: vec![0u8; 16],
            premultiplied: false,
        };
        assert!(enc.encode_sample(&frame).is_err());
        assert!(enc.finish().is_err());
    }

    #[test]
    fn encodes_webm_when_ffmpeg_is_available() {
        if !is_ffmpeg_on_path() {
            eprintln!("skipping: ffmpeg not on PATH");
            return;
        }
        let size = SurfaceSize::new(16, 16).unwrap();
        let mut enc = FfmpegEncoder::new();
        enc.begin(EncoderConfig {
            size,
            fps: Fps::new(30, 1).unwrap(),
            bg_rgba: [0, 0, 0, 255],
        })
        .unwrap();
        let frame = FrameRGBA {
            width: 16,
            height: 16,
            data: [255u8, 0, 0, 255].repeat(256),
            premultiplied: false,
        };
        for _ in 0..10 {
            assert!(enc.encode_sample(&frame).unwrap().is_empty());
        }
        let bytes: Vec<u8> = enc.finish().unwrap().concat();
        // EBML magic
        assert_eq!(&bytes[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
    }
}
