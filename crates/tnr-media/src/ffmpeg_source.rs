//! Container decoding through an `ffmpeg` child process.
//!
//! The child demuxes and decodes the first video stream and writes
//! `rawvideo bgr24` frames to its stdout, which this source reads one frame
//! at a time.
//!
//! The decoder runs with `-fps_mode passthrough` (FFmpeg 5.1 or newer): the
//! rawvideo muxer would otherwise force constant frame rate and duplicate or
//! drop frames of variable-rate inputs.  Every decoded frame is delivered
//! exactly once, in decode order.

use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use tnr_core::error::{EngineError, Result};
use tnr_core::frame_traits::FrameSource;
use tnr_core::types::{FrameGeometry, Framerate, HostFrame, PixelFormat, try_zeroed};

use crate::probe::probe_container;
use crate::process::{self, StderrCollector};
use crate::raw_source::read_full;

pub struct FfmpegFrameSource {
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: StderrCollector,
    geometry: FrameGeometry,
    frame_bytes: usize,
    framerate: Framerate,
    frames_read: u64,
    path: PathBuf,
}

fn decoder_command(path: &Path) -> Command {
    let mut cmd = Command::new(process::tool_path("ffmpeg", "TNR_FFMPEG"));
    cmd.args(["-v", "error", "-nostdin", "-i"])
        .arg(path)
        .args(["-map", "0:v:0", "-fps_mode", "passthrough"])
        .args(["-f", "rawvideo", "-pix_fmt", "bgr24", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

impl FfmpegFrameSource {
    /// Probe `path` and start decoding it.
    pub fn open(path: &Path) -> Result<Self> {
        let meta = probe_container(path)?;
        let frame_bytes = PixelFormat::Bgr8
            .validate(meta.geometry)
            .map_err(|msg| EngineError::Configuration(format!("{}: {msg}", path.display())))?;

        let mut cmd = decoder_command(path);
        let mut child = process::spawn(&mut cmd, "ffmpeg")?;
        let stdout = child.stdout.take();
        let stderr = StderrCollector::start(child.stderr.take());

        tracing::info!(
            path = %path.display(),
            geometry = %meta.geometry,
            framerate = %meta.framerate,
            "FFmpeg source opened"
        );
        Ok(Self {
            child,
            stdout,
            stderr,
            geometry: meta.geometry,
            frame_bytes,
            framerate: meta.framerate,
            frames_read: 0,
            path: path.to_path_buf(),
        })
    }

    /// Reap the decoder after its stdout reached EOF.
    fn reap(&mut self) -> Result<()> {
        self.stdout = None;
        let status = self.child.wait().map_err(|e| {
            EngineError::Media(format!("ffmpeg decoder for {} vanished: {e}", self.path.display()))
        })?;
        let log = self.stderr.finish();
        if !status.success() {
            return Err(EngineError::Media(format!(
                "ffmpeg decoder for {} exited with {status}: {log}",
                self.path.display()
            )));
        }
        tracing::debug!(frames = self.frames_read, "FFmpeg decoder finished");
        Ok(())
    }
}

impl FrameSource for FfmpegFrameSource {
    fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    fn framerate(&self) -> Framerate {
        self.framerate
    }

    fn read_frame(&mut self) -> Result<Option<HostFrame>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };
        let size = self.frame_bytes;
        let mut data = try_zeroed(size).map_err(|e| {
            EngineError::Media(format!("cannot allocate {} frame buffer: {e}", self.geometry))
        })?;
        let filled = read_full(stdout, &mut data).map_err(|e| {
            EngineError::Media(format!("read from ffmpeg decoder failed: {e}"))
        })?;

        match filled {
            0 => {
                self.reap()?;
                Ok(None)
            }
            n if n < size => {
                let _ = self.reap();
                Err(EngineError::Media(format!(
                    "{}: decoder produced a truncated frame {} ({n} of {size} bytes)",
                    self.path.display(),
                    self.frames_read + 1
                )))
            }
            _ => {
                self.frames_read += 1;
                HostFrame::new(self.geometry, PixelFormat::Bgr8, data).map(Some)
            }
        }
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        if self.stdout.take().is_some() {
            // Stopped before EOF; the decoder has nothing left to do.
            let _ = self.child.kill();
            let _ = self.child.wait();
            self.stderr.finish();
        }
    }
}
