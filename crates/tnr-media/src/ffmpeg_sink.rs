//! Container encoding through an `ffmpeg` child process.
//!
//! Frames are piped to the child's stdin as `rawvideo bgr24`; the child
//! encodes H.264 (`libx264`, `yuv420p`) into the output container.
//! [`FrameSink::finish`] closes stdin and waits for the encoder to finalise
//! the file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use tnr_core::error::{EngineError, Result};
use tnr_core::frame_traits::{FrameSink, OutputCodec, SinkConfig};
use tnr_core::types::{FrameView, PixelFormat};

use crate::process::{self, StderrCollector};

pub struct FfmpegFrameSink {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    stderr: StderrCollector,
    config: SinkConfig,
    frames_written: u64,
    path: PathBuf,
}

impl FfmpegFrameSink {
    pub fn create(path: &Path, config: SinkConfig) -> Result<Self> {
        if config.codec != OutputCodec::H264 {
            return Err(EngineError::Configuration(format!(
                "ffmpeg sink only encodes H.264, got {:?}",
                config.codec
            )));
        }
        // Surface an unwritable destination before the encoder starts.
        File::create(path).map_err(|e| {
            EngineError::Configuration(format!("cannot create output file {}: {e}", path.display()))
        })?;

        let size = config.geometry.to_string();
        let rate = config.framerate.to_string();
        let mut cmd = Command::new(process::tool_path("ffmpeg", "TNR_FFMPEG"));
        cmd.args(["-v", "error", "-y", "-f", "rawvideo", "-pix_fmt", "bgr24"])
            .args(["-s", size.as_str(), "-r", rate.as_str(), "-i", "-"])
            .args(["-an", "-c:v", "libx264", "-pix_fmt", "yuv420p"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let mut child = process::spawn(&mut cmd, "ffmpeg")?;
        let stdin = child
            .stdin
            .take()
            .map(|s| BufWriter::with_capacity(4 * 1024 * 1024, s));
        let stderr = StderrCollector::start(child.stderr.take());

        tracing::info!(
            path = %path.display(),
            geometry = %config.geometry,
            framerate = %config.framerate,
            "FFmpeg sink opened"
        );
        Ok(Self {
            child,
            stdin,
            stderr,
            config,
            frames_written: 0,
            path: path.to_path_buf(),
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl FrameSink for FfmpegFrameSink {
    fn write_frame(&mut self, frame: &FrameView<'_>) -> Result<()> {
        if frame.geometry != self.config.geometry || frame.format != PixelFormat::Bgr8 {
            return Err(EngineError::Media(format!(
                "sink expects BGR8 {}, got {} {}",
                self.config.geometry, frame.format, frame.geometry
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| EngineError::Media("write after finish".into()))?;
        stdin.write_all(frame.data).map_err(|e| {
            EngineError::Media(format!("ffmpeg encoder for {} rejected frame: {e}", self.path.display()))
        })?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(mut stdin) = self.stdin.take() else {
            return Ok(());
        };
        let flushed = stdin.flush();
        drop(stdin);

        let status = self.child.wait().map_err(|e| {
            EngineError::Media(format!("ffmpeg encoder for {} vanished: {e}", self.path.display()))
        })?;
        let log = self.stderr.finish();
        if !status.success() {
            return Err(EngineError::Media(format!(
                "ffmpeg encoder for {} exited with {status}: {log}",
                self.path.display()
            )));
        }
        flushed.map_err(|e| EngineError::Media(format!("failed to flush encoder input: {e}")))?;

        tracing::info!(
            path = %self.path.display(),
            frames = self.frames_written,
            "FFmpeg sink finished"
        );
        Ok(())
    }
}

impl Drop for FfmpegFrameSink {
    fn drop(&mut self) {
        if self.stdin.is_some()
            && let Err(e) = self.finish()
        {
            tracing::warn!(error = %e, "FFmpeg sink dropped without a clean finish");
        }
    }
}
