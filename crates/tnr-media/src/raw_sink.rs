//! Writes headerless BGR8 frames back to back.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tnr_core::error::{EngineError, Result};
use tnr_core::frame_traits::FrameSink;
use tnr_core::types::{FrameGeometry, FrameView, PixelFormat};

pub struct RawFrameSink {
    writer: BufWriter<File>,
    geometry: FrameGeometry,
    frames_written: u64,
    bytes_written: u64,
    path: PathBuf,
}

impl RawFrameSink {
    pub fn create(path: &Path, geometry: FrameGeometry) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            EngineError::Configuration(format!(
                "cannot create output file {}: {e}",
                path.display()
            ))
        })?;

        tracing::info!(path = %path.display(), %geometry, "Raw BGR sink opened");

        Ok(Self {
            writer: BufWriter::with_capacity(4 * 1024 * 1024, file),
            geometry,
            frames_written: 0,
            bytes_written: 0,
            path: path.to_path_buf(),
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl FrameSink for RawFrameSink {
    fn write_frame(&mut self, frame: &FrameView<'_>) -> Result<()> {
        if frame.geometry != self.geometry || frame.format != PixelFormat::Bgr8 {
            return Err(EngineError::Media(format!(
                "sink expects BGR8 {}, got {} {}",
                self.geometry, frame.format, frame.geometry
            )));
        }
        self.writer.write_all(frame.data).map_err(|e| {
            EngineError::Media(format!("failed to write to {}: {e}", self.path.display()))
        })?;

        self.bytes_written += frame.data.len() as u64;
        self.frames_written += 1;

        if self.frames_written.is_multiple_of(100) {
            tracing::debug!(
                frames = self.frames_written,
                bytes_mb = self.bytes_written / (1024 * 1024),
                "Sink progress"
            );
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| {
            EngineError::Media(format!("failed to flush {}: {e}", self.path.display()))
        })?;

        tracing::info!(
            path = %self.path.display(),
            frames = self.frames_written,
            "Raw sink finished"
        );
        Ok(())
    }
}
