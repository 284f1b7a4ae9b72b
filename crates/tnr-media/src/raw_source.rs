//! Reads headerless BGR8 frames stored back to back.
//!
//! The file carries no metadata, so geometry and framerate are supplied by
//! the caller.  A trailing partial frame is a media error, not end of stream.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use tnr_core::error::{EngineError, Result};
use tnr_core::frame_traits::FrameSource;
use tnr_core::types::{FrameGeometry, Framerate, HostFrame, PixelFormat, try_zeroed};

/// Upper bound on the read buffer; larger frames are read in several chunks.
const MAX_READ_BUFFER: usize = 4 * 1024 * 1024;

pub struct RawFrameSource {
    reader: BufReader<Box<dyn Read + Send>>,
    geometry: FrameGeometry,
    frame_bytes: usize,
    framerate: Framerate,
    frames_read: u64,
    path: PathBuf,
}

impl RawFrameSource {
    pub fn open(path: &Path, geometry: FrameGeometry, framerate: Framerate) -> Result<Self> {
        PixelFormat::Bgr8
            .validate(geometry)
            .map_err(EngineError::Configuration)?;
        let file = File::open(path).map_err(|e| {
            EngineError::Configuration(format!("cannot open input {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), %geometry, %framerate, "Raw BGR source opened");
        Self::from_reader(Box::new(file), geometry, framerate, path.to_path_buf())
    }

    /// Read frames from any byte stream.
    ///
    /// Fails with a configuration error if `geometry` has no valid BGR8 size.
    pub fn from_reader(
        reader: Box<dyn Read + Send>,
        geometry: FrameGeometry,
        framerate: Framerate,
        path: PathBuf,
    ) -> Result<Self> {
        let frame_bytes = PixelFormat::Bgr8
            .validate(geometry)
            .map_err(EngineError::Configuration)?;
        Ok(Self {
            reader: BufReader::with_capacity(frame_bytes.clamp(8192, MAX_READ_BUFFER), reader),
            geometry,
            frame_bytes,
            framerate,
            frames_read: 0,
            path,
        })
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

/// Fill `buf` completely, or report how many bytes arrived before EOF.
pub(crate) fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl FrameSource for RawFrameSource {
    fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    fn framerate(&self) -> Framerate {
        self.framerate
    }

    fn read_frame(&mut self) -> Result<Option<HostFrame>> {
        let size = self.frame_bytes;
        let mut data = try_zeroed(size).map_err(|e| {
            EngineError::Media(format!("cannot allocate {} frame buffer: {e}", self.geometry))
        })?;
        let filled = read_full(&mut self.reader, &mut data).map_err(|e| {
            EngineError::Media(format!("read failed on {}: {e}", self.path.display()))
        })?;
        match filled {
            0 => Ok(None),
            n if n < size => Err(EngineError::Media(format!(
                "{}: truncated frame {} ({n} of {size} bytes)",
                self.path.display(),
                self.frames_read + 1
            ))),
            _ => {
                self.frames_read += 1;
                HostFrame::new(self.geometry, PixelFormat::Bgr8, data).map(Some)
            }
        }
    }
}
