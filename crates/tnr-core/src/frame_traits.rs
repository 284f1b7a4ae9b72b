//! Frame source and sink contracts consumed by the pipeline.
//!
//! These traits keep `tnr-pipeline` independent of how frames are demuxed,
//! decoded, encoded or muxed.  Implementations live in `tnr-media`.

use crate::error::Result;
use crate::types::{FrameGeometry, FrameView, Framerate, HostFrame};

// ─── Frame source ────────────────────────────────────────────────────────────

/// Decoded frames in a fixed external pixel format at a fixed resolution.
pub trait FrameSource {
    /// Resolution of every frame this source yields.
    fn geometry(&self) -> FrameGeometry;

    /// Nominal framerate of the stream.
    fn framerate(&self) -> Framerate;

    /// Read the next frame, or `None` once the source is exhausted.
    fn read_frame(&mut self) -> Result<Option<HostFrame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn geometry(&self) -> FrameGeometry {
        (**self).geometry()
    }

    fn framerate(&self) -> Framerate {
        (**self).framerate()
    }

    fn read_frame(&mut self) -> Result<Option<HostFrame>> {
        (**self).read_frame()
    }
}

// ─── Frame sink ──────────────────────────────────────────────────────────────

/// Output codec a sink is opened with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputCodec {
    /// H.264 in an MP4 container.
    H264,
    /// Headerless BGR8 frames written back to back.
    RawBgr,
}

impl OutputCodec {
    /// File extension for an artifact written with this codec.
    pub const fn extension(self) -> &'static str {
        match self {
            Self::H264 => "mp4",
            Self::RawBgr => "bgr",
        }
    }
}

/// Parameters a sink is opened with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkConfig {
    pub geometry: FrameGeometry,
    pub framerate: Framerate,
    pub codec: OutputCodec,
}

/// Accepts frames in the external pixel format, in call order.
pub trait FrameSink {
    /// Append one frame.
    fn write_frame(&mut self, frame: &FrameView<'_>) -> Result<()>;

    /// Flush buffered output and finalise the artifact.
    ///
    /// Called once at the end of a run, including runs that failed after some
    /// frames were emitted.
    fn finish(&mut self) -> Result<()>;
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn write_frame(&mut self, frame: &FrameView<'_>) -> Result<()> {
        (**self).write_frame(frame)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}
