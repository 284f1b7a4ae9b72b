#![doc = include_str!("../README.md")]

/// Decoding of container files through an `ffmpeg` child process.
pub mod ffmpeg_source;
/// Encoding to container files through an `ffmpeg` child process.
pub mod ffmpeg_sink;
/// Container probe: resolution and framerate via `ffprobe`.
pub mod probe;
/// Child process helpers shared by the FFmpeg source and sink.
mod process;
/// Headerless BGR8 [`tnr_core::frame_traits::FrameSink`].
pub mod raw_sink;
/// Headerless BGR8 [`tnr_core::frame_traits::FrameSource`].
pub mod raw_source;

use std::path::Path;

pub use ffmpeg_sink::FfmpegFrameSink;
pub use ffmpeg_source::FfmpegFrameSource;
pub use probe::{ContainerMetadata, probe_container};
pub use raw_sink::RawFrameSink;
pub use raw_source::RawFrameSource;

/// How an input path is read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    /// Headerless BGR8 frames (`.bgr`, `.raw`).
    RawBgr,
    /// Anything FFmpeg can demux and decode.
    Container,
}

impl InputKind {
    /// Classify by file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("bgr" | "raw") => Self::RawBgr,
            _ => Self::Container,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_extensions_are_recognised() {
        assert_eq!(InputKind::from_path(Path::new("a.bgr")), InputKind::RawBgr);
        assert_eq!(InputKind::from_path(Path::new("dir/b.RAW")), InputKind::RawBgr);
        assert_eq!(InputKind::from_path(Path::new("c.mp4")), InputKind::Container);
        assert_eq!(InputKind::from_path(Path::new("noext")), InputKind::Container);
    }
}
