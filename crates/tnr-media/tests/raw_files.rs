use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tnr_core::frame_traits::{FrameSink, FrameSource};
use tnr_core::types::{FrameGeometry, Framerate, HostFrame, PixelFormat};
use tnr_media::{RawFrameSink, RawFrameSource};

fn unique_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir =
        std::env::temp_dir().join(format!("tnr_media_{label}_{}_{}", std::process::id(), nanos));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

#[test]
fn sink_output_reads_back_frame_for_frame() {
    let dir = unique_temp_dir("copy");
    let path = dir.join("frames.bgr");
    let g = FrameGeometry::new(6, 4);

    let mut sink = RawFrameSink::create(&path, g).expect("create sink");
    for i in 0..3u8 {
        let frame = HostFrame::new(g, PixelFormat::Bgr8, vec![i * 10; 72]).unwrap();
        sink.write_frame(&frame.view()).expect("write");
    }
    sink.finish().expect("finish");
    assert_eq!(sink.frames_written(), 3);
    assert_eq!(fs::metadata(&path).unwrap().len(), 3 * 72);

    let mut source = RawFrameSource::open(&path, g, Framerate::new(25, 1)).expect("open");
    let mut seen = Vec::new();
    while let Some(frame) = source.read_frame().expect("read") {
        seen.push(frame.data[0]);
    }
    assert_eq!(seen, vec![0, 10, 20]);

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn sink_rejects_wrong_geometry() {
    let dir = unique_temp_dir("geom");
    let mut sink = RawFrameSink::create(&dir.join("out.bgr"), FrameGeometry::new(4, 4)).unwrap();
    let frame = HostFrame::zeroed(FrameGeometry::new(2, 2), PixelFormat::Bgr8).unwrap();
    let err = sink.write_frame(&frame.view()).unwrap_err();
    assert_eq!(err.kind(), "MediaError");
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn uncreatable_sink_is_configuration_error() {
    let dir = unique_temp_dir("nodir");
    let err = RawFrameSink::create(&dir.join("missing/out.bgr"), FrameGeometry::new(2, 2))
        .err()
        .expect("create must fail");
    assert_eq!(err.kind(), "ConfigurationError");
    let _ = fs::remove_dir_all(dir);
}
