//! Container probing via `ffprobe -of json`.

use std::path::Path;
use std::process::{Command, Stdio};

use serde::Deserialize;

use tnr_core::error::{EngineError, Result};
use tnr_core::types::{FrameGeometry, Framerate};

use crate::process;

/// Properties of a container's first video stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContainerMetadata {
    pub geometry: FrameGeometry,
    pub framerate: Framerate,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

/// Framerate assumed when the container reports none.
const FALLBACK_FRAMERATE: Framerate = Framerate::new(30, 1);

/// Probe `path` for the geometry and framerate of its first video stream.
///
/// Every failure here happens before the run starts and is reported as a
/// configuration error.
pub fn probe_container(path: &Path) -> Result<ContainerMetadata> {
    if !path.is_file() {
        return Err(EngineError::Configuration(format!(
            "cannot open input {}: no such file",
            path.display()
        )));
    }

    let mut cmd = Command::new(process::tool_path("ffprobe", "TNR_FFPROBE"));
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height,avg_frame_rate,r_frame_rate",
        "-of",
        "json",
    ])
    .arg(path)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let output = process::spawn(&mut cmd, "ffprobe")?
        .wait_with_output()
        .map_err(|e| EngineError::Configuration(format!("ffprobe did not complete: {e}")))?;
    if !output.status.success() {
        return Err(EngineError::Configuration(format!(
            "cannot probe input {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let meta = parse_probe_json(&output.stdout).map_err(|msg| {
        EngineError::Configuration(format!("cannot probe input {}: {msg}", path.display()))
    })?;
    tracing::info!(
        path = %path.display(),
        geometry = %meta.geometry,
        framerate = %meta.framerate,
        "Container probed"
    );
    Ok(meta)
}

fn parse_probe_json(json: &[u8]) -> std::result::Result<ContainerMetadata, String> {
    let parsed: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| format!("malformed ffprobe output: {e}"))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| "no video stream".to_string())?;

    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err("video stream has no dimensions".into());
    };
    // "0/0" means unknown; try the next candidate.
    let framerate = [stream.avg_frame_rate, stream.r_frame_rate]
        .into_iter()
        .flatten()
        .find_map(|s| Framerate::parse(&s).ok())
        .unwrap_or(FALLBACK_FRAMERATE);

    Ok(ContainerMetadata {
        geometry: FrameGeometry::new(width, height),
        framerate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ffprobe_json() {
        let json = br#"{
            "programs": [],
            "streams": [
                { "width": 1280, "height": 720, "avg_frame_rate": "30000/1001", "r_frame_rate": "30000/1001" }
            ]
        }"#;
        let meta = parse_probe_json(json).unwrap();
        assert_eq!(meta.geometry, FrameGeometry::new(1280, 720));
        assert_eq!(meta.framerate, Framerate::new(30000, 1001));
    }

    #[test]
    fn unknown_average_rate_falls_back() {
        let json = br#"{"streams":[{"width":64,"height":48,"avg_frame_rate":"0/0","r_frame_rate":"25/1"}]}"#;
        assert_eq!(parse_probe_json(json).unwrap().framerate, Framerate::new(25, 1));

        let json = br#"{"streams":[{"width":64,"height":48}]}"#;
        assert_eq!(parse_probe_json(json).unwrap().framerate, FALLBACK_FRAMERATE);
    }

    #[test]
    fn audio_only_container_is_rejected() {
        assert!(parse_probe_json(br#"{"streams":[]}"#).is_err());
        assert!(parse_probe_json(b"not json").is_err());
    }

    #[test]
    fn missing_input_is_configuration_error() {
        let err = probe_container(Path::new("/nonexistent/tnr/clip.mp4")).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }
}
