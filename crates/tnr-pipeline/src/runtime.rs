//! CLI/runtime bridge helpers.
//!
//! Keeps composition inside `tnr-pipeline` so the CLI depends on one crate:
//! backend selection, run configuration, source/sink opening and output
//! naming all happen here.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use tnr_accel::{Device, TnrParams, TnrPreset};
use tnr_core::backend::{self, Backend};
use tnr_core::error::{EngineError, Result};
use tnr_core::frame_traits::{FrameSink, FrameSource, OutputCodec, SinkConfig};
use tnr_core::types::{FrameGeometry, Framerate};
use tnr_media::{FfmpegFrameSink, FfmpegFrameSource, InputKind, RawFrameSink, RawFrameSource};

use crate::pipeline::{DenoisePipeline, PipelineConfig, RunReport};

/// Run settings, loadable from a JSON file.
///
/// `width`, `height` and `fps` describe raw BGR inputs, which carry no
/// header; container inputs are probed instead.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub preset: TnrPreset,
    pub strength: f32,
    pub output_dir: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        let params = TnrParams::default();
        Self {
            preset: params.preset,
            strength: params.strength,
            output_dir: PathBuf::from("."),
            width: 1920,
            height: 1080,
            fps: "30".into(),
        }
    }
}

impl RunConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| EngineError::Configuration(format!("invalid run configuration: {e}")))
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            EngineError::Configuration(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn params(&self) -> TnrParams {
        TnrParams {
            preset: self.preset,
            strength: self.strength,
        }
    }

    pub fn raw_geometry(&self) -> FrameGeometry {
        FrameGeometry::new(self.width, self.height)
    }
}

/// Everything needed to run one denoising job.
#[derive(Clone, Debug)]
pub struct RunRequest {
    /// Backend token as typed by the user.
    pub backend: String,
    pub input: PathBuf,
    pub config: RunConfig,
}

/// Artifact path for a run: `<dir>/denoised_<backend>.<ext>`.
pub fn output_path(dir: &Path, backend: Backend, codec: OutputCodec) -> PathBuf {
    dir.join(format!("denoised_{}.{}", backend.token(), codec.extension()))
}

/// Codec the output is written with for a given input kind.
pub fn output_codec(kind: InputKind) -> OutputCodec {
    match kind {
        InputKind::RawBgr => OutputCodec::RawBgr,
        InputKind::Container => OutputCodec::H264,
    }
}

/// Run on a host device exposing every backend.
pub fn run(request: &RunRequest) -> Result<RunReport> {
    run_on(Device::host(), request)
}

/// Run on `device`.
///
/// Configuration problems (backend token, parameters, unreadable input,
/// uncreatable output) are reported before any accelerator resource exists.
pub fn run_on(device: Arc<Device>, request: &RunRequest) -> Result<RunReport> {
    let backend = backend::select(&request.backend)?;
    let params = request.config.params();
    params.validate()?;

    let kind = InputKind::from_path(&request.input);
    let mut source = open_source(&request.input, kind, &request.config)?;

    let codec = output_codec(kind);
    fs::create_dir_all(&request.config.output_dir).map_err(|e| {
        EngineError::Configuration(format!(
            "cannot create output directory {}: {e}",
            request.config.output_dir.display()
        ))
    })?;
    let output = output_path(&request.config.output_dir, backend, codec);
    let sink_config = SinkConfig {
        geometry: source.geometry(),
        framerate: source.framerate(),
        codec,
    };
    let mut sink = open_sink(&output, sink_config)?;

    info!(
        input = %request.input.display(),
        output = %output.display(),
        %backend,
        "Run configured"
    );

    let pipeline = DenoisePipeline::new(
        device,
        PipelineConfig {
            backend,
            params,
            ..PipelineConfig::default()
        },
    );
    let mut report = pipeline.run(source.as_mut(), sink.as_mut())?;
    report.output = Some(output.display().to_string());
    Ok(report)
}

fn open_source(path: &Path, kind: InputKind, config: &RunConfig) -> Result<Box<dyn FrameSource>> {
    Ok(match kind {
        InputKind::RawBgr => {
            let fps = Framerate::parse(&config.fps)?;
            Box::new(RawFrameSource::open(path, config.raw_geometry(), fps)?)
        }
        InputKind::Container => Box::new(FfmpegFrameSource::open(path)?),
    })
}

fn open_sink(path: &Path, config: SinkConfig) -> Result<Box<dyn FrameSink>> {
    Ok(match config.codec {
        OutputCodec::RawBgr => Box::new(RawFrameSink::create(path, config.geometry)?),
        OutputCodec::H264 => Box::new(FfmpegFrameSink::create(path, config)?),
    })
}
