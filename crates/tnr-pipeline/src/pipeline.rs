//! Per-frame temporal denoising driver.
//!
//! # State machine
//!
//! ```text
//! INIT ─► ┌─ INGEST ─► CONVERT_IN ─► DENOISE ─► CONVERT_OUT ─► SYNC ─► EMIT ─► ROTATE ─┐
//!         └──────────────────────────────────────────────────────────────────────────┘
//!              │ source exhausted / any failure
//!              ▼
//!          TEARDOWN
//! ```
//!
//! One driving thread submits the three operations of a frame to the run's
//! stream and then blocks in `sync`; work for frame K+1 is never submitted
//! before frame K has been emitted.  The first frame is denoised against the
//! no-history sentinel.
//!
//! # Teardown
//!
//! Teardown runs on every exit path: resources are released (stream first)
//! and the sink is finished so already-emitted frames persist.  When the run
//! already failed, a sink finish error is logged and the original error is
//! returned.
//!
//! # Metrics
//!
//! [`PipelineMetrics`] keeps atomic frame counters and cumulative wall-clock
//! time per stage; [`RunReport`] is the serializable summary of one run.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use tnr_accel::{Device, TnrParams, submit_convert_image_format, submit_temporal_noise_reduction};
use tnr_core::backend::Backend;
use tnr_core::error::{EngineError, Result};
use tnr_core::frame_traits::{FrameSink, FrameSource};
use tnr_core::types::FrameGeometry;

use crate::resources::ResourceSet;
use crate::rotator::BufferRotator;

// ─── Stages ─────────────────────────────────────────────────────────────────

/// Steps of the per-frame state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Init,
    Ingest,
    ConvertIn,
    Denoise,
    ConvertOut,
    Sync,
    Emit,
    Rotate,
    Teardown,
}

impl Stage {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Ingest => "ingest",
            Self::ConvertIn => "convert_in",
            Self::Denoise => "denoise",
            Self::ConvertOut => "convert_out",
            Self::Sync => "sync",
            Self::Emit => "emit",
            Self::Rotate => "rotate",
            Self::Teardown => "teardown",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Metrics ────────────────────────────────────────────────────────────────

/// Atomic frame counters and cumulative stage latencies.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Frames read from the source.
    pub frames_ingested: AtomicU64,
    /// Frames handed to the sink.
    pub frames_emitted: AtomicU64,
    pub ingest_total_us: AtomicU64,
    /// Wrap + the three submissions of each frame.
    pub submit_total_us: AtomicU64,
    pub sync_total_us: AtomicU64,
    pub emit_total_us: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every emitted frame was ingested first.
    pub fn validate(&self) -> bool {
        self.frames_ingested.load(Ordering::Acquire) >= self.frames_emitted.load(Ordering::Acquire)
    }

    pub fn timing(&self) -> StageTimingReport {
        let ingested = self.frames_ingested.load(Ordering::Relaxed);
        let emitted = self.frames_emitted.load(Ordering::Relaxed);
        let avg = |total: &AtomicU64, count: u64| -> u64 {
            if count > 0 {
                total.load(Ordering::Relaxed) / count
            } else {
                0
            }
        };
        StageTimingReport {
            ingest_avg_us: avg(&self.ingest_total_us, ingested),
            submit_avg_us: avg(&self.submit_total_us, ingested),
            sync_avg_us: avg(&self.sync_total_us, emitted),
            emit_avg_us: avg(&self.emit_total_us, emitted),
        }
    }

    /// Log average stage latencies.
    pub fn report(&self) {
        let t = self.timing();
        info!(
            frames_ingested = self.frames_ingested.load(Ordering::Relaxed),
            frames_emitted = self.frames_emitted.load(Ordering::Relaxed),
            ingest_avg_us = t.ingest_avg_us,
            submit_avg_us = t.submit_avg_us,
            sync_avg_us = t.sync_avg_us,
            emit_avg_us = t.emit_avg_us,
            "Stage latencies"
        );
    }
}

#[inline]
fn add_elapsed(counter: &AtomicU64, since: Instant) {
    counter.fetch_add(since.elapsed().as_micros() as u64, Ordering::Relaxed);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimingReport {
    pub ingest_avg_us: u64,
    pub submit_avg_us: u64,
    pub sync_avg_us: u64,
    pub emit_avg_us: u64,
}

/// Summary of a completed run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub backend: String,
    pub preset: String,
    pub strength: f32,
    pub width: u32,
    pub height: u32,
    pub frames_ingested: u64,
    pub frames_emitted: u64,
    pub elapsed_ms: u64,
    pub stage_timing: StageTimingReport,
    /// Artifact path, filled in by the runtime bridge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

// ─── Configuration ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineConfig {
    pub backend: Backend,
    pub params: TnrParams,
    /// Log an `info` progress line every this many frames (0 disables).
    pub progress_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Cuda,
            params: TnrParams::default(),
            progress_interval: 100,
        }
    }
}

// ─── Driver ─────────────────────────────────────────────────────────────────

pub struct DenoisePipeline {
    device: Arc<Device>,
    config: PipelineConfig,
    metrics: Arc<PipelineMetrics>,
}

impl DenoisePipeline {
    pub fn new(device: Arc<Device>, config: PipelineConfig) -> Self {
        Self {
            device,
            config,
            metrics: PipelineMetrics::new(),
        }
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Denoise every frame of `source` into `sink`.
    ///
    /// The sink is finished before this returns, on success and on failure.
    #[instrument(skip_all, name = "denoise_pipeline", fields(backend = %self.config.backend))]
    pub fn run<S, K>(&self, source: &mut S, sink: &mut K) -> Result<RunReport>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let started = Instant::now();
        let geometry = source.geometry();
        info!(%geometry, framerate = %source.framerate(), "Pipeline starting");

        let outcome = at(Stage::Init, 0, self.config.params.validate())
            .and_then(|()| {
                at(
                    Stage::Init,
                    0,
                    ResourceSet::acquire(
                        &self.device,
                        geometry,
                        self.config.backend,
                        self.config.params,
                    ),
                )
            })
            .and_then(|mut resources| {
                let result = self.drive(&mut resources, source, sink);
                resources.release();
                result
            });

        // ── Teardown ──
        let finished = sink.finish();
        let outcome = match (outcome, finished) {
            (Ok(()), finished) => at(Stage::Teardown, 0, finished),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(finish_err)) => {
                warn!(error = %finish_err, "Sink finish failed after an earlier error");
                Err(e)
            }
        };

        self.metrics.report();
        debug_assert!(self.metrics.validate());
        let report = self.report(geometry, started);
        match outcome {
            Ok(()) => {
                info!(
                    frames = report.frames_emitted,
                    elapsed_ms = report.elapsed_ms,
                    "Pipeline complete"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(
                    frames_emitted = report.frames_emitted,
                    error = %e,
                    "Pipeline aborted"
                );
                Err(e)
            }
        }
    }

    fn drive<S, K>(&self, res: &mut ResourceSet, source: &mut S, sink: &mut K) -> Result<()>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let m = &self.metrics;
        let mut rotator = BufferRotator::new();
        let mut frame = 0u64;

        loop {
            let t = Instant::now();
            let Some(input) = at(Stage::Ingest, frame + 1, source.read_frame())? else {
                debug!(frames = frame, "Source exhausted");
                return Ok(());
            };
            frame += 1;
            m.frames_ingested.fetch_add(1, Ordering::AcqRel);
            add_elapsed(&m.ingest_total_us, t);

            // ── Submit ──
            let t = Instant::now();
            at(Stage::ConvertIn, frame, res.wrap_input(input))?;
            let stream = res.stream()?;
            let previous = rotator.previous().map(|slot| res.buffer(slot)).transpose()?;
            let current = res.buffer(rotator.current())?;
            let output = res.buffer(rotator.output())?;
            let emit = res.emit_buffer()?;

            at(
                Stage::ConvertIn,
                frame,
                submit_convert_image_format(stream, Backend::Cuda, res.wrapper()?, current),
            )?;
            at(
                Stage::Denoise,
                frame,
                submit_temporal_noise_reduction(stream, res.denoiser()?, previous, current, output),
            )?;
            at(
                Stage::ConvertOut,
                frame,
                submit_convert_image_format(stream, Backend::Cuda, output, emit),
            )?;
            add_elapsed(&m.submit_total_us, t);

            let t = Instant::now();
            at(Stage::Sync, frame, stream.sync())?;
            add_elapsed(&m.sync_total_us, t);

            // ── Emit ──
            let t = Instant::now();
            {
                let pixels = at(Stage::Emit, frame, emit.lock_read())?;
                at(Stage::Emit, frame, sink.write_frame(&pixels.view()))?;
            }
            m.frames_emitted.fetch_add(1, Ordering::AcqRel);
            add_elapsed(&m.emit_total_us, t);

            rotator.rotate();
            debug!(frame, history = rotator.previous().is_some(), "Frame emitted");
            if self.config.progress_interval > 0 && frame.is_multiple_of(self.config.progress_interval) {
                info!(frames = frame, "Progress");
            }
        }
    }

    fn report(&self, geometry: FrameGeometry, started: Instant) -> RunReport {
        RunReport {
            backend: self.config.backend.token().to_string(),
            preset: self.config.params.preset.name().to_string(),
            strength: self.config.params.strength,
            width: geometry.width,
            height: geometry.height,
            frames_ingested: self.metrics.frames_ingested.load(Ordering::Acquire),
            frames_emitted: self.metrics.frames_emitted.load(Ordering::Acquire),
            elapsed_ms: started.elapsed().as_millis() as u64,
            stage_timing: self.metrics.timing(),
            output: None,
        }
    }
}

/// Log which stage of which frame failed, then pass the result through.
fn at<T>(stage: Stage, frame: u64, result: Result<T>) -> Result<T> {
    result.inspect_err(|e: &EngineError| {
        warn!(frame, %stage, code = e.error_code(), error = %e, "Pipeline stage failed");
    })
}
