//! Temporal noise reduction payload.
//!
//! The filter is a motion-adaptive recursive average.  For every sample the
//! payload keeps a hidden history depth `h`:
//!
//! - if `|current - previous|` exceeds the preset's motion threshold the
//!   sample is treated as motion: `h` resets to 0 and the current value
//!   passes through;
//! - otherwise `h` grows up to the preset's maximum and the output moves from
//!   `previous` towards `current` by `1 / (h + 1)`, relaxed by `strength`.
//!
//! The history lives inside the payload and is only touched by the stream
//! worker.  Submitting without a previous frame resets it.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use tnr_core::backend::Backend;
use tnr_core::error::{EngineError, Result, Status};
use tnr_core::types::{FrameGeometry, PixelFormat, try_zeroed};

use crate::context::{Device, OpKind, ResourceKind};
use crate::image::Image;
use crate::stream::{Operation, Stream};

// ─── Tuning ──────────────────────────────────────────────────────────────────

/// Scene presets, each mapping to a motion threshold and history depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TnrPreset {
    Default,
    OutdoorLowLight,
    OutdoorMediumLight,
    OutdoorHighLight,
    IndoorLowLight,
    IndoorMediumLight,
    IndoorHighLight,
}

impl TnrPreset {
    pub const ALL: [Self; 7] = [
        Self::Default,
        Self::OutdoorLowLight,
        Self::OutdoorMediumLight,
        Self::OutdoorHighLight,
        Self::IndoorLowLight,
        Self::IndoorMediumLight,
        Self::IndoorHighLight,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::OutdoorLowLight => "outdoor-low-light",
            Self::OutdoorMediumLight => "outdoor-medium-light",
            Self::OutdoorHighLight => "outdoor-high-light",
            Self::IndoorLowLight => "indoor-low-light",
            Self::IndoorMediumLight => "indoor-medium-light",
            Self::IndoorHighLight => "indoor-high-light",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|p| p.name()).collect();
                EngineError::Configuration(format!(
                    "unknown preset '{name}', expected one of: {}",
                    names.join(", ")
                ))
            })
    }

    /// Largest per-sample difference still treated as noise.
    pub const fn motion_threshold(self) -> u8 {
        match self {
            Self::Default | Self::OutdoorMediumLight => 20,
            Self::OutdoorLowLight => 28,
            Self::OutdoorHighLight => 12,
            Self::IndoorLowLight => 32,
            Self::IndoorMediumLight => 24,
            Self::IndoorHighLight => 16,
        }
    }

    /// Maximum number of frames a static sample accumulates.
    pub const fn max_history(self) -> u16 {
        match self {
            Self::Default | Self::OutdoorMediumLight => 6,
            Self::OutdoorLowLight => 8,
            Self::OutdoorHighLight => 4,
            Self::IndoorLowLight => 10,
            Self::IndoorMediumLight => 7,
            Self::IndoorHighLight => 5,
        }
    }
}

impl fmt::Display for TnrPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Denoiser configuration fixed at payload creation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TnrParams {
    pub preset: TnrPreset,
    /// Blend strength in `[0, 1]`.  0 leaves frames untouched.
    pub strength: f32,
}

impl Default for TnrParams {
    fn default() -> Self {
        Self {
            preset: TnrPreset::IndoorMediumLight,
            strength: 1.0,
        }
    }
}

impl TnrParams {
    pub fn validate(&self) -> Result<()> {
        if !self.strength.is_finite() || !(0.0..=1.0).contains(&self.strength) {
            return Err(EngineError::Configuration(format!(
                "strength must be within [0, 1], got {}",
                self.strength
            )));
        }
        Ok(())
    }
}

// ─── Payload ─────────────────────────────────────────────────────────────────

struct TnrState {
    history: Vec<u16>,
}

struct PayloadInner {
    id: u64,
    backend: Backend,
    geometry: FrameGeometry,
    format: PixelFormat,
    params: TnrParams,
    state: Mutex<TnrState>,
    device: Arc<Device>,
}

impl PayloadInner {
    fn lock_state(&self) -> Result<MutexGuard<'_, TnrState>> {
        self.state.lock().map_err(|_| {
            EngineError::accelerator(
                Status::InternalError,
                format!("payload {} state poisoned", self.id),
            )
        })
    }
}

impl Drop for PayloadInner {
    fn drop(&mut self) {
        self.device.deregister(ResourceKind::Payload, self.id);
    }
}

/// Configured temporal denoiser with hidden per-sample history.
pub struct TemporalNoiseReduction {
    inner: Arc<PayloadInner>,
}

impl TemporalNoiseReduction {
    /// Create a payload for frames of `geometry` in `format`.
    ///
    /// # Errors
    ///
    /// - [`Status::InvalidImageFormat`] unless `format` is NV12.
    /// - [`Status::InvalidArgument`] for a geometry NV12 cannot hold.
    /// - [`Status::OutOfMemory`] if the history buffer cannot be allocated.
    /// - [`Status::NotImplemented`] if the device does not expose `backend`.
    /// - A configuration error for out-of-range parameters.
    pub fn create(
        device: &Arc<Device>,
        backend: Backend,
        geometry: FrameGeometry,
        format: PixelFormat,
        params: TnrParams,
    ) -> Result<Self> {
        params.validate()?;
        if format != PixelFormat::Nv12Er {
            return Err(EngineError::accelerator(
                Status::InvalidImageFormat,
                format!("temporal noise reduction needs NV12_ER, got {format}"),
            ));
        }
        let samples = format
            .validate(geometry)
            .map_err(|msg| EngineError::accelerator(Status::InvalidArgument, msg))?;
        if !device.capabilities().contains(backend) {
            return Err(EngineError::accelerator(
                Status::NotImplemented,
                format!("backend {backend} is not available on this device"),
            ));
        }
        let history = try_zeroed(samples).map_err(|e| {
            EngineError::accelerator(
                Status::OutOfMemory,
                format!("cannot allocate TNR history for {geometry}: {e}"),
            )
        })?;

        let id = device.register(ResourceKind::Payload)?;
        debug!(id, %backend, preset = %params.preset, strength = params.strength, "TNR payload created");
        Ok(Self {
            inner: Arc::new(PayloadInner {
                id,
                backend,
                geometry,
                format,
                params,
                state: Mutex::new(TnrState { history }),
                device: Arc::clone(device),
            }),
        })
    }

    pub fn backend(&self) -> Backend {
        self.inner.backend
    }

    pub fn params(&self) -> TnrParams {
        self.inner.params
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.inner.geometry
    }
}

impl fmt::Debug for TemporalNoiseReduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporalNoiseReduction")
            .field("id", &self.inner.id)
            .field("backend", &self.inner.backend)
            .field("geometry", &self.inner.geometry)
            .field("params", &self.inner.params)
            .finish()
    }
}

/// Enqueue one denoising step.
///
/// `previous = None` is the no-history sentinel: the hidden state resets and
/// `output` receives `current` unchanged.
///
/// # Errors
///
/// - [`Status::InvalidArgument`] if an image's geometry differs from the
///   payload's, any two images alias, or the stream lacks the payload's
///   backend.
/// - [`Status::InvalidImageFormat`] if an image is not in the payload's format.
/// - [`Status::InvalidOperation`] if the stream is in an error state.
pub fn submit_temporal_noise_reduction(
    stream: &Stream,
    payload: &TemporalNoiseReduction,
    previous: Option<&Image>,
    current: &Image,
    output: &Image,
) -> Result<()> {
    let p = &payload.inner;
    for image in previous.into_iter().chain([current, output]) {
        if image.format() != p.format {
            return Err(EngineError::accelerator(
                Status::InvalidImageFormat,
                format!("image {} is {}, payload expects {}", image.id(), image.format(), p.format),
            ));
        }
        if image.geometry() != p.geometry {
            return Err(EngineError::accelerator(
                Status::InvalidArgument,
                format!("image {} is {}, payload expects {}", image.id(), image.geometry(), p.geometry),
            ));
        }
    }
    let aliased = current.ptr_eq(output)
        || previous.is_some_and(|prev| prev.ptr_eq(current) || prev.ptr_eq(output));
    if aliased {
        return Err(EngineError::accelerator(
            Status::InvalidArgument,
            "previous, current and output must be distinct images",
        ));
    }

    let payload = Arc::clone(p);
    let previous = previous.map(Image::share);
    let current = current.share();
    let output = output.share();
    stream.submit(Operation::new(
        OpKind::TemporalNoiseReduction,
        p.backend,
        move || {
            let mut state = payload.lock_state()?;
            let cur = current.lock_data()?;
            let mut out = output.lock_data()?;
            match previous {
                None => {
                    trace!(payload = payload.id, "TNR reset");
                    state.history.fill(0);
                    out.copy_from_slice(&cur);
                }
                Some(prev) => {
                    let prev = prev.lock_data()?;
                    let filtered = match payload.backend {
                        Backend::Cuda => cur.len(),
                        // Fixed-function engine filters luma only.
                        Backend::Vic => payload.geometry.pixels(),
                    };
                    blend(
                        payload.params,
                        &prev[..filtered],
                        &cur[..filtered],
                        &mut out[..filtered],
                        &mut state.history[..filtered],
                    );
                    out[filtered..].copy_from_slice(&cur[filtered..]);
                }
            }
            Ok(())
        },
    ))
}

/// Motion-adaptive recursive blend over matching sample slices.
fn blend(params: TnrParams, prev: &[u8], cur: &[u8], out: &mut [u8], history: &mut [u16]) {
    let threshold = params.preset.motion_threshold();
    let max_history = params.preset.max_history();
    let strength = params.strength;

    for (((o, h), &p), &c) in out.iter_mut().zip(history.iter_mut()).zip(prev).zip(cur) {
        if p.abs_diff(c) > threshold {
            *h = 0;
            *o = c;
            continue;
        }
        *h = (*h + 1).min(max_history);
        let k = 1.0 / (f32::from(*h) + 1.0);
        let k_eff = 1.0 - strength * (1.0 - k);
        let (pf, cf) = (f32::from(p), f32::from(c));
        *o = (pf + (cf - pf) * k_eff).round().clamp(0.0, 255.0) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tnr_core::types::HostFrame;

    const G: FrameGeometry = FrameGeometry::new(4, 2);

    fn nv12(device: &Arc<Device>, fill: u8) -> Image {
        let frame = HostFrame::new(G, PixelFormat::Nv12Er, vec![fill; 12]).unwrap();
        Image::wrap_host_frame(device, frame).unwrap()
    }

    fn payload(device: &Arc<Device>, backend: Backend, strength: f32) -> TemporalNoiseReduction {
        let params = TnrParams {
            preset: TnrPreset::Default,
            strength,
        };
        TemporalNoiseReduction::create(device, backend, G, PixelFormat::Nv12Er, params).unwrap()
    }

    #[test]
    fn presets_round_trip_through_names() {
        for preset in TnrPreset::ALL {
            assert_eq!(TnrPreset::parse(preset.name()).unwrap(), preset);
        }
        assert!(matches!(
            TnrPreset::parse("night"),
            Err(EngineError::Configuration(_))
        ));
        assert_eq!(TnrParams::default().preset, TnrPreset::IndoorMediumLight);
    }

    #[test]
    fn strength_out_of_range_is_configuration_error() {
        for strength in [-0.1, 1.5, f32::NAN] {
            let params = TnrParams {
                preset: TnrPreset::Default,
                strength,
            };
            assert!(matches!(params.validate(), Err(EngineError::Configuration(_))));
        }
    }

    #[test]
    fn create_requires_nv12() {
        let device = Device::host();
        let err = TemporalNoiseReduction::create(
            &device,
            Backend::Cuda,
            G,
            PixelFormat::Bgr8,
            TnrParams::default(),
        )
        .unwrap_err();
        assert_eq!(err.status(), Some(Status::InvalidImageFormat));
        assert_eq!(device.ledger().payloads.created, 0);
    }

    #[test]
    fn oversized_geometry_is_invalid_argument() {
        let device = Device::host();
        let huge = FrameGeometry::new(4_000_000_000, 4_000_000_000);
        let err = TemporalNoiseReduction::create(
            &device,
            Backend::Cuda,
            huge,
            PixelFormat::Nv12Er,
            TnrParams::default(),
        )
        .unwrap_err();
        assert_eq!(err.status(), Some(Status::InvalidArgument));
        assert_eq!(device.ledger().payloads.created, 0);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn unallocatable_history_is_out_of_memory() {
        let device = Device::host();
        // NV12 size fits, the u16 history does not.
        let g = FrameGeometry::new(3_000_000_000, 2_000_000_000);
        let err =
            TemporalNoiseReduction::create(&device, Backend::Vic, g, PixelFormat::Nv12Er, TnrParams::default())
                .unwrap_err();
        assert_eq!(err.status(), Some(Status::OutOfMemory));
        assert_eq!(device.ledger().payloads.created, 0);
    }

    #[test]
    fn blend_averages_static_samples_and_passes_motion() {
        let params = TnrParams {
            preset: TnrPreset::Default,
            strength: 1.0,
        };
        let prev = [100u8, 100];
        let cur = [110u8, 200];
        let mut out = [0u8; 2];
        let mut history = [0u16; 2];
        blend(params, &prev, &cur, &mut out, &mut history);
        // h = 1 gives an even blend; the jump of 100 is motion.
        assert_eq!(out, [105, 200]);
        assert_eq!(history, [1, 0]);
    }

    #[test]
    fn history_is_capped() {
        let params = TnrParams {
            preset: TnrPreset::OutdoorHighLight,
            strength: 1.0,
        };
        let mut history = [0u16; 1];
        let mut out = [0u8; 1];
        for _ in 0..20 {
            blend(params, &[50], &[52], &mut out, &mut history);
        }
        assert_eq!(history[0], TnrPreset::OutdoorHighLight.max_history());
    }

    #[test]
    fn sentinel_passes_current_through() {
        let device = Device::host();
        let stream = Stream::create(&device, Backend::Cuda.stream_capabilities()).unwrap();
        let tnr = payload(&device, Backend::Cuda, 1.0);
        let cur = nv12(&device, 77);
        let out = nv12(&device, 0);

        submit_temporal_noise_reduction(&stream, &tnr, None, &cur, &out).unwrap();
        stream.sync().unwrap();
        assert!(out.lock_read().unwrap().view().data.iter().all(|&b| b == 77));
    }

    #[test]
    fn vic_leaves_chroma_untouched() {
        let device = Device::host();
        let stream = Stream::create(&device, Backend::Vic.stream_capabilities()).unwrap();
        let tnr = payload(&device, Backend::Vic, 1.0);
        let prev = nv12(&device, 100);
        let cur = nv12(&device, 110);
        let out = nv12(&device, 0);

        submit_temporal_noise_reduction(&stream, &tnr, Some(&prev), &cur, &out).unwrap();
        stream.sync().unwrap();
        let guard = out.lock_read().unwrap();
        let data = guard.view().data;
        assert!(data[..8].iter().all(|&b| b == 105));
        assert!(data[8..].iter().all(|&b| b == 110));
    }

    #[test]
    fn zero_strength_is_passthrough() {
        let device = Device::host();
        let stream = Stream::create(&device, Backend::Cuda.stream_capabilities()).unwrap();
        let tnr = payload(&device, Backend::Cuda, 0.0);
        let prev = nv12(&device, 100);
        let cur = nv12(&device, 110);
        let out = nv12(&device, 0);

        submit_temporal_noise_reduction(&stream, &tnr, Some(&prev), &cur, &out).unwrap();
        stream.sync().unwrap();
        assert!(out.lock_read().unwrap().view().data.iter().all(|&b| b == 110));
    }

    #[test]
    fn aliasing_and_backend_are_checked_at_submit() {
        let device = Device::host();
        let stream = Stream::create(&device, Backend::Cuda.stream_capabilities()).unwrap();
        let cuda = payload(&device, Backend::Cuda, 1.0);
        let vic = payload(&device, Backend::Vic, 1.0);
        let a = nv12(&device, 0);
        let b = nv12(&device, 0);

        let err = submit_temporal_noise_reduction(&stream, &cuda, Some(&a), &a, &b).unwrap_err();
        assert_eq!(err.status(), Some(Status::InvalidArgument));
        let err = submit_temporal_noise_reduction(&stream, &cuda, None, &b, &b).unwrap_err();
        assert_eq!(err.status(), Some(Status::InvalidArgument));
        let err = submit_temporal_noise_reduction(&stream, &vic, None, &a, &b).unwrap_err();
        assert_eq!(err.status(), Some(Status::InvalidArgument));
    }
}
