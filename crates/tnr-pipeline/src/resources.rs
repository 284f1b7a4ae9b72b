//! Accelerator resources owned by one run.
//!
//! [`ResourceSet::acquire`] creates the stream, the three NV12 buffers, the
//! BGR8 emit buffer and the denoiser in that order.  Every member is an
//! `Option`, so a set that failed half-way through construction is still a
//! valid value: dropping it releases whatever was created.  The input wrapper
//! is created lazily from the first ingested frame.
//!
//! [`ResourceSet::release`] is idempotent.  The stream goes first so that any
//! work still queued against the other resources drains before they are
//! released.

use std::sync::Arc;

use tracing::{debug, info};

use tnr_accel::{Device, Image, Stream, TemporalNoiseReduction, TnrParams};
use tnr_core::backend::Backend;
use tnr_core::error::{EngineError, Result, Status};
use tnr_core::types::{FrameGeometry, HostFrame, PixelFormat};

use crate::rotator::BufferRotator;

/// Format the denoiser works in.
pub const WORKING_FORMAT: PixelFormat = PixelFormat::Nv12Er;

pub struct ResourceSet {
    device: Arc<Device>,
    geometry: FrameGeometry,
    stream: Option<Stream>,
    buffers: [Option<Image>; BufferRotator::SLOTS],
    emit: Option<Image>,
    wrapper: Option<Image>,
    denoiser: Option<TemporalNoiseReduction>,
}

impl ResourceSet {
    /// A set with nothing allocated yet.
    pub fn empty(device: &Arc<Device>, geometry: FrameGeometry) -> Self {
        Self {
            device: Arc::clone(device),
            geometry,
            stream: None,
            buffers: [None, None, None],
            emit: None,
            wrapper: None,
            denoiser: None,
        }
    }

    /// Create every resource a run with `backend` needs.
    ///
    /// On failure, members created so far are released before the error is
    /// returned.
    pub fn acquire(
        device: &Arc<Device>,
        geometry: FrameGeometry,
        backend: Backend,
        params: TnrParams,
    ) -> Result<Self> {
        let mut set = Self::empty(device, geometry);

        set.stream = Some(Stream::create(device, backend.stream_capabilities())?);
        for slot in &mut set.buffers {
            *slot = Some(Image::create(device, geometry, WORKING_FORMAT)?);
        }
        set.emit = Some(Image::create(device, geometry, PixelFormat::Bgr8)?);
        set.denoiser = Some(TemporalNoiseReduction::create(
            device,
            backend,
            geometry,
            WORKING_FORMAT,
            params,
        )?);

        info!(
            %backend,
            %geometry,
            preset = %params.preset,
            strength = params.strength,
            "Run resources acquired"
        );
        Ok(set)
    }

    /// Point the input wrapper at `frame`, creating it on first use.
    pub fn wrap_input(&mut self, frame: HostFrame) -> Result<()> {
        if let Some(wrapper) = &self.wrapper {
            return wrapper.set_wrapped(frame);
        }
        self.wrapper = Some(Image::wrap_host_frame(&self.device, frame)?);
        Ok(())
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn stream(&self) -> Result<&Stream> {
        self.stream.as_ref().ok_or_else(|| missing("stream"))
    }

    pub fn buffer(&self, slot: usize) -> Result<&Image> {
        self.buffers
            .get(slot)
            .and_then(Option::as_ref)
            .ok_or_else(|| missing("rotating buffer"))
    }

    pub fn emit_buffer(&self) -> Result<&Image> {
        self.emit.as_ref().ok_or_else(|| missing("emit buffer"))
    }

    pub fn wrapper(&self) -> Result<&Image> {
        self.wrapper.as_ref().ok_or_else(|| missing("input wrapper"))
    }

    pub fn denoiser(&self) -> Result<&TemporalNoiseReduction> {
        self.denoiser.as_ref().ok_or_else(|| missing("denoiser"))
    }

    /// `true` once nothing is left to release.
    pub fn is_released(&self) -> bool {
        self.stream.is_none()
            && self.buffers.iter().all(Option::is_none)
            && self.emit.is_none()
            && self.wrapper.is_none()
            && self.denoiser.is_none()
    }

    /// Release every member still held.  Safe to call any number of times.
    pub fn release(&mut self) {
        if self.is_released() {
            return;
        }
        // Joining the stream worker waits for queued work on every other member.
        drop(self.stream.take());
        drop(self.denoiser.take());
        drop(self.wrapper.take());
        drop(self.emit.take());
        for slot in &mut self.buffers {
            drop(slot.take());
        }
        debug!(ledger = ?self.device.ledger(), "Run resources released");
    }
}

impl Drop for ResourceSet {
    fn drop(&mut self) {
        self.release();
    }
}

fn missing(what: &str) -> EngineError {
    EngineError::accelerator(
        Status::InvalidOperation,
        format!("{what} is not allocated in this resource set"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tnr_accel::{FaultPoint, ResourceKind};

    const G: FrameGeometry = FrameGeometry::new(8, 4);

    #[test]
    fn acquire_then_release_balances_ledger() {
        let device = Device::host();
        let mut set = ResourceSet::acquire(&device, G, Backend::Vic, TnrParams::default()).unwrap();
        set.wrap_input(HostFrame::zeroed(G, PixelFormat::Bgr8).unwrap()).unwrap();
        let live = device.ledger();
        assert_eq!(live.streams.live(), 1);
        assert_eq!(live.images.live(), 5);
        assert_eq!(live.payloads.live(), 1);

        set.release();
        set.release();
        assert!(set.is_released());
        assert!(device.ledger().is_balanced());
        assert!(set.stream().is_err());
    }

    #[test]
    fn failed_acquire_releases_partial_set() {
        for nth in 1..=4 {
            let device = Device::builder()
                .fail_at(FaultPoint::Create(ResourceKind::Image), nth, Status::OutOfMemory)
                .build();
            let err = ResourceSet::acquire(&device, G, Backend::Cuda, TnrParams::default())
                .err()
                .unwrap();
            assert_eq!(err.status(), Some(Status::OutOfMemory));
            let ledger = device.ledger();
            assert!(ledger.is_balanced(), "nth={nth}: {ledger:?}");
            assert_eq!(ledger.images.created, nth - 1);
        }
    }

    #[test]
    fn denoiser_failure_is_last_and_releases_everything() {
        let device = Device::builder()
            .fail_at(FaultPoint::Create(ResourceKind::Payload), 1, Status::InternalError)
            .build();
        assert!(ResourceSet::acquire(&device, G, Backend::Cuda, TnrParams::default()).is_err());
        let ledger = device.ledger();
        assert_eq!(ledger.images.created, 4);
        assert!(ledger.is_balanced());
    }

    #[test]
    fn releasing_an_empty_set_is_a_no_op() {
        let device = Device::host();
        let mut set = ResourceSet::empty(&device, G);
        set.release();
        drop(set);
        assert_eq!(device.ledger().created(), 0);
    }

    #[test]
    fn rewrap_with_other_geometry_fails() {
        let device = Device::host();
        let mut set = ResourceSet::acquire(&device, G, Backend::Cuda, TnrParams::default()).unwrap();
        set.wrap_input(HostFrame::zeroed(G, PixelFormat::Bgr8).unwrap()).unwrap();
        let err = set
            .wrap_input(HostFrame::zeroed(FrameGeometry::new(4, 4), PixelFormat::Bgr8).unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), "AcceleratorError");
    }
}
