//! Accelerator image buffers.
//!
//! An [`Image`] is a fixed `width × height × format` allocation registered
//! with the device ledger.  Handles are not `Clone`: the only extra references
//! are the ones an in-flight operation holds until the stream worker has run
//! it, so the ledger releases the image when both the owner and the last
//! pending operation are gone.
//!
//! Wrapper images adopt an externally produced [`HostFrame`] buffer instead of
//! allocating, and can be pointed at a new frame with [`Image::set_wrapped`].

use std::sync::{Arc, Mutex, MutexGuard};

use tnr_core::error::{EngineError, Result, Status};
use tnr_core::types::{FrameGeometry, FrameView, HostFrame, PixelFormat, try_zeroed};

use crate::context::{Device, ResourceKind};

pub(crate) struct ImageInner {
    id: u64,
    geometry: FrameGeometry,
    format: PixelFormat,
    wrapped: bool,
    data: Mutex<Vec<u8>>,
    device: Arc<Device>,
}

impl Drop for ImageInner {
    fn drop(&mut self) {
        self.device.deregister(ResourceKind::Image, self.id);
    }
}

/// Fixed-size accelerator image.
pub struct Image {
    inner: Arc<ImageInner>,
}

impl Image {
    /// Allocate a zero-filled image.
    ///
    /// # Errors
    ///
    /// - [`Status::InvalidArgument`] if `geometry` cannot be represented in
    ///   `format` (zero or, for NV12, odd dimensions, or too large).
    /// - [`Status::OutOfMemory`] if the pixel buffer cannot be allocated.
    pub fn create(device: &Arc<Device>, geometry: FrameGeometry, format: PixelFormat) -> Result<Self> {
        let size = format
            .validate(geometry)
            .map_err(|msg| EngineError::accelerator(Status::InvalidArgument, msg))?;
        let data = try_zeroed(size).map_err(|e| {
            EngineError::accelerator(
                Status::OutOfMemory,
                format!("cannot allocate {format} image {geometry}: {e}"),
            )
        })?;
        Self::register(device, geometry, format, false, data)
    }

    /// Wrap a host frame without copying its pixels.
    pub fn wrap_host_frame(device: &Arc<Device>, frame: HostFrame) -> Result<Self> {
        frame
            .format
            .validate(frame.geometry)
            .map_err(|msg| EngineError::accelerator(Status::InvalidArgument, msg))?;
        check_len(&frame)?;
        Self::register(device, frame.geometry, frame.format, true, frame.data)
    }

    fn register(
        device: &Arc<Device>,
        geometry: FrameGeometry,
        format: PixelFormat,
        wrapped: bool,
        data: Vec<u8>,
    ) -> Result<Self> {
        let id = device.register(ResourceKind::Image)?;
        Ok(Self {
            inner: Arc::new(ImageInner {
                id,
                geometry,
                format,
                wrapped,
                data: Mutex::new(data),
                device: Arc::clone(device),
            }),
        })
    }

    /// Point a wrapper image at a new host frame.
    ///
    /// # Errors
    ///
    /// - [`Status::InvalidOperation`] if this image was not created by
    ///   [`Image::wrap_host_frame`].
    /// - [`Status::InvalidArgument`] if the frame's geometry or format differs
    ///   from the one the wrapper was created with.
    pub fn set_wrapped(&self, frame: HostFrame) -> Result<()> {
        if !self.inner.wrapped {
            return Err(EngineError::accelerator(
                Status::InvalidOperation,
                format!("image {} is not a host frame wrapper", self.inner.id),
            ));
        }
        if frame.geometry != self.inner.geometry || frame.format != self.inner.format {
            return Err(EngineError::accelerator(
                Status::InvalidArgument,
                format!(
                    "cannot rewrap {} {} frame into {} {} wrapper",
                    frame.geometry, frame.format, self.inner.geometry, self.inner.format
                ),
            ));
        }
        check_len(&frame)?;
        *self.lock_data()? = frame.data;
        Ok(())
    }

    /// Borrow the pixels for reading on the host.
    ///
    /// Only meaningful after the stream writing this image has been synced.
    pub fn lock_read(&self) -> Result<ImageReadGuard<'_>> {
        Ok(ImageReadGuard {
            geometry: self.inner.geometry,
            format: self.inner.format,
            data: self.lock_data()?,
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.inner.geometry
    }

    pub fn format(&self) -> PixelFormat {
        self.inner.format
    }

    pub fn is_wrapper(&self) -> bool {
        self.inner.wrapped
    }

    /// `true` if both handles name the same allocation.
    pub fn ptr_eq(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Extra reference held by a queued operation.
    pub(crate) fn share(&self) -> Arc<ImageInner> {
        Arc::clone(&self.inner)
    }
}

impl ImageInner {
    pub(crate) fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub(crate) fn format(&self) -> PixelFormat {
        self.format
    }

    pub(crate) fn lock_data(&self) -> Result<MutexGuard<'_, Vec<u8>>> {
        self.data.lock().map_err(|_| {
            EngineError::accelerator(
                Status::InternalError,
                format!("image {} storage poisoned", self.id),
            )
        })
    }
}

impl Image {
    fn lock_data(&self) -> Result<MutexGuard<'_, Vec<u8>>> {
        self.inner.lock_data()
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("id", &self.inner.id)
            .field("geometry", &self.inner.geometry)
            .field("format", &self.inner.format)
            .field("wrapped", &self.inner.wrapped)
            .finish()
    }
}

fn check_len(frame: &HostFrame) -> Result<()> {
    let need = frame
        .format
        .validate(frame.geometry)
        .map_err(|msg| EngineError::accelerator(Status::InvalidArgument, msg))?;
    if frame.data.len() != need {
        return Err(EngineError::accelerator(
            Status::InvalidArgument,
            format!("{} frame {} has {} bytes, expected {need}", frame.format, frame.geometry, frame.data.len()),
        ));
    }
    Ok(())
}

/// Host read access to an image's pixels.
pub struct ImageReadGuard<'a> {
    geometry: FrameGeometry,
    format: PixelFormat,
    data: MutexGuard<'a, Vec<u8>>,
}

impl ImageReadGuard<'_> {
    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            geometry: self.geometry,
            format: self.format,
            data: &self.data,
        }
    }
}
