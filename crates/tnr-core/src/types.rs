//! Pixel formats, frame geometry and host-side frame buffers.
//!
//! # Formats
//!
//! Two formats cross the accelerator boundary:
//!
//! - [`PixelFormat::Bgr8`] is the external representation produced by frame
//!   sources and consumed by frame sinks.
//! - [`PixelFormat::Nv12Er`] is the accelerator-native representation the
//!   temporal denoiser operates on.
//!
//! Both layouts are dense (row pitch equals the minimum pitch), so the byte
//! size of a frame is a pure function of format and geometry.

use std::collections::TryReserveError;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// ─── Pixel format ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Interleaved 8-bit BGR, 3 bytes per pixel: `[B G R B G R ...]`.
    /// Total: `width × height × 3`.
    Bgr8,

    /// NV12, full ("extended") range BT.601.
    /// Y plane: `width × height` bytes.
    /// CbCr plane: `(height / 2)` rows of `width` bytes, interleaved `[Cb Cr ...]`,
    /// sub-sampled 2×2.
    /// Total: `width × height × 3 / 2`.  Width and height must be even.
    Nv12Er,
}

impl PixelFormat {
    /// Dense allocation size in bytes for the given geometry.
    ///
    /// `None` when the size does not fit in a single allocation
    /// (`isize::MAX` bytes).
    pub fn byte_size(self, geometry: FrameGeometry) -> Option<usize> {
        let w = geometry.width as usize;
        let h = geometry.height as usize;
        let size = match self {
            Self::Bgr8 => w.checked_mul(h)?.checked_mul(3)?,
            Self::Nv12Er => w.checked_mul(h)?.checked_add(w.checked_mul(h / 2)?)?,
        };
        (size <= isize::MAX as usize).then_some(size)
    }

    /// Check that `geometry` can be represented in this format and return
    /// its dense byte size.
    pub fn validate(self, geometry: FrameGeometry) -> std::result::Result<usize, String> {
        if geometry.width == 0 || geometry.height == 0 {
            return Err(format!("{geometry} has a zero dimension"));
        }
        if self == Self::Nv12Er && (geometry.width % 2 != 0 || geometry.height % 2 != 0) {
            return Err(format!("{self} requires even dimensions, got {geometry}"));
        }
        self.byte_size(geometry)
            .ok_or_else(|| format!("{self} frame {geometry} is too large to allocate"))
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bgr8 => f.write_str("BGR8"),
            Self::Nv12Er => f.write_str("NV12_ER"),
        }
    }
}

// ─── Geometry / rate ─────────────────────────────────────────────────────────

/// Frame dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels in one frame.
    #[inline]
    pub const fn pixels(self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Rational framerate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Framerate {
    pub num: u32,
    pub den: u32,
}

impl Framerate {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            f64::from(self.num) / f64::from(self.den)
        }
    }

    /// Parse `"30"`, `"30000/1001"` or `"29.97"`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || EngineError::Configuration(format!("invalid framerate '{s}'"));
        let rate = if let Some((num, den)) = s.split_once('/') {
            let num = num.trim().parse::<u32>().map_err(|_| invalid())?;
            let den = den.trim().parse::<u32>().map_err(|_| invalid())?;
            Self::new(num, den)
        } else if let Ok(whole) = s.parse::<u32>() {
            Self::new(whole, 1)
        } else {
            let value = s.parse::<f64>().map_err(|_| invalid())?;
            let millis = (value * 1000.0).round();
            if !millis.is_finite() || millis <= 0.0 || millis > f64::from(u32::MAX) {
                return Err(invalid());
            }
            Self::new(millis as u32, 1000)
        };
        if rate.num == 0 || rate.den == 0 {
            return Err(invalid());
        }
        Ok(rate)
    }
}

impl fmt::Display for Framerate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

// ─── Host frames ─────────────────────────────────────────────────────────────

/// Zero-filled buffer of `len` elements; allocation failure is returned
/// instead of aborting the process.
pub fn try_zeroed<T: Copy + Default>(len: usize) -> std::result::Result<Vec<T>, TryReserveError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)?;
    buf.resize(len, T::default());
    Ok(buf)
}

/// One externally-owned frame in host memory.
///
/// Produced by a [`FrameSource`](crate::frame_traits::FrameSource) and handed
/// to the accelerator runtime, which wraps the buffer without copying it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostFrame {
    pub geometry: FrameGeometry,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl HostFrame {
    /// Build a frame, checking that `data` matches the format's byte size.
    pub fn new(geometry: FrameGeometry, format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        let need = format.byte_size(geometry).ok_or_else(|| {
            EngineError::Media(format!("{format} frame {geometry} is too large to allocate"))
        })?;
        if data.len() != need {
            return Err(EngineError::Media(format!(
                "{format} frame {geometry} needs {need} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            geometry,
            format,
            data,
        })
    }

    /// A zero-filled frame.
    pub fn zeroed(geometry: FrameGeometry, format: PixelFormat) -> Result<Self> {
        let size = format.validate(geometry).map_err(EngineError::Configuration)?;
        let data = try_zeroed(size)
            .map_err(|e| EngineError::Media(format!("cannot allocate {format} frame {geometry}: {e}")))?;
        Ok(Self {
            geometry,
            format,
            data,
        })
    }

    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            geometry: self.geometry,
            format: self.format,
            data: &self.data,
        }
    }
}

/// Borrowed view of a frame's pixels, handed to sinks.
#[derive(Clone, Copy, Debug)]
pub struct FrameView<'a> {
    pub geometry: FrameGeometry,
    pub format: PixelFormat,
    pub data: &'a [u8],
}
