//! Pixel format conversion between BGR8 and NV12 (full-range BT.601).
//!
//! Conversion is only defined on the general-purpose compute backend.
//!
//! Forward transform (per pixel, then 2×2 chroma average):
//!
//! ```text
//! Y  =  0.299    R + 0.587    G + 0.114    B
//! Cb = -0.168736 R - 0.331264 G + 0.5      B + 128
//! Cr =  0.5      R - 0.418688 G - 0.081312 B + 128
//! ```
//!
//! Inverse transform (chroma shared by each 2×2 block):
//!
//! ```text
//! R = Y + 1.402    (Cr - 128)
//! G = Y - 0.344136 (Cb - 128) - 0.714136 (Cr - 128)
//! B = Y + 1.772    (Cb - 128)
//! ```

use tracing::trace;

use tnr_core::backend::Backend;
use tnr_core::error::{EngineError, Result, Status};
use tnr_core::types::{FrameGeometry, PixelFormat};

use crate::context::OpKind;
use crate::image::Image;
use crate::stream::{Operation, Stream};

/// Enqueue a format conversion from `source` into `dest`.
///
/// Returns once the operation is queued; pixels are written when the stream
/// worker reaches it.
///
/// # Errors
///
/// - [`Status::NotImplemented`] if `backend` is not the compute backend.
/// - [`Status::InvalidArgument`] if the images alias, their geometries
///   differ, or the stream was not created with `backend`.
/// - [`Status::InvalidImageFormat`] for any pair other than
///   `Bgr8 → Nv12Er` and `Nv12Er → Bgr8`.
/// - [`Status::InvalidOperation`] if the stream is in an error state.
pub fn submit_convert_image_format(
    stream: &Stream,
    backend: Backend,
    source: &Image,
    dest: &Image,
) -> Result<()> {
    if !backend.is_compute() {
        return Err(EngineError::accelerator(
            Status::NotImplemented,
            format!("format conversion is not available on backend {backend}"),
        ));
    }
    if source.ptr_eq(dest) {
        return Err(EngineError::accelerator(
            Status::InvalidArgument,
            "conversion source and destination are the same image",
        ));
    }
    if source.geometry() != dest.geometry() {
        return Err(EngineError::accelerator(
            Status::InvalidArgument,
            format!(
                "conversion geometry mismatch: {} -> {}",
                source.geometry(),
                dest.geometry()
            ),
        ));
    }
    let kernel: fn(FrameGeometry, &[u8], &mut [u8]) = match (source.format(), dest.format()) {
        (PixelFormat::Bgr8, PixelFormat::Nv12Er) => bgr8_to_nv12er,
        (PixelFormat::Nv12Er, PixelFormat::Bgr8) => nv12er_to_bgr8,
        (from, to) => {
            return Err(EngineError::accelerator(
                Status::InvalidImageFormat,
                format!("conversion {from} -> {to} is not supported"),
            ));
        }
    };

    let src = source.share();
    let dst = dest.share();
    stream.submit(Operation::new(OpKind::ConvertImageFormat, backend, move || {
        let geometry = src.geometry();
        let input = src.lock_data()?;
        let mut output = dst.lock_data()?;
        trace!(%geometry, from = %src.format(), to = %dst.format(), "convert");
        kernel(geometry, &input, &mut output);
        Ok(())
    }))
}

#[inline]
fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Convert a dense BGR8 frame into dense NV12 (full range).
///
/// `geometry` must have even dimensions; `src` and `dst` must have the
/// format's byte size.
pub fn bgr8_to_nv12er(geometry: FrameGeometry, src: &[u8], dst: &mut [u8]) {
    let w = geometry.width as usize;
    let h = geometry.height as usize;
    let (y_plane, uv_plane) = dst.split_at_mut(w * h);

    for (y_row, bgr_row) in y_plane.chunks_exact_mut(w).zip(src.chunks_exact(w * 3)) {
        for (y, px) in y_row.iter_mut().zip(bgr_row.chunks_exact(3)) {
            let (b, g, r) = (f32::from(px[0]), f32::from(px[1]), f32::from(px[2]));
            *y = clamp_u8(0.299 * r + 0.587 * g + 0.114 * b);
        }
    }

    for (cy, uv_row) in uv_plane.chunks_exact_mut(w).enumerate() {
        for cx in 0..w / 2 {
            let mut cb = 0.0f32;
            let mut cr = 0.0f32;
            for dy in 0..2 {
                for dx in 0..2 {
                    let i = ((cy * 2 + dy) * w + cx * 2 + dx) * 3;
                    let (b, g, r) = (f32::from(src[i]), f32::from(src[i + 1]), f32::from(src[i + 2]));
                    cb += -0.168_736 * r - 0.331_264 * g + 0.5 * b;
                    cr += 0.5 * r - 0.418_688 * g - 0.081_312 * b;
                }
            }
            uv_row[cx * 2] = clamp_u8(cb / 4.0 + 128.0);
            uv_row[cx * 2 + 1] = clamp_u8(cr / 4.0 + 128.0);
        }
    }
}

/// Convert a dense NV12 (full range) frame into dense BGR8.
pub fn nv12er_to_bgr8(geometry: FrameGeometry, src: &[u8], dst: &mut [u8]) {
    let w = geometry.width as usize;
    let h = geometry.height as usize;
    let (y_plane, uv_plane) = src.split_at(w * h);

    for (row, bgr_row) in dst.chunks_exact_mut(w * 3).enumerate() {
        let uv_row = &uv_plane[(row / 2) * w..(row / 2) * w + w];
        for (col, px) in bgr_row.chunks_exact_mut(3).enumerate() {
            let y = f32::from(y_plane[row * w + col]);
            let cb = f32::from(uv_row[(col / 2) * 2]) - 128.0;
            let cr = f32::from(uv_row[(col / 2) * 2 + 1]) - 128.0;
            px[0] = clamp_u8(y + 1.772 * cb);
            px[1] = clamp_u8(y - 0.344_136 * cb - 0.714_136 * cr);
            px[2] = clamp_u8(y + 1.402 * cr);
        }
    }
}
