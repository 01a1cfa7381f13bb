//! High-level image operations.
//!
//! These functions combine calculations with backend execution. They own the
//! validation rules (what is an acceptable zoom, which row to split on, which
//! half goes on top) so backends only ever see well-formed parameters.

use super::backend::{Dimensions, ImageBackend, ImagingError};
use super::calculations::{half_heights, zoom_dimensions};
use super::params::{
    ComposeParams, OutputFormat, ReassemblyPolicy, ResizeParams, SplitParams, ZoomPercent,
};
use super::rust_backend::DECODE_MAX_ALLOC;
use crate::types::{AssembledImage, ImageHalf, ResizeResult, Role};
use bytes::Bytes;

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, ImagingError>;

/// Largest output a worker may ever be configured to produce.
///
/// A result of this size still decodes as RGBA8 within [`DECODE_MAX_ALLOC`],
/// so anything a worker returns can be reassembled.
pub const OUTPUT_PIXEL_CEILING: u64 = DECODE_MAX_ALLOC / 4;

/// Upper bounds on zoom requests a worker accepts.
#[derive(Debug, Clone, Copy)]
pub struct ZoomLimits {
    pub max_percent: u32,
    /// Output `width * height`; checked before any resize buffer exists.
    pub max_output_pixels: u64,
}

impl Default for ZoomLimits {
    fn default() -> Self {
        Self {
            max_percent: 1000,
            max_output_pixels: 40_000_000,
        }
    }
}

/// Split an encoded image into independently encoded TOP and BOTTOM halves.
///
/// TOP gets `height / 2` rows, BOTTOM the rest. Images shorter than two rows
/// cannot produce a non-empty TOP half and are refused.
pub fn partition(backend: &impl ImageBackend, source: &[u8]) -> Result<(ImageHalf, ImageHalf)> {
    let Dimensions { height, .. } = backend.identify(source)?;
    if height < 2 {
        return Err(ImagingError::InvalidRequest(format!(
            "image has {height} row(s); at least 2 are needed to partition"
        )));
    }

    let (top_rows, bottom_rows) = half_heights(height);
    let (top, bottom) = backend.split(&SplitParams {
        source,
        row: top_rows,
        format: OutputFormat::TRANSPORT,
    })?;

    Ok((
        ImageHalf {
            bytes: Bytes::from(top),
            role: Role::Top,
            rows: top_rows,
        },
        ImageHalf {
            bytes: Bytes::from(bottom),
            role: Role::Bottom,
            rows: bottom_rows,
        },
    ))
}

/// Validate a zoom request before any decode work.
pub fn validate_zoom_request(source: &[u8], percent: i64, limits: &ZoomLimits) -> Result<ZoomPercent> {
    if source.is_empty() {
        return Err(ImagingError::InvalidRequest("image bytes are empty".into()));
    }
    let zoom = ZoomPercent::try_from(percent).map_err(|value| {
        ImagingError::InvalidRequest(format!("zoom percent must be positive, got {value}"))
    })?;
    if zoom.value() > limits.max_percent {
        return Err(ImagingError::InvalidRequest(format!(
            "zoom percent {} exceeds limit {}",
            zoom.value(),
            limits.max_percent
        )));
    }
    Ok(zoom)
}

/// Resize an encoded image by `percent` and return it in the transport format.
pub fn zoom(
    backend: &impl ImageBackend,
    source: &[u8],
    percent: ZoomPercent,
    limits: &ZoomLimits,
) -> Result<(Vec<u8>, Dimensions)> {
    let original = backend.identify(source)?;
    let (width, height) = zoom_dimensions((original.width, original.height), percent);
    if width == 0 || height == 0 {
        return Err(ImagingError::InvalidRequest(format!(
            "zoom {percent} collapses {}x{} to {width}x{height}",
            original.width, original.height
        )));
    }
    let pixels = u64::from(width) * u64::from(height);
    if pixels > limits.max_output_pixels {
        return Err(ImagingError::InvalidRequest(format!(
            "zoom {percent} of {}x{} gives {width}x{height} ({pixels} pixels), limit is {}",
            original.width, original.height, limits.max_output_pixels
        )));
    }

    let bytes = backend.resize(&ResizeParams {
        source,
        width,
        height,
        format: OutputFormat::TRANSPORT,
    })?;
    Ok((bytes, Dimensions { width, height }))
}

/// Compose a TOP and a BOTTOM result into the storage format.
pub fn assemble(
    backend: &impl ImageBackend,
    top: &ResizeResult,
    bottom: &ResizeResult,
    policy: ReassemblyPolicy,
) -> Result<AssembledImage> {
    if top.role != Role::Top || bottom.role != Role::Bottom {
        return Err(ImagingError::InvalidRequest(format!(
            "expected TOP and BOTTOM results, got {} and {}",
            top.role, bottom.role
        )));
    }

    let (bytes, dims) = backend.compose(&ComposeParams {
        top: &top.bytes,
        bottom: &bottom.bytes,
        policy,
        format: OutputFormat::STORAGE,
    })?;

    Ok(AssembledImage {
        bytes: Bytes::from(bytes),
        width: dims.width,
        height: dims.height,
    })
}
