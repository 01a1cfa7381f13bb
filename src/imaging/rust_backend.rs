//! Pure Rust image processing backend on the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify | `image::ImageReader::into_dimensions` (header only) |
//! | Decode (JPEG, PNG, BMP, TIFF, WebP) | `ImageReader::decode` under [`DECODE_MAX_ALLOC`] |
//! | Split | `DynamicImage::crop_imm` |
//! | Resize | `DynamicImage::resize_exact` with `Triangle` (bilinear) filter |
//! | Compose | `image::imageops::replace` onto an RGBA8 canvas |
//! | Encode → PNG / BMP | `DynamicImage::write_to` |

use super::backend::{Dimensions, ImageBackend, ImagingError};
use super::calculations::canvas_width;
use super::params::{ComposeParams, OutputFormat, ResizeParams, SplitParams};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader, Limits, RgbaImage};
use std::io::Cursor;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocation cap for a single decode. Oversized inputs fail as
/// [`ImagingError::Decode`] instead of exhausting memory.
pub const DECODE_MAX_ALLOC: u64 = 512 * 1024 * 1024;

/// Decode an image from memory, guessing the container from its magic bytes.
fn load_image(data: &[u8]) -> Result<DynamicImage, ImagingError> {
    let mut limits = Limits::default();
    limits.max_alloc = Some(DECODE_MAX_ALLOC);

    let mut reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| ImagingError::Decode(e.to_string()))?;
    reader.limits(limits);
    reader
        .decode()
        .map_err(|e| ImagingError::Decode(e.to_string()))
}

/// Encode to the requested container.
///
/// Pixels are normalised to RGBA8 first: every decoder output (16-bit PNG,
/// grayscale, float TIFF) becomes something both PNG and BMP encoders accept.
fn encode_image(img: &DynamicImage, format: OutputFormat) -> Result<Vec<u8>, ImagingError> {
    if img.width() == 0 || img.height() == 0 {
        return Err(ImagingError::Encode(format!(
            "refusing to encode empty {}x{} image",
            img.width(),
            img.height()
        )));
    }
    let normalised = DynamicImage::ImageRgba8(img.to_rgba8());
    let mut buf = Vec::new();
    normalised
        .write_to(&mut Cursor::new(&mut buf), format.into())
        .map_err(|e| ImagingError::Encode(format!("{format:?} encode failed: {e}")))?;
    Ok(buf)
}

impl ImageBackend for RustBackend {
    fn identify(&self, data: &[u8]) -> Result<Dimensions, ImagingError> {
        let (width, height) = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| ImagingError::Decode(e.to_string()))?
            .into_dimensions()
            .map_err(|e| ImagingError::Decode(e.to_string()))?;
        Ok(Dimensions { width, height })
    }

    fn split(&self, params: &SplitParams) -> Result<(Vec<u8>, Vec<u8>), ImagingError> {
        let img = load_image(params.source)?;
        let (width, height) = img.dimensions();
        if params.row == 0 || params.row >= height {
            return Err(ImagingError::InvalidRequest(format!(
                "split row {} outside 1..{height}",
                params.row
            )));
        }

        let top = img.crop_imm(0, 0, width, params.row);
        let bottom = img.crop_imm(0, params.row, width, height - params.row);
        Ok((
            encode_image(&top, params.format)?,
            encode_image(&bottom, params.format)?,
        ))
    }

    fn resize(&self, params: &ResizeParams) -> Result<Vec<u8>, ImagingError> {
        let img = load_image(params.source)?;
        if img.dimensions() == (params.width, params.height) {
            return encode_image(&img, params.format);
        }
        let resized = img.resize_exact(params.width, params.height, FilterType::Triangle);
        encode_image(&resized, params.format)
    }

    fn compose(&self, params: &ComposeParams) -> Result<(Vec<u8>, Dimensions), ImagingError> {
        let top = load_image(params.top)?;
        let bottom = load_image(params.bottom)?;

        let width = canvas_width(top.width(), bottom.width(), params.policy).ok_or(
            ImagingError::WidthMismatch {
                top_width: top.width(),
                bottom_width: bottom.width(),
            },
        )?;
        let height = top.height() + bottom.height();

        let mut canvas = RgbaImage::new(width, height);
        image::imageops::replace(
            &mut canvas,
            &top.crop_imm(0, 0, width, top.height()).to_rgba8(),
            0,
            0,
        );
        image::imageops::replace(
            &mut canvas,
            &bottom.crop_imm(0, 0, width, bottom.height()).to_rgba8(),
            0,
            i64::from(top.height()),
        );

        let bytes = encode_image(&DynamicImage::ImageRgba8(canvas), params.format)?;
        Ok((bytes, Dimensions { width, height }))
    }
}
