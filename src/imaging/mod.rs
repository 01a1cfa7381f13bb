//! Image processing: pure Rust, in memory.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `ImageReader::into_dimensions` |
//! | **Partition** | `crop_imm` at `height / 2` → two PNGs |
//! | **Zoom** | bilinear `resize_exact` → PNG |
//! | **Assemble** | `imageops::replace` onto one canvas → BMP |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: High-level functions combining calculations + backend

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{Dimensions, ImageBackend, ImagingError};
pub use calculations::{canvas_width, half_heights, split_row, zoom_dimensions};
pub use operations::{
    OUTPUT_PIXEL_CEILING, ZoomLimits, assemble, partition, validate_zoom_request, zoom,
};
pub use params::{
    ComposeParams, OutputFormat, ReassemblyPolicy, ResizeParams, SplitParams, ZoomPercent,
};
pub use rust_backend::{DECODE_MAX_ALLOC, RustBackend};
