//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the high-level [`operations`](super::operations) module
//! (which decides which rows go where and how large the output is) and the
//! [`backend`](super::backend) (which does the actual pixel work).
//!
//! ## Types
//!
//! - [`ZoomPercent`]: Strictly positive zoom factor. Zero is unrepresentable.
//! - [`OutputFormat`]: Container an operation encodes into.
//! - [`ReassemblyPolicy`]: What to do when the two resized halves disagree on width.
//! - [`ResizeParams`]: Source bytes, target dimensions, output format.
//! - [`SplitParams`]: Source bytes, split row, output format for both halves.
//! - [`ComposeParams`]: TOP and BOTTOM bytes, width policy, output format.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;

/// Zoom level in percent (100 = unchanged). Always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoomPercent(NonZeroU32);

impl ZoomPercent {
    pub fn new(value: u32) -> Option<Self> {
        NonZeroU32::new(value).map(Self)
    }

    pub fn value(self) -> u32 {
        self.0.get()
    }
}

impl TryFrom<i64> for ZoomPercent {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u32::try_from(value)
            .ok()
            .and_then(Self::new)
            .ok_or(value)
    }
}

impl fmt::Display for ZoomPercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Image container produced by an operation.
///
/// Halves travel to the workers as PNG and workers answer in PNG. The final
/// composed image goes to storage as BMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Bmp,
}

impl OutputFormat {
    /// Format used for everything crossing the resize RPC boundary.
    pub const TRANSPORT: OutputFormat = OutputFormat::Png;
    /// Format the storage sink persists.
    pub const STORAGE: OutputFormat = OutputFormat::Bmp;

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Bmp => "image/bmp",
        }
    }
}

impl From<OutputFormat> for image::ImageFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Png => image::ImageFormat::Png,
            OutputFormat::Bmp => image::ImageFormat::Bmp,
        }
    }
}

/// Policy for composing halves whose resized widths differ.
///
/// The two workers are independent deployments, so nothing guarantees they
/// resized with the same rounding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReassemblyPolicy {
    /// Fail the work item.
    #[default]
    Reject,
    /// Crop the wider half (keeping its left edge) to the narrower width.
    Crop,
}

/// Parameters for a resize.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeParams<'a> {
    pub source: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
}

/// Parameters for a row-wise split.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitParams<'a> {
    pub source: &'a [u8],
    /// First row of the bottom half.
    pub row: u32,
    pub format: OutputFormat,
}

/// Parameters for stacking TOP above BOTTOM.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeParams<'a> {
    pub top: &'a [u8],
    pub bottom: &'a [u8],
    pub policy: ReassemblyPolicy,
    pub format: OutputFormat,
}
