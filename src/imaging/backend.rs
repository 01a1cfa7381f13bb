//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the four operations the pipeline needs:
//! identify, split, resize, and compose. All of them work on encoded bytes in
//! memory; nothing touches the filesystem.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate.

use super::params::{ComposeParams, ResizeParams, SplitParams};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImagingError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
    #[error("cannot compose halves: TOP is {top_width}px wide, BOTTOM is {bottom_width}px wide")]
    WidthMismatch { top_width: u32, bottom_width: u32 },
}

impl ImagingError {
    /// Stable label carried in logs and worker error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ImagingError::InvalidRequest(_) => "invalid_request",
            ImagingError::Decode(_) => "image_decode",
            ImagingError::Encode(_) => "image_encode",
            ImagingError::WidthMismatch { .. } => "reassembly",
        }
    }
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image processing backends.
///
/// `Send + Sync` so one backend instance can be shared by every blocking task
/// the async services spawn.
pub trait ImageBackend: Send + Sync {
    /// Read dimensions from the image header.
    fn identify(&self, data: &[u8]) -> Result<Dimensions, ImagingError>;

    /// Cut an image at a row, returning (top, bottom) independently encoded.
    fn split(&self, params: &SplitParams) -> Result<(Vec<u8>, Vec<u8>), ImagingError>;

    /// Resample to exact dimensions with bilinear interpolation.
    fn resize(&self, params: &ResizeParams) -> Result<Vec<u8>, ImagingError>;

    /// Stack TOP above BOTTOM on one canvas.
    fn compose(&self, params: &ComposeParams) -> Result<(Vec<u8>, Dimensions), ImagingError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::imaging::params::{OutputFormat, ReassemblyPolicy};
    use std::sync::Mutex;

    /// Mock backend that records operations and returns canned results.
    #[derive(Default)]
    pub struct MockBackend {
        pub identify_results: Mutex<Vec<Dimensions>>,
        pub operations: Mutex<Vec<RecordedOp>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Identify(usize),
        Split {
            row: u32,
            format: OutputFormat,
        },
        Resize {
            width: u32,
            height: u32,
            format: OutputFormat,
        },
        Compose {
            policy: ReassemblyPolicy,
            format: OutputFormat,
        },
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_dimensions(dims: Vec<Dimensions>) -> Self {
            Self {
                identify_results: Mutex::new(dims),
                operations: Mutex::new(Vec::new()),
            }
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }
    }

    impl ImageBackend for MockBackend {
        fn identify(&self, data: &[u8]) -> Result<Dimensions, ImagingError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::Identify(data.len()));

            self.identify_results
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ImagingError::Decode("No mock dimensions".to_string()))
        }

        fn split(&self, params: &SplitParams) -> Result<(Vec<u8>, Vec<u8>), ImagingError> {
            self.operations.lock().unwrap().push(RecordedOp::Split {
                row: params.row,
                format: params.format,
            });
            Ok((b"top".to_vec(), b"bottom".to_vec()))
        }

        fn resize(&self, params: &ResizeParams) -> Result<Vec<u8>, ImagingError> {
            self.operations.lock().unwrap().push(RecordedOp::Resize {
                width: params.width,
                height: params.height,
                format: params.format,
            });
            Ok(b"resized".to_vec())
        }

        fn compose(&self, params: &ComposeParams) -> Result<(Vec<u8>, Dimensions), ImagingError> {
            self.operations.lock().unwrap().push(RecordedOp::Compose {
                policy: params.policy,
                format: params.format,
            });
            Ok((
                b"composed".to_vec(),
                Dimensions {
                    width: 1,
                    height: 2,
                },
            ))
        }
    }

    #[test]
    fn mock_records_identify() {
        let backend = MockBackend::with_dimensions(vec![Dimensions {
            width: 800,
            height: 600,
        }]);

        let result = backend.identify(b"12345").unwrap();
        assert_eq!(result.width, 800);
        assert_eq!(result.height, 600);

        let ops = backend.get_operations();
        assert_eq!(ops, vec![RecordedOp::Identify(5)]);
    }

    #[test]
    fn mock_identify_without_dimensions_is_decode_error() {
        let backend = MockBackend::new();
        assert!(matches!(
            backend.identify(b"x"),
            Err(ImagingError::Decode(_))
        ));
    }

    #[test]
    fn mock_records_resize() {
        let backend = MockBackend::new();

        backend
            .resize(&ResizeParams {
                source: b"img",
                width: 800,
                height: 600,
                format: OutputFormat::Png,
            })
            .unwrap();

        assert_eq!(
            backend.get_operations(),
            vec![RecordedOp::Resize {
                width: 800,
                height: 600,
                format: OutputFormat::Png,
            }]
        );
    }

    #[test]
    fn width_mismatch_message_names_both_widths() {
        let err = ImagingError::WidthMismatch {
            top_width: 8,
            bottom_width: 9,
        };
        let msg = err.to_string();
        assert!(msg.contains("TOP is 8px"));
        assert!(msg.contains("BOTTOM is 9px"));
    }

    #[test]
    fn error_kinds_are_stable_labels() {
        assert_eq!(ImagingError::InvalidRequest("x".into()).kind(), "invalid_request");
        assert_eq!(ImagingError::Decode("x".into()).kind(), "image_decode");
        assert_eq!(ImagingError::Encode("x".into()).kind(), "image_encode");
        let mismatch = ImagingError::WidthMismatch {
            top_width: 1,
            bottom_width: 2,
        };
        assert_eq!(mismatch.kind(), "reassembly");
    }
}
