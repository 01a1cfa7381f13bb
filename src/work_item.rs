//! Work message codec.
//!
//! A work message is a single line of text with two `;`-separated fields:
//!
//! ```text
//! Image=<standard base64 of the image bytes>;Zoom=<decimal percent>
//! ```
//!
//! Standard base64 never produces `;`, so the separator needs no escaping.
//! Every way a payload can be wrong collapses into one [`WorkItemError`]; the
//! consumer drops the message and logs the reason.

use crate::imaging::ZoomPercent;
use crate::types::WorkItem;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use thiserror::Error;

const FIELD_SEPARATOR: char = ';';
const IMAGE_PREFIX: &str = "Image=";
const ZOOM_PREFIX: &str = "Zoom=";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkItemError {
    #[error("expected 2 fields separated by ';', found {0}")]
    FieldCount(usize),
    #[error("first field does not start with 'Image='")]
    MissingImage,
    #[error("second field does not start with 'Zoom='")]
    MissingZoom,
    #[error("zoom '{0}' is not a decimal integer")]
    ZoomNotNumeric(String),
    #[error("zoom must be strictly positive")]
    ZoomNotPositive,
    #[error("image field is not valid base64: {0}")]
    ImageEncoding(String),
    #[error("image field decodes to zero bytes")]
    EmptyImage,
}

/// Decode and validate a raw work message.
pub fn decode(payload: &str) -> Result<WorkItem, WorkItemError> {
    let fields: Vec<&str> = payload.trim().split(FIELD_SEPARATOR).collect();
    let [image_field, zoom_field] = fields.as_slice() else {
        return Err(WorkItemError::FieldCount(fields.len()));
    };

    let encoded = image_field
        .strip_prefix(IMAGE_PREFIX)
        .ok_or(WorkItemError::MissingImage)?;
    let zoom_text = zoom_field
        .strip_prefix(ZOOM_PREFIX)
        .ok_or(WorkItemError::MissingZoom)?;

    let zoom = parse_zoom(zoom_text)?;

    let image = STANDARD
        .decode(encoded)
        .map_err(|e| WorkItemError::ImageEncoding(e.to_string()))?;
    if image.is_empty() {
        return Err(WorkItemError::EmptyImage);
    }

    Ok(WorkItem {
        image: Bytes::from(image),
        zoom,
    })
}

fn parse_zoom(text: &str) -> Result<ZoomPercent, WorkItemError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(WorkItemError::ZoomNotNumeric(text.to_string()));
    }
    let value: u32 = text
        .parse()
        .map_err(|_| WorkItemError::ZoomNotNumeric(text.to_string()))?;
    ZoomPercent::new(value).ok_or(WorkItemError::ZoomNotPositive)
}

/// Encode an image and zoom into the work message format.
pub fn encode(image: &[u8], zoom: ZoomPercent) -> String {
    format!(
        "{IMAGE_PREFIX}{}{FIELD_SEPARATOR}{ZOOM_PREFIX}{}",
        STANDARD.encode(image),
        zoom.value()
    )
}
