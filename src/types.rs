//! Shared types passed between pipeline stages.
//!
//! A [`WorkItem`] is decoded from a broker message, split into two
//! [`ImageHalf`]s, each half comes back from a worker as a [`ResizeResult`],
//! and the pair is composed into an [`AssembledImage`]. Once the storage sink
//! hands back a [`ContentId`], a [`CompletionEvent`] is published.

use crate::imaging::ZoomPercent;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which vertical half of an image a partition or result represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Top,
    Bottom,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Top => "top",
            Role::Bottom => "bottom",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Top => "TOP",
            Role::Bottom => "BOTTOM",
        })
    }
}

/// One decoded request to zoom one image by one percentage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub image: Bytes,
    pub zoom: ZoomPercent,
}

/// A re-encoded vertical slice of a work item's image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHalf {
    pub bytes: Bytes,
    pub role: Role,
    /// Rows of the source image this half covers.
    pub rows: u32,
}

/// Bytes returned by a resize worker for one half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeResult {
    pub bytes: Bytes,
    pub role: Role,
}

/// The recomposed image, encoded in the storage format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledImage {
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Identifier the storage sink assigns to a persisted image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(pub i64);

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompletionStatus {
    Success,
}

/// Published once per successfully stored image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub content_id: ContentId,
    pub status: CompletionStatus,
}

impl CompletionEvent {
    pub fn success(content_id: ContentId) -> Self {
        Self {
            content_id,
            status: CompletionStatus::Success,
        }
    }

    /// Text pushed to subscribers: the bare content identifier.
    pub fn push_text(&self) -> String {
        self.content_id.to_string()
    }
}
