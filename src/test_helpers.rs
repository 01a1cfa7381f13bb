//! Shared test utilities.
//!
//! Synthetic images are built in memory, so no fixture files are needed.
//! Servers bind `127.0.0.1:0` and run on a background task for the rest of
//! the test.
//!
//! # Usage
//!
//! ```ignore
//! use crate::test_helpers::*;
//!
//! let png = striped_png(4, 4);
//! let addr = spawn_router(router).await;
//! assert_eq!(image_dimensions(&png), (4, 4));
//! ```

use axum::Router;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::net::SocketAddr;
use tokio::net::TcpListener;

// =========================================================================
// Synthetic images
// =========================================================================

fn encode_png(img: RgbaImage) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// PNG where every pixel is `(200, 50, 50, 255)`.
pub fn solid_png(width: u32, height: u32) -> Vec<u8> {
    encode_png(RgbaImage::from_pixel(width, height, Rgba([200, 50, 50, 255])))
}

/// PNG where row `y` has red channel `y * 10`, so rows are distinguishable.
pub fn striped_png(width: u32, height: u32) -> Vec<u8> {
    encode_png(RgbaImage::from_fn(width, height, |_, y| {
        Rgba([(y * 10) as u8, 0, 0, 255])
    }))
}

/// Decode any supported container and return `(width, height)`.
pub fn image_dimensions(bytes: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(bytes).unwrap();
    (img.width(), img.height())
}

// =========================================================================
// Servers
// =========================================================================

/// Serve `router` on an ephemeral port and return its address.
pub async fn spawn_router(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}
