//! Crop and JPEG-encode detected regions
//!
//! Crop coordinates are clamped to valid pixel ranges before slicing, so an
//! out-of-frame box from the detector can never cause an out-of-bounds read.

use crate::error::{Error, Result};
use crate::vision::capture::Frame;
use crate::vision::detect::BoundingBox;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

/// JPEG quality for detection crops
const JPEG_QUALITY: u8 = 85;

/// Clamp a bounding box to frame bounds, returning (x, y, width, height).
/// Returns None when the clamped region is empty.
pub fn clamp_region(bbox: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let x1 = bbox.x1.clamp(0, width as i32) as u32;
    let y1 = bbox.y1.clamp(0, height as i32) as u32;
    let x2 = bbox.x2.clamp(0, width as i32) as u32;
    let y2 = bbox.y2.clamp(0, height as i32) as u32;

    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some((x1, y1, x2 - x1, y2 - y1))
}

/// Crop the frame to the (clamped) bounding box and encode it as a
/// base64 JPEG string.
pub fn crop_to_jpeg_base64(frame: &Frame, bbox: &BoundingBox) -> Result<String> {
    let (x, y, w, h) = clamp_region(bbox, frame.width, frame.height)
        .ok_or_else(|| Error::Internal(format!("empty crop region: {:?}", bbox)))?;

    let img = RgbImage::from_raw(frame.width, frame.height, frame.pixels.clone())
        .ok_or_else(|| Error::Internal("frame buffer size mismatch".to_string()))?;

    let crop = image::imageops::crop_imm(&img, x, y, w, h).to_image();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode(crop.as_raw(), w, h, image::ColorType::Rgb8)
        .map_err(|e| Error::Internal(format!("JPEG encode failed: {}", e)))?;

    Ok(base64::engine::general_purpose::STANDARD.encode(jpeg))
}
