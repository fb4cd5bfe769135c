//! Owned RGBA pixel buffers.
//!
//! A [`Raster`] is decoded once and never mutated in place; crops, masks and
//! thumbnails all produce new buffers.

use base64::Engine;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbaImage};
use pagelens_core::{Error, Result};
use std::io::Cursor;

/// Opaque RGBA8 pixel buffer with its dimensions.
#[derive(Debug, Clone)]
pub struct Raster {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Raster {
    /// Wrap an RGBA8 buffer. Length must be exactly `width * height * 4`.
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(Error::Comparison(format!(
                "RGBA buffer length {} does not match {}x{} ({} bytes)",
                pixels.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self { width, height, pixels })
    }

    /// Decode an encoded image (PNG/JPEG) into an RGBA raster.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| Error::Comparison(format!("image decode failed: {}", e)))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }

    /// Decode a base64-encoded image payload (CDP screenshot data).
    pub fn from_base64(data: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::Capture(format!("base64 decode failed: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn total_pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// RGBA channels of the pixel at (x, y). Caller guarantees in-bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.pixels[idx],
            self.pixels[idx + 1],
            self.pixels[idx + 2],
            self.pixels[idx + 3],
        ]
    }

    /// Copy out a sub-rectangle, clipped to the raster extent.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Self> {
        if x >= self.width || y >= self.height {
            return Err(Error::Comparison(format!(
                "crop origin ({}, {}) outside {}x{} raster",
                x, y, self.width, self.height
            )));
        }
        let w = width.min(self.width - x);
        let h = height.min(self.height - y);
        let mut out = Vec::with_capacity(w as usize * h as usize * 4);
        for row in y..y + h {
            let start = (row as usize * self.width as usize + x as usize) * 4;
            out.extend_from_slice(&self.pixels[start..start + w as usize * 4]);
        }
        Self::from_rgba8(w, h, out)
    }

    /// Downscale so the longest edge is at most `max_edge`, preserving aspect.
    /// Returns a clone if already within bounds.
    pub fn thumbnail(&self, max_edge: u32) -> Result<Self> {
        let longest = self.width.max(self.height);
        if longest <= max_edge {
            return Ok(self.clone());
        }
        let scale = max_edge as f64 / longest as f64;
        let w = ((self.width as f64 * scale).round() as u32).max(1);
        let h = ((self.height as f64 * scale).round() as u32).max(1);
        let img = RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| Error::Comparison("raster buffer corrupt".into()))?;
        let resized = DynamicImage::ImageRgba8(img).resize_exact(w, h, FilterType::Triangle);
        let rgba = resized.to_rgba8();
        Ok(Self {
            width: w,
            height: h,
            pixels: rgba.into_raw(),
        })
    }

    /// Encode to PNG bytes.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let img = RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| Error::Comparison("raster buffer corrupt".into()))?;
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| Error::Comparison(format!("png encode failed: {}", e)))?;
        Ok(buf.into_inner())
    }

    /// Encode to PNG and base64 for embedding in a JSON report.
    pub fn to_png_base64(&self) -> Result<String> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.to_png_bytes()?))
    }
}
