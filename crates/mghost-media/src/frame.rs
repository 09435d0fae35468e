//! Planar luma/chroma frames.
//!
//! Backends exchange packed RGB24 with their containers; the watermark
//! primitive works on a perceptual colour space, so frames are converted
//! to full-range BT.601 Y/Cb/Cr planes at the boundary.

use crate::error::{MediaError, MediaResult};

/// A decoded frame in planar Y/Cb/Cr (full range, 0..=255 scale).
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    /// Luma plane, row-major
    pub y: Vec<f32>,
    /// Blue-difference chroma plane, row-major
    pub u: Vec<f32>,
    /// Red-difference chroma plane, row-major
    pub v: Vec<f32>,
}

impl Frame {
    /// Uniform frame with the given luma and neutral chroma.
    pub fn filled(width: u32, height: u32, luma: f32) -> Self {
        let n = (width as usize) * (height as usize);
        Self {
            width,
            height,
            y: vec![luma; n],
            u: vec![128.0; n],
            v: vec![128.0; n],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Size in bytes of this frame as packed RGB24.
    pub fn rgb24_len(width: u32, height: u32) -> usize {
        (width as usize) * (height as usize) * 3
    }

    /// Convert packed RGB24 into planar Y/Cb/Cr.
    pub fn from_rgb24(width: u32, height: u32, data: &[u8]) -> MediaResult<Self> {
        let expected = Self::rgb24_len(width, height);
        if data.len() != expected {
            return Err(MediaError::InvalidVideo(format!(
                "frame buffer is {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }

        let n = (width as usize) * (height as usize);
        let mut y = Vec::with_capacity(n);
        let mut u = Vec::with_capacity(n);
        let mut v = Vec::with_capacity(n);

        for px in data.chunks_exact(3) {
            let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
            y.push(0.299 * r + 0.587 * g + 0.114 * b);
            u.push(128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b);
            v.push(128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b);
        }

        Ok(Self {
            width,
            height,
            y,
            u,
            v,
        })
    }

    /// Convert back to packed RGB24, clamping to the displayable range.
    pub fn to_rgb24(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixel_count() * 3);
        for i in 0..self.pixel_count() {
            let (y, cb, cr) = (self.y[i], self.u[i] - 128.0, self.v[i] - 128.0);
            out.push(clamp_u8(y + 1.402 * cr));
            out.push(clamp_u8(y - 0.344_136 * cb - 0.714_136 * cr));
            out.push(clamp_u8(y + 1.772 * cb));
        }
        out
    }

    /// Mean luma of the frame.
    pub fn mean_luma(&self) -> f32 {
        if self.y.is_empty() {
            return 0.0;
        }
        self.y.iter().sum::<f32>() / self.y.len() as f32
    }
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
