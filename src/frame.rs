use anyhow::{anyhow, Result};
use serde_json::json;

use crate::error_codes::{CodedError, FRAME_SIZE_MISMATCH};
use crate::grid::GridDims;

const RGBA_CHANNELS: usize = 4;

/// One rasterized source image, one pixel per grid cell, RGBA8 row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFrame {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl SourceFrame {
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * RGBA_CHANNELS;
        if rgba.len() != expected {
            return Err(anyhow!(CodedError::usage(
                FRAME_SIZE_MISMATCH,
                format!(
                    "rgba buffer for {width}x{height} frame must be {expected} bytes, got {}",
                    rgba.len()
                ),
            )
            .with_details(json!({
                "width": width,
                "height": height,
                "expected_bytes": expected,
                "actual_bytes": rgba.len(),
            }))));
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixel = [rgb[0], rgb[1], rgb[2], 255];
        let rgba = pixel
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * RGBA_CHANNELS)
            .collect();
        Self {
            width,
            height,
            rgba,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn matches(&self, dims: GridDims) -> bool {
        self.width == dims.columns && self.height == dims.rows
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    pub fn rgb_at(&self, index: usize) -> Option<[u8; 3]> {
        let offset = index.checked_mul(RGBA_CHANNELS)?;
        let pixel = self.rgba.get(offset..offset + 3)?;
        Some([pixel[0], pixel[1], pixel[2]])
    }

    /// Plain channel average, not BT.709 luma.
    pub fn brightness_at(&self, index: usize) -> Option<f32> {
        self.rgb_at(index).map(brightness)
    }
}

pub fn brightness(rgb: [u8; 3]) -> f32 {
    (f32::from(rgb[0]) + f32::from(rgb[1]) + f32::from(rgb[2])) / 3.0
}

/// Fails with `FRAME_SIZE_MISMATCH` when `frame` was rasterized for another grid.
pub fn ensure_frame_matches(frame: &SourceFrame, dims: GridDims) -> Result<()> {
    if frame.matches(dims) {
        return Ok(());
    }
    Err(anyhow!(CodedError::usage(
        FRAME_SIZE_MISMATCH,
        format!(
            "frame is {}x{} but grid is {}x{}",
            frame.width, frame.height, dims.columns, dims.rows
        ),
    )
    .with_details(json!({
        "frame": { "width": frame.width, "height": frame.height },
        "grid": { "columns": dims.columns, "rows": dims.rows },
    }))))
}

#[cfg(test)]
mod tests {
    use super::{brightness, ensure_frame_matches, SourceFrame};
    use crate::error_codes::{find_coded_error, FRAME_SIZE_MISMATCH};
    use crate::grid::GridDims;

    #[test]
    fn short_buffer_is_rejected() {
        let error = SourceFrame::from_rgba(2, 2, vec![0; 15]).unwrap_err();
        assert_eq!(
            find_coded_error(&error).map(|coded| coded.code),
            Some(FRAME_SIZE_MISMATCH)
        );
    }

    #[test]
    fn pixel_lookup_reads_rgb_and_skips_alpha() {
        let frame = SourceFrame::from_rgba(2, 1, vec![10, 20, 30, 255, 90, 120, 150, 0])
            .expect("frame should build");
        assert_eq!(frame.rgb_at(1), Some([90, 120, 150]));
        assert_eq!(frame.brightness_at(0), Some(20.0));
        assert_eq!(frame.rgb_at(2), None);
    }

    #[test]
    fn solid_frame_fills_every_pixel() {
        let frame = SourceFrame::solid(3, 2, [255, 255, 255]);
        assert_eq!(frame.rgba().len(), 24);
        assert!((0..6).all(|index| frame.rgb_at(index) == Some([255, 255, 255])));
        assert_eq!(brightness([255, 255, 255]), 255.0);
    }

    #[test]
    fn mismatched_frame_is_reported() {
        let frame = SourceFrame::solid(4, 4, [0, 0, 0]);
        let dims = GridDims::new(4, 3).expect("dims");
        assert!(ensure_frame_matches(&frame, dims).is_err());
        assert!(ensure_frame_matches(&frame, GridDims::new(4, 4).expect("dims")).is_ok());
    }
}
