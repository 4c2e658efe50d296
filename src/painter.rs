use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use fontdue::{Font, FontSettings};

#[derive(Debug, Clone)]
pub struct GlyphBitmap {
    pub width: usize,
    pub height: usize,
    pub bitmap: Vec<u8>,
}

/// Rasterizes single characters with a monospace font and alpha-blends them
/// into an RGBA buffer. Bitmaps are cached per character at the current size.
pub struct GlyphPainter {
    font: Font,
    font_size: f32,
    glyph_cache: HashMap<char, GlyphBitmap>,
}

impl GlyphPainter {
    pub fn from_bytes(font_bytes: Vec<u8>, font_size: f32) -> Result<Self> {
        let font = Font::from_bytes(font_bytes, FontSettings::default())
            .map_err(|error| anyhow!("failed to parse font: {error}"))?;
        Ok(Self {
            font,
            font_size,
            glyph_cache: HashMap::new(),
        })
    }

    pub fn from_path(font_path: &Path, font_size: f32) -> Result<Self> {
        let font_bytes = std::fs::read(font_path)
            .with_context(|| format!("failed to read font file {}", font_path.display()))?;
        Self::from_bytes(font_bytes, font_size)
            .with_context(|| format!("font {} is not usable", font_path.display()))
    }

    pub fn set_font_size(&mut self, font_size: f32) {
        if (self.font_size - font_size).abs() > f32::EPSILON {
            self.font_size = font_size;
            self.glyph_cache.clear();
        }
    }

    pub fn font_size(&self) -> f32 {
        self.font_size
    }

    fn bitmap_for(&mut self, character: char) -> &GlyphBitmap {
        let font = &self.font;
        let font_size = self.font_size;
        self.glyph_cache.entry(character).or_insert_with(|| {
            let (metrics, bitmap) = font.rasterize(character, font_size);
            GlyphBitmap {
                width: metrics.width,
                height: metrics.height,
                bitmap,
            }
        })
    }

    /// Draws `character` with its ink box centered on (`center_x`, `center_y`).
    pub fn draw_centered(
        &mut self,
        frame: &mut [u8],
        frame_width: u32,
        frame_height: u32,
        center_x: f32,
        center_y: f32,
        character: char,
        color: [u8; 4],
    ) -> Result<()> {
        let expected = frame_width as usize * frame_height as usize * 4;
        if frame.len() != expected {
            return Err(anyhow!(
                "frame buffer is {} bytes, expected {expected} for {frame_width}x{frame_height}",
                frame.len()
            ));
        }

        let glyph = self.bitmap_for(character);
        if glyph.width == 0 || glyph.height == 0 {
            return Ok(());
        }
        let x = (center_x - glyph.width as f32 / 2.0).round() as i32;
        let y = (center_y - glyph.height as f32 / 2.0).round() as i32;
        blend_glyph(frame, frame_width, frame_height, x, y, glyph, color);
        Ok(())
    }
}

pub fn blend_glyph(
    frame: &mut [u8],
    frame_width: u32,
    frame_height: u32,
    x: i32,
    y: i32,
    glyph: &GlyphBitmap,
    color: [u8; 4],
) {
    for row in 0..glyph.height {
        let py = y + row as i32;
        if py < 0 || py >= frame_height as i32 {
            continue;
        }

        for col in 0..glyph.width {
            let px = x + col as i32;
            if px < 0 || px >= frame_width as i32 {
                continue;
            }

            let mask = glyph.bitmap[row * glyph.width + col];
            if mask == 0 {
                continue;
            }

            let alpha = ((u16::from(mask) * u16::from(color[3])) / 255) as u8;
            let idx = ((py as u32 * frame_width + px as u32) * 4) as usize;
            blend_pixel(frame, idx, [color[0], color[1], color[2], alpha]);
        }
    }
}

pub fn blend_pixel(frame: &mut [u8], idx: usize, src: [u8; 4]) {
    let alpha = u16::from(src[3]);
    if alpha == 0 {
        return;
    }

    let inv_alpha = 255_u16.saturating_sub(alpha);

    for channel in 0..3 {
        let dst = u16::from(frame[idx + channel]);
        let src_c = u16::from(src[channel]);
        frame[idx + channel] = ((src_c * alpha + dst * inv_alpha + 127) / 255) as u8;
    }
    frame[idx + 3] = 255;
}
