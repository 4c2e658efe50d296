//! Glyph tables for the three looks a cell can have: live ASCII, glitching,
//! and eroding towards black.

use crate::grid::Cell;

/// Dense to sparse; index grows with brightness.
pub const BRIGHTNESS_RAMP: &[u8] = b"@%#*+=-:. ";
pub const GLITCH_SYMBOLS: &[u8] = b"#$!?&%@/\\|<>";
pub const EROSION_SEQUENCE: &[u8] = b"+=-:. ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Glyph {
    pub symbol: u8,
    pub color: [u8; 3],
}

impl Glyph {
    pub const BLACK: Self = Self {
        symbol: b' ',
        color: [0, 0, 0],
    };

    pub fn gray(symbol: u8, brightness: f32) -> Self {
        let value = brightness.floor().clamp(0.0, 255.0) as u8;
        Self {
            symbol,
            color: [value, value, value],
        }
    }
}

/// Stage thresholds that pick between the glitch and erosion tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphStages {
    pub sequence_stage: u32,
    pub sequence_stage_offset: u32,
}

pub fn ramp_symbol(brightness: f32) -> u8 {
    let last = BRIGHTNESS_RAMP.len() - 1;
    let index = ((brightness / 255.0) * last as f32).floor();
    BRIGHTNESS_RAMP[(index.max(0.0) as usize).min(last)]
}

pub fn glitch_symbol(cell_index: usize, stage: u32) -> u8 {
    GLITCH_SYMBOLS[(cell_index + stage as usize) % GLITCH_SYMBOLS.len()]
}

pub fn erosion_symbol(stage: u32, offset: u32) -> u8 {
    let index = stage.saturating_sub(offset) as usize;
    EROSION_SEQUENCE[index.min(EROSION_SEQUENCE.len() - 1)]
}

/// `brightness` comes from the captured snapshot for infected cells and from
/// the live frame otherwise; the caller picks the source.
pub fn glyph_for_cell(cell: &Cell, cell_index: usize, brightness: f32, stages: GlyphStages) -> Glyph {
    if !cell.infected {
        return Glyph::gray(ramp_symbol(brightness), brightness);
    }
    if cell.blackened {
        return Glyph::BLACK;
    }
    if cell.stage >= stages.sequence_stage {
        Glyph::gray(
            erosion_symbol(cell.stage, stages.sequence_stage_offset),
            brightness,
        )
    } else {
        Glyph::gray(glitch_symbol(cell_index, cell.stage), brightness)
    }
}
