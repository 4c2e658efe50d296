use std::fmt::Write as _;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tiny_skia::{Color, Pixmap};

use crate::error_codes::CodedError;
use crate::glyphs::Glyph;
use crate::grid::GridDims;
use crate::painter::GlyphPainter;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0001_0000_01b3;

/// Where the animator draws. Every frame starts with `begin_frame`, which
/// clears to black, followed by one `draw_glyph` per cell.
pub trait RenderTarget {
    fn begin_frame(&mut self, dims: GridDims) -> Result<()>;
    fn draw_glyph(&mut self, column: u32, row: u32, glyph: Glyph) -> Result<()>;
    fn fill_black(&mut self) -> Result<()>;
}

impl<T: RenderTarget + ?Sized> RenderTarget for &mut T {
    fn begin_frame(&mut self, dims: GridDims) -> Result<()> {
        (**self).begin_frame(dims)
    }

    fn draw_glyph(&mut self, column: u32, row: u32, glyph: Glyph) -> Result<()> {
        (**self).draw_glyph(column, row, glyph)
    }

    fn fill_black(&mut self) -> Result<()> {
        (**self).fill_black()
    }
}

/// `None` accepts and discards every call.
impl<T: RenderTarget> RenderTarget for Option<T> {
    fn begin_frame(&mut self, dims: GridDims) -> Result<()> {
        self.as_mut().map_or(Ok(()), |target| target.begin_frame(dims))
    }

    fn draw_glyph(&mut self, column: u32, row: u32, glyph: Glyph) -> Result<()> {
        self.as_mut()
            .map_or(Ok(()), |target| target.draw_glyph(column, row, glyph))
    }

    fn fill_black(&mut self) -> Result<()> {
        self.as_mut().map_or(Ok(()), |target| target.fill_black())
    }
}

/// Forwards every call to both targets, first `.0` then `.1`.
pub struct TeeSurface<A, B>(pub A, pub B);

impl<A: RenderTarget, B: RenderTarget> RenderTarget for TeeSurface<A, B> {
    fn begin_frame(&mut self, dims: GridDims) -> Result<()> {
        self.0.begin_frame(dims)?;
        self.1.begin_frame(dims)
    }

    fn draw_glyph(&mut self, column: u32, row: u32, glyph: Glyph) -> Result<()> {
        self.0.draw_glyph(column, row, glyph)?;
        self.1.draw_glyph(column, row, glyph)
    }

    fn fill_black(&mut self) -> Result<()> {
        self.0.fill_black()?;
        self.1.fill_black()
    }
}

pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Glyph grid kept in memory; the text preview and the determinism hashes
/// both read from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextSurface {
    columns: u32,
    rows: u32,
    cells: Vec<Glyph>,
}

impl TextSurface {
    pub fn new(dims: GridDims) -> Self {
        Self {
            columns: dims.columns,
            rows: dims.rows,
            cells: vec![Glyph::BLACK; dims.cell_count()],
        }
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn glyph(&self, column: u32, row: u32) -> Option<Glyph> {
        if column >= self.columns || row >= self.rows {
            return None;
        }
        self.cells
            .get(row as usize * self.columns as usize + column as usize)
            .copied()
    }

    pub fn glyphs(&self) -> &[Glyph] {
        &self.cells
    }

    pub fn is_solid_black(&self) -> bool {
        self.cells.iter().all(|glyph| *glyph == Glyph::BLACK)
    }

    pub fn to_text(&self) -> String {
        let mut text = String::with_capacity(self.cells.len() + self.rows as usize);
        for line in self.cells.chunks(self.columns.max(1) as usize) {
            text.extend(line.iter().map(|glyph| char::from(glyph.symbol)));
            text.push('\n');
        }
        text
    }

    /// 24-bit colored rendition for terminals, one escape per color change.
    pub fn to_ansi(&self) -> String {
        let mut out = String::with_capacity(self.cells.len() * 4);
        for line in self.cells.chunks(self.columns.max(1) as usize) {
            let mut current = None;
            for glyph in line {
                if current != Some(glyph.color) {
                    let [r, g, b] = glyph.color;
                    let _ = write!(out, "\x1B[38;2;{r};{g};{b}m");
                    current = Some(glyph.color);
                }
                out.push(char::from(glyph.symbol));
            }
            out.push_str("\x1B[0m\n");
        }
        out
    }

    pub fn frame_hash(&self) -> u64 {
        let mut bytes = Vec::with_capacity(self.cells.len() * 4);
        for glyph in &self.cells {
            bytes.push(glyph.symbol);
            bytes.extend_from_slice(&glyph.color);
        }
        fnv1a64(&bytes)
    }
}

impl RenderTarget for TextSurface {
    fn begin_frame(&mut self, dims: GridDims) -> Result<()> {
        self.columns = dims.columns;
        self.rows = dims.rows;
        self.cells.clear();
        self.cells.resize(dims.cell_count(), Glyph::BLACK);
        Ok(())
    }

    fn draw_glyph(&mut self, column: u32, row: u32, glyph: Glyph) -> Result<()> {
        if column >= self.columns || row >= self.rows {
            return Err(anyhow!(CodedError::render(format!(
                "cell ({column}, {row}) outside {}x{} text surface",
                self.columns, self.rows
            ))));
        }
        let index = row as usize * self.columns as usize + column as usize;
        self.cells[index] = glyph;
        Ok(())
    }

    fn fill_black(&mut self) -> Result<()> {
        self.cells.fill(Glyph::BLACK);
        Ok(())
    }
}

/// Pixel output: a fixed-size canvas split into `columns x rows` cells, each
/// glyph drawn centered in its cell.
pub struct PixmapSurface {
    pixmap: Pixmap,
    painter: GlyphPainter,
    dims: Option<GridDims>,
    cell_width: f32,
    cell_height: f32,
}

impl PixmapSurface {
    pub fn new(width: u32, height: u32, painter: GlyphPainter) -> Result<Self> {
        let mut pixmap = Pixmap::new(width, height)
            .ok_or_else(|| anyhow!("failed to allocate {width}x{height} pixmap"))?;
        pixmap.fill(Color::BLACK);
        Ok(Self {
            pixmap,
            painter,
            dims: None,
            cell_width: 0.0,
            cell_height: 0.0,
        })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Straight RGBA; every pixel is opaque so no un-premultiply is needed.
    pub fn rgba(&self) -> Vec<u8> {
        self.pixmap.data().to_vec()
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.pixmap
            .save_png(path)
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

impl RenderTarget for PixmapSurface {
    fn begin_frame(&mut self, dims: GridDims) -> Result<()> {
        if self.dims != Some(dims) {
            self.cell_width = self.pixmap.width() as f32 / dims.columns as f32;
            self.cell_height = self.pixmap.height() as f32 / dims.rows as f32;
            let font_size = (self.cell_width.min(self.cell_height) * 1.2).floor().max(1.0);
            self.painter.set_font_size(font_size);
            self.dims = Some(dims);
        }
        self.pixmap.fill(Color::BLACK);
        Ok(())
    }

    fn draw_glyph(&mut self, column: u32, row: u32, glyph: Glyph) -> Result<()> {
        if glyph.symbol == b' ' {
            return Ok(());
        }
        let center_x = (column as f32 + 0.5) * self.cell_width;
        let center_y = (row as f32 + 0.5) * self.cell_height;
        let [r, g, b] = glyph.color;
        let (width, height) = (self.pixmap.width(), self.pixmap.height());
        self.painter.draw_centered(
            self.pixmap.data_mut(),
            width,
            height,
            center_x,
            center_y,
            char::from(glyph.symbol),
            [r, g, b, 255],
        )
    }

    fn fill_black(&mut self) -> Result<()> {
        self.pixmap.fill(Color::BLACK);
        Ok(())
    }
}
