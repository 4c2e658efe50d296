use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error_codes::{CodedError, INVALID_VIEWPORT};

pub const DEFAULT_GRID_COLUMNS: u32 = 140;
pub const DEFAULT_MIN_CELL_PX: u32 = 12;
pub const DEFAULT_MAX_CELLS: u32 = 10_000;

const NEIGHBOR_OFFSETS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// How a viewport in pixels maps onto a glyph grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridConfig {
    /// Upper bound on grid columns.
    pub columns: u32,
    /// Narrowest cell, in viewport pixels, before columns are reduced.
    pub min_cell_px: u32,
    /// Total cell cap; wide viewports shrink the grid to stay under it.
    pub max_cells: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            columns: DEFAULT_GRID_COLUMNS,
            min_cell_px: DEFAULT_MIN_CELL_PX,
            max_cells: DEFAULT_MAX_CELLS,
        }
    }
}

impl GridConfig {
    pub fn validate(&self) -> Result<()> {
        if self.columns == 0 || self.min_cell_px == 0 || self.max_cells == 0 {
            return Err(anyhow!(CodedError::usage(
                crate::error_codes::INVALID_CONFIG,
                "grid.columns, grid.min_cell_px and grid.max_cells must be greater than zero",
            )
            .with_details(json!({
                "columns": self.columns,
                "min_cell_px": self.min_cell_px,
                "max_cells": self.max_cells,
            }))));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridDims {
    pub columns: u32,
    pub rows: u32,
}

impl GridDims {
    pub fn new(columns: u32, rows: u32) -> Result<Self> {
        if columns == 0 || rows == 0 {
            return Err(invalid_viewport(
                format!("grid must be at least 1x1, got {columns}x{rows}"),
                json!({ "columns": columns, "rows": rows }),
            ));
        }
        Ok(Self { columns, rows })
    }

    /// Fixed column count; rows follow the viewport aspect ratio:
    /// rows = floor(columns / aspect_ratio).
    pub fn from_aspect(columns: u32, aspect_ratio: f64) -> Result<Self> {
        if !aspect_ratio.is_finite() || aspect_ratio <= 0.0 {
            return Err(invalid_viewport(
                format!("aspect ratio must be a positive number, got {aspect_ratio}"),
                json!({ "aspect_ratio": aspect_ratio }),
            ));
        }
        let rows = (f64::from(columns) / aspect_ratio).floor() as u32;
        Self::new(columns, rows)
    }

    pub fn for_viewport(width_px: u32, height_px: u32, config: &GridConfig) -> Result<Self> {
        if width_px == 0 || height_px == 0 {
            return Err(invalid_viewport(
                format!("viewport must be non-empty, got {width_px}x{height_px}"),
                json!({ "width": width_px, "height": height_px }),
            ));
        }
        config.validate()?;

        let aspect = f64::from(width_px) / f64::from(height_px);
        let mut columns = config.columns.min(width_px / config.min_cell_px);
        let mut rows = (f64::from(columns) / aspect).floor() as u32;

        if u64::from(columns) * u64::from(rows) > u64::from(config.max_cells) {
            columns = (f64::from(config.max_cells) * aspect).sqrt().floor() as u32;
            rows = (f64::from(columns) / aspect).floor() as u32;
        }

        Self::new(columns, rows)
    }

    pub fn cell_count(self) -> usize {
        self.columns as usize * self.rows as usize
    }
}

fn invalid_viewport(message: String, details: serde_json::Value) -> anyhow::Error {
    anyhow!(CodedError::usage(INVALID_VIEWPORT, message).with_details(details))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    pub infected: bool,
    pub stage: u32,
    pub blackened: bool,
    pub speed: f32,
    pub last_advanced_tick: u32,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            infected: false,
            stage: 0,
            blackened: false,
            speed: 1.0,
            last_advanced_tick: 0,
        }
    }
}

impl Cell {
    pub fn infect(&mut self, speed: f32, tick: u32) {
        debug_assert!(!self.infected, "speed is fixed once a cell is infected");
        self.infected = true;
        self.speed = speed;
        self.last_advanced_tick = tick;
    }

    /// One erosion step; blackens once `stage` reaches `blackened_stage`.
    pub fn advance(&mut self, tick: u32, blackened_stage: u32) {
        if self.blackened {
            return;
        }
        self.stage += 1;
        self.last_advanced_tick = tick;
        if self.stage >= blackened_stage {
            self.blackened = true;
        }
    }

    pub fn is_eroding(&self) -> bool {
        self.infected && !self.blackened
    }

    fn clear_infection(&mut self) {
        self.infected = false;
        self.stage = 0;
        self.blackened = false;
    }
}

#[derive(Debug, Clone)]
pub struct Grid {
    dims: GridDims,
    cells: Vec<Cell>,
}

impl Grid {
    pub fn new(dims: GridDims) -> Self {
        Self {
            dims,
            cells: vec![Cell::default(); dims.cell_count()],
        }
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    pub fn cell_mut(&mut self, index: usize) -> Option<&mut Cell> {
        self.cells.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn index_of(&self, column: u32, row: u32) -> Option<usize> {
        if column >= self.dims.columns || row >= self.dims.rows {
            return None;
        }
        Some(row as usize * self.dims.columns as usize + column as usize)
    }

    pub fn position_of(&self, index: usize) -> (u32, u32) {
        let columns = self.dims.columns as usize;
        ((index % columns) as u32, (index / columns) as u32)
    }

    /// In-bounds 8-neighborhood of `index`, no wrapping at the edges.
    pub fn neighbors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        let (column, row) = self.position_of(index);
        NEIGHBOR_OFFSETS.iter().filter_map(move |&(dx, dy)| {
            let x = i64::from(column) + dx;
            let y = i64::from(row) + dy;
            if x < 0 || y < 0 {
                return None;
            }
            self.index_of(x as u32, y as u32)
        })
    }

    /// Changes dimensions only; surviving cells keep their state by index.
    pub fn resize(&mut self, dims: GridDims) {
        self.dims = dims;
        self.cells.resize(dims.cell_count(), Cell::default());
    }

    /// Clears infection state in place for a new cycle.
    pub fn reset(&mut self) {
        for cell in &mut self.cells {
            cell.clear_infection();
        }
    }

    pub fn infected_count(&self) -> usize {
        self.cells.iter().filter(|cell| cell.infected).count()
    }

    pub fn blackened_count(&self) -> usize {
        self.cells.iter().filter(|cell| cell.blackened).count()
    }
}
