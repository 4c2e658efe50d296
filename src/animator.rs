//! Grid infection animator.
//!
//! A cycle starts with a band of infected cells along the four edges of the
//! grid. Each tick, infected cells spread to their neighbors (for the first
//! `spread_until_tick` ticks) and advance their erosion stage until they turn
//! solid black. The animator reports completion once per cycle, keeps
//! rendering until `cycle_end_tick`, then wipes the surface and returns to
//! idle.
//!
//! The state is an explicit value owned by the host; randomness is passed in
//! on every call so a seeded RNG reproduces a cycle exactly.

use anyhow::{anyhow, Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error_codes::{CodedError, INVALID_CONFIG};
use crate::frame::{ensure_frame_matches, SourceFrame};
use crate::glyphs::{glyph_for_cell, Glyph, GlyphStages};
use crate::grid::{Grid, GridDims};
use crate::surface::RenderTarget;

const PROGRESS_LOG_INTERVAL: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrideStep {
    pub from_tick: u32,
    pub stride: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnimatorConfig {
    pub seed_count: u32,
    pub edge_band_depth: u32,
    pub spread_until_tick: u32,
    pub late_spread_after_tick: u32,
    pub early_spread_probability: f64,
    pub late_spread_probability: f64,
    pub speed_min: f32,
    pub speed_max: f32,
    pub base_ticks_per_stage: f32,
    pub stall_failsafe_ticks: u32,
    pub blackened_stage: u32,
    pub sequence_stage: u32,
    pub sequence_stage_offset: u32,
    pub completion_ratio: f64,
    pub completion_deadline_tick: u32,
    pub cycle_end_tick: u32,
    pub wipe_hold_ticks: u32,
    pub stride_schedule: Vec<StrideStep>,
}

impl Default for AnimatorConfig {
    fn default() -> Self {
        Self {
            seed_count: 100,
            edge_band_depth: 2,
            spread_until_tick: 120,
            late_spread_after_tick: 100,
            early_spread_probability: 0.4,
            late_spread_probability: 0.8,
            speed_min: 0.7,
            speed_max: 1.3,
            base_ticks_per_stage: 2.0,
            stall_failsafe_ticks: 20,
            blackened_stage: 13,
            sequence_stage: 5,
            sequence_stage_offset: 3,
            completion_ratio: 0.99,
            completion_deadline_tick: 150,
            cycle_end_tick: 200,
            wipe_hold_ticks: 12,
            stride_schedule: vec![
                StrideStep {
                    from_tick: 0,
                    stride: 1,
                },
                StrideStep {
                    from_tick: 30,
                    stride: 2,
                },
                StrideStep {
                    from_tick: 60,
                    stride: 3,
                },
            ],
        }
    }
}

impl AnimatorConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("early_spread_probability", self.early_spread_probability),
            ("late_spread_probability", self.late_spread_probability),
            ("completion_ratio", self.completion_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid_config(
                    format!("animator.{name} must be within [0, 1], got {value}"),
                    json!({ name: value }),
                ));
            }
        }

        if !(self.speed_min.is_finite()
            && self.speed_max.is_finite()
            && self.speed_min > 0.0
            && self.speed_min < self.speed_max)
        {
            return Err(invalid_config(
                format!(
                    "animator speed range must be finite with 0 < speed_min < speed_max, got [{}, {})",
                    self.speed_min, self.speed_max
                ),
                json!({ "speed_min": self.speed_min, "speed_max": self.speed_max }),
            ));
        }

        if !(self.base_ticks_per_stage.is_finite() && self.base_ticks_per_stage > 0.0) {
            return Err(invalid_config(
                "animator.base_ticks_per_stage must be finite and greater than zero".to_owned(),
                json!({ "base_ticks_per_stage": self.base_ticks_per_stage }),
            ));
        }

        if self.blackened_stage == 0 || self.edge_band_depth == 0 {
            return Err(invalid_config(
                "animator.blackened_stage and animator.edge_band_depth must be greater than zero"
                    .to_owned(),
                json!({
                    "blackened_stage": self.blackened_stage,
                    "edge_band_depth": self.edge_band_depth,
                }),
            ));
        }

        match self.stride_schedule.first() {
            Some(first) if first.from_tick == 0 => {}
            _ => {
                return Err(invalid_config(
                    "animator.stride_schedule must start at tick 0".to_owned(),
                    json!({ "stride_schedule": self.stride_schedule }),
                ))
            }
        }
        if self.stride_schedule.iter().any(|step| step.stride == 0)
            || self
                .stride_schedule
                .windows(2)
                .any(|pair| pair[0].from_tick >= pair[1].from_tick)
        {
            return Err(invalid_config(
                "animator.stride_schedule needs strides >= 1 in strictly increasing tick order"
                    .to_owned(),
                json!({ "stride_schedule": self.stride_schedule }),
            ));
        }

        Ok(())
    }

    pub fn stride_for(&self, tick: u32) -> u32 {
        self.stride_schedule
            .iter()
            .take_while(|step| step.from_tick <= tick)
            .last()
            .map_or(1, |step| step.stride.max(1))
    }

    pub fn spread_probability(&self, tick: u32) -> f64 {
        if tick > self.late_spread_after_tick {
            self.late_spread_probability
        } else {
            self.early_spread_probability
        }
    }

    /// Ticks between stage advances for a cell: max(1, round(base / speed)).
    pub fn ticks_per_stage(&self, speed: f32) -> u32 {
        ((self.base_ticks_per_stage / speed).round() as u32).max(1)
    }

    fn glyph_stages(&self) -> GlyphStages {
        GlyphStages {
            sequence_stage: self.sequence_stage,
            sequence_stage_offset: self.sequence_stage_offset,
        }
    }
}

fn invalid_config(message: String, details: serde_json::Value) -> anyhow::Error {
    anyhow!(CodedError::usage(INVALID_CONFIG, message).with_details(details))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Wiping { remaining: u32 },
}

/// What a single call to [`AnimatorState::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickStatus {
    /// No cycle running; the live frame was rendered as plain ASCII.
    Idle,
    Running,
    /// Completion fired on this tick. Reported once per cycle.
    Completed,
    Wiping,
    /// The wipe finished and the animator is idle again.
    CycleEnded,
    /// The tick failed and was abandoned; see the logged error.
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    pub tick: u32,
    pub infected: usize,
    pub blackened: usize,
}

impl CycleStats {
    pub fn pending(&self) -> usize {
        self.infected - self.blackened
    }
}

#[derive(Debug, Clone, Copy)]
enum Edge {
    Top,
    Bottom,
    Left,
    Right,
}

const EDGES: [Edge; 4] = [Edge::Top, Edge::Bottom, Edge::Left, Edge::Right];

/// Seeds per edge in `EDGES` order. The remainder goes to the first edges.
fn edge_seed_counts(seed_count: u32) -> [usize; 4] {
    let per_edge = seed_count as usize / EDGES.len();
    let remainder = seed_count as usize % EDGES.len();
    std::array::from_fn(|position| per_edge + usize::from(position < remainder))
}

#[derive(Debug, Clone)]
pub struct AnimatorState {
    config: AnimatorConfig,
    grid: Grid,
    phase: Phase,
    tick: u32,
    offset: u32,
    captured: Option<SourceFrame>,
    completion_fired: bool,
    pending_infections: Vec<usize>,
}

impl AnimatorState {
    pub fn new(dims: GridDims, config: AnimatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            grid: Grid::new(dims),
            phase: Phase::Idle,
            tick: 0,
            offset: 0,
            captured: None,
            completion_fired: false,
            pending_infections: Vec::new(),
        })
    }

    pub fn config(&self) -> &AnimatorConfig {
        &self.config
    }

    pub fn dims(&self) -> GridDims {
        self.grid.dims()
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase != Phase::Idle
    }

    pub fn tick_count(&self) -> u32 {
        self.tick
    }

    pub fn completion_fired(&self) -> bool {
        self.completion_fired
    }

    pub fn captured_frame(&self) -> Option<&SourceFrame> {
        self.captured.as_ref()
    }

    pub fn stats(&self) -> CycleStats {
        CycleStats {
            tick: self.tick,
            infected: self.grid.infected_count(),
            blackened: self.grid.blackened_count(),
        }
    }

    /// Begins a cycle. Returns `false` without touching any state when a
    /// cycle is already in progress, including its final wipe.
    pub fn start<R: Rng + ?Sized>(&mut self, rng: &mut R) -> bool {
        if self.is_running() {
            debug!(tick = self.tick, "start ignored: cycle already running");
            return false;
        }

        self.grid.reset();
        self.tick = 0;
        self.offset = 0;
        self.captured = None;
        self.completion_fired = false;
        self.seed_edges(rng);
        self.phase = Phase::Running;

        let dims = self.grid.dims();
        info!(
            columns = dims.columns,
            rows = dims.rows,
            seeded = self.grid.infected_count(),
            "glitch cycle started"
        );
        true
    }

    /// Viewport change: new dimensions, and the next running tick recaptures
    /// its snapshot at the new size.
    pub fn resize(&mut self, dims: GridDims) {
        if dims == self.grid.dims() {
            return;
        }
        debug!(
            columns = dims.columns,
            rows = dims.rows,
            tick = self.tick,
            "grid resized"
        );
        self.grid.resize(dims);
        self.captured = None;
    }

    /// Advances and renders one frame. Errors are logged and reported as
    /// [`TickStatus::Dropped`]; the next tick proceeds normally.
    pub fn tick<S, R>(&mut self, frame: &SourceFrame, surface: &mut S, rng: &mut R) -> TickStatus
    where
        S: RenderTarget + ?Sized,
        R: Rng + ?Sized,
    {
        match self.try_tick(frame, surface, rng) {
            Ok(status) => status,
            Err(error) => {
                warn!(tick = self.tick, error = %format!("{error:#}"), "glitch tick dropped");
                TickStatus::Dropped
            }
        }
    }

    pub fn try_tick<S, R>(
        &mut self,
        frame: &SourceFrame,
        surface: &mut S,
        rng: &mut R,
    ) -> Result<TickStatus>
    where
        S: RenderTarget + ?Sized,
        R: Rng + ?Sized,
    {
        match self.phase {
            Phase::Idle => {
                ensure_frame_matches(frame, self.grid.dims())?;
                self.render(frame, surface)
                    .context("failed rendering idle frame")?;
                Ok(TickStatus::Idle)
            }
            Phase::Wiping { remaining } => {
                surface.fill_black().context("failed painting wipe")?;
                if remaining > 1 {
                    self.phase = Phase::Wiping {
                        remaining: remaining - 1,
                    };
                    Ok(TickStatus::Wiping)
                } else {
                    self.finish_cycle();
                    Ok(TickStatus::CycleEnded)
                }
            }
            Phase::Running => self.running_tick(frame, surface, rng),
        }
    }

    fn running_tick<S, R>(
        &mut self,
        frame: &SourceFrame,
        surface: &mut S,
        rng: &mut R,
    ) -> Result<TickStatus>
    where
        S: RenderTarget + ?Sized,
        R: Rng + ?Sized,
    {
        ensure_frame_matches(frame, self.grid.dims())?;
        if self.captured.is_none() {
            self.captured = Some(frame.clone());
        }

        self.step_cells(rng);
        self.log_progress();
        self.tick += 1;

        self.render(frame, surface)
            .with_context(|| format!("failed rendering glitch tick {}", self.tick))?;

        let mut status = TickStatus::Running;
        if !self.completion_fired && self.is_complete() {
            self.completion_fired = true;
            let stats = self.stats();
            info!(
                tick = stats.tick,
                blackened = stats.blackened,
                infected = stats.infected,
                "glitch complete"
            );
            status = TickStatus::Completed;
        }

        if self.tick > self.config.cycle_end_tick {
            surface.fill_black().context("failed painting wipe")?;
            if self.config.wipe_hold_ticks == 0 {
                self.finish_cycle();
                return Ok(TickStatus::CycleEnded);
            }
            self.phase = Phase::Wiping {
                remaining: self.config.wipe_hold_ticks,
            };
            if status == TickStatus::Running {
                status = TickStatus::Wiping;
            }
        }

        Ok(status)
    }

    /// Spread and advance over this tick's stride of cells.
    fn step_cells<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let tick = self.tick;
        let stride = self.config.stride_for(tick);
        self.offset = (self.offset + 1) % stride;

        let spreading = tick < self.config.spread_until_tick;
        let probability = self.config.spread_probability(tick);
        let blackened_stage = self.config.blackened_stage;
        let stall_limit = self.config.stall_failsafe_ticks;
        let mut pending = std::mem::take(&mut self.pending_infections);
        pending.clear();

        let mut index = self.offset as usize;
        while index < self.grid.len() {
            let cell = self.grid.cells()[index];
            if cell.is_eroding() {
                if spreading {
                    for neighbor in self.grid.neighbors(index) {
                        let candidate = &self.grid.cells()[neighbor];
                        if !candidate.infected && rng.gen_bool(probability) {
                            pending.push(neighbor);
                        }
                    }
                }

                let ticks_needed = self.config.ticks_per_stage(cell.speed);
                if let Some(cell) = self.grid.cell_mut(index) {
                    if tick % ticks_needed == 0
                        || tick.saturating_sub(cell.last_advanced_tick) >= ticks_needed
                    {
                        cell.advance(tick, blackened_stage);
                    }
                    if !cell.blackened
                        && tick.saturating_sub(cell.last_advanced_tick) > stall_limit
                    {
                        cell.advance(tick, blackened_stage);
                    }
                }
            }
            index += stride as usize;
        }

        for &neighbor in &pending {
            let speed = self.draw_speed(rng);
            if let Some(cell) = self.grid.cell_mut(neighbor) {
                if !cell.infected {
                    cell.infect(speed, tick);
                }
            }
        }
        self.pending_infections = pending;
    }

    fn seed_edges<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let counts = edge_seed_counts(self.config.seed_count);
        for (edge, count) in EDGES.iter().zip(counts) {
            let candidates = self
                .band_cells(*edge)
                .into_iter()
                .filter(|&index| !self.grid.cells()[index].infected)
                .collect::<Vec<_>>();
            let chosen = candidates
                .choose_multiple(rng, count)
                .copied()
                .collect::<Vec<_>>();
            for index in chosen {
                let speed = self.draw_speed(rng);
                if let Some(cell) = self.grid.cell_mut(index) {
                    cell.infect(speed, 0);
                }
            }
        }
    }

    fn band_cells(&self, edge: Edge) -> Vec<usize> {
        let GridDims { columns, rows } = self.grid.dims();
        let depth = self.config.edge_band_depth;
        let (column_range, row_range) = match edge {
            Edge::Top => (0..columns, 0..depth.min(rows)),
            Edge::Bottom => (0..columns, rows.saturating_sub(depth)..rows),
            Edge::Left => (0..depth.min(columns), 0..rows),
            Edge::Right => (columns.saturating_sub(depth)..columns, 0..rows),
        };
        row_range
            .flat_map(|row| column_range.clone().map(move |column| (column, row)))
            .filter_map(|(column, row)| self.grid.index_of(column, row))
            .collect()
    }

    fn draw_speed<R: Rng + ?Sized>(&self, rng: &mut R) -> f32 {
        rng.gen_range(self.config.speed_min..self.config.speed_max)
    }

    fn is_complete(&self) -> bool {
        let infected = self.grid.infected_count();
        if infected == 0 {
            return false;
        }
        let ratio = self.grid.blackened_count() as f64 / infected as f64;
        ratio > self.config.completion_ratio || self.tick > self.config.completion_deadline_tick
    }

    fn render<S: RenderTarget + ?Sized>(&self, live: &SourceFrame, surface: &mut S) -> Result<()> {
        let dims = self.grid.dims();
        let stages = self.config.glyph_stages();
        surface.begin_frame(dims)?;

        for (index, cell) in self.grid.cells().iter().enumerate() {
            let source = if cell.infected {
                self.captured.as_ref().unwrap_or(live)
            } else {
                live
            };
            let glyph = if cell.blackened {
                Glyph::BLACK
            } else {
                let brightness = source.brightness_at(index).ok_or_else(|| {
                    anyhow!(
                        "pixel {index} outside {}x{} frame",
                        source.width(),
                        source.height()
                    )
                })?;
                glyph_for_cell(cell, index, brightness, stages)
            };
            let (column, row) = self.grid.position_of(index);
            surface.draw_glyph(column, row, glyph)?;
        }
        Ok(())
    }

    fn finish_cycle(&mut self) {
        let stats = self.stats();
        self.grid.reset();
        self.tick = 0;
        self.offset = 0;
        self.captured = None;
        self.completion_fired = false;
        self.phase = Phase::Idle;
        info!(
            blackened = stats.blackened,
            infected = stats.infected,
            "glitch cycle ended"
        );
    }

    fn log_progress(&self) {
        if self.tick % PROGRESS_LOG_INTERVAL == 0 {
            let stats = self.stats();
            debug!(
                tick = stats.tick,
                blackened = stats.blackened,
                infected = stats.infected,
                pending = stats.pending(),
                "glitch progress"
            );
        }
    }
}
