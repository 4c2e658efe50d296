//! Host loop: pulls a frame per display tick, drives the animator, and
//! records a hash of every emitted frame so runs can be compared.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info};

use crate::animator::{AnimatorConfig, AnimatorState, TickStatus};
use crate::grid::GridDims;
use crate::sources::FrameSource;
use crate::surface::{fnv1a64, RenderTarget, TeeSurface, TextSurface};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub fps: u32,
    /// Hard cap on emitted frames, idle frames included.
    pub total_ticks: u64,
    /// Frame index at which `start()` is called.
    pub start_at_tick: u64,
    pub seed: u64,
    /// While idle only every n-th frame is rendered; the rest repeat the
    /// previous output. `1` renders every frame.
    pub idle_frame_skip: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            fps: 30,
            total_ticks: 600,
            start_at_tick: 0,
            seed: 0,
            idle_frame_skip: 2,
        }
    }
}

/// Handed to the frame callback after every emitted frame.
#[derive(Debug)]
pub struct FrameEvent<'a> {
    pub index: u64,
    pub status: TickStatus,
    /// Skipped idle frame: nothing was ticked and the output is unchanged.
    pub repeated: bool,
    pub text: &'a TextSurface,
    pub hash: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub frames: u64,
    pub completed_at: Option<u64>,
    pub cycle_ended_at: Option<u64>,
    pub dropped: u64,
    pub frame_hashes: Vec<u64>,
    pub sequence_hash: u64,
}

pub struct GlitchSession {
    animator: AnimatorState,
    rng: StdRng,
    seed: u64,
}

impl GlitchSession {
    pub fn new(dims: GridDims, config: AnimatorConfig, seed: u64) -> Result<Self> {
        Ok(Self {
            animator: AnimatorState::new(dims, config)?,
            rng: StdRng::seed_from_u64(seed),
            seed,
        })
    }

    pub fn animator(&self) -> &AnimatorState {
        &self.animator
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn resize(&mut self, dims: GridDims) {
        self.animator.resize(dims);
    }

    /// Runs until the cycle has ended or `options.total_ticks` frames have
    /// been emitted. Frame source failures abort the run; tick failures are
    /// counted as dropped and the run continues.
    pub fn run<Src, S, F>(
        &mut self,
        options: &SessionOptions,
        source: &mut Src,
        surface: &mut S,
        mut on_frame: F,
    ) -> Result<SessionSummary>
    where
        Src: FrameSource + ?Sized,
        S: RenderTarget + ?Sized,
        F: FnMut(&FrameEvent<'_>, &S) -> Result<()>,
    {
        let skip = u64::from(options.idle_frame_skip.max(1));
        let mut text = TextSurface::new(self.animator.dims());
        let mut summary = SessionSummary {
            frames: 0,
            completed_at: None,
            cycle_ended_at: None,
            dropped: 0,
            frame_hashes: Vec::new(),
            sequence_hash: 0,
        };
        let mut last_hash = None;

        info!(
            source = %source.label(),
            seed = self.seed,
            columns = self.animator.dims().columns,
            rows = self.animator.dims().rows,
            "session started"
        );

        for index in 0..options.total_ticks {
            if index == options.start_at_tick {
                self.animator.start(&mut self.rng);
            }

            let frame = source
                .next_frame(self.animator.dims())
                .with_context(|| format!("frame source failed at frame {index}"))?;

            let repeat = match last_hash {
                Some(hash) if !self.animator.is_running() && index % skip != 0 => Some(hash),
                _ => None,
            };

            let (status, hash) = match repeat {
                Some(hash) => (TickStatus::Idle, hash),
                None => {
                    let status = {
                        let mut tee = TeeSurface(&mut text, &mut *surface);
                        self.animator.tick(&frame, &mut tee, &mut self.rng)
                    };
                    (status, text.frame_hash())
                }
            };

            match status {
                TickStatus::Completed => summary.completed_at = Some(index),
                TickStatus::CycleEnded => summary.cycle_ended_at = Some(index),
                TickStatus::Dropped => summary.dropped += 1,
                _ => {}
            }
            summary.frames += 1;
            summary.frame_hashes.push(hash);
            last_hash = Some(hash);

            let event = FrameEvent {
                index,
                status,
                repeated: repeat.is_some(),
                text: &text,
                hash,
            };
            on_frame(&event, &*surface)?;

            if status == TickStatus::CycleEnded {
                break;
            }
        }

        summary.sequence_hash = sequence_hash(&summary.frame_hashes);
        debug!(
            frames = summary.frames,
            dropped = summary.dropped,
            "session finished"
        );
        Ok(summary)
    }
}

pub fn sequence_hash(frame_hashes: &[u64]) -> u64 {
    let bytes = frame_hashes
        .iter()
        .flat_map(|hash| hash.to_le_bytes())
        .collect::<Vec<_>>();
    fnv1a64(&bytes)
}

pub fn format_hash(hash: u64) -> String {
    format!("0x{hash:016x}")
}

/// JSON written next to a render: what ran, and the hashes needed to check
/// that a later run reproduces it.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSidecar {
    pub source: String,
    pub columns: u32,
    pub rows: u32,
    pub seed: u64,
    pub fps: u32,
    pub frames: u64,
    pub completed_at: Option<u64>,
    pub cycle_ended_at: Option<u64>,
    pub dropped: u64,
    pub sequence_hash: String,
    pub frame_hashes: Vec<String>,
}

impl SessionSidecar {
    pub fn new(
        source: String,
        dims: GridDims,
        options: &SessionOptions,
        summary: &SessionSummary,
    ) -> Self {
        Self {
            source,
            columns: dims.columns,
            rows: dims.rows,
            seed: options.seed,
            fps: options.fps,
            frames: summary.frames,
            completed_at: summary.completed_at,
            cycle_ended_at: summary.cycle_ended_at,
            dropped: summary.dropped,
            sequence_hash: format_hash(summary.sequence_hash),
            frame_hashes: summary.frame_hashes.iter().copied().map(format_hash).collect(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("failed to serialize sidecar")?;
        fs::write(path, format!("{json}\n"))
            .with_context(|| format!("failed to write sidecar {}", path.display()))
    }
}
