use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;

use glitchgrid::animator::{AnimatorConfig, AnimatorState, Phase, TickStatus};
use glitchgrid::frame::SourceFrame;
use glitchgrid::glyphs::Glyph;
use glitchgrid::grid::GridDims;
use glitchgrid::sources::{FrameSource, LibraryPattern, LibrarySource};
use glitchgrid::surface::{RenderTarget, TextSurface};

/// Text surface that refuses the `fail_on`-th frame (1-based).
struct FlakySurface {
    inner: TextSurface,
    frames: u32,
    fail_on: u32,
}

impl RenderTarget for FlakySurface {
    fn begin_frame(&mut self, dims: GridDims) -> Result<()> {
        self.frames += 1;
        if self.frames == self.fail_on {
            bail!("display lost");
        }
        self.inner.begin_frame(dims)
    }

    fn draw_glyph(&mut self, column: u32, row: u32, glyph: Glyph) -> Result<()> {
        self.inner.draw_glyph(column, row, glyph)
    }

    fn fill_black(&mut self) -> Result<()> {
        self.inner.fill_black()
    }
}

fn stage_sum(state: &AnimatorState) -> u32 {
    state.grid().cells().iter().map(|cell| cell.stage).sum()
}

fn widescreen_animator() -> AnimatorState {
    let dims = GridDims::from_aspect(180, 16.0 / 9.0).expect("dims");
    AnimatorState::new(dims, AnimatorConfig::default()).expect("animator")
}

#[test]
fn widescreen_start_seeds_one_hundred_cells() {
    let mut state = widescreen_animator();
    assert_eq!(state.dims(), GridDims::new(180, 101).expect("dims"));

    let mut rng = StdRng::seed_from_u64(2024);
    assert!(state.start(&mut rng));
    let stats = state.stats();
    assert_eq!(stats.infected, 100);
    assert_eq!(stats.blackened, 0);
    assert_eq!(stats.tick, 0);
}

#[test]
fn widescreen_cycle_completes_exactly_once_by_tick_151() {
    let mut state = widescreen_animator();
    let dims = state.dims();
    let mut rng = StdRng::seed_from_u64(99);
    let mut source = LibrarySource::new(LibraryPattern::Ocean, 30);
    let mut surface = TextSurface::default();
    state.start(&mut rng);

    let mut completions = Vec::new();
    for call in 1..=200_u32 {
        let frame = source.next_frame(dims).expect("frame");
        if state.tick(&frame, &mut surface, &mut rng) == TickStatus::Completed {
            completions.push(call);
        }
    }
    assert_eq!(completions.len(), 1, "{completions:?}");
    assert!(completions[0] <= 151);
    assert!(state.completion_fired());
}

#[test]
fn failed_render_drops_one_tick_and_the_next_one_advances() {
    let dims = GridDims::new(30, 16).expect("dims");
    let mut state = AnimatorState::new(dims, AnimatorConfig::default()).expect("animator");
    let mut rng = StdRng::seed_from_u64(5);
    let frame = SourceFrame::solid(30, 16, [120, 120, 120]);
    let mut surface = FlakySurface {
        inner: TextSurface::default(),
        frames: 0,
        fail_on: 4,
    };
    state.start(&mut rng);

    let mut stage_sums = Vec::new();
    let statuses = (0..6)
        .map(|_| {
            let status = state.tick(&frame, &mut surface, &mut rng);
            stage_sums.push(stage_sum(&state));
            status
        })
        .collect::<Vec<_>>();
    assert_eq!(statuses[3], TickStatus::Dropped);
    assert!(statuses
        .iter()
        .enumerate()
        .all(|(index, status)| index == 3 || *status == TickStatus::Running));
    // Cell updates on the failed tick are kept, so every call counts.
    assert_eq!(state.tick_count(), 6);
    assert_eq!(state.phase(), Phase::Running);
    assert!(
        stage_sums[4] > stage_sums[3] && stage_sums[5] > stage_sums[4],
        "stages should keep advancing after the dropped tick: {stage_sums:?}"
    );
}

#[test]
fn resize_mid_cycle_recaptures_at_the_new_size() {
    let small = GridDims::new(40, 20).expect("dims");
    let large = GridDims::new(64, 36).expect("dims");
    let mut state = AnimatorState::new(small, AnimatorConfig::default()).expect("animator");
    let mut rng = StdRng::seed_from_u64(8);
    let mut source = LibrarySource::new(LibraryPattern::Gradient, 30);
    let mut surface = TextSurface::default();
    state.start(&mut rng);

    for _ in 0..10 {
        let frame = source.next_frame(small).expect("frame");
        assert_eq!(
            state.tick(&frame, &mut surface, &mut rng),
            TickStatus::Running
        );
    }
    let infected_before = state.stats().infected;

    state.resize(large);
    assert!(state.captured_frame().is_none());
    assert_eq!(state.dims(), large);

    let stale = source.next_frame(small).expect("frame");
    assert_eq!(
        state.tick(&stale, &mut surface, &mut rng),
        TickStatus::Dropped
    );

    let frame = source.next_frame(large).expect("frame");
    assert_eq!(
        state.tick(&frame, &mut surface, &mut rng),
        TickStatus::Running
    );
    let captured = state.captured_frame().expect("recaptured");
    assert!(captured.matches(large));
    assert_eq!((surface.columns(), surface.rows()), (64, 36));
    assert!(state.stats().infected >= infected_before.min(large.cell_count()));
}

#[test]
fn restart_is_allowed_once_the_cycle_has_ended() {
    let dims = GridDims::new(40, 20).expect("dims");
    let config = AnimatorConfig {
        cycle_end_tick: 40,
        completion_deadline_tick: 30,
        wipe_hold_ticks: 2,
        ..AnimatorConfig::default()
    };
    let mut state = AnimatorState::new(dims, config).expect("animator");
    let mut rng = StdRng::seed_from_u64(13);
    let frame = SourceFrame::solid(40, 20, [200, 200, 200]);
    let mut surface = TextSurface::default();

    assert!(state.start(&mut rng));
    let mut ended_at = None;
    for call in 1..=60_u32 {
        match state.tick(&frame, &mut surface, &mut rng) {
            TickStatus::Wiping => assert!(!state.start(&mut rng)),
            TickStatus::CycleEnded => {
                ended_at = Some(call);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(ended_at, Some(41 + 2));
    assert!(state.start(&mut rng));
    assert_eq!(state.stats().infected, 100);
}
