use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use glitchgrid::animator::{AnimatorConfig, AnimatorState, TickStatus};
use glitchgrid::frame::SourceFrame;
use glitchgrid::grid::{Cell, GridDims};
use glitchgrid::surface::TextSurface;

const MAX_CALLS: u32 = 260;

struct CycleTrace {
    completions: u32,
    wipe_started_at: Option<u32>,
    ended_at: Option<u32>,
}

/// Runs one cycle, checking per-cell invariants after every tick.
fn trace_cycle(
    seed: u64,
    columns: u32,
    rows: u32,
    restart_at: u32,
) -> Result<CycleTrace, TestCaseError> {
    let dims = GridDims::new(columns, rows).expect("dims");
    let mut state = AnimatorState::new(dims, AnimatorConfig::default()).expect("animator");
    let mut rng = StdRng::seed_from_u64(seed);
    let frame = SourceFrame::solid(columns, rows, [90, 160, 220]);
    let mut surface = TextSurface::default();
    state.start(&mut rng);

    let mut previous: Vec<Cell> = state.grid().cells().to_vec();
    let mut trace = CycleTrace {
        completions: 0,
        wipe_started_at: None,
        ended_at: None,
    };

    for call in 1..=MAX_CALLS {
        if call == restart_at {
            let before = state.grid().cells().to_vec();
            prop_assert!(!state.start(&mut rng));
            prop_assert_eq!(state.grid().cells(), before.as_slice());
        }

        let status = state.tick(&frame, &mut surface, &mut rng);
        prop_assert_ne!(status, TickStatus::Dropped);
        match status {
            TickStatus::Completed => trace.completions += 1,
            TickStatus::Wiping if trace.wipe_started_at.is_none() => {
                trace.wipe_started_at = Some(call)
            }
            TickStatus::CycleEnded => {
                trace.ended_at = Some(call);
                break;
            }
            _ => {}
        }

        for (index, (cell, before)) in state.grid().cells().iter().zip(&previous).enumerate() {
            prop_assert!(!cell.blackened || cell.infected, "cell {} blackened while clean", index);
            prop_assert!(cell.stage >= before.stage, "cell {} stage went backwards", index);
            if before.infected {
                prop_assert!(cell.infected);
                prop_assert_eq!(cell.speed, before.speed, "cell {} speed changed", index);
            }
            if before.blackened {
                prop_assert_eq!(cell.stage, before.stage);
            }
            if cell.infected {
                prop_assert!((0.7..1.3).contains(&cell.speed));
            }
        }
        previous = state.grid().cells().to_vec();
    }
    Ok(trace)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn cells_never_break_lifecycle_rules(
        seed in any::<u64>(),
        columns in 12_u32..48,
        rows in 8_u32..28,
        restart_at in 1_u32..214,
    ) {
        let trace = trace_cycle(seed, columns, rows, restart_at)?;
        prop_assert_eq!(trace.completions, 1);
        prop_assert_eq!(trace.wipe_started_at, Some(201));
        prop_assert_eq!(trace.ended_at, Some(213));
    }

    #[test]
    fn start_never_seeds_more_than_requested(
        seed in any::<u64>(),
        columns in 1_u32..40,
        rows in 1_u32..40,
    ) {
        let dims = GridDims::new(columns, rows).expect("dims");
        let mut state = AnimatorState::new(dims, AnimatorConfig::default()).expect("animator");
        let mut rng = StdRng::seed_from_u64(seed);
        prop_assert!(state.start(&mut rng));
        let infected = state.stats().infected;
        prop_assert!(infected <= 100);
        prop_assert!(infected <= dims.cell_count());
        prop_assert!(infected > 0);
    }
}
