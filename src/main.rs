use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use glitchgrid::config::{load_settings, Settings};
use glitchgrid::encoding::FfmpegPipe;
use glitchgrid::error_codes::{
    find_coded_error, uncoded_envelope, CodedError, CodedErrorKind, INVALID_CONFIG,
    INVALID_VIEWPORT, SEQUENCE_HASH_MISMATCH,
};
use glitchgrid::grid::GridDims;
use glitchgrid::painter::GlyphPainter;
use glitchgrid::session::{
    format_hash, FrameEvent, GlitchSession, SessionOptions, SessionSidecar, SessionSummary,
};
use glitchgrid::sources::FrameSourceSpec;
use glitchgrid::surface::PixmapSurface;

#[derive(Debug, Parser)]
#[command(name = "glitchgrid")]
#[command(about = "Headless ASCII infection-erosion renderer")]
#[command(version, long_version = long_version())]
struct Cli {
    /// Debug logging (overridden by RUST_LOG).
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the grid derived from a viewport.
    Grid {
        #[arg(long = "viewport")]
        viewport: String,
        #[arg(long = "columns")]
        columns: Option<u32>,
        /// Fixed aspect ratio, `16:9` or `1.78`; rows = floor(columns / aspect).
        #[arg(long = "aspect")]
        aspect: Option<String>,
        #[arg(long = "config")]
        config: Option<PathBuf>,
        #[arg(long = "json")]
        json: bool,
    },
    /// Run one glitch cycle headlessly.
    Render(RenderArgs),
    /// Play one glitch cycle in the terminal.
    Preview {
        #[command(flatten)]
        session: SessionArgs,
    },
}

#[derive(Debug, Clone, Args)]
struct SessionArgs {
    /// `image:<path>`, `video:<path>`, or `library:<ocean|gradient|bars>`.
    #[arg(long = "source")]
    source: String,
    #[arg(long = "viewport", default_value = "1280x720")]
    viewport: String,
    #[arg(long = "columns")]
    columns: Option<u32>,
    #[arg(long = "config")]
    config: Option<PathBuf>,
    #[arg(long = "seed", default_value_t = 0)]
    seed: u64,
    #[arg(long = "fps", default_value_t = 30)]
    fps: u32,
    /// Frame at which the cycle starts.
    #[arg(long = "start-at", default_value_t = 0)]
    start_at: u64,
    #[arg(long = "max-ticks", default_value_t = 600)]
    max_ticks: u64,
    #[arg(long = "idle-frame-skip", default_value_t = 2)]
    idle_frame_skip: u32,
}

#[derive(Debug, Clone, Args)]
struct RenderArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// One `frame_NNNNN.txt` per frame, plus `.png` when `--font` is set.
    #[arg(long = "frames-dir")]
    frames_dir: Option<PathBuf>,
    /// Encoded video at viewport resolution; needs `--font`.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
    /// Monospace TTF/OTF used for pixel output.
    #[arg(long = "font")]
    font: Option<PathBuf>,
    #[arg(long = "sidecar")]
    sidecar: Option<PathBuf>,
    /// Fail unless the sequence hash matches, e.g. `0x1f2e...`.
    #[arg(long = "expect-hash")]
    expect_hash: Option<String>,
    /// Print the sidecar JSON to stdout; errors become JSON envelopes.
    #[arg(long = "json")]
    json: bool,
}

fn long_version() -> &'static str {
    let version = match option_env!("GLITCHGRID_GIT_HASH") {
        Some(hash) => format!("{} ({hash})", env!("CARGO_PKG_VERSION")),
        None => env!("CARGO_PKG_VERSION").to_owned(),
    };
    Box::leak(version.into_boxed_str())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let json = match &cli.command {
        Commands::Grid { json, .. } => *json,
        Commands::Render(args) => args.json,
        Commands::Preview { .. } => false,
    };

    let result = match cli.command {
        Commands::Grid {
            viewport,
            columns,
            aspect,
            config,
            json,
        } => run_grid(&viewport, columns, aspect.as_deref(), config.as_deref(), json),
        Commands::Render(args) => run_render(&args),
        Commands::Preview { session } => run_preview(&session),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => report_error(&error, json),
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "glitchgrid=debug"
    } else {
        "glitchgrid=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn report_error(error: &anyhow::Error, json: bool) -> ExitCode {
    let coded = find_coded_error(error);
    if json {
        let envelope = coded.map_or_else(|| uncoded_envelope(error), CodedError::envelope);
        match serde_json::to_string_pretty(&envelope) {
            Ok(text) => println!("{text}"),
            Err(_) => eprintln!("error: {error:#}"),
        }
    } else {
        eprintln!("error: {error:#}");
    }
    match coded.map(|coded| coded.kind) {
        Some(CodedErrorKind::Usage) => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

fn run_grid(
    viewport: &str,
    columns: Option<u32>,
    aspect: Option<&str>,
    config: Option<&Path>,
    json: bool,
) -> Result<()> {
    let settings = load_settings(config)?;
    let mut grid_config = settings.grid;
    if let Some(columns) = columns {
        grid_config.columns = columns;
    }
    let (width, height) = parse_viewport(viewport)?;
    let dims = match aspect {
        Some(raw) => GridDims::from_aspect(grid_config.columns, parse_aspect(raw)?)?,
        None => GridDims::for_viewport(width, height, &grid_config)?,
    };

    if json {
        let value = json!({
            "viewport": { "width": width, "height": height },
            "columns": dims.columns,
            "rows": dims.rows,
            "cells": dims.cell_count(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!(
            "[glitchgrid] grid {}x{} ({} cells) for viewport {width}x{height}",
            dims.columns,
            dims.rows,
            dims.cell_count()
        );
    }
    Ok(())
}

struct PreparedSession {
    session: GlitchSession,
    options: SessionOptions,
    spec: FrameSourceSpec,
    dims: GridDims,
    viewport: (u32, u32),
}

fn prepare_session(args: &SessionArgs) -> Result<PreparedSession> {
    let Settings { mut grid, animator } = load_settings(args.config.as_deref())?;
    if let Some(columns) = args.columns {
        grid.columns = columns;
    }
    if args.fps == 0 {
        return Err(anyhow!(CodedError::usage(
            INVALID_CONFIG,
            "--fps must be greater than zero"
        )));
    }

    let viewport = parse_viewport(&args.viewport)?;
    let dims = GridDims::for_viewport(viewport.0, viewport.1, &grid)?;
    let spec = FrameSourceSpec::parse(&args.source)?;
    let options = SessionOptions {
        fps: args.fps,
        total_ticks: args.max_ticks,
        start_at_tick: args.start_at,
        seed: args.seed,
        idle_frame_skip: args.idle_frame_skip,
    };
    let session = GlitchSession::new(dims, animator, args.seed)?;

    Ok(PreparedSession {
        session,
        options,
        spec,
        dims,
        viewport,
    })
}

fn run_render(args: &RenderArgs) -> Result<()> {
    if args.output.is_some() && args.font.is_none() {
        return Err(anyhow!(CodedError::usage(
            INVALID_CONFIG,
            "--output needs --font to rasterize glyphs"
        )));
    }
    let expected_hash = args.expect_hash.as_deref().map(parse_hash).transpose()?;

    let PreparedSession {
        mut session,
        options,
        spec,
        dims,
        viewport,
    } = prepare_session(&args.session)?;
    let mut source = spec.open(options.fps)?;

    let mut pixels = match &args.font {
        Some(font) => {
            let painter = GlyphPainter::from_path(font, 12.0)?;
            Some(PixmapSurface::new(viewport.0, viewport.1, painter)?)
        }
        None => None,
    };
    if let Some(dir) = &args.frames_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create frames dir {}", dir.display()))?;
    }
    let mut writer = FrameWriter {
        frames_dir: args.frames_dir.clone(),
        encoder: match &args.output {
            Some(path) => Some(FfmpegPipe::spawn(viewport.0, viewport.1, options.fps, path)?),
            None => None,
        },
    };

    let started = Instant::now();
    let summary = session.run(&options, &mut source, &mut pixels, |event, pixels| {
        writer.write(event, pixels.as_ref())
    })?;
    if let Some(encoder) = writer.encoder.take() {
        encoder.finish()?;
    }

    let sidecar = SessionSidecar::new(spec.display_label(), dims, &options, &summary);
    if let Some(path) = &args.sidecar {
        sidecar.write(path)?;
    }

    if let Some(expected) = expected_hash {
        if expected != summary.sequence_hash {
            return Err(CodedError::verification(
                SEQUENCE_HASH_MISMATCH,
                format!(
                    "sequence hash mismatch: expected {}, got {}",
                    format_hash(expected),
                    format_hash(summary.sequence_hash)
                ),
            )
            .with_details(json!({
                "expected": format_hash(expected),
                "actual": format_hash(summary.sequence_hash),
            }))
            .into());
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sidecar)?);
    } else {
        print_summary(&spec, dims, &summary, started.elapsed());
        if let Some(path) = &args.output {
            println!("[glitchgrid] wrote {}", path.display());
        }
    }
    Ok(())
}

fn run_preview(args: &SessionArgs) -> Result<()> {
    let PreparedSession {
        mut session,
        options,
        spec,
        dims,
        ..
    } = prepare_session(args)?;
    let mut source = spec.open(options.fps)?;
    let frame_time = Duration::from_secs_f64(1.0 / f64::from(options.fps));
    let mut stdout = std::io::stdout().lock();
    let mut discard = None::<PixmapSurface>;

    write!(stdout, "\x1B[2J")?;
    let started = Instant::now();
    let summary = session.run(&options, &mut source, &mut discard, |event, _| {
        let frame_started = Instant::now();
        write!(stdout, "\x1B[H{}", event.text.to_ansi())?;
        stdout.flush()?;
        if let Some(remaining) = frame_time.checked_sub(frame_started.elapsed()) {
            thread::sleep(remaining);
        }
        Ok(())
    })?;
    drop(stdout);

    print_summary(&spec, dims, &summary, started.elapsed());
    Ok(())
}

struct FrameWriter {
    frames_dir: Option<PathBuf>,
    encoder: Option<FfmpegPipe>,
}

impl FrameWriter {
    fn write(&mut self, event: &FrameEvent<'_>, pixels: Option<&PixmapSurface>) -> Result<()> {
        if let Some(dir) = &self.frames_dir {
            let stem = format!("frame_{:05}", event.index);
            let text_path = dir.join(format!("{stem}.txt"));
            fs::write(&text_path, event.text.to_text())
                .with_context(|| format!("failed to write {}", text_path.display()))?;
            if let Some(pixels) = pixels {
                pixels.save_png(&dir.join(format!("{stem}.png")))?;
            }
        }

        if let Some(encoder) = &mut self.encoder {
            let pixels = pixels.ok_or_else(|| anyhow!("video output has no pixel surface"))?;
            encoder.write_frame(pixels.rgba())?;
        }
        Ok(())
    }
}

fn print_summary(
    spec: &FrameSourceSpec,
    dims: GridDims,
    summary: &SessionSummary,
    elapsed: Duration,
) {
    let at = |value: Option<u64>| value.map_or_else(|| "never".to_owned(), |v| v.to_string());
    println!(
        "[glitchgrid] {} on {}x{}: {} frames in {:.2}s",
        spec.display_label(),
        dims.columns,
        dims.rows,
        summary.frames,
        elapsed.as_secs_f64()
    );
    println!(
        "[glitchgrid] completed at frame {}, cycle ended at frame {}, dropped {}",
        at(summary.completed_at),
        at(summary.cycle_ended_at),
        summary.dropped
    );
    println!(
        "[glitchgrid] sequence hash {}",
        format_hash(summary.sequence_hash)
    );
}

fn parse_viewport(raw: &str) -> Result<(u32, u32)> {
    let parsed = raw
        .trim()
        .split_once(['x', 'X'])
        .and_then(|(width, height)| {
            Some((width.trim().parse::<u32>().ok()?, height.trim().parse::<u32>().ok()?))
        });
    match parsed {
        Some((width, height)) if width > 0 && height > 0 => Ok((width, height)),
        _ => Err(anyhow!(CodedError::usage(
            INVALID_VIEWPORT,
            format!("invalid viewport '{raw}': expected WIDTHxHEIGHT with both above zero"),
        )
        .with_details(json!({ "viewport": raw })))),
    }
}

fn parse_aspect(raw: &str) -> Result<f64> {
    let value = match raw.split_once(':') {
        Some((width, height)) => {
            let width = width.trim().parse::<f64>().ok();
            let height = height.trim().parse::<f64>().ok();
            width.zip(height).map(|(width, height)| width / height)
        }
        None => raw.trim().parse::<f64>().ok(),
    };
    value
        .filter(|aspect| aspect.is_finite() && *aspect > 0.0)
        .ok_or_else(|| {
            anyhow!(CodedError::usage(
                INVALID_VIEWPORT,
                format!("invalid aspect '{raw}': expected W:H or a positive number"),
            ))
        })
}

fn parse_hash(raw: &str) -> Result<u64> {
    let digits = raw.trim().trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(digits, 16).map_err(|error| {
        anyhow!(CodedError::usage(
            INVALID_CONFIG,
            format!("invalid --expect-hash '{raw}': {error}"),
        ))
    })
}
