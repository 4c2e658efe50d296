use std::f32::consts::TAU;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::DynamicImage;
use serde_json::json;
use tracing::debug;

use crate::decoding::FfmpegInput;
use crate::error_codes::{CodedError, INVALID_SOURCE};
use crate::frame::SourceFrame;
use crate::grid::GridDims;

/// Produces one frame per display tick, rasterized to exactly one pixel per
/// grid cell. Sources re-rasterize when `dims` changes between calls.
pub trait FrameSource {
    fn next_frame(&mut self, dims: GridDims) -> Result<SourceFrame>;
    fn label(&self) -> String;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_frame(&mut self, dims: GridDims) -> Result<SourceFrame> {
        (**self).next_frame(dims)
    }

    fn label(&self) -> String {
        (**self).label()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSourceSpec {
    Image { path: PathBuf },
    Video { path: PathBuf },
    Library { pattern: LibraryPattern },
}

impl FrameSourceSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let value = raw.trim();
        if let Some(path) = value.strip_prefix("image:") {
            return Ok(Self::Image {
                path: non_empty_path(raw, path, "image")?,
            });
        }

        if let Some(path) = value.strip_prefix("video:") {
            return Ok(Self::Video {
                path: non_empty_path(raw, path, "video")?,
            });
        }

        if let Some(id) = value.strip_prefix("library:") {
            return Ok(Self::Library {
                pattern: LibraryPattern::parse(id)?,
            });
        }

        Err(invalid_source(format!(
            "invalid --source '{raw}': expected 'image:<path>', 'video:<path>', or 'library:<id>'"
        )))
    }

    pub fn display_label(&self) -> String {
        match self {
            Self::Image { path } => format!("image:{}", path.display()),
            Self::Video { path } => format!("video:{}", path.display()),
            Self::Library { pattern } => format!("library:{}", pattern.id()),
        }
    }

    pub fn open(&self, fps: u32) -> Result<Box<dyn FrameSource>> {
        let source: Box<dyn FrameSource> = match self {
            Self::Image { path } => Box::new(StillImageSource::open(path)?),
            Self::Video { path } => Box::new(VideoSource::open(path)?),
            Self::Library { pattern } => Box::new(LibrarySource::new(*pattern, fps)),
        };
        Ok(source)
    }
}

fn non_empty_path(raw: &str, path: &str, kind: &str) -> Result<PathBuf> {
    let path = path.trim();
    if path.is_empty() {
        return Err(invalid_source(format!(
            "invalid --source '{raw}': missing {kind} path"
        )));
    }
    Ok(PathBuf::from(path))
}

fn invalid_source(message: String) -> anyhow::Error {
    anyhow!(CodedError::usage(INVALID_SOURCE, message))
}

/// Still image, decoded once and resized to the grid whenever it changes.
pub struct StillImageSource {
    path: PathBuf,
    image: DynamicImage,
    cached: Option<SourceFrame>,
}

impl StillImageSource {
    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path).map_err(|error| {
            anyhow!(CodedError::usage(
                INVALID_SOURCE,
                format!("failed to decode image {}: {error}", path.display()),
            )
            .with_details(json!({ "path": path.display().to_string() })))
        })?;
        Ok(Self::from_image(path, image))
    }

    pub fn from_image(path: &Path, image: DynamicImage) -> Self {
        Self {
            path: path.to_path_buf(),
            image,
            cached: None,
        }
    }
}

impl FrameSource for StillImageSource {
    fn next_frame(&mut self, dims: GridDims) -> Result<SourceFrame> {
        if let Some(frame) = self.cached.as_ref().filter(|frame| frame.matches(dims)) {
            return Ok(frame.clone());
        }
        let rgba = self
            .image
            .resize_exact(dims.columns, dims.rows, FilterType::Triangle)
            .to_rgba8()
            .into_raw();
        let frame = SourceFrame::from_rgba(dims.columns, dims.rows, rgba)?;
        debug!(
            path = %self.path.display(),
            columns = dims.columns,
            rows = dims.rows,
            "still image rasterized"
        );
        self.cached = Some(frame.clone());
        Ok(frame)
    }

    fn label(&self) -> String {
        format!("image:{}", self.path.display())
    }
}

/// Looping video decoded by ffmpeg at grid resolution. The decoder is
/// respawned at the new size when the grid changes.
pub struct VideoSource {
    path: PathBuf,
    input: Option<FfmpegInput>,
}

impl VideoSource {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(anyhow!(CodedError::usage(
                INVALID_SOURCE,
                format!("video source {} does not exist", path.display()),
            )
            .with_details(json!({ "path": path.display().to_string() }))));
        }
        Ok(Self {
            path: path.to_path_buf(),
            input: None,
        })
    }
}

impl FrameSource for VideoSource {
    fn next_frame(&mut self, dims: GridDims) -> Result<SourceFrame> {
        let wanted = (dims.columns, dims.rows);
        if self.input.as_ref().map(FfmpegInput::size) != Some(wanted) {
            if let Some(previous) = self.input.take() {
                previous.finish().ok();
            }
            self.input = Some(FfmpegInput::spawn(&self.path, dims.columns, dims.rows, true)?);
        }

        let input = self
            .input
            .as_ref()
            .ok_or_else(|| anyhow!("video decoder missing for {}", self.path.display()))?;
        let rgba = input
            .read_frame()
            .ok_or_else(|| anyhow!("ffmpeg stopped producing frames for {}", self.path.display()))?;
        SourceFrame::from_rgba(dims.columns, dims.rows, rgba)
            .with_context(|| format!("bad frame from {}", self.path.display()))
    }

    fn label(&self) -> String {
        format!("video:{}", self.path.display())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryPattern {
    Ocean,
    Gradient,
    Bars,
}

impl LibraryPattern {
    pub const ALL: [Self; 3] = [Self::Ocean, Self::Gradient, Self::Bars];

    pub fn parse(raw: &str) -> Result<Self> {
        let id = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|pattern| pattern.id() == id)
            .ok_or_else(|| {
                let supported = Self::ALL.map(Self::id).join(", ");
                anyhow!(CodedError::usage(
                    INVALID_SOURCE,
                    format!("unsupported library source '{id}': supported ids: {supported}"),
                )
                .with_details(json!({ "id": id, "supported": Self::ALL.map(Self::id) })))
            })
    }

    pub fn id(self) -> &'static str {
        match self {
            Self::Ocean => "ocean",
            Self::Gradient => "gradient",
            Self::Bars => "bars",
        }
    }

    fn rgb(self, t: f32, x: f32, y: f32) -> [u8; 3] {
        match self {
            Self::Ocean => {
                let swell = ((x * 9.0 + t * 1.6).sin() + (y * 14.0 - t * 2.2).cos()) * 0.25 + 0.5;
                let depth = 1.0 - y * 0.6;
                let crest = (swell * depth).clamp(0.0, 1.0);
                [
                    unit_to_byte(crest * 0.35),
                    unit_to_byte(0.25 + crest * 0.5),
                    unit_to_byte(0.45 + crest * 0.55),
                ]
            }
            Self::Gradient => {
                let phase = (x + y) * 0.5 + t * 0.1;
                let level = (phase * TAU).sin() * 0.5 + 0.5;
                let value = unit_to_byte(level);
                [value, value, value]
            }
            Self::Bars => {
                const BARS: [[u8; 3]; 7] = [
                    [192, 192, 192],
                    [192, 192, 0],
                    [0, 192, 192],
                    [0, 192, 0],
                    [192, 0, 192],
                    [192, 0, 0],
                    [0, 0, 192],
                ];
                let shifted = (x + t * 0.05).fract();
                BARS[((shifted * BARS.len() as f32) as usize).min(BARS.len() - 1)]
            }
        }
    }
}

fn unit_to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Procedural frames; frame `n` is sampled at `t = n / fps` seconds.
pub struct LibrarySource {
    pattern: LibraryPattern,
    fps: u32,
    frame_index: u64,
}

impl LibrarySource {
    pub fn new(pattern: LibraryPattern, fps: u32) -> Self {
        Self {
            pattern,
            fps: fps.max(1),
            frame_index: 0,
        }
    }

    pub fn render(&self, frame_index: u64, dims: GridDims) -> Result<SourceFrame> {
        let t = frame_index as f32 / self.fps as f32;
        let mut rgba = Vec::with_capacity(dims.cell_count() * 4);
        for row in 0..dims.rows {
            let y = row as f32 / dims.rows as f32;
            for column in 0..dims.columns {
                let x = column as f32 / dims.columns as f32;
                let [r, g, b] = self.pattern.rgb(t, x, y);
                rgba.extend_from_slice(&[r, g, b, 255]);
            }
        }
        SourceFrame::from_rgba(dims.columns, dims.rows, rgba)
    }
}

impl FrameSource for LibrarySource {
    fn next_frame(&mut self, dims: GridDims) -> Result<SourceFrame> {
        let frame = self.render(self.frame_index, dims)?;
        self.frame_index += 1;
        Ok(frame)
    }

    fn label(&self) -> String {
        format!("library:{}", self.pattern.id())
    }
}
