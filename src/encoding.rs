use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};
use tracing::debug;

/// Streams RGBA frames into an ffmpeg child process from a writer thread.
pub struct FfmpegPipe {
    sender: Option<mpsc::SyncSender<Vec<u8>>>,
    worker: Option<JoinHandle<Result<()>>>,
    frame_len: usize,
}

impl FfmpegPipe {
    pub fn spawn(width: u32, height: u32, fps: u32, output_path: &Path) -> Result<Self> {
        if width == 0 || height == 0 || fps == 0 {
            bail!("encoder needs a non-empty frame size and fps, got {width}x{height}@{fps}");
        }
        let args = ffmpeg_args(width, height, fps, output_path);
        let output_path = output_path.to_path_buf();
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(4);

        let worker = thread::Builder::new()
            .name("glitchgrid-ffmpeg-encoder".to_owned())
            .spawn(move || run_ffmpeg_process(receiver, &args, &output_path))
            .context("failed to spawn ffmpeg writer thread")?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            frame_len: width as usize * height as usize * 4,
        })
    }

    /// Queues one frame. If ffmpeg has exited, the writer thread's error is
    /// returned instead of a bare channel failure.
    pub fn write_frame(&mut self, rgba_frame: Vec<u8>) -> Result<()> {
        if rgba_frame.len() != self.frame_len {
            bail!(
                "encoder frame must be {} bytes, got {}",
                self.frame_len,
                rgba_frame.len()
            );
        }
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("encoder has already been finalized"))?;
        if sender.send(rgba_frame).is_ok() {
            return Ok(());
        }

        drop(self.sender.take());
        let error = match self.join_worker() {
            Err(error) => error,
            Ok(()) => anyhow!("ffmpeg exited before all frames were written"),
        };
        Err(error.context("failed to enqueue frame for ffmpeg"))
    }

    pub fn finish(mut self) -> Result<()> {
        drop(self.sender.take());
        self.join_worker()
    }

    fn join_worker(&mut self) -> Result<()> {
        let handle = self
            .worker
            .take()
            .ok_or_else(|| anyhow!("ffmpeg worker thread missing"))?;
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow!("ffmpeg worker thread panicked")),
        }
    }
}

fn run_ffmpeg_process(
    receiver: mpsc::Receiver<Vec<u8>>,
    args: &[String],
    output_path: &Path,
) -> Result<()> {
    let path_str = output_path.to_string_lossy();
    if path_str.chars().any(|c| c.is_control()) {
        bail!("output path contains control characters");
    }

    let mut child = Command::new("ffmpeg")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                anyhow!("ffmpeg executable not found on PATH; install ffmpeg to encode {path_str}")
            } else {
                anyhow!(
                    "failed to spawn ffmpeg process (args='{}'): {error}",
                    args.join(" ")
                )
            }
        })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("failed to capture ffmpeg stdin"))?;
    let mut stderr_pipe = child.stderr.take();

    let mut frames = 0_u64;
    while let Ok(frame) = receiver.recv() {
        stdin
            .write_all(&frame)
            .context("failed to write frame to ffmpeg stdin")?;
        frames += 1;
    }

    stdin.flush().context("failed to flush ffmpeg stdin")?;
    drop(stdin);

    let status = child.wait().context("failed waiting for ffmpeg process")?;
    let stderr_tail = read_stderr_tail(&mut stderr_pipe)?;
    if !status.success() {
        return Err(anyhow!(
            "ffmpeg failed with status {status} (args='{}', stderr_tail='{}')",
            args.join(" "),
            stderr_tail
        ));
    }
    debug!(frames, output = %output_path.display(), "ffmpeg encoder finished");
    Ok(())
}

pub fn ffmpeg_args(width: u32, height: u32, fps: u32, output_path: &Path) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-f".to_owned(),
        "rawvideo".to_owned(),
        "-pix_fmt".to_owned(),
        "rgba".to_owned(),
        "-s:v".to_owned(),
        format!("{width}x{height}"),
        "-r".to_owned(),
        fps.to_string(),
        "-i".to_owned(),
        "-".to_owned(),
        "-an".to_owned(),
    ];
    args.extend(codec_args(output_path));
    args.push(output_path.to_string_lossy().into_owned());
    args
}

/// Codec by container extension. mp4 pads odd sizes to even for yuv420p.
fn codec_args(output_path: &Path) -> Vec<String> {
    let ext = output_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "mov" => vec![
            "-c:v".to_owned(),
            "prores_ks".to_owned(),
            "-profile:v".to_owned(),
            "3".to_owned(),
            "-pix_fmt".to_owned(),
            "yuv422p10le".to_owned(),
        ],
        "webm" => vec![
            "-c:v".to_owned(),
            "libvpx-vp9".to_owned(),
            "-pix_fmt".to_owned(),
            "yuv420p".to_owned(),
        ],
        _ => vec![
            "-c:v".to_owned(),
            "libx264".to_owned(),
            "-vf".to_owned(),
            "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_owned(),
            "-pix_fmt".to_owned(),
            "yuv420p".to_owned(),
            "-movflags".to_owned(),
            "+faststart".to_owned(),
        ],
    }
}

fn read_stderr_tail(stderr: &mut Option<std::process::ChildStderr>) -> Result<String> {
    let Some(mut pipe) = stderr.take() else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf)
        .context("failed reading ffmpeg stderr")?;
    let text = String::from_utf8_lossy(&buf).to_string();
    Ok(last_n_chars(&text, 500))
}

fn last_n_chars(s: &str, max_chars: usize) -> String {
    let chars = s.chars().collect::<Vec<_>>();
    let start = chars.len().saturating_sub(max_chars);
    chars[start..].iter().collect::<String>().trim().to_owned()
}
