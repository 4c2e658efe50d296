use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use tracing::debug;

/// ffmpeg child process decoding a video into raw RGBA frames scaled to a
/// fixed size. A reader thread hands complete frames over a bounded channel.
pub struct FfmpegInput {
    receiver: mpsc::Receiver<Vec<u8>>,
    worker: Option<JoinHandle<Result<()>>>,
    child: Child,
    width: u32,
    height: u32,
}

impl FfmpegInput {
    pub fn spawn(input_path: &Path, width: u32, height: u32, looping: bool) -> Result<Self> {
        let args = ffmpeg_decode_args(input_path, width, height, looping);
        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| {
                format!(
                    "failed to spawn ffmpeg decoder for {} (is ffmpeg on PATH?)",
                    input_path.display()
                )
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdout"))?;
        let frame_size = width as usize * height as usize * 4;
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(4);

        let worker = thread::Builder::new()
            .name("glitchgrid-ffmpeg-decoder".to_owned())
            .spawn(move || {
                loop {
                    let mut buffer = vec![0u8; frame_size];
                    match stdout.read_exact(&mut buffer) {
                        Ok(()) => {
                            if sender.send(buffer).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                        Err(e) => return Err(anyhow!("failed to read from ffmpeg: {e}")),
                    }
                }
                Ok(())
            })
            .context("failed to spawn ffmpeg reader thread")?;

        debug!(path = %input_path.display(), width, height, looping, "ffmpeg decoder started");
        Ok(Self {
            receiver,
            worker: Some(worker),
            child,
            width,
            height,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Blocks until the next frame; `None` once ffmpeg has stopped producing.
    pub fn read_frame(&self) -> Option<Vec<u8>> {
        self.receiver.recv().ok()
    }

    pub fn finish(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        // A full channel would keep the reader blocked in send.
        let (_, closed) = mpsc::sync_channel(0);
        drop(std::mem::replace(&mut self.receiver, closed));
        let _ = self.child.kill();
        let _ = self.child.wait();

        match self.worker.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(anyhow!("ffmpeg reader thread panicked")),
            },
            None => Ok(()),
        }
    }
}

impl Drop for FfmpegInput {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.shutdown();
        }
    }
}

pub fn ffmpeg_decode_args(input_path: &Path, width: u32, height: u32, looping: bool) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
    ];
    if looping {
        args.push("-stream_loop".to_owned());
        args.push("-1".to_owned());
    }
    args.extend([
        "-i".to_owned(),
        input_path.to_string_lossy().into_owned(),
        "-f".to_owned(),
        "rawvideo".to_owned(),
        "-pix_fmt".to_owned(),
        "rgba".to_owned(),
        "-s".to_owned(),
        format!("{width}x{height}"),
        "-sws_flags".to_owned(),
        "area".to_owned(),
        "-".to_owned(),
    ]);
    args
}
