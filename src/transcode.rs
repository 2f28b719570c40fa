use anyhow::{Context, Result, bail};
use ffmpeg_sidecar::command::{FfmpegCommand, ffmpeg_is_installed};
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};
use indicatif::ProgressBar;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::RunConfig;

/// One ffmpeg invocation: `-i <input> <args> -y <output>`.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeJob<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub args: Vec<String>,
    /// Short name used in progress lines.
    pub label: &'a str,
}

/// Runs one encode to completion. An `Err` means the output must not be used.
pub trait Transcoder {
    fn transcode(&self, job: &TranscodeJob<'_>, bar: Option<&ProgressBar>) -> Result<()>;
}

pub struct FfmpegTranscoder {
    ffmpeg_path: Option<PathBuf>,
    progress_interval: Duration,
}

impl FfmpegTranscoder {
    /// Uses the configured binary, or whatever ffmpeg is on `PATH`.
    pub fn new(config: &RunConfig) -> Result<Self> {
        match &config.ffmpeg_path {
            Some(path) => info!("Using ffmpeg at: {}", path.display()),
            None if ffmpeg_is_installed() => debug!("Using ffmpeg from PATH"),
            None => bail!(
                "FFmpeg not found. Install FFmpeg and add it to PATH, or pass --ffmpeg-path"
            ),
        }

        let progress_interval = Duration::try_from_secs_f64(config.progress_interval)
            .with_context(|| format!("Invalid progress interval: {}", config.progress_interval))?;

        Ok(Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            progress_interval,
        })
    }
}

fn progress_line(time: &str, frame: u32, fps: f32, speed: f32) -> String {
    format!("  [Progress] Time: {time} | Frame: {frame} | FPS: {fps:.1} | Speed: {speed:.2}x")
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, job: &TranscodeJob<'_>, bar: Option<&ProgressBar>) -> Result<()> {
        let mut command = match &self.ffmpeg_path {
            Some(path) => FfmpegCommand::new_with_path(path),
            None => FfmpegCommand::new(),
        };
        command
            .input(job.input.to_string_lossy().as_ref())
            .args(&job.args)
            .overwrite()
            .output(job.output.to_string_lossy().as_ref());
        debug!(
            "ffmpeg -i {} {} -y {}",
            job.input.display(),
            job.args.join(" "),
            job.output.display()
        );

        let mut child = command.spawn().context("Failed to spawn ffmpeg process")?;

        let mut errors = Vec::new();
        let mut last_report = Instant::now();
        for event in child.iter().context("Failed to read ffmpeg output")? {
            match event {
                FfmpegEvent::Progress(progress) => {
                    if let Some(bar) = bar {
                        bar.set_message(format!("{} ({})", job.label, progress.time));
                    }
                    if last_report.elapsed() >= self.progress_interval {
                        info!(
                            "{}",
                            progress_line(&progress.time, progress.frame, progress.fps, progress.speed)
                        );
                        last_report = Instant::now();
                    }
                }
                FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, message) | FfmpegEvent::Error(message) => {
                    debug!("ffmpeg: {message}");
                    errors.push(message);
                }
                _ => {}
            }
        }

        let status = child.wait().context("Failed to wait for ffmpeg process")?;
        if !status.success() {
            match errors.last() {
                Some(last) => bail!("FFmpeg exited with {status}: {last}"),
                None => bail!("FFmpeg exited with {status}"),
            }
        }
        Ok(())
    }
}
