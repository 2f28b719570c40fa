use clap::ValueEnum;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("video_crf must be between 0 and 51, got {0}")]
    VideoCrf(u8),
    #[error("image_quality must be between 0 and 100, got {0}")]
    ImageQuality(u8),
    #[error("image_resize must be between 1 and 100, got {0}")]
    ImageResize(u8),
    #[error("progress_interval must be a positive number of seconds, got {0}")]
    ProgressInterval(f64),
    #[error("Source folder does not exist: {0}")]
    SourceNotFound(PathBuf),
    #[error("Specified ffmpeg path does not exist: {0}")]
    FfmpegNotFound(PathBuf),
}

/// x264 encoder speed/size trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum VideoPreset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    #[default]
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl VideoPreset {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ultrafast => "ultrafast",
            Self::Superfast => "superfast",
            Self::Veryfast => "veryfast",
            Self::Faster => "faster",
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
            Self::Slower => "slower",
            Self::Veryslow => "veryslow",
        }
    }
}

/// Parameters of one compression run. Also echoed into reports and the run history.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub source_folder: PathBuf,
    pub video_crf: u8,
    pub video_preset: VideoPreset,
    pub image_quality: u8,
    /// Percent of the original dimensions; `None` keeps the size.
    pub image_resize: Option<u8>,
    pub recursive: bool,
    pub overwrite: bool,
    pub ffmpeg_path: Option<PathBuf>,
    /// Seconds between transcoder progress lines.
    pub progress_interval: f64,
    pub keep_if_larger: bool,
    pub backup_dir: Option<PathBuf>,
}

impl RunConfig {
    pub fn new(source_folder: impl Into<PathBuf>) -> Self {
        Self {
            source_folder: source_folder.into(),
            video_crf: 23,
            video_preset: VideoPreset::Medium,
            image_quality: 100,
            image_resize: None,
            recursive: false,
            overwrite: false,
            ffmpeg_path: None,
            progress_interval: 5.0,
            keep_if_larger: false,
            backup_dir: None,
        }
    }

    /// Range checks only; the filesystem is checked by [`RunConfig::validate_paths`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.video_crf > 51 {
            return Err(ConfigError::VideoCrf(self.video_crf));
        }
        if self.image_quality > 100 {
            return Err(ConfigError::ImageQuality(self.image_quality));
        }
        if let Some(resize) = self.image_resize {
            if !(1..=100).contains(&resize) {
                return Err(ConfigError::ImageResize(resize));
            }
        }
        if !(self.progress_interval > 0.0 && self.progress_interval.is_finite()) {
            return Err(ConfigError::ProgressInterval(self.progress_interval));
        }
        Ok(())
    }

    pub fn validate_paths(&self) -> Result<(), ConfigError> {
        if !self.source_folder.is_dir() {
            return Err(ConfigError::SourceNotFound(self.source_folder.clone()));
        }
        if let Some(path) = &self.ffmpeg_path {
            if !path.exists() {
                return Err(ConfigError::FfmpegNotFound(path.clone()));
            }
        }
        Ok(())
    }

    /// Label used to name reports: the source folder's final component.
    pub fn run_label(&self) -> String {
        self.source_folder
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_folder.display().to_string())
    }
}
