use std::path::Path;

use crate::config::RunConfig;

/// Supported video containers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFormat {
    Mp4,
    Mov,
    Mkv,
    Avi,
}

/// Detect video format from file extension
pub fn detect_video_format(path: &Path) -> Option<VideoFormat> {
    let ext = path.extension().and_then(|s| s.to_str())?;
    match ext.to_lowercase().as_str() {
        "mp4" => Some(VideoFormat::Mp4),
        "mov" => Some(VideoFormat::Mov),
        "mkv" => Some(VideoFormat::Mkv),
        "avi" => Some(VideoFormat::Avi),
        _ => None,
    }
}

pub fn is_supported_video(path: &Path) -> bool {
    detect_video_format(path).is_some()
}

/// ffmpeg arguments between input and output: H.264 at the configured CRF
/// and preset, AAC audio, container metadata carried over.
pub fn video_args(config: &RunConfig) -> Vec<String> {
    let crf = config.video_crf.to_string();
    [
        "-vcodec",
        "libx264",
        "-crf",
        crf.as_str(),
        "-preset",
        config.video_preset.as_str(),
        "-acodec",
        "aac",
        "-b:a",
        "128k",
        "-map_metadata",
        "0",
    ]
    .map(String::from)
    .into()
}
