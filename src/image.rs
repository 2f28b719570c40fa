use std::path::Path;

use crate::config::RunConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    WebP,
}

pub fn detect_image_format(path: &Path) -> Option<ImageFormat> {
    let ext = path.extension().and_then(|s| s.to_str())?;
    match ext.to_lowercase().as_str() {
        "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
        "png" => Some(ImageFormat::Png),
        "webp" => Some(ImageFormat::WebP),
        _ => None,
    }
}

pub fn is_supported_image(path: &Path) -> bool {
    detect_image_format(path).is_some()
}

/// Encoder quality for lossy formats. Quality 100 is capped at 95, since
/// higher settings mostly inflate the file; 95..=99 drop by five; below
/// that the range is scaled onto 1..=90.
pub fn lossy_quality(image_quality: u8) -> u8 {
    match image_quality {
        100.. => 95,
        95..=99 => image_quality - 5,
        _ => {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let scaled = (f64::from(image_quality) / 94.0 * 90.0) as u8;
            scaled.clamp(1, 90)
        }
    }
}

/// ffmpeg `-q:v` for JPEG: 2 is best, 31 worst.
pub fn jpeg_qscale(image_quality: u8) -> u8 {
    let jpeg_quality = u32::from(lossy_quality(image_quality));
    let qscale = 2 + 29 * (100 - jpeg_quality) / 100;
    u8::try_from(qscale.clamp(2, 31)).unwrap_or(31)
}

/// PNG `-compression_level` 0..=9; higher quality compresses less.
pub fn png_compression_level(image_quality: u8) -> u8 {
    let quality = u32::from(image_quality.min(100));
    u8::try_from((900 - 9 * quality) / 100).unwrap_or(9)
}

/// `-vf` scale filter for a resize percentage, or `None` to keep the size.
pub fn scale_filter(resize_percent: Option<u8>) -> Option<String> {
    let percent = resize_percent.filter(|p| *p < 100)?;
    let factor = f64::from(percent) / 100.0;
    Some(format!("scale=iw*{factor}:ih*{factor}:flags=lanczos"))
}

/// ffmpeg arguments between input and output. The output keeps the input's format.
pub fn image_args(format: ImageFormat, config: &RunConfig) -> Vec<String> {
    let mut args = match format {
        ImageFormat::Jpeg => vec!["-q:v".to_string(), jpeg_qscale(config.image_quality).to_string()],
        ImageFormat::Png => vec![
            "-compression_level".to_string(),
            png_compression_level(config.image_quality).to_string(),
        ],
        ImageFormat::WebP => vec!["-quality".to_string(), lossy_quality(config.image_quality).to_string()],
    };

    if let Some(filter) = scale_filter(config.image_resize) {
        args.push("-vf".to_string());
        args.push(filter);
    }

    args
}
