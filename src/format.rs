/// Format a byte count with binary units, two decimals ("1.50 KB").
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    #[allow(clippy::cast_precision_loss)]
    let mut size = bytes as f64;

    for unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }

    format!("{size:.2} PB")
}

/// Same as [`format_size`] but for values that may go negative (space saved
/// when the output grew).
pub fn format_signed_size(bytes: i64) -> String {
    if bytes < 0 {
        format!("-{}", format_size(bytes.unsigned_abs()))
    } else {
        format_size(bytes.unsigned_abs())
    }
}

/// Format seconds as "1h 2m 3.4s", "2m 3.4s" or "3.4s". Hours and minutes
/// only appear once they are non-zero.
pub fn format_duration(total_seconds: f64) -> String {
    let total_seconds = total_seconds.max(0.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let hours = (total_seconds / 3600.0).floor() as u64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let minutes = ((total_seconds % 3600.0) / 60.0).floor() as u64;
    let seconds = total_seconds % 60.0;

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds:.1}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:.1}s")
    } else {
        format!("{seconds:.1}s")
    }
}

/// Percentage of `original` that was saved; 0 when there was nothing to save.
pub fn compression_ratio(space_saved: i64, original: u64) -> f64 {
    if original > 0 {
        #[allow(clippy::cast_precision_loss)]
        let ratio = space_saved as f64 / original as f64 * 100.0;
        ratio
    } else {
        0.0
    }
}
