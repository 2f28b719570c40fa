use anyhow::{Context, Result};
use indicatif::MultiProgress;
use log::{error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::backup::{copy_preserving_times, preserve_timestamps};
use crate::config::RunConfig;
use crate::format::{compression_ratio, format_size};
use crate::image::{ImageFormat, detect_image_format, image_args};
use crate::progress::ProgressLogger;
use crate::stats::{
    FileOutcome, ROOT_FOLDER, RunStatistics, StatisticsTracker, Tally, signed_difference,
};
use crate::transcode::{TranscodeJob, Transcoder};
use crate::video::{is_supported_video, video_args};

/// Folder inside the source that receives outputs when not overwriting.
pub const OUTPUT_DIR: &str = "compressed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Image(ImageFormat),
}

impl MediaKind {
    pub fn detect(path: &Path) -> Option<Self> {
        if is_supported_video(path) {
            Some(Self::Video)
        } else {
            detect_image_format(path).map(Self::Image)
        }
    }

    pub fn encoding_args(self, config: &RunConfig) -> Vec<String> {
        match self {
            Self::Video => video_args(config),
            Self::Image(format) => image_args(format, config),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub kind: MediaKind,
}

fn collect_media(dir: &Path, recursive: bool, skip: &Path, found: &mut Vec<MediaFile>) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("Failed to read directory: {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read directory: {}", dir.display()))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .with_context(|| format!("Failed to inspect {}", path.display()))?;

        if file_type.is_dir() {
            if recursive && path != skip {
                collect_media(&path, recursive, skip, found)?;
            }
        } else if let Some(kind) = MediaKind::detect(&path).filter(|_| path.is_file()) {
            found.push(MediaFile { path, kind });
        }
    }
    Ok(())
}

/// Media files in `source` (or its whole tree when `recursive`), sorted by
/// path. The `compressed` output folder is never scanned.
pub fn discover_media(source: &Path, recursive: bool) -> Result<Vec<MediaFile>> {
    let mut found = Vec::new();
    collect_media(source, recursive, &source.join(OUTPUT_DIR), &mut found)?;
    found.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(found)
}

/// The file's parent relative to `source`, or [`ROOT_FOLDER`].
pub fn folder_key(source: &Path, file: &Path) -> String {
    match file.parent().and_then(|parent| parent.strip_prefix(source).ok()) {
        Some(relative) if !relative.as_os_str().is_empty() => relative.to_string_lossy().into_owned(),
        _ => ROOT_FOLDER.to_string(),
    }
}

/// Where the encoder writes: `<source>/compressed/<relative path>`, or a
/// `<stem>_tmp<ext>` sibling that later replaces the original.
pub fn output_path(source: &Path, file: &Path, overwrite: bool) -> PathBuf {
    if overwrite {
        let stem = file.file_stem().unwrap_or_default().to_string_lossy();
        let name = match file.extension() {
            Some(ext) => format!("{stem}_tmp.{}", ext.to_string_lossy()),
            None => format!("{stem}_tmp"),
        };
        file.with_file_name(name)
    } else {
        let relative = file.strip_prefix(source).unwrap_or(file);
        source.join(OUTPUT_DIR).join(relative)
    }
}

/// What happened to an encoded output once its size was known.
enum Settlement {
    Compressed,
    CopiedOriginal,
    DiscardedLarger,
}

/// Walks a source folder, encodes every media file and records each outcome.
pub struct Pipeline<'a> {
    config: &'a RunConfig,
    transcoder: &'a dyn Transcoder,
    tracker: StatisticsTracker,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a RunConfig, transcoder: &'a dyn Transcoder) -> Self {
        Self {
            config,
            transcoder,
            tracker: StatisticsTracker::new(config.recursive),
        }
    }

    pub fn run(mut self, multi_progress: &MultiProgress) -> Result<RunStatistics> {
        let started = Instant::now();
        let config = self.config;
        let source = &config.source_folder;
        let files = discover_media(source, config.recursive)?;

        if files.is_empty() {
            info!("No media files found to compress.");
        } else {
            if !config.overwrite {
                let output_dir = source.join(OUTPUT_DIR);
                fs::create_dir_all(&output_dir)
                    .with_context(|| format!("Failed to create output folder: {}", output_dir.display()))?;
            }
            info!("Found {} media file(s) to process...", files.len());

            let total = files.len();
            let mut progress = ProgressLogger::new(total as u64, multi_progress);
            for (index, file) in files.iter().enumerate() {
                let key = config.recursive.then(|| folder_key(source, &file.path));
                let original_size = fs::metadata(&file.path)
                    .with_context(|| format!("Failed to read {}", file.path.display()))?
                    .len();
                self.tracker.register_discovered_file(original_size, key.as_deref())?;

                let name = file
                    .path
                    .strip_prefix(source)
                    .unwrap_or(&file.path)
                    .to_string_lossy()
                    .into_owned();
                info!("[{}/{total}] {name} ({})", index + 1, format_size(original_size));
                self.process(file, &name, original_size, key.as_deref(), &mut progress)?;
                progress.inc();
            }
            progress.finish();
        }

        self.tracker.finalize(started.elapsed().as_secs_f64())?;
        Ok(self.tracker.into_statistics())
    }

    /// Exactly one counter is bumped per file. `Err` is reserved for
    /// tracker misuse; per-file failures become error outcomes.
    fn process(
        &mut self,
        file: &MediaFile,
        name: &str,
        original_size: u64,
        key: Option<&str>,
        progress: &mut ProgressLogger,
    ) -> Result<()> {
        let out_path = output_path(&self.config.source_folder, &file.path, self.config.overwrite);

        if !self.config.overwrite && out_path.exists() {
            let existing = fs::metadata(&out_path).map(|m| m.len()).unwrap_or(0);
            info!("  Skipping (already exists): {}", format_size(existing));
            self.tracker
                .update_totals(original_size, existing, 0, Tally::Skipped, key)?;
            return Ok(());
        }

        let started = Instant::now();
        let result = self
            .encode(file, &out_path, name, progress)
            .and_then(|compressed| {
                self.settle(&file.path, &out_path, original_size, compressed)
                    .map(|settlement| (compressed, settlement))
            });
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok((compressed, Settlement::Compressed)) => {
                let saved = signed_difference(original_size, compressed);
                let ratio = compression_ratio(saved, original_size);
                if ratio < 0.0 {
                    warn!(
                        "  Compressed (larger): {} -> {} ({:.1}% increase)",
                        format_size(original_size),
                        format_size(compressed),
                        -ratio
                    );
                } else {
                    info!(
                        "  Compressed: {} -> {} ({ratio:.1}% reduction)",
                        format_size(original_size),
                        format_size(compressed)
                    );
                }
                self.tracker
                    .record_outcome(FileOutcome::success(name, original_size, compressed, elapsed), key)?;
                self.tracker
                    .update_totals(original_size, compressed, saved, Tally::Processed, key)?;
            }
            Ok((_, Settlement::CopiedOriginal)) => {
                warn!(
                    "  Compressed file larger, copying original instead: {}",
                    format_size(original_size)
                );
                self.tracker
                    .record_outcome(FileOutcome::copied_original(name, original_size, elapsed), key)?;
                self.tracker
                    .update_totals(original_size, original_size, 0, Tally::Processed, key)?;
            }
            Ok((compressed, Settlement::DiscardedLarger)) => {
                warn!(
                    "  Compressed file is larger ({} > {}), skipping...",
                    format_size(compressed),
                    format_size(original_size)
                );
                self.tracker
                    .update_totals(original_size, 0, 0, Tally::Skipped, key)?;
            }
            Err(e) => {
                error!("  Error processing {name}: {e:#}");
                if out_path.exists() {
                    if let Err(remove) = fs::remove_file(&out_path) {
                        warn!("  Could not remove failed output {}: {remove}", out_path.display());
                    }
                }
                self.tracker
                    .record_outcome(FileOutcome::error(name, original_size, elapsed, format!("{e:#}")), key)?;
                self.tracker.update_totals(original_size, 0, 0, Tally::Error, key)?;
            }
        }
        Ok(())
    }

    /// Run the transcoder and return the output size.
    fn encode(
        &self,
        file: &MediaFile,
        out_path: &Path,
        name: &str,
        progress: &mut ProgressLogger,
    ) -> Result<u64> {
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let job = TranscodeJob {
            input: &file.path,
            output: out_path,
            args: file.kind.encoding_args(self.config),
            label: name,
        };
        progress.start_file(name);
        let result = self.transcoder.transcode(&job, progress.file_bar());
        progress.finish_file();
        result?;

        preserve_timestamps(&file.path, out_path).context("Failed to preserve timestamps")?;
        Ok(fs::metadata(out_path)
            .with_context(|| format!("Encoder produced no output at {}", out_path.display()))?
            .len())
    }

    /// Apply the larger-output policy and, when overwriting, move the output
    /// over the original.
    fn settle(&self, input: &Path, out_path: &Path, original_size: u64, compressed: u64) -> Result<Settlement> {
        if compressed > original_size {
            if self.config.keep_if_larger {
                warn!(
                    "  Compressed file is larger than original ({} > {})",
                    format_size(compressed),
                    format_size(original_size)
                );
            } else {
                fs::remove_file(out_path)
                    .with_context(|| format!("Failed to remove {}", out_path.display()))?;
                if self.config.overwrite {
                    return Ok(Settlement::DiscardedLarger);
                }
                copy_preserving_times(input, out_path)
                    .with_context(|| format!("Failed to copy original to {}", out_path.display()))?;
                return Ok(Settlement::CopiedOriginal);
            }
        }

        if self.config.overwrite {
            fs::rename(out_path, input)
                .with_context(|| format!("Failed to replace {}", input.display()))?;
        }
        Ok(Settlement::Compressed)
    }
}
