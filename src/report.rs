use regex::Regex;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use thiserror::Error;

use crate::config::RunConfig;
use crate::format::{format_duration, format_signed_size, format_size};
use crate::logging::EventSink;
use crate::stats::{RunStatistics, RunSummary};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to create report directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("Failed to create report {path}: {source}")]
    CreateFile { path: PathBuf, source: io::Error },
    #[error("Failed to write report {path}: {source}")]
    Write { path: PathBuf, source: csv::Error },
    #[error("Failed to write report {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Keeps alphanumerics plus the given extra characters, trims, then maps
/// spaces and path separators to `_`.
fn sanitize(name: &str, keep: &[char]) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || keep.contains(c))
        .collect::<String>()
        .trim()
        .chars()
        .map(|c| if matches!(c, ' ' | '/' | '\\') { '_' } else { c })
        .collect()
}

/// Filesystem-safe form of a run label.
pub fn safe_run_name(label: &str) -> String {
    let name = sanitize(label, &[' ', '-', '_']);
    if name.is_empty() { "run".to_string() } else { name }
}

/// Filesystem-safe form of a folder key; empty or "." becomes "root".
pub fn safe_folder_name(folder_key: &str) -> String {
    let name = sanitize(folder_key, &[' ', '-', '_', '/', '\\']);
    if name.is_empty() || name == "." { "root".to_string() } else { name }
}

static COUNTER_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)(\s*\(\d+\))?$").expect("counter pattern is valid"));

/// Strips a trailing " (n)" counter from a file stem. Unusual stems that
/// don't fit the pattern are used whole.
fn counter_base(stem: &str) -> String {
    COUNTER_SUFFIX
        .captures(stem)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| stem.to_string())
}

/// Returns `path` if free, otherwise `"<base> (<n>)<ext>"` with `n` one past
/// the highest counter already present next to it.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let base = counter_base(&stem);

    let pattern = format!(r"^{}\s*\((\d+)\){}$", regex::escape(&base), regex::escape(&suffix));
    let highest = Regex::new(&pattern).ok().and_then(|re| {
        fs::read_dir(parent)
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                re.captures(&name)
                    .and_then(|caps| caps.get(1))
                    .and_then(|n| n.as_str().parse::<u64>().ok())
            })
            .max()
    });

    let counter = highest.map_or(1, |n| n + 1);
    parent.join(format!("{base} ({counter}){suffix}"))
}

/// Writes CSV reports for a finished run under `<output_dir>/reports`.
pub struct ReportGenerator {
    output_dir: PathBuf,
    sink: Arc<dyn EventSink>,
}

impl ReportGenerator {
    pub fn new(output_dir: impl Into<PathBuf>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            output_dir: output_dir.into(),
            sink,
        }
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.output_dir.join("reports")
    }

    /// Write the run's report(s) and return their paths.
    ///
    /// Recursive runs with a folder breakdown get one report per non-empty
    /// folder plus an aggregate, grouped in a directory named after the
    /// run. Everything else gets a single report.
    pub fn generate(
        &self,
        stats: &RunStatistics,
        run_label: &str,
        recursive: bool,
        run_config: Option<&RunConfig>,
    ) -> Result<Vec<PathBuf>, ReportError> {
        let reports_dir = self.reports_dir();
        let safe_name = safe_run_name(run_label);

        let folders = stats.folders.as_ref().filter(|f| recursive && !f.is_empty());
        let Some(folders) = folders else {
            create_dir(&reports_dir)?;
            let path = self.write_report(
                &reports_dir.join(format!("{safe_name}_report.csv")),
                &stats.summary,
                run_label,
                None,
                run_config,
            )?;
            self.sink.info(&format!("Report generated: {}", path.display()));
            return Ok(vec![path]);
        };

        let run_dir = reports_dir.join(&safe_name);
        create_dir(&run_dir)?;

        let mut paths = Vec::new();
        for (folder_key, folder) in folders.iter() {
            if folder.total_files == 0 {
                continue;
            }
            let title = if folder_key == "." { "root" } else { folder_key };
            let path = self.write_report(
                &run_dir.join(format!("{}_report.csv", safe_folder_name(folder_key))),
                folder,
                title,
                Some(run_label),
                run_config,
            )?;
            self.sink.info(&format!("Report generated: {}", path.display()));
            paths.push(path);
        }

        let mut aggregated = RunSummary::new();
        for (_, folder) in folders.iter() {
            aggregated.absorb(folder);
        }
        aggregated.total_processing_time = stats.summary.total_processing_time;

        let path = self.write_report(
            &run_dir.join("aggregated_report.csv"),
            &aggregated,
            &format!("{run_label} (All Folders)"),
            None,
            run_config,
        )?;
        self.sink.info(&format!("Aggregated report generated: {}", path.display()));
        paths.push(path);

        Ok(paths)
    }

    /// Write one report at `path`, or next to it if that name is taken.
    pub fn write_report(
        &self,
        path: &Path,
        summary: &RunSummary,
        title: &str,
        parent_folder: Option<&str>,
        run_config: Option<&RunConfig>,
    ) -> Result<PathBuf, ReportError> {
        let target = unique_path(path);
        if target != path {
            self.sink.info(&format!(
                "Report already exists, creating: {}",
                target.file_name().unwrap_or_default().to_string_lossy()
            ));
        }

        let mut file = File::create(&target).map_err(|source| ReportError::CreateFile {
            path: target.clone(),
            source,
        })?;
        let io_err = |source: io::Error| ReportError::Io {
            path: target.clone(),
            source,
        };

        for row in report_rows(summary, title, parent_folder, run_config) {
            if row.is_empty() {
                // csv would emit `""` for an empty record; separators are bare newlines
                file.write_all(b"\n").map_err(io_err)?;
                continue;
            }
            let mut writer = csv::Writer::from_writer(&mut file);
            writer.write_record(&row).map_err(|source| ReportError::Write {
                path: target.clone(),
                source,
            })?;
            writer.flush().map_err(io_err)?;
        }
        file.flush().map_err(io_err)?;

        Ok(target)
    }
}

fn create_dir(path: &Path) -> Result<(), ReportError> {
    fs::create_dir_all(path).map_err(|source| ReportError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

fn row<const N: usize>(fields: [String; N]) -> Vec<String> {
    fields.into()
}

/// Every row of one report, in file order. Empty rows separate sections.
fn report_rows(
    summary: &RunSummary,
    title: &str,
    parent_folder: Option<&str>,
    run_config: Option<&RunConfig>,
) -> Vec<Vec<String>> {
    let mut rows = vec![row([format!("# Compression Report: {title}")])];
    if let Some(parent) = parent_folder {
        rows.push(row([format!("# Parent Folder: {parent}")]));
    }
    rows.push(row([format!(
        "# Generated: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    )]));
    rows.push(Vec::new());

    rows.push(row(["# Summary".into()]));
    rows.push(row(["# Total Files Found".into(), summary.total_files.to_string()]));
    rows.push(row(["# Files Processed".into(), summary.processed.to_string()]));
    rows.push(row(["# Files Skipped".into(), summary.skipped.to_string()]));
    rows.push(row(["# Errors".into(), summary.errors.to_string()]));
    rows.push(Vec::new());

    rows.push(row(["# Size Statistics".into()]));
    rows.push(row(["# Total Original Size".into(), format_size(summary.total_original_size)]));
    rows.push(row(["# Total Compressed Size".into(), format_size(summary.total_compressed_size)]));
    rows.push(row(["# Total Space Saved".into(), format_signed_size(summary.space_saved)]));
    rows.push(row([
        "# Overall Compression Ratio".into(),
        format!("{:.2}%", summary.compression_ratio()),
    ]));
    if summary.total_processing_time > 0.0 {
        rows.push(row([
            "# Total Processing Time".into(),
            format_duration(summary.total_processing_time),
        ]));
    }
    rows.push(Vec::new());

    if !summary.files.is_empty() {
        rows.push(row(["# File Details".into()]));
        rows.push(
            [
                "Filename",
                "Original Size",
                "Compressed Size",
                "Space Saved",
                "Compression Ratio (%)",
                "Processing Time (s)",
                "Status",
            ]
            .map(String::from)
            .into(),
        );
        for file in &summary.files {
            rows.push(row([
                file.name.clone(),
                format_size(file.original_size),
                format_size(file.compressed_size),
                format_signed_size(file.space_saved),
                format!("{:.2}", file.compression_ratio),
                format!("{:.2}", file.processing_time),
                file.status_label(),
            ]));
        }
        rows.push(Vec::new());
    }

    if let Some(config) = run_config {
        rows.push(row(["# Arguments".into()]));
        rows.push(row(["# Source Folder".into(), config.source_folder.display().to_string()]));
        rows.push(row(["# Video CRF".into(), config.video_crf.to_string()]));
        rows.push(row(["# Video Preset".into(), config.video_preset.as_str().to_string()]));
        rows.push(row(["# Image Quality".into(), config.image_quality.to_string()]));
        if let Some(resize) = config.image_resize {
            rows.push(row(["# Image Resize".into(), format!("{resize}%")]));
        }
        rows.push(row(["# Recursive".into(), config.recursive.to_string()]));
        rows.push(row(["# Overwrite".into(), config.overwrite.to_string()]));
        rows.push(row(["# Keep If Larger".into(), config.keep_if_larger.to_string()]));
        rows.push(row(["# Progress Interval".into(), config.progress_interval.to_string()]));
        if let Some(ffmpeg) = &config.ffmpeg_path {
            rows.push(row(["# FFmpeg Path".into(), ffmpeg.display().to_string()]));
        }
        if let Some(backup) = &config.backup_dir {
            rows.push(row(["# Backup Directory".into(), backup.display().to_string()]));
        }
    }

    rows
}
