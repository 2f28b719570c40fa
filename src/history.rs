use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::RunConfig;
use crate::format::{compression_ratio, format_duration, format_signed_size, format_size};
use crate::logging::EventSink;
use crate::stats::RunSummary;

pub const LEDGER_FILE: &str = "statistics.csv";
pub const HISTORY_FILE: &str = "run_history.csv";

const LEDGER_HEADER: [&str; 8] = [
    "total_runs",
    "total_files_processed",
    "total_files_skipped",
    "total_files_errors",
    "total_original_size_bytes",
    "total_compressed_size_bytes",
    "total_space_saved_bytes",
    "last_updated",
];

const HISTORY_HEADER: [&str; 14] = [
    "timestamp",
    "source_folder",
    "files_processed",
    "files_skipped",
    "files_errors",
    "space_saved_bytes",
    "original_size_bytes",
    "compressed_size_bytes",
    "video_crf",
    "video_preset",
    "image_quality",
    "recursive",
    "overwrite",
    "processing_time_seconds",
];

const RULE: &str = "============================================================";

fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Running totals over every run folded in so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CumulativeLedger {
    pub total_runs: u64,
    pub total_files_processed: u64,
    pub total_files_skipped: u64,
    pub total_files_errors: u64,
    pub total_original_size_bytes: u64,
    pub total_compressed_size_bytes: u64,
    pub total_space_saved_bytes: i64,
    pub last_updated: Option<String>,
}

impl CumulativeLedger {
    /// Add one run's counters and sizes and stamp the ledger.
    pub fn fold(&mut self, run: &RunSummary, timestamp: impl Into<String>) {
        // Values come from disk and may be arbitrarily large
        self.total_runs = self.total_runs.saturating_add(1);
        self.total_files_processed = self.total_files_processed.saturating_add(run.processed);
        self.total_files_skipped = self.total_files_skipped.saturating_add(run.skipped);
        self.total_files_errors = self.total_files_errors.saturating_add(run.errors);
        self.total_original_size_bytes = self
            .total_original_size_bytes
            .saturating_add(run.total_original_size);
        self.total_compressed_size_bytes = self
            .total_compressed_size_bytes
            .saturating_add(run.total_compressed_size);
        self.total_space_saved_bytes = self.total_space_saved_bytes.saturating_add(run.space_saved);
        self.last_updated = Some(timestamp.into());
    }

    fn from_record(headers: &csv::StringRecord, record: &csv::StringRecord) -> Self {
        let text = |name: &str| column(headers, record, name).trim();
        let count = |name: &str| text(name).parse::<u64>().unwrap_or(0);
        Self {
            total_runs: count("total_runs"),
            total_files_processed: count("total_files_processed"),
            total_files_skipped: count("total_files_skipped"),
            total_files_errors: count("total_files_errors"),
            total_original_size_bytes: count("total_original_size_bytes"),
            total_compressed_size_bytes: count("total_compressed_size_bytes"),
            total_space_saved_bytes: text("total_space_saved_bytes").parse().unwrap_or(0),
            last_updated: Some(text("last_updated"))
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }

    fn to_record(&self) -> [String; 8] {
        [
            self.total_runs.to_string(),
            self.total_files_processed.to_string(),
            self.total_files_skipped.to_string(),
            self.total_files_errors.to_string(),
            self.total_original_size_bytes.to_string(),
            self.total_compressed_size_bytes.to_string(),
            self.total_space_saved_bytes.to_string(),
            self.last_updated.clone().unwrap_or_default(),
        ]
    }
}

/// One row of the run history. Values are kept as the text stored on disk;
/// columns missing from the file are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunHistoryEntry {
    pub timestamp: String,
    pub source_folder: String,
    pub files_processed: String,
    pub files_skipped: String,
    pub files_errors: String,
    pub space_saved_bytes: String,
    pub original_size_bytes: String,
    pub compressed_size_bytes: String,
    pub video_crf: String,
    pub video_preset: String,
    pub image_quality: String,
    pub recursive: String,
    pub overwrite: String,
    pub processing_time_seconds: String,
}

impl RunHistoryEntry {
    pub fn new(run: &RunSummary, config: &RunConfig, timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            source_folder: config.source_folder.display().to_string(),
            files_processed: run.processed.to_string(),
            files_skipped: run.skipped.to_string(),
            files_errors: run.errors.to_string(),
            space_saved_bytes: run.space_saved.to_string(),
            original_size_bytes: run.total_original_size.to_string(),
            compressed_size_bytes: run.total_compressed_size.to_string(),
            video_crf: config.video_crf.to_string(),
            video_preset: config.video_preset.as_str().to_string(),
            image_quality: config.image_quality.to_string(),
            recursive: config.recursive.to_string(),
            overwrite: config.overwrite.to_string(),
            processing_time_seconds: format!("{:.2}", run.total_processing_time),
        }
    }

    fn from_record(headers: &csv::StringRecord, record: &csv::StringRecord) -> Self {
        let text = |name: &str| column(headers, record, name).to_string();
        let space_saved = match column(headers, record, "space_saved_bytes") {
            "" => column(headers, record, "space_saved").to_string(),
            value => value.to_string(),
        };
        Self {
            timestamp: text("timestamp"),
            source_folder: text("source_folder"),
            files_processed: text("files_processed"),
            files_skipped: text("files_skipped"),
            files_errors: text("files_errors"),
            space_saved_bytes: space_saved,
            original_size_bytes: text("original_size_bytes"),
            compressed_size_bytes: text("compressed_size_bytes"),
            video_crf: text("video_crf"),
            video_preset: text("video_preset"),
            image_quality: text("image_quality"),
            recursive: text("recursive"),
            overwrite: text("overwrite"),
            processing_time_seconds: text("processing_time_seconds"),
        }
    }

    /// Value for the history column `name`; "" for columns this entry doesn't know.
    fn field(&self, name: &str) -> &str {
        match name {
            "timestamp" => &self.timestamp,
            "source_folder" => &self.source_folder,
            "files_processed" => &self.files_processed,
            "files_skipped" => &self.files_skipped,
            "files_errors" => &self.files_errors,
            "space_saved_bytes" | "space_saved" => &self.space_saved_bytes,
            "original_size_bytes" => &self.original_size_bytes,
            "compressed_size_bytes" => &self.compressed_size_bytes,
            "video_crf" => &self.video_crf,
            "video_preset" => &self.video_preset,
            "image_quality" => &self.image_quality,
            "recursive" => &self.recursive,
            "overwrite" => &self.overwrite,
            "processing_time_seconds" => &self.processing_time_seconds,
            _ => "",
        }
    }

    fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "[{}] {}", self.timestamp, self.source_folder)?;
        writeln!(
            out,
            "  Files: {} processed, {} skipped, {} errors",
            or_zero(&self.files_processed),
            or_zero(&self.files_skipped),
            or_zero(&self.files_errors)
        )?;
        if let Ok(saved) = self.space_saved_bytes.trim().parse::<i64>() {
            writeln!(out, "  Space Saved: {}", format_signed_size(saved))?;
        }
        if let Ok(seconds) = self.processing_time_seconds.trim().parse::<f64>() {
            if seconds > 0.0 {
                writeln!(out, "  Processing Time: {}", format_duration(seconds))?;
            }
        }
        if !self.video_crf.is_empty() {
            writeln!(
                out,
                "  Settings: CRF {}, preset {}, quality {}, recursive {}, overwrite {}",
                self.video_crf, self.video_preset, self.image_quality, self.recursive, self.overwrite
            )?;
        }
        Ok(())
    }
}

fn or_zero(value: &str) -> &str {
    if value.is_empty() { "0" } else { value }
}

/// Field of `record` under the column named `name`, or "" if there is none.
fn column<'r>(headers: &csv::StringRecord, record: &'r csv::StringRecord, name: &str) -> &'r str {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .and_then(|index| record.get(index))
        .unwrap_or("")
}

/// Owns the cumulative ledger and the run history under one directory.
///
/// Everything here is best-effort: read failures fall back to empty data,
/// write failures are reported through the sink, and nothing returns an
/// error. Two processes sharing a directory race; the last write wins.
pub struct StatisticsManager {
    dir: PathBuf,
    sink: Arc<dyn EventSink>,
}

impl StatisticsManager {
    pub fn new(dir: impl Into<PathBuf>, sink: Arc<dyn EventSink>) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            sink.warn(&format!(
                "Warning: Could not create statistics directory {}: {e}",
                dir.display()
            ));
        }
        Self { dir, sink }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    pub fn load_cumulative_stats(&self) -> CumulativeLedger {
        let path = self.ledger_path();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return CumulativeLedger::default(),
            Err(e) => {
                self.sink.warn(&format!("Warning: Could not read statistics file: {e}"));
                return CumulativeLedger::default();
            }
        };

        match read_ledger(file) {
            Ok(Some(ledger)) => ledger,
            Ok(None) => {
                self.sink.warn(&format!(
                    "Warning: Statistics file {} is empty or malformed, starting fresh",
                    path.display()
                ));
                CumulativeLedger::default()
            }
            Err(e) => {
                self.sink.warn(&format!("Warning: Could not read statistics file: {e}"));
                CumulativeLedger::default()
            }
        }
    }

    pub fn save_cumulative_stats(&self, ledger: &CumulativeLedger) {
        if let Err(e) = self.write_ledger(ledger) {
            self.sink.warn(&format!("Warning: Could not save statistics: {e:#}"));
        }
    }

    fn write_ledger(&self, ledger: &CumulativeLedger) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("Failed to create temporary file in {}", self.dir.display()))?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            writer.write_record(LEDGER_HEADER)?;
            writer.write_record(ledger.to_record())?;
            writer.flush()?;
        }
        let path = self.ledger_path();
        tmp.persist(&path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    /// Fold one run into the ledger and save it. Returns the new ledger.
    pub fn update_cumulative_stats(&self, run: &RunSummary) -> CumulativeLedger {
        let mut ledger = self.load_cumulative_stats();
        ledger.fold(run, now_timestamp());
        self.save_cumulative_stats(&ledger);
        ledger
    }

    pub fn append_run_history(&self, run: &RunSummary, config: &RunConfig) {
        let entry = RunHistoryEntry::new(run, config, now_timestamp());
        if let Err(e) = self.append_entry(&entry) {
            self.sink.warn(&format!("Warning: Could not save run history: {e:#}"));
        }
    }

    /// Rows follow the header already in the file, so history written with
    /// an older column set still reads back by name.
    fn append_entry(&self, entry: &RunHistoryEntry) -> Result<()> {
        let path = self.history_path();
        let existing = existing_header(&path)
            .with_context(|| format!("Failed to read header of {}", path.display()))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let mut writer = csv::Writer::from_writer(file);
        let headers = match existing {
            Some(headers) => {
                if headers.iter().map(str::trim).ne(HISTORY_HEADER) {
                    self.sink.warn(&format!(
                        "Warning: Run history {} uses different columns, writing only those",
                        path.display()
                    ));
                }
                headers
            }
            None => {
                writer.write_record(HISTORY_HEADER)?;
                csv::StringRecord::from(HISTORY_HEADER.to_vec())
            }
        };
        writer.write_record(headers.iter().map(|name| entry.field(name.trim())))?;
        writer.flush()?;
        Ok(())
    }

    /// History rows in file order, oldest first.
    pub fn load_run_history(&self) -> Vec<RunHistoryEntry> {
        let file = match File::open(self.history_path()) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                self.sink.warn(&format!("Warning: Could not read run history: {e}"));
                return Vec::new();
            }
        };

        match read_history(file) {
            Ok(entries) => entries,
            Err(e) => {
                self.sink.warn(&format!("Warning: Could not read run history: {e}"));
                Vec::new()
            }
        }
    }

    pub fn write_stats(&self, out: &mut impl Write) -> io::Result<()> {
        let ledger = self.load_cumulative_stats();
        writeln!(out, "\n{RULE}")?;
        if ledger.total_runs == 0 {
            writeln!(out, "No Statistics Available")?;
            writeln!(out, "{RULE}")?;
            writeln!(out, "Run a compression to start collecting statistics.")?;
            return Ok(());
        }

        writeln!(out, "Cumulative Compression Statistics")?;
        writeln!(out, "{RULE}")?;
        writeln!(out, "Total Runs: {}", ledger.total_runs)?;
        writeln!(out, "Files Processed: {}", ledger.total_files_processed)?;
        writeln!(out, "Files Skipped: {}", ledger.total_files_skipped)?;
        writeln!(out, "Errors: {}", ledger.total_files_errors)?;
        writeln!(out)?;
        writeln!(out, "Total Original Size: {}", format_size(ledger.total_original_size_bytes))?;
        writeln!(
            out,
            "Total Compressed Size: {}",
            format_size(ledger.total_compressed_size_bytes)
        )?;
        writeln!(
            out,
            "Total Space Saved: {}",
            format_signed_size(ledger.total_space_saved_bytes)
        )?;
        writeln!(
            out,
            "Overall Compression Ratio: {:.2}%",
            compression_ratio(ledger.total_space_saved_bytes, ledger.total_original_size_bytes)
        )?;
        if let Some(updated) = &ledger.last_updated {
            writeln!(out, "Last Updated: {updated}")?;
        }
        writeln!(out, "{RULE}")
    }

    /// Newest runs first; `limit` caps how many are shown.
    pub fn write_history(&self, out: &mut impl Write, limit: Option<usize>) -> io::Result<()> {
        let entries = self.load_run_history();
        writeln!(out, "\n{RULE}")?;
        if entries.is_empty() {
            writeln!(out, "No Run History Available")?;
            writeln!(out, "{RULE}")?;
            return Ok(());
        }

        writeln!(out, "Run History")?;
        writeln!(out, "{RULE}")?;
        let shown = limit.map_or(entries.len(), |n| n.min(entries.len()));
        for entry in entries.iter().rev().take(shown) {
            writeln!(out)?;
            entry.write_to(out)?;
        }
        writeln!(out)?;
        if shown < entries.len() {
            writeln!(out, "({shown} of {} runs shown)", entries.len())?;
        }
        writeln!(out, "{RULE}")
    }

    pub fn print_stats(&self) {
        if let Err(e) = self.write_stats(&mut io::stdout().lock()) {
            self.sink.warn(&format!("Warning: Could not print statistics: {e}"));
        }
    }

    pub fn print_history(&self, limit: Option<usize>) {
        if let Err(e) = self.write_history(&mut io::stdout().lock(), limit) {
            self.sink.warn(&format!("Warning: Could not print run history: {e}"));
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// `Ok(None)` when the file has no header or no data row. A short row keeps
/// the fields it has.
fn read_ledger(file: File) -> Result<Option<CumulativeLedger>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = reader.headers()?.clone();
    let mut record = csv::StringRecord::new();
    if headers.is_empty() || !reader.read_record(&mut record)? {
        return Ok(None);
    }
    Ok(Some(CumulativeLedger::from_record(&headers, &record)))
}

/// Header row of an existing, non-empty history file.
fn existing_header(path: &Path) -> Result<Option<csv::StringRecord>, csv::Error> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let headers = csv::ReaderBuilder::new().flexible(true).from_reader(file).headers()?.clone();
    Ok(Some(headers).filter(|h| !h.is_empty()))
}

fn read_history(file: File) -> Result<Vec<RunHistoryEntry>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = reader.headers()?.clone();
    reader
        .records()
        .map(|record| record.map(|r| RunHistoryEntry::from_record(&headers, &r)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> (StatisticsManager, Arc<MemorySink>) {
        let sink = MemorySink::new();
        (
            StatisticsManager::new(dir.path().join("statistics"), sink.clone()),
            sink,
        )
    }

    fn run(processed: u64, skipped: u64, errors: u64) -> RunSummary {
        RunSummary {
            total_files: processed + skipped + errors,
            processed,
            skipped,
            errors,
            total_original_size: 1_000_000,
            total_compressed_size: 500_000,
            space_saved: 500_000,
            ..RunSummary::default()
        }
    }

    fn render_stats(manager: &StatisticsManager) -> String {
        let mut out = Vec::new();
        manager.write_stats(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn render_history(manager: &StatisticsManager, limit: Option<usize>) -> String {
        let mut out = Vec::new();
        manager.write_history(&mut out, limit).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_new_creates_directory() {
        let dir = TempDir::new().unwrap();
        let (manager, sink) = manager(&dir);
        assert!(manager.dir().is_dir());
        assert_eq!(manager.ledger_path(), dir.path().join("statistics/statistics.csv"));
        assert_eq!(manager.history_path(), dir.path().join("statistics/run_history.csv"));
        assert!(sink.warnings().is_empty());
    }

    #[test]
    fn test_load_missing_ledger_is_zero() {
        let dir = TempDir::new().unwrap();
        let (manager, sink) = manager(&dir);
        assert_eq!(manager.load_cumulative_stats(), CumulativeLedger::default());
        assert!(sink.warnings().is_empty());
    }

    #[test]
    fn test_update_from_empty_ledger() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);

        manager.update_cumulative_stats(&run(10, 2, 1));
        let ledger = manager.load_cumulative_stats();

        assert_eq!(ledger.total_runs, 1);
        assert_eq!(ledger.total_files_processed, 10);
        assert_eq!(ledger.total_files_skipped, 2);
        assert_eq!(ledger.total_files_errors, 1);
        assert_eq!(ledger.total_original_size_bytes, 1_000_000);
        assert_eq!(ledger.total_compressed_size_bytes, 500_000);
        assert_eq!(ledger.total_space_saved_bytes, 500_000);
        assert!(ledger.last_updated.is_some());
    }

    #[test]
    fn test_ledger_is_monotonic() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);

        let mut previous = manager.load_cumulative_stats();
        for processed in [3, 0, 7] {
            manager.update_cumulative_stats(&run(processed, 1, 0));
            let current = manager.load_cumulative_stats();
            assert_eq!(current.total_runs, previous.total_runs + 1);
            assert!(current.total_files_processed >= previous.total_files_processed);
            assert!(current.total_files_skipped > previous.total_files_skipped);
            assert!(current.total_original_size_bytes > previous.total_original_size_bytes);
            assert!(current.total_space_saved_bytes > previous.total_space_saved_bytes);
            previous = current;
        }
        assert_eq!(previous.total_files_processed, 10);
    }

    #[test]
    fn test_ledger_file_layout() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);
        let ledger = CumulativeLedger {
            total_runs: 2,
            total_space_saved_bytes: -40,
            last_updated: Some("2024-01-01 12:00:00".to_string()),
            ..CumulativeLedger::default()
        };

        manager.save_cumulative_stats(&ledger);

        let content = fs::read_to_string(manager.ledger_path()).unwrap();
        assert_eq!(
            content,
            "total_runs,total_files_processed,total_files_skipped,total_files_errors,\
             total_original_size_bytes,total_compressed_size_bytes,total_space_saved_bytes,last_updated\n\
             2,0,0,0,0,0,-40,2024-01-01 12:00:00\n"
        );
        assert_eq!(manager.load_cumulative_stats(), ledger);
    }

    #[test]
    fn test_corrupt_fields_become_zero() {
        let dir = TempDir::new().unwrap();
        let (manager, sink) = manager(&dir);
        fs::write(
            manager.ledger_path(),
            "total_runs,total_files_processed,total_files_skipped,total_files_errors,\
             total_original_size_bytes,total_compressed_size_bytes,total_space_saved_bytes,last_updated\n\
             abc,,5,x,1.5,,-,\n",
        )
        .unwrap();

        let ledger = manager.load_cumulative_stats();

        assert_eq!(
            ledger,
            CumulativeLedger {
                total_files_skipped: 5,
                ..CumulativeLedger::default()
            }
        );
        assert!(sink.warnings().is_empty());
    }

    #[test]
    fn test_subset_of_columns_loads() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);
        fs::write(manager.ledger_path(), "total_runs,total_files_processed\n4,20\n").unwrap();

        let ledger = manager.load_cumulative_stats();

        assert_eq!(ledger.total_runs, 4);
        assert_eq!(ledger.total_files_processed, 20);
        assert_eq!(ledger.last_updated, None);
    }

    #[test]
    fn test_empty_ledger_file_warns() {
        let dir = TempDir::new().unwrap();
        let (manager, sink) = manager(&dir);
        fs::write(manager.ledger_path(), "").unwrap();

        assert_eq!(manager.load_cumulative_stats(), CumulativeLedger::default());
        assert_eq!(sink.warnings().len(), 1);
    }

    #[test]
    fn test_header_only_ledger_warns() {
        let dir = TempDir::new().unwrap();
        let (manager, sink) = manager(&dir);
        fs::write(manager.ledger_path(), "total_runs,total_files_processed\n").unwrap();

        assert_eq!(manager.load_cumulative_stats(), CumulativeLedger::default());
        assert_eq!(sink.warnings().len(), 1);
        assert!(sink.warnings()[0].contains("empty or malformed"));
    }

    #[test]
    fn test_extra_ledger_fields_are_ignored() {
        let dir = TempDir::new().unwrap();
        let (manager, sink) = manager(&dir);
        fs::write(manager.ledger_path(), "total_runs,total_files_processed\n1,2,3,4\n").unwrap();

        let ledger = manager.load_cumulative_stats();

        assert_eq!(ledger.total_runs, 1);
        assert_eq!(ledger.total_files_processed, 2);
        assert_eq!(ledger.total_files_skipped, 0);
        assert!(sink.warnings().is_empty());
    }

    #[test]
    fn test_short_ledger_row_keeps_present_fields() {
        let dir = TempDir::new().unwrap();
        let (manager, sink) = manager(&dir);
        fs::write(
            manager.ledger_path(),
            "total_runs,total_files_processed,total_files_skipped,total_files_errors,\
             total_original_size_bytes,total_compressed_size_bytes,total_space_saved_bytes,last_updated\n\
             7,70,3,1,5000,2500\n",
        )
        .unwrap();

        let ledger = manager.load_cumulative_stats();
        assert_eq!(
            ledger,
            CumulativeLedger {
                total_runs: 7,
                total_files_processed: 70,
                total_files_skipped: 3,
                total_files_errors: 1,
                total_original_size_bytes: 5000,
                total_compressed_size_bytes: 2500,
                total_space_saved_bytes: 0,
                last_updated: None,
            }
        );
        assert!(sink.warnings().is_empty());

        let updated = manager.update_cumulative_stats(&run(1, 0, 0));
        assert_eq!(updated.total_runs, 8);
        assert_eq!(updated.total_files_processed, 71);
        assert_eq!(manager.load_cumulative_stats().total_runs, 8);
    }

    #[test]
    fn test_huge_ledger_values_saturate() {
        let dir = TempDir::new().unwrap();
        let (manager, sink) = manager(&dir);
        fs::write(
            manager.ledger_path(),
            format!(
                "total_runs,total_files_processed,total_space_saved_bytes\n{},{},{}\n",
                u64::MAX,
                u64::MAX - 1,
                i64::MAX
            ),
        )
        .unwrap();

        let ledger = manager.update_cumulative_stats(&run(5, 0, 0));

        assert_eq!(ledger.total_runs, u64::MAX);
        assert_eq!(ledger.total_files_processed, u64::MAX);
        assert_eq!(ledger.total_space_saved_bytes, i64::MAX);
        assert_eq!(ledger.total_original_size_bytes, 1_000_000);
        assert!(sink.warnings().is_empty());
    }

    #[test]
    fn test_fold_saturates_negative_savings() {
        let mut ledger = CumulativeLedger {
            total_space_saved_bytes: i64::MIN + 1,
            ..CumulativeLedger::default()
        };
        let larger = RunSummary {
            space_saved: -10,
            ..RunSummary::default()
        };

        ledger.fold(&larger, "2024-01-01 12:00:00");

        assert_eq!(ledger.total_space_saved_bytes, i64::MIN);
        assert_eq!(ledger.total_runs, 1);
    }

    #[test]
    fn test_unreadable_ledger_warns() {
        let dir = TempDir::new().unwrap();
        let (manager, sink) = manager(&dir);
        fs::create_dir(manager.ledger_path()).unwrap();

        assert_eq!(manager.load_cumulative_stats(), CumulativeLedger::default());
        assert!(!sink.warnings().is_empty());
    }

    #[test]
    fn test_write_failures_only_warn() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("statistics");
        fs::write(&blocker, "not a directory").unwrap();
        let sink = MemorySink::new();
        let manager = StatisticsManager::new(&blocker, sink.clone());
        let created_warning = sink.warnings().len();
        assert_eq!(created_warning, 1);

        let ledger = manager.update_cumulative_stats(&run(1, 0, 0));
        manager.append_run_history(&run(1, 0, 0), &RunConfig::new("/test"));

        assert_eq!(ledger.total_runs, 1);
        let warnings = sink.warnings();
        assert!(warnings.iter().any(|w| w.starts_with("Warning: Could not save statistics")));
        assert!(warnings.iter().any(|w| w.starts_with("Warning: Could not save run history")));
        assert!(manager.load_run_history().is_empty());
    }

    #[test]
    fn test_history_round_trip_in_order() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);
        let config = RunConfig::new("/test1");

        manager.append_run_history(&run(5, 0, 0), &config);
        manager.append_run_history(&run(10, 1, 0), &RunConfig::new("/test2"));
        manager.append_run_history(&run(15, 0, 2), &RunConfig::new("/test3"));

        let history = manager.load_run_history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].files_processed, "5");
        assert_eq!(history[0].source_folder, "/test1");
        assert_eq!(history[0].video_preset, "medium");
        assert_eq!(history[0].space_saved_bytes, "500000");
        assert_eq!(history[1].files_processed, "10");
        assert_eq!(history[2].files_errors, "2");

        let content = fs::read_to_string(manager.history_path()).unwrap();
        assert_eq!(content.matches("timestamp,source_folder").count(), 1);
        assert!(content.starts_with(&HISTORY_HEADER.join(",")));
    }

    #[test]
    fn test_history_by_header_name() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);
        fs::write(
            manager.history_path(),
            "source_folder,timestamp,space_saved,files_processed\n/old,2023-05-01 08:00:00,42,7\n",
        )
        .unwrap();

        let history = manager.load_run_history();

        assert_eq!(history.len(), 1);
        assert_eq!(history[0].timestamp, "2023-05-01 08:00:00");
        assert_eq!(history[0].source_folder, "/old");
        assert_eq!(history[0].files_processed, "7");
        assert_eq!(history[0].space_saved_bytes, "42");
        assert_eq!(history[0].video_crf, "");
    }

    #[test]
    fn test_append_follows_existing_header() {
        let dir = TempDir::new().unwrap();
        let (manager, sink) = manager(&dir);
        fs::write(
            manager.history_path(),
            "timestamp,source_folder,files_processed,space_saved\n2023-05-01 08:00:00,/old,7,42\n",
        )
        .unwrap();

        manager.append_run_history(&run(5, 1, 0), &RunConfig::new("/new"));

        let history = manager.load_run_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].source_folder, "/new");
        assert_eq!(history[1].files_processed, "5");
        assert_eq!(history[1].space_saved_bytes, "500000");
        assert_eq!(history[1].files_skipped, "");

        let content = fs::read_to_string(manager.history_path()).unwrap();
        let last = content.lines().last().unwrap();
        assert_eq!(last.split(',').count(), 4);
        assert!(last.ends_with(",/new,5,500000"));
        assert_eq!(sink.warnings().len(), 1);
    }

    #[test]
    fn test_append_to_current_header_is_silent() {
        let dir = TempDir::new().unwrap();
        let (manager, sink) = manager(&dir);

        manager.append_run_history(&run(1, 0, 0), &RunConfig::new("/a"));
        manager.append_run_history(&run(2, 0, 0), &RunConfig::new("/b"));

        assert_eq!(manager.load_run_history().len(), 2);
        assert!(sink.warnings().is_empty());
    }

    #[test]
    fn test_unreadable_history_warns() {
        let dir = TempDir::new().unwrap();
        let (manager, sink) = manager(&dir);
        fs::create_dir(manager.history_path()).unwrap();

        assert!(manager.load_run_history().is_empty());
        assert!(!sink.warnings().is_empty());
    }

    #[test]
    fn test_stats_without_runs() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);
        let output = render_stats(&manager);
        assert!(output.contains("No Statistics Available"));
        assert!(!output.contains("Total Runs"));
    }

    #[test]
    fn test_stats_with_runs() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);
        manager.update_cumulative_stats(&run(10, 2, 0));

        let output = render_stats(&manager);

        assert!(output.contains("Cumulative Compression Statistics"));
        assert!(output.contains("Total Runs: 1"));
        assert!(output.contains("Files Processed: 10"));
        assert!(output.contains("Overall Compression Ratio: 50.00%"));
        assert!(output.contains("Last Updated: "));
    }

    #[test]
    fn test_history_without_runs() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);
        assert!(render_history(&manager, None).contains("No Run History Available"));
    }

    #[test]
    fn test_history_limit_newest_first() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);
        for i in 0..5 {
            manager.append_run_history(&run(i, 0, 0), &RunConfig::new(format!("/test{i}")));
        }

        let output = render_history(&manager, Some(2));

        assert!(output.contains("2 of 5 runs shown"));
        let newest = output.find("/test4").unwrap();
        let next = output.find("/test3").unwrap();
        assert!(newest < next);
        assert!(!output.contains("/test2"));

        let all = render_history(&manager, None);
        assert!(all.contains("/test0"));
        assert!(!all.contains("runs shown"));
    }

    #[test]
    fn test_history_processing_time() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);
        for (seconds, expected) in [("3661.5", "1h 1m 1.5s"), ("125.5", "2m 5.5s"), ("45.7", "45.7s")] {
            fs::write(
                manager.history_path(),
                format!(
                    "timestamp,source_folder,files_processed,processing_time_seconds\n\
                     2024-01-01 12:00:00,/test/folder,5,{seconds}\n"
                ),
            )
            .unwrap();

            let output = render_history(&manager, None);

            assert!(output.contains(&format!("Processing Time: {expected}")), "{output}");
            assert!(output.contains("Files: 5 processed, 0 skipped, 0 errors"));
        }
    }
}
