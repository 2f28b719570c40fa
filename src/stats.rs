use thiserror::Error;

use crate::format::compression_ratio;

/// Folder key used for files that live directly in the source folder.
pub const ROOT_FOLDER: &str = "root";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TrackerError {
    #[error("folder tracking is enabled but no folder key was given")]
    MissingFolderKey,
    #[error("total processing time was already recorded for this run")]
    AlreadyFinalized,
}

/// Terminal result of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    /// The compressed output was larger, so the original was copied through.
    CopiedOriginal,
    Error,
}

/// Which counter a file lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tally {
    Processed,
    Skipped,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileOutcome {
    /// Path relative to the run's source folder.
    pub name: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub space_saved: i64,
    pub compression_ratio: f64,
    pub processing_time: f64,
    pub status: OutcomeStatus,
    pub detail: Option<String>,
}

impl FileOutcome {
    pub fn success(
        name: impl Into<String>,
        original_size: u64,
        compressed_size: u64,
        processing_time: f64,
    ) -> Self {
        let space_saved = signed_difference(original_size, compressed_size);
        Self {
            name: name.into(),
            original_size,
            compressed_size,
            space_saved,
            compression_ratio: compression_ratio(space_saved, original_size),
            processing_time,
            status: OutcomeStatus::Success,
            detail: None,
        }
    }

    /// The original was kept as the output; nothing saved.
    pub fn copied_original(name: impl Into<String>, original_size: u64, processing_time: f64) -> Self {
        Self {
            name: name.into(),
            original_size,
            compressed_size: original_size,
            space_saved: 0,
            compression_ratio: 0.0,
            processing_time,
            status: OutcomeStatus::CopiedOriginal,
            detail: None,
        }
    }

    pub fn error(
        name: impl Into<String>,
        original_size: u64,
        processing_time: f64,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            original_size,
            compressed_size: 0,
            space_saved: 0,
            compression_ratio: 0.0,
            processing_time,
            status: OutcomeStatus::Error,
            detail: Some(detail.into()),
        }
    }

    /// Status column text: "success", "success (copied original)" or
    /// "error: <detail>".
    pub fn status_label(&self) -> String {
        match self.status {
            OutcomeStatus::Success => "success".to_string(),
            OutcomeStatus::CopiedOriginal => "success (copied original)".to_string(),
            OutcomeStatus::Error => {
                format!("error: {}", self.detail.as_deref().unwrap_or("unknown"))
            }
        }
    }
}

pub fn signed_difference(original: u64, compressed: u64) -> i64 {
    let original = i64::try_from(original).unwrap_or(i64::MAX);
    let compressed = i64::try_from(compressed).unwrap_or(i64::MAX);
    original.saturating_sub(compressed)
}

/// Counters and file rows for either a whole run or a single folder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub total_files: u64,
    pub processed: u64,
    pub skipped: u64,
    pub errors: u64,
    pub total_original_size: u64,
    pub total_compressed_size: u64,
    pub space_saved: i64,
    pub total_processing_time: f64,
    pub files: Vec<FileOutcome>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overall ratio, `space_saved / total_original_size * 100`.
    pub fn compression_ratio(&self) -> f64 {
        compression_ratio(self.space_saved, self.total_original_size)
    }

    fn register(&mut self, size: u64) {
        self.total_files += 1;
        self.total_original_size += size;
    }

    fn tally(&mut self, compressed_size: u64, space_saved: i64, tally: Tally) {
        match tally {
            Tally::Processed => self.processed += 1,
            Tally::Skipped => self.skipped += 1,
            Tally::Error => self.errors += 1,
        }
        self.total_compressed_size += compressed_size;
        self.space_saved += space_saved;
    }

    /// Adds counters, sizes and file rows of `other`; processing time is left alone.
    pub fn absorb(&mut self, other: &RunSummary) {
        self.total_files += other.total_files;
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.total_original_size += other.total_original_size;
        self.total_compressed_size += other.total_compressed_size;
        self.space_saved += other.space_saved;
        self.files.extend(other.files.iter().cloned());
    }
}

/// Per-folder breakdown in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FolderStats {
    entries: Vec<(String, RunSummary)>,
}

impl FolderStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Summary for `key`, created zeroed on first use.
    pub fn entry(&mut self, key: &str) -> &mut RunSummary {
        let index = match self.entries.iter().position(|(k, _)| k == key) {
            Some(index) => index,
            None => {
                self.entries.push((key.to_string(), RunSummary::new()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index].1
    }

    pub fn get(&self, key: &str) -> Option<&RunSummary> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, s)| s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RunSummary)> {
        self.entries.iter().map(|(k, s)| (k.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Statistics for one run. `folders` is `Some` only for recursive runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStatistics {
    pub summary: RunSummary,
    pub folders: Option<FolderStats>,
}

impl RunStatistics {
    pub fn new(recursive: bool) -> Self {
        Self {
            summary: RunSummary::new(),
            folders: recursive.then(FolderStats::new),
        }
    }
}

/// Accumulates per-file outcomes for a single run.
///
/// Every mutating call takes an optional folder key. With folder tracking
/// off the key is ignored; with it on a key is required.
#[derive(Debug)]
pub struct StatisticsTracker {
    stats: RunStatistics,
    finalized: bool,
}

impl StatisticsTracker {
    pub fn new(recursive: bool) -> Self {
        Self {
            stats: RunStatistics::new(recursive),
            finalized: false,
        }
    }

    pub fn is_recursive(&self) -> bool {
        self.stats.folders.is_some()
    }

    fn folder_mut(&mut self, folder_key: Option<&str>) -> Result<Option<&mut RunSummary>, TrackerError> {
        match (&mut self.stats.folders, folder_key) {
            (None, _) => Ok(None),
            (Some(folders), Some(key)) => Ok(Some(folders.entry(key))),
            (Some(_), None) => Err(TrackerError::MissingFolderKey),
        }
    }

    /// Count a discovered file and its size. Call once per file, before its outcome.
    pub fn register_discovered_file(&mut self, size: u64, folder_key: Option<&str>) -> Result<(), TrackerError> {
        if let Some(folder) = self.folder_mut(folder_key)? {
            folder.register(size);
        }
        self.stats.summary.register(size);
        Ok(())
    }

    /// Append a file row; counters are untouched.
    pub fn record_outcome(&mut self, outcome: FileOutcome, folder_key: Option<&str>) -> Result<(), TrackerError> {
        if let Some(folder) = self.folder_mut(folder_key)? {
            folder.files.push(outcome.clone());
        }
        self.stats.summary.files.push(outcome);
        Ok(())
    }

    /// Bump one counter and fold in the output size and bytes saved.
    ///
    /// `original_size` was already counted by `register_discovered_file` and
    /// is not added again.
    pub fn update_totals(
        &mut self,
        _original_size: u64,
        compressed_size: u64,
        space_saved: i64,
        tally: Tally,
        folder_key: Option<&str>,
    ) -> Result<(), TrackerError> {
        if let Some(folder) = self.folder_mut(folder_key)? {
            folder.tally(compressed_size, space_saved, tally);
        }
        self.stats.summary.tally(compressed_size, space_saved, tally);
        Ok(())
    }

    pub fn finalize(&mut self, total_seconds: f64) -> Result<(), TrackerError> {
        if self.finalized {
            return Err(TrackerError::AlreadyFinalized);
        }
        self.stats.summary.total_processing_time = total_seconds;
        self.finalized = true;
        Ok(())
    }

    /// Owned copy of the current statistics.
    pub fn snapshot(&self) -> RunStatistics {
        self.stats.clone()
    }

    /// Hands the statistics off, ending the tracker.
    pub fn into_statistics(self) -> RunStatistics {
        self.stats
    }
}
