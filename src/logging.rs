use anyhow::{Context, Result};
use indicatif::MultiProgress;
use log::{Level, LevelFilter, Log, Metadata, Record};
use regex::bytes::Regex;
use std::borrow::Cow;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Where components send their user-facing diagnostics.
///
/// Handed to each component at construction instead of reaching for a
/// process-wide logger, so a test can swap in [`MemorySink`].
pub trait EventSink: Send + Sync {
    fn emit(&self, level: Level, message: &str);

    fn info(&self, message: &str) {
        self.emit(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.emit(Level::Warn, message);
    }
}

/// Forwards to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, level: Level, message: &str) {
        log::log!(level, "{message}");
    }
}

/// Captures events in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySink {
    events: std::sync::Mutex<Vec<(Level, String)>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    pub fn messages(&self, level: Level) -> Vec<String> {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|(l, _)| *l == level)
                    .map(|(_, m)| m.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.messages(Level::Warn)
    }
}

#[cfg(test)]
impl EventSink for MemorySink {
    fn emit(&self, level: Level, message: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push((level, message.to_string()));
        }
    }
}

/// Log file rotation applied once, when logging is initialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Never,
    /// Roll the file over once it reaches `max_bytes`, keeping `keep` old generations.
    Size { max_bytes: u64, keep: usize },
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LevelFilter,
    pub console: bool,
    pub file: Option<PathBuf>,
    pub rotation: Rotation,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            console: true,
            file: None,
            rotation: Rotation::Never,
        }
    }
}

/// Get ANSI color code for log level
pub const fn get_log_color(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1b[91m",                 // Red
        Level::Warn => "\x1b[33m",                  // Yellow
        Level::Info => "\x1b[32m",                  // Green
        Level::Debug | Level::Trace => "\x1b[90m", // Grey
    }
}

fn generation_path(path: &Path, generation: usize) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}

/// Shift `path` to `path.1` (and older generations up by one) when it has
/// grown past the size limit. Returns whether a rollover happened.
pub fn rotate_if_needed(path: &Path, rotation: Rotation) -> io::Result<bool> {
    let Rotation::Size { max_bytes, keep } = rotation else {
        return Ok(false);
    };

    let len = match fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if len < max_bytes {
        return Ok(false);
    }

    if keep == 0 {
        fs::remove_file(path)?;
        return Ok(true);
    }

    let oldest = generation_path(path, keep);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for generation in (1..keep).rev() {
        let from = generation_path(path, generation);
        if from.exists() {
            fs::rename(&from, generation_path(path, generation + 1))?;
        }
    }
    fs::rename(path, generation_path(path, 1))?;
    Ok(true)
}

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("escape pattern is valid"));

/// Drop colour codes from a formatted line.
fn strip_ansi(buf: &[u8]) -> Cow<'_, [u8]> {
    ANSI_ESCAPE.replace_all(buf, &b""[..])
}

/// Sends each line to the console as formatted and to the log file without colours.
struct LogWriter {
    console: Option<io::Stderr>,
    file: File,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(console) = &mut self.console {
            console.write_all(buf)?;
        }
        self.file.write_all(&strip_ansi(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(console) = &mut self.console {
            console.flush()?;
        }
        self.file.flush()
    }
}

/// Hides progress bars while a record is written so lines don't interleave.
struct ProgressAwareLogger {
    inner: env_logger::Logger,
    multi_progress: MultiProgress,
}

impl Log for ProgressAwareLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.inner.matches(record) {
            self.multi_progress.suspend(|| self.inner.log(record));
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Install the global `log` backend. `RUST_LOG`, when set, wins over `config.level`.
pub fn init(config: &LogConfig, multi_progress: &MultiProgress) -> Result<()> {
    let mut builder = env_logger::Builder::new();

    match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
            }
            rotate_if_needed(path, config.rotation)
                .with_context(|| format!("Failed to rotate log file: {}", path.display()))?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            // env_logger strips colours from pipes unless forced; LogWriter strips the file copy
            builder.write_style(env_logger::WriteStyle::Always);
            builder.target(env_logger::Target::Pipe(Box::new(LogWriter {
                console: config.console.then(io::stderr),
                file,
            })));
        }
        None if config.console => {
            builder.target(env_logger::Target::Stderr);
        }
        None => {
            builder.target(env_logger::Target::Pipe(Box::new(io::sink())));
        }
    }

    // Grey wall-clock time, then the message coloured by level
    builder.format(|buf, record| {
        let time = chrono::Local::now().format("%H:%M:%S");
        writeln!(
            buf,
            "\x1b[90m{time}\x1b[0m {}{}\x1b[0m",
            get_log_color(record.level()),
            record.args()
        )
    });

    if std::env::var("RUST_LOG").is_err() {
        builder.filter_level(config.level);
    } else {
        builder.parse_default_env();
    }

    let inner = builder.build();
    let max_level = inner.filter();
    log::set_boxed_logger(Box::new(ProgressAwareLogger {
        inner,
        multi_progress: multi_progress.clone(),
    }))
    .context("Logger was already initialised")?;
    log::set_max_level(max_level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_sink_captures_levels() {
        let sink = MemorySink::new();
        sink.warn("disk full");
        sink.info("report written");
        assert_eq!(sink.warnings(), vec!["disk full".to_string()]);
        assert_eq!(sink.messages(Level::Info), vec!["report written".to_string()]);
    }

    #[test]
    fn test_log_colors() {
        assert_eq!(get_log_color(Level::Error), "\x1b[91m");
        assert_eq!(get_log_color(Level::Trace), get_log_color(Level::Debug));
    }

    #[test]
    fn test_strip_ansi() {
        let line = format!("\x1b[90m12:00:00\x1b[0m {}Compression complete!\x1b[0m\n", get_log_color(Level::Info));
        assert_eq!(&*strip_ansi(line.as_bytes()), b"12:00:00 Compression complete!\n");
        assert!(matches!(strip_ansi(b"plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_log_file_is_plain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.log");
        let mut writer = LogWriter {
            console: None,
            file: File::create(&path).unwrap(),
        };

        writeln!(writer, "\x1b[90m09:15:00\x1b[0m \x1b[93mWarning: Could not save statistics\x1b[0m").unwrap();
        writer.flush().unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "09:15:00 Warning: Could not save statistics\n"
        );
    }

    #[test]
    fn test_rotation_never_leaves_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.log");
        fs::write(&path, "x".repeat(100)).unwrap();
        assert!(!rotate_if_needed(&path, Rotation::Never).unwrap());
        assert!(path.exists());
    }

    #[test]
    fn test_rotation_below_limit_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.log");
        fs::write(&path, "small").unwrap();
        let rotation = Rotation::Size { max_bytes: 1024, keep: 2 };
        assert!(!rotate_if_needed(&path, rotation).unwrap());
        assert!(!rotate_if_needed(&dir.path().join("missing.log"), rotation).unwrap());
    }

    #[test]
    fn test_rotation_shifts_generations() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.log");
        let rotation = Rotation::Size { max_bytes: 4, keep: 2 };

        fs::write(&path, "first").unwrap();
        assert!(rotate_if_needed(&path, rotation).unwrap());
        fs::write(&path, "second").unwrap();
        assert!(rotate_if_needed(&path, rotation).unwrap());
        fs::write(&path, "third").unwrap();
        assert!(rotate_if_needed(&path, rotation).unwrap());

        assert!(!path.exists());
        assert_eq!(fs::read_to_string(generation_path(&path, 1)).unwrap(), "third");
        assert_eq!(fs::read_to_string(generation_path(&path, 2)).unwrap(), "second");
        assert!(!generation_path(&path, 3).exists());
    }

    #[test]
    fn test_rotation_keep_zero_deletes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.log");
        fs::write(&path, "content").unwrap();
        assert!(rotate_if_needed(&path, Rotation::Size { max_bytes: 1, keep: 0 }).unwrap());
        assert!(!path.exists());
    }
}
