use anyhow::{Context, Result, bail};
use log::{debug, info};
use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};

/// Copy access and modification times from `src` onto `dst`.
pub fn preserve_timestamps(src: &Path, dst: &Path) -> io::Result<()> {
    let metadata = fs::metadata(src)?;
    let mut times = FileTimes::new().set_modified(metadata.modified()?);
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }
    File::options().write(true).open(dst)?.set_times(times)
}

/// `fs::copy` that also keeps the source's timestamps.
pub fn copy_preserving_times(src: &Path, dst: &Path) -> io::Result<u64> {
    let copied = fs::copy(src, dst)?;
    preserve_timestamps(src, dst)?;
    Ok(copied)
}

fn copy_tree(src: &Path, dst: &Path, skip: &Path) -> Result<u64> {
    fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;

    let mut copied = 0;
    let entries = fs::read_dir(src).with_context(|| format!("Failed to read {}", src.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read {}", src.display()))?;
        let path = entry.path();
        // A backup directory placed inside the source must not copy itself
        if path == skip {
            continue;
        }
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_tree(&path, &target, skip)?;
        } else {
            copy_preserving_times(&path, &target)
                .with_context(|| format!("Failed to copy {}", path.display()))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Copy `source` into `backup_dir/<source name>`, or a timestamped sibling
/// `<source name>_<YYYYmmdd_HHMMSS>` if that name is taken. Returns the
/// backup's path.
pub fn create_backup(source: &Path, backup_dir: &Path) -> Result<PathBuf> {
    info!("Starting backup of {}", source.display());
    fs::create_dir_all(backup_dir)
        .with_context(|| format!("Failed to create backup directory: {}", backup_dir.display()))?;

    let Some(name) = source.file_name() else {
        bail!("Cannot back up a folder without a name: {}", source.display());
    };
    let mut backup_path = backup_dir.join(name);
    if backup_path.exists() {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        backup_path = backup_dir.join(format!("{}_{timestamp}", name.to_string_lossy()));
        debug!("Backup already exists, using {}", backup_path.display());
    }
    if backup_path.exists() {
        bail!("Backup path already exists: {}", backup_path.display());
    }

    info!("Creating backup to: {}", backup_path.display());
    let skip = backup_dir.canonicalize().unwrap_or_else(|_| backup_dir.to_path_buf());
    let source_root = source.canonicalize().unwrap_or_else(|_| source.to_path_buf());
    let copied = copy_tree(&source_root, &backup_path, &skip)
        .with_context(|| format!("Failed to create backup of {}", source.display()))?;
    info!("Backup created: {} ({copied} files)", backup_path.display());

    Ok(backup_path)
}
