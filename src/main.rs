use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::MultiProgress;
use log::{LevelFilter, error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod backup;
mod config;
mod format;
mod history;
mod image;
mod logging;
mod pipeline;
mod progress;
mod report;
mod stats;
mod transcode;
mod video;

use config::{RunConfig, VideoPreset};
use format::{format_duration, format_signed_size, format_size};
use history::StatisticsManager;
use logging::{EventSink, LogConfig, LogSink, Rotation};
use pipeline::Pipeline;
use report::ReportGenerator;
use stats::RunStatistics;
use transcode::FfmpegTranscoder;

#[derive(Parser)]
#[command(name = "mediashrink")]
#[command(about = "Batch video and image compression with per-run reports and cumulative statistics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress every video and image in a folder
    Compress(CompressArgs),
    /// Show cumulative statistics across all runs
    Stats {
        #[arg(long, default_value = "statistics", help = "Directory holding persisted statistics")]
        stats_dir: PathBuf,
    },
    /// Show previous runs, newest first
    History {
        #[arg(long, default_value = "statistics", help = "Directory holding persisted statistics")]
        stats_dir: PathBuf,

        #[arg(long, help = "Show at most this many runs")]
        limit: Option<usize>,
    },
}

#[derive(Args)]
struct CompressArgs {
    #[arg(help = "Folder containing media files")]
    source_folder: PathBuf,

    #[arg(long, default_value_t = 23, help = "Video CRF (0-51, lower = higher quality)")]
    video_crf: u8,

    #[arg(long, value_enum, default_value_t = VideoPreset::Medium, help = "x264 encoding preset")]
    video_preset: VideoPreset,

    #[arg(long, default_value_t = 100, help = "Image quality (0-100, higher = better quality)")]
    image_quality: u8,

    #[arg(long, help = "Resize images to this percentage of their dimensions (1-100)")]
    image_resize: Option<u8>,

    #[arg(short, long, help = "Process subfolders too")]
    recursive: bool,

    #[arg(long, help = "Replace originals instead of writing to a 'compressed' folder")]
    overwrite: bool,

    #[arg(
        long,
        help = "Path to ffmpeg binary (optional, auto-detected if not provided)"
    )]
    ffmpeg_path: Option<PathBuf>,

    #[arg(long, default_value_t = 5.0, help = "Seconds between encoder progress updates")]
    progress_interval: f64,

    #[arg(long, help = "Keep compressed files even when they are larger than the original")]
    keep_if_larger: bool,

    #[arg(long, help = "Back up the source folder here before compressing")]
    backup_dir: Option<PathBuf>,

    #[arg(long, default_value = ".", help = "Directory that receives the reports folder")]
    output_dir: PathBuf,

    #[arg(long, default_value = "statistics", help = "Directory holding persisted statistics")]
    stats_dir: PathBuf,

    #[command(flatten)]
    log: LogArgs,
}

impl CompressArgs {
    fn run_config(&self) -> RunConfig {
        RunConfig {
            source_folder: self.source_folder.clone(),
            video_crf: self.video_crf,
            video_preset: self.video_preset,
            image_quality: self.image_quality,
            image_resize: self.image_resize,
            recursive: self.recursive,
            overwrite: self.overwrite,
            ffmpeg_path: self.ffmpeg_path.clone(),
            progress_interval: self.progress_interval,
            keep_if_larger: self.keep_if_larger,
            backup_dir: self.backup_dir.clone(),
        }
    }
}

#[derive(Args)]
struct LogArgs {
    #[arg(long, default_value_t = LevelFilter::Info, help = "Log level (RUST_LOG overrides)")]
    log_level: LevelFilter,

    #[arg(long, help = "Also write the log to this file")]
    log_file: Option<PathBuf>,

    #[arg(long, help = "Roll the log file over once it reaches this many bytes")]
    log_max_bytes: Option<u64>,

    #[arg(long, default_value_t = 3, help = "Rolled-over log files to keep")]
    log_keep: usize,
}

impl LogArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level,
            console: true,
            file: self.log_file.clone(),
            rotation: match self.log_max_bytes {
                Some(max_bytes) => Rotation::Size {
                    max_bytes,
                    keep: self.log_keep,
                },
                None => Rotation::Never,
            },
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let multi_progress = MultiProgress::new();
    let log_config = match &cli.command {
        Commands::Compress(args) => args.log.to_config(),
        _ => LogConfig::default(),
    };
    if let Err(e) = logging::init(&log_config, &multi_progress) {
        eprintln!("{e:#}");
        std::process::exit(1);
    }

    let sink: Arc<dyn EventSink> = Arc::new(LogSink);
    let result = match cli.command {
        Commands::Compress(args) => compress(&args, &multi_progress, sink),
        Commands::Stats { stats_dir } => {
            StatisticsManager::new(stats_dir, sink).print_stats();
            Ok(())
        }
        Commands::History { stats_dir, limit } => {
            StatisticsManager::new(stats_dir, sink).print_history(limit);
            Ok(())
        }
    };

    if let Err(e) = result {
        // Display error in red using our custom logger and exit with error code
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn compress(args: &CompressArgs, multi_progress: &MultiProgress, sink: Arc<dyn EventSink>) -> Result<()> {
    let config = args.run_config();
    config.validate()?;
    config.validate_paths()?;

    info!("Compressing folder: {}", config.source_folder.display());
    info!("Video CRF: {}, preset: {}", config.video_crf, config.video_preset.as_str());
    info!("Image quality: {}", config.image_quality);
    if let Some(resize) = config.image_resize {
        info!("Image resize: {resize}%");
    }
    info!("Recursive: {}, overwrite: {}", config.recursive, config.overwrite);

    let transcoder = FfmpegTranscoder::new(&config)?;

    if let Some(backup_dir) = &config.backup_dir {
        backup::create_backup(&config.source_folder, backup_dir)?;
    }

    let stats = Pipeline::new(&config, &transcoder).run(multi_progress)?;

    let reports = ReportGenerator::new(&args.output_dir, sink.clone())
        .generate(&stats, &config.run_label(), config.recursive, Some(&config))
        .context("Failed to generate report")?;

    let manager = StatisticsManager::new(&args.stats_dir, sink);
    manager.update_cumulative_stats(&stats.summary);
    manager.append_run_history(&stats.summary, &config);
    info!("Statistics updated in {}", manager.dir().display());

    log_summary(&stats, &reports);
    Ok(())
}

fn log_summary(stats: &RunStatistics, reports: &[PathBuf]) {
    let summary = &stats.summary;
    info!("Compression complete!");
    info!("  Processed: {}", summary.processed);
    info!("  Skipped: {}", summary.skipped);
    info!("  Errors: {}", summary.errors);
    if summary.total_original_size > 0 {
        info!(
            "  Size: {} -> {} ({:.1}% reduction)",
            format_size(summary.total_original_size),
            format_size(summary.total_compressed_size),
            summary.compression_ratio()
        );
    }
    info!("  Total space saved: {}", format_signed_size(summary.space_saved));
    info!("  Processing time: {}", format_duration(summary.total_processing_time));

    let location = match reports {
        [single] => single.as_path(),
        _ => reports
            .first()
            .and_then(|first| first.parent())
            .unwrap_or_else(|| Path::new(".")),
    };
    info!("  Report: {}", location.display());
}
