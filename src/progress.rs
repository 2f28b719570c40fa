use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

/// File-count bar plus a spinner for the file currently being encoded.
pub struct ProgressLogger {
    multi_progress: MultiProgress,
    progress_bar: ProgressBar,
    file_bar: Option<ProgressBar>,
}

impl ProgressLogger {
    pub fn new(total_files: u64, multi_progress: &MultiProgress) -> Self {
        let progress_bar = multi_progress.add(ProgressBar::new(total_files));
        progress_bar.set_style(style(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} files (ETA: {eta})",
        ));

        Self {
            multi_progress: multi_progress.clone(),
            progress_bar,
            file_bar: None,
        }
    }

    pub fn inc(&mut self) {
        self.progress_bar.inc(1);
    }

    pub fn start_file(&mut self, filename: &str) {
        self.finish_file();
        let bar = self.multi_progress.add(ProgressBar::new_spinner());
        bar.set_style(style("{spinner:.blue} Encoding {msg}"));
        bar.set_message(filename.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        self.file_bar = Some(bar);
    }

    pub fn finish_file(&mut self) {
        if let Some(bar) = self.file_bar.take() {
            bar.finish_and_clear();
        }
    }

    pub fn finish(&mut self) {
        self.finish_file();
        self.progress_bar.finish_and_clear();
    }

    pub fn file_bar(&self) -> Option<&ProgressBar> {
        self.file_bar.as_ref()
    }

    pub fn position(&self) -> u64 {
        self.progress_bar.position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indicatif::ProgressDrawTarget;

    #[test]
    fn test_file_bar_lifecycle() {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::hidden());
        let mut logger = ProgressLogger::new(2, &multi);

        logger.start_file("a.mp4");
        assert!(logger.file_bar().is_some());
        logger.inc();
        logger.start_file("b.mp4");
        assert_eq!(logger.file_bar().map(|b| b.message()), Some("b.mp4".to_string()));
        logger.inc();
        logger.finish();

        assert!(logger.file_bar().is_none());
        assert_eq!(logger.position(), 2);
    }
}
