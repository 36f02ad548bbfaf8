//! Progress reporting
//!
//! Provides the live progress line of a sync run, the on-demand status line
//! and the final summaries of both commands.

use crate::partition::output::summary_lines;
use crate::partition::PartitionReport;
use crate::sync::{SyncProgress, SyncReport};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress reporter that displays run status
pub struct ProgressReporter {
    /// Progress bar
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("Invalid progress template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &SyncProgress) {
        let status = RunStatus::from_progress(progress);
        let crawl = if progress.crawl_finished {
            "done"
        } else {
            "running"
        };

        let msg = format!(
            "Jobs: {}/{}{} | Running: {}/{} | Pending: {} | Crawl: {}",
            format_number(status.completed),
            format_number(status.total),
            if status.total_final { "" } else { "+" },
            progress.dispatch.running,
            progress.workers,
            format_number(progress.dispatch.pending as u64),
            crawl,
        );

        self.bar.set_message(msg);
    }

    /// Print a line above the progress display
    pub fn println(&self, line: &str) {
        self.bar.println(line);
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Completed / total jobs with a completion estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStatus {
    /// Jobs finished in this pass
    pub completed: u64,
    /// Jobs known so far
    pub total: u64,
    /// No more jobs will be added
    pub total_final: bool,
    /// Time since the pass started
    pub elapsed: Duration,
}

impl RunStatus {
    /// Status of a running pass
    pub fn from_progress(progress: &SyncProgress) -> Self {
        let dispatch = &progress.dispatch;
        Self {
            completed: dispatch.completed,
            total: dispatch.started + dispatch.pending as u64,
            total_final: progress.crawl_finished,
            elapsed: dispatch.elapsed,
        }
    }

    /// Remaining time, extrapolated from the average job so far
    ///
    /// Only known once the crawl has finished and a job has completed.
    pub fn eta(&self) -> Option<Duration> {
        if !self.total_final || self.completed == 0 {
            return None;
        }
        let remaining = self.total.saturating_sub(self.completed);
        let per_job = self.elapsed.as_secs_f64() / self.completed as f64;
        Some(Duration::from_secs_f64(per_job * remaining as f64))
    }

    /// One-line status report
    pub fn line(&self) -> String {
        let eta = match self.eta() {
            Some(eta) => format!("~{}s", eta.as_secs()),
            None => "unknown".to_string(),
        };
        format!(
            "{}/{}{} jobs completed, elapsed {}s, remaining {}",
            self.completed,
            self.total,
            if self.total_final { "" } else { "+" },
            self.elapsed.as_secs(),
            eta
        )
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .rev()
                .map(|&b| b as char)
                .collect::<String>()
        })
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print the entry count and, outside live mode, the partition table
pub fn print_partition_report(report: &PartitionReport, live: bool) {
    eprintln!("{} file(s) found.", report.entries_found);
    if live || report.entries_found == 0 {
        return;
    }
    for line in summary_lines(&report.partitions) {
        eprintln!("{}", line);
    }
}

/// Print a header at the start of a sync run
pub fn print_header(run: &str, source: &str, destination: &str, workers: usize, slots: &str) {
    eprintln!();
    eprintln!(
        "{} {}",
        style("partsync").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("{}", style("─".repeat(50)).dim());
    eprintln!("  {} {}", style("Run:").bold(), run);
    eprintln!("  {} {}", style("Source:").bold(), source);
    eprintln!("  {} {}", style("Destination:").bold(), destination);
    eprintln!("  {} {} ({})", style("Workers:").bold(), workers, slots);
    eprintln!();
}

/// Print a summary of a sync run
pub fn print_summary(report: &SyncReport) {
    let duration_secs = report.duration.as_secs_f64();
    let title = if report.is_clean() {
        style("Sync Complete").green().bold()
    } else if report.dispatch.stopped {
        style("Sync Stopped").yellow().bold()
    } else {
        style("Sync Finished With Errors").red().bold()
    };

    eprintln!();
    eprintln!("{}", title);
    eprintln!("{}", style("─".repeat(50)).dim());
    eprintln!("  {} {}", style("Run:").bold(), report.run);
    if let Some(crawl) = &report.partition {
        eprintln!(
            "  {} {} ({})",
            style("Entries:").bold(),
            format_number(crawl.entries_found),
            format_size(crawl.raw_size, BINARY)
        );
        eprintln!(
            "  {} {}",
            style("Partitions:").bold(),
            format_number(crawl.partitions.len() as u64)
        );
    }
    if !report.requeued.is_empty() {
        eprintln!(
            "  {} {}",
            style("Requeued:").bold(),
            report.requeued.join(", ")
        );
    }
    eprintln!(
        "  {} {} started, {} completed",
        style("Jobs:").bold(),
        format_number(report.dispatch.started),
        format_number(report.dispatch.completed)
    );
    if report.dispatch.killed > 0 {
        eprintln!(
            "  {} {}",
            style("Killed:").yellow().bold(),
            report.dispatch.killed
        );
    }
    eprintln!("  {} {:.1}s", style("Duration:").bold(), duration_secs);
    if report.hook_failures > 0 {
        eprintln!(
            "  {} {}",
            style("Enqueue errors:").yellow().bold(),
            report.hook_failures
        );
    }
    if !report.failures.is_empty() {
        eprintln!(
            "  {} {}",
            style("Failed jobs:").red().bold(),
            report.failures.len()
        );
        for failure in &report.failures {
            eprintln!("    {}", failure);
        }
    }
    if report.resumable() {
        eprintln!(
            "  {} partsync sync -r {}",
            style("Resume with:").bold(),
            report.run
        );
    }
    eprintln!();
}
