//! Integration tests for partsync
//!
//! Partitioning tests crawl small temporary trees. The sync tests run real
//! jobs with `tar` through `/bin/sh`, so they are unix only.

use clap::Parser;
use partsync::config::{CliArgs, Command};
use partsync::crawl::CrawlOptions;
use partsync::entry::SizeTransform;
use partsync::hook::HookChain;
use partsync::input::InputArguments;
use partsync::partition::{ListingTarget, ListingWriter, PartitionMode, PartitionRunner};
use partsync::PartitionConfig;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tempfile::tempdir;

fn write_file(path: &Path, size: usize) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, vec![b'x'; size]).unwrap();
}

fn part_config(args: &[&str]) -> PartitionConfig {
    let mut argv = vec!["partsync", "part"];
    argv.extend_from_slice(args);
    match CliArgs::parse_from(argv).command {
        Command::Part(part) => PartitionConfig::from_part_args(part).unwrap(),
        _ => unreachable!(),
    }
}

fn read_listing(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_count_mode_listings() {
    let src = tempdir().unwrap();
    write_file(&src.path().join("big"), 900);
    write_file(&src.path().join("a/medium"), 500);
    write_file(&src.path().join("a/small"), 300);
    write_file(&src.path().join("b/tiny"), 100);

    let out = tempdir().unwrap();
    let template = out.path().join("list");
    let root = src.path().to_string_lossy().into_owned();
    let config = part_config(&["-n", "2", "-o", template.to_str().unwrap(), &root]);

    let mut chain = HookChain::new().with_listing(ListingWriter::new(config.output.clone()));
    let input = InputArguments::open(config.input.as_ref(), config.paths.clone()).unwrap();
    let report = PartitionRunner::new(config.mode, config.transform, config.crawl.clone())
        .run(input, &mut chain)
        .unwrap();

    assert_eq!(report.entries_found, 4);
    assert_eq!(report.partitions.len(), 2);
    assert_eq!(chain.failures(), 0);
    assert_eq!(chain.listings_written(), 2);

    // Largest first onto the lightest partition: {900}, {500, 300, 100}
    let sizes: Vec<u64> = report.partitions.iter().map(|p| p.total_size).collect();
    assert_eq!(sizes, vec![900, 900]);

    let first = read_listing(&out.path().join("list.0"));
    let second = read_listing(&out.path().join("list.1"));
    assert_eq!(first.len() + second.len(), 4);
    assert!(first[0].ends_with("big"));
}

#[test]
fn test_limit_mode_listings() {
    let src = tempdir().unwrap();
    for i in 0..7 {
        write_file(&src.path().join(format!("f{}", i)), 10);
    }

    let out = tempdir().unwrap();
    let template = out.path().join("part");
    let root = src.path().to_string_lossy().into_owned();
    let config = part_config(&["-f", "3", "-L", "-o", template.to_str().unwrap(), &root]);
    assert!(config.live);

    let mut chain = HookChain::new().with_listing(ListingWriter::new(config.output.clone()));
    let input = InputArguments::open(None, config.paths.clone()).unwrap();
    let report = PartitionRunner::new(config.mode, config.transform, config.crawl.clone())
        .live(config.live)
        .run(input, &mut chain)
        .unwrap();

    let counts: Vec<u64> = report.partitions.iter().map(|p| p.entry_count).collect();
    assert_eq!(counts, vec![3, 3, 1]);
    for i in 0..3 {
        assert!(out.path().join(format!("part.{}", i)).exists());
    }
    assert_eq!(read_listing(&out.path().join("part.2")).len(), 1);
}

#[test]
fn test_arbitrary_values_from_reader() {
    let lines = "10 alpha\n20 beta\nnot-a-number gamma\n30 delta\n";
    let input = InputArguments::from_reader(Some(Box::new(Cursor::new(lines.as_bytes().to_vec()))), vec![]);

    let out = tempdir().unwrap();
    let writer = ListingWriter::new(ListingTarget::Template(out.path().join("v")));
    let mut chain = HookChain::new().with_listing(writer);
    let crawl = CrawlOptions {
        arbitrary_values: true,
        ..Default::default()
    };
    let report = PartitionRunner::new(PartitionMode::Count(2), SizeTransform::IDENTITY, crawl)
        .run(input, &mut chain)
        .unwrap();

    assert_eq!(report.entries_found, 3);
    assert_eq!(report.crawl.parse_errors, 1);
    assert_eq!(report.raw_size, 60);
    // {30}, {20, 10}
    let sizes: Vec<u64> = report.partitions.iter().map(|p| p.total_size).collect();
    assert_eq!(sizes, vec![30, 30]);
    assert_eq!(read_listing(&out.path().join("v.0")), vec!["delta"]);
}

#[test]
fn test_size_transform_applies_preload() {
    let src = tempdir().unwrap();
    write_file(&src.path().join("one"), 1000);
    write_file(&src.path().join("two"), 10);

    let root = src.path().to_string_lossy().into_owned();
    let config = part_config(&["-n", "2", "-p", "100", "-r", "512", &root]);
    let input = InputArguments::open(None, config.paths.clone()).unwrap();
    let report = PartitionRunner::new(config.mode, config.transform, config.crawl.clone())
        .run(input, &mut HookChain::new())
        .unwrap();

    // 1000 -> 1024, 10 -> 512, each partition preloaded with 100
    let mut sizes: Vec<u64> = report.partitions.iter().map(|p| p.total_size).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![612, 1124]);
    assert_eq!(report.effective_size(), 1536);
}

#[test]
fn test_empty_input_has_no_partitions() {
    let src = tempdir().unwrap();
    let root = src.path().to_string_lossy().into_owned();
    let config = part_config(&["-n", "4", &root]);
    let input = InputArguments::open(None, config.paths.clone()).unwrap();
    let report = PartitionRunner::new(config.mode, config.transform, config.crawl.clone())
        .run(input, &mut HookChain::new())
        .unwrap();

    assert_eq!(report.entries_found, 0);
    assert!(report.partitions.is_empty());
}

#[cfg(unix)]
mod sync {
    use super::*;
    use partsync::config::SyncArgs;
    use partsync::queue::{job_name, Flag, JobQueue, JobTemplate, QueueState, RunLayout, Tool};
    use partsync::sync::status::RunOverview;
    use partsync::worker::Interrupt;
    use partsync::{SyncConfig, SyncRun};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn sync_args(args: &[&str]) -> SyncArgs {
        let mut argv = vec!["partsync", "sync", "-q", "--poll-interval", "20", "-t", "tar"];
        argv.extend_from_slice(args);
        match CliArgs::parse_from(argv).command {
            Command::Sync(sync) => sync,
            _ => unreachable!(),
        }
    }

    fn prepare(args: &[&str]) -> partsync::Result<SyncRun> {
        let config = SyncConfig::from_sync_args(sync_args(args)).unwrap();
        SyncRun::prepare(config, Interrupt::new(), Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_sync_copies_tree() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let work = tempdir().unwrap();
        for i in 0..5 {
            write_file(&src.path().join(format!("dir{}/file{}", i % 2, i)), 100 + i);
        }

        let run = prepare(&[
            "-n",
            "2",
            "-f",
            "2",
            "-d",
            work.path().to_str().unwrap(),
            src.path().to_str().unwrap(),
            dst.path().to_str().unwrap(),
        ])
        .unwrap();

        let mut ticks = 0;
        let report = run.run(|_| ticks += 1).unwrap();

        assert!(report.is_clean(), "failures: {:?}", report.failures);
        assert!(!report.resumable());
        assert!(ticks > 0);
        assert_eq!(report.jobs_enqueued, 3);
        assert_eq!(report.dispatch.completed, 3);
        for i in 0..5 {
            let copied = dst.path().join(format!("dir{}/file{}", i % 2, i));
            assert_eq!(fs::metadata(&copied).unwrap().len(), (100 + i) as u64);
        }

        let layout = RunLayout::new(work.path(), &report.run);
        let overview = RunOverview::collect(&layout).unwrap();
        assert_eq!(overview.state, QueueState::ConsumerDone);
        assert_eq!(overview.pending, 0);
        assert_eq!(overview.claimed, 3);
        assert_eq!(overview.partitions, 3);
        assert!(overview.consumer_finished);
        assert!(!overview.resumable);
        assert!(overview.metadata.is_some());

        // A finished run cannot be resumed
        assert!(prepare(&["-r", &report.run, "-d", work.path().to_str().unwrap()]).is_err());
    }

    #[test]
    fn test_resume_runs_pending_jobs() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let work = tempdir().unwrap();
        write_file(&src.path().join("kept.txt"), 42);

        // A run whose crawl finished but whose job never ran
        let run = prepare(&[
            "-n",
            "1",
            "-d",
            work.path().to_str().unwrap(),
            src.path().to_str().unwrap(),
            dst.path().to_str().unwrap(),
        ])
        .unwrap();
        let name = run.config().run.clone();
        let queue = JobQueue::new(run.queue().layout().clone());
        drop(run);

        let listing = queue.layout().parts_dir().join("part.0");
        fs::write(&listing, "kept.txt\n").unwrap();
        let template = JobTemplate {
            tool: Tool::Tar,
            options: None,
            source: src.path().to_path_buf(),
            destination: dst.path().to_path_buf(),
            log_dir: queue.layout().log_dir(),
        };
        let job = job_name(0);
        queue.enqueue(&job, &template.render(&job, &listing)).unwrap();
        queue.set_flag(Flag::CrawlFinished).unwrap();
        assert!(RunOverview::collect(queue.layout()).unwrap().resumable);

        let resumed = prepare(&["-r", &name, "-d", work.path().to_str().unwrap()]).unwrap();
        assert_eq!(resumed.config().source, src.path());
        let report = resumed.run(|_| {}).unwrap();

        assert!(report.resumed);
        assert!(report.partition.is_none());
        assert!(report.is_clean(), "failures: {:?}", report.failures);
        assert_eq!(fs::read(dst.path().join("kept.txt")).unwrap().len(), 42);
        assert!(queue.has_flag(Flag::ConsumerFinished));
    }

    #[test]
    fn test_resume_unknown_run() {
        let work = tempdir().unwrap();
        assert!(prepare(&["-r", "missing", "-d", work.path().to_str().unwrap()]).is_err());
    }
}
