//! Concurrent execution of classified files.
//!
//! Two groups feed one outcome channel:
//! - every category except netcdf runs on the blocking pool, at most `max_parallel`
//!   extractions at a time. A timed-out extraction keeps its thread and its slot until
//!   the extractor returns;
//! - netcdf runs afterwards on a single dedicated thread, one file at a time.
//!
//! The channel closes once both groups are done; draining it is the barrier the
//! linker waits behind.

use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::Display;
use std::future::Future;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, error, info, warn};

use crate::adapter::CatalogRecord;
use crate::classify::Classification;
use crate::dispatch::{Dispatcher, Extraction};
use crate::error::ExtractResult;
use crate::models::{Category, DispatchOutcome, DispatchStatus, FileEntry};

pub struct Executor {
    dispatcher: Arc<Dispatcher>,
    max_parallel: usize,
    timeout: Option<Duration>,
    show_progress: bool,
}

struct SerialJob {
    entry: FileEntry,
    reply: oneshot::Sender<ExtractResult<CatalogRecord>>,
}

impl Executor {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let config = dispatcher.config();
        Self {
            max_parallel: config.max_parallel.max(1),
            timeout: config.timeout,
            show_progress: config.show_progress,
            dispatcher,
        }
    }

    /// Dispatches every classified file and returns one outcome per file.
    pub async fn run(&self, classification: &Classification) -> Vec<DispatchOutcome> {
        let (serial, parallel): (Vec<FileEntry>, Vec<FileEntry>) = classification
            .entries()
            .into_iter()
            .partition(|e| e.category == Category::Netcdf);
        let total = serial.len() + parallel.len();
        info!(
            parallel = parallel.len(),
            serial = serial.len(),
            max_parallel = self.max_parallel,
            "Dispatching files"
        );

        let pb = make_progress_bar(total as u64, self.show_progress);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let coordinator = {
            let dispatcher = Arc::clone(&self.dispatcher);
            let max_parallel = self.max_parallel;
            let timeout = self.timeout;
            let pb = pb.clone();
            tokio::spawn(async move {
                run_parallel(&dispatcher, parallel, max_parallel, timeout, &tx, &pb).await;
                run_serial(&dispatcher, serial, timeout, &tx, &pb).await;
            })
        };

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }
        if let Err(e) = coordinator.await {
            error!(error = %e, "Dispatch coordinator stopped early");
        }

        pb.finish_with_message("done");
        outcomes
    }
}

async fn run_parallel(
    dispatcher: &Arc<Dispatcher>,
    entries: Vec<FileEntry>,
    max_parallel: usize,
    timeout: Option<Duration>,
    tx: &mpsc::UnboundedSender<DispatchOutcome>,
    pb: &ProgressBar,
) {
    if entries.is_empty() {
        return;
    }
    pb.set_message("extracting");

    // A permit is released when its extractor returns, not when its timeout fires.
    let slots = Arc::new(Semaphore::new(max_parallel));
    let mut in_flight = FuturesUnordered::new();
    let mut pending = entries.into_iter();
    for entry in pending.by_ref().take(max_parallel) {
        in_flight.push(run_blocking(Arc::clone(dispatcher), Arc::clone(&slots), entry, timeout));
    }

    while let Some(outcome) = in_flight.next().await {
        pb.inc(1);
        if tx.send(outcome).is_err() {
            debug!("Outcome receiver closed");
        }
        if let Some(entry) = pending.next() {
            in_flight.push(run_blocking(Arc::clone(dispatcher), Arc::clone(&slots), entry, timeout));
        }
    }
}

async fn run_blocking(
    dispatcher: Arc<Dispatcher>,
    slots: Arc<Semaphore>,
    entry: FileEntry,
    timeout: Option<Duration>,
) -> DispatchOutcome {
    let permit = match slots.acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            dispatcher.stats().inc_dispatched();
            return finish(dispatcher, entry, Extraction::Failed(e.to_string())).await;
        }
    };

    // Without a timeout nothing is ever abandoned, so extract and write in one call.
    let Some(limit) = timeout else {
        let worker = Arc::clone(&dispatcher);
        let dispatched = entry.clone();
        let job = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            worker.dispatch(dispatched)
        });
        return match job.await {
            Ok(outcome) => outcome,
            Err(e) => lost(&dispatcher, entry, e),
        };
    };

    dispatcher.stats().inc_dispatched();
    let job = {
        let dispatcher = Arc::clone(&dispatcher);
        let entry = entry.clone();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            dispatcher.extract_record(&entry)
        })
    };
    let extraction = await_extraction(job, Some(limit)).await;
    finish(dispatcher, entry, extraction).await
}

/// Netcdf files, strictly one after another on a dedicated thread.
async fn run_serial(
    dispatcher: &Arc<Dispatcher>,
    entries: Vec<FileEntry>,
    timeout: Option<Duration>,
    tx: &mpsc::UnboundedSender<DispatchOutcome>,
    pb: &ProgressBar,
) {
    if entries.is_empty() {
        return;
    }
    pb.set_message("netcdf");

    let worker = match spawn_serial_worker(Arc::clone(dispatcher)) {
        Ok(worker) => Some(worker),
        Err(e) => {
            error!(error = %e, "Failed to start netcdf worker");
            None
        }
    };

    for entry in entries {
        dispatcher.stats().inc_dispatched();
        let extraction = match &worker {
            Some(worker) => {
                let (reply, rx) = oneshot::channel();
                let job = SerialJob {
                    entry: entry.clone(),
                    reply,
                };
                if worker.send(job).is_err() {
                    Extraction::Failed("netcdf worker stopped".to_string())
                } else {
                    await_extraction(rx, timeout).await
                }
            }
            None => Extraction::Failed("netcdf worker unavailable".to_string()),
        };

        let outcome = finish(Arc::clone(dispatcher), entry, extraction).await;
        pb.inc(1);
        if tx.send(outcome).is_err() {
            debug!("Outcome receiver closed");
        }
    }
}

/// The thread exits once the sender is dropped and its queue is empty. A job the
/// coordinator gave up on still finishes before the next one starts.
fn spawn_serial_worker(dispatcher: Arc<Dispatcher>) -> std::io::Result<std_mpsc::Sender<SerialJob>> {
    let (tx, rx) = std_mpsc::channel::<SerialJob>();
    thread::Builder::new()
        .name("hsextract-netcdf".to_string())
        .spawn(move || {
            for job in rx {
                let result = dispatcher.extract_record(&job.entry);
                if job.reply.send(result).is_err() {
                    debug!(path = %job.entry.path.display(), "Discarding result of abandoned job");
                }
            }
        })?;
    Ok(tx)
}

async fn await_extraction<F, E>(job: F, timeout: Option<Duration>) -> Extraction
where
    F: Future<Output = Result<ExtractResult<CatalogRecord>, E>>,
    E: Display,
{
    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, job).await {
            Ok(joined) => joined,
            Err(_) => return Extraction::TimedOut,
        },
        None => job.await,
    };
    match joined {
        Ok(result) => Extraction::from(result),
        Err(e) => Extraction::Failed(format!("extraction task lost: {e}")),
    }
}

/// Persists on the blocking pool; the dispatcher decides the outcome.
async fn finish(dispatcher: Arc<Dispatcher>, entry: FileEntry, extraction: Extraction) -> DispatchOutcome {
    let writer = Arc::clone(&dispatcher);
    let settled = entry.clone();
    match tokio::task::spawn_blocking(move || writer.settle(settled, extraction)).await {
        Ok(outcome) => outcome,
        Err(e) => lost(&dispatcher, entry, e),
    }
}

fn lost(dispatcher: &Dispatcher, entry: FileEntry, error: tokio::task::JoinError) -> DispatchOutcome {
    warn!(category = %entry.category, path = %entry.path.display(), error = %error, "Dispatch task lost");
    dispatcher.stats().inc_failed();
    dispatcher.outcome(entry, DispatchStatus::Failed)
}

fn make_progress_bar(total: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("    {spinner:.cyan} {msg:<12} [{bar:30.cyan/blue}] {pos}/{len} files")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_tree;
    use crate::config::PipelineConfig;
    use crate::extractors::{Extractors, SourceFile};
    use crate::models::{RawMetadata, UserMetaRaw};
    use crate::stats::PipelineStats;
    use crate::storage::LocalStorage;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn stub_raw(source: &SourceFile<'_>) -> RawMetadata {
        RawMetadata::UserMeta(UserMetaRaw {
            fields: serde_json::Map::new(),
            content_files: vec![source.relative.to_path_buf()],
        })
    }

    fn executor(input: &Path, output: &Path, extractors: Extractors, timeout: Option<Duration>) -> Executor {
        let mut config = PipelineConfig::new(input, output);
        config.max_parallel = 2;
        config.timeout = timeout;
        let dispatcher = Dispatcher::new(
            config,
            extractors,
            Arc::new(LocalStorage),
            Arc::new(PipelineStats::new()),
        );
        Executor::new(Arc::new(dispatcher))
    }

    fn touch_all(root: &Path, names: &[&str]) {
        for name in names {
            fs::write(root.join(name), "").unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn one_outcome_per_file() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        touch_all(input.path(), &["a.csv", "b.csv", "c.csv", "d.nc", "e.txt"]);
        let extractors = Extractors::empty()
            .with(Category::Timeseries, |s: &SourceFile<'_>| -> ExtractResult<RawMetadata> {
                Ok(stub_raw(s))
            })
            .with(Category::Netcdf, |s: &SourceFile<'_>| -> ExtractResult<RawMetadata> {
                Ok(stub_raw(s))
            });
        let exec = executor(input.path(), output.path(), extractors, None);
        let classification = classify_tree(input.path(), "hs_user_meta.json").unwrap();

        let outcomes = exec.run(&classification).await;

        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(DispatchOutcome::succeeded));
        for name in ["a.csv.json", "b.csv.json", "c.csv.json", "d.nc.json"] {
            assert!(output.path().join(name).exists(), "{name}");
        }
        let stats = exec.dispatcher.stats();
        assert_eq!(stats.dispatched(), 4);
        assert_eq!(stats.extracted(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn netcdf_runs_alone_after_parallel_group() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        touch_all(input.path(), &["a.csv", "b.csv", "c.csv", "x.nc", "y.nc", "z.nc"]);

        let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));
        let active = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicUsize::new(0));

        let parallel_log = Arc::clone(&log);
        let serial_log = Arc::clone(&log);
        let serial_active = Arc::clone(&active);
        let serial_overlapped = Arc::clone(&overlapped);
        let extractors = Extractors::empty()
            .with(Category::Timeseries, move |s: &SourceFile<'_>| -> ExtractResult<RawMetadata> {
                thread::sleep(Duration::from_millis(20));
                parallel_log.lock().unwrap().push("parallel");
                Ok(stub_raw(s))
            })
            .with(Category::Netcdf, move |s: &SourceFile<'_>| -> ExtractResult<RawMetadata> {
                if serial_active.fetch_add(1, Ordering::SeqCst) > 0 {
                    serial_overlapped.fetch_add(1, Ordering::SeqCst);
                }
                serial_log.lock().unwrap().push("netcdf");
                thread::sleep(Duration::from_millis(10));
                serial_active.fetch_sub(1, Ordering::SeqCst);
                Ok(stub_raw(s))
            });
        let exec = executor(input.path(), output.path(), extractors, None);
        let classification = classify_tree(input.path(), "hs_user_meta.json").unwrap();

        let outcomes = exec.run(&classification).await;

        assert_eq!(outcomes.len(), 6);
        assert_eq!(overlapped.load(Ordering::SeqCst), 0);
        let log = log.lock().unwrap();
        assert_eq!(*log, vec!["parallel", "parallel", "parallel", "netcdf", "netcdf", "netcdf"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timed_out_file_writes_nothing() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        touch_all(input.path(), &["fast.csv", "slow.sqlite"]);
        let extractors = Extractors::empty().with(
            Category::Timeseries,
            |s: &SourceFile<'_>| -> ExtractResult<RawMetadata> {
                if s.file_name() == "slow.sqlite" {
                    thread::sleep(Duration::from_millis(400));
                }
                Ok(stub_raw(s))
            },
        );
        let exec = executor(
            input.path(),
            output.path(),
            extractors,
            Some(Duration::from_millis(100)),
        );
        let classification = classify_tree(input.path(), "hs_user_meta.json").unwrap();

        let outcomes = exec.run(&classification).await;

        let slow = outcomes
            .iter()
            .find(|o| o.entry.path == Path::new("slow.sqlite"))
            .unwrap();
        assert_eq!(slow.status, DispatchStatus::TimedOut);
        assert!(output.path().join("fast.csv.json").exists());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!output.path().join("slow.sqlite.json").exists());
        assert_eq!(exec.dispatcher.stats().timed_out(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timed_out_extractions_keep_their_slot() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        touch_all(
            input.path(),
            &["a_slow1.csv", "a_slow2.csv", "b.csv", "c.csv", "d.csv"],
        );

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (worker_active, worker_peak) = (Arc::clone(&active), Arc::clone(&peak));
        let extractors = Extractors::empty().with(
            Category::Timeseries,
            move |s: &SourceFile<'_>| -> ExtractResult<RawMetadata> {
                let now = worker_active.fetch_add(1, Ordering::SeqCst) + 1;
                worker_peak.fetch_max(now, Ordering::SeqCst);
                if s.file_name().contains("slow") {
                    thread::sleep(Duration::from_millis(300));
                } else {
                    thread::sleep(Duration::from_millis(10));
                }
                worker_active.fetch_sub(1, Ordering::SeqCst);
                Ok(stub_raw(s))
            },
        );
        let exec = executor(
            input.path(),
            output.path(),
            extractors,
            Some(Duration::from_millis(50)),
        );
        let classification = classify_tree(input.path(), "hs_user_meta.json").unwrap();

        let outcomes = exec.run(&classification).await;

        assert_eq!(outcomes.len(), 5);
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak {}", peak.load(Ordering::SeqCst));
        let timed_out = outcomes
            .iter()
            .filter(|o| o.status == DispatchStatus::TimedOut)
            .count();
        assert_eq!(timed_out, 2);
        for name in ["b.csv.json", "c.csv.json", "d.csv.json"] {
            assert!(output.path().join(name).exists(), "{name}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failures_become_outcomes() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        touch_all(input.path(), &["bad.nc", "bad.tif"]);
        let exec = executor(input.path(), output.path(), Extractors::empty(), None);
        let classification = classify_tree(input.path(), "hs_user_meta.json").unwrap();

        let outcomes = exec.run(&classification).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.status == DispatchStatus::Failed));
        assert_eq!(fs::read_dir(output.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn empty_classification_yields_nothing() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let exec = executor(input.path(), output.path(), Extractors::builtin(), None);
        let classification = classify_tree(input.path(), "hs_user_meta.json").unwrap();

        assert!(exec.run(&classification).await.is_empty());
    }
}
