use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every stage of a pipeline run
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub files_classified: AtomicU64,
    pub files_dispatched: AtomicU64,
    pub files_extracted: AtomicU64,
    pub files_failed: AtomicU64,
    pub files_timed_out: AtomicU64,
    pub documents_written: AtomicU64,
    pub datasets_linked: AtomicU64,
    pub children_linked: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_classified(&self, count: u64) {
        self.files_classified.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_dispatched(&self) {
        self.files_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_extracted(&self) {
        self.files_extracted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A timeout is also a failure.
    pub fn inc_timed_out(&self) {
        self.files_timed_out.fetch_add(1, Ordering::Relaxed);
        self.inc_failed();
    }

    pub fn inc_written(&self) {
        self.documents_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_datasets_linked(&self, count: u64) {
        self.datasets_linked.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_children_linked(&self, count: u64) {
        self.children_linked.fetch_add(count, Ordering::Relaxed);
    }

    pub fn classified(&self) -> u64 {
        self.files_classified.load(Ordering::Relaxed)
    }

    pub fn dispatched(&self) -> u64 {
        self.files_dispatched.load(Ordering::Relaxed)
    }

    pub fn extracted(&self) -> u64 {
        self.files_extracted.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.files_failed.load(Ordering::Relaxed)
    }

    pub fn timed_out(&self) -> u64 {
        self.files_timed_out.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.documents_written.load(Ordering::Relaxed)
    }

    pub fn datasets(&self) -> u64 {
        self.datasets_linked.load(Ordering::Relaxed)
    }

    pub fn children(&self) -> u64 {
        self.children_linked.load(Ordering::Relaxed)
    }
}
