use std::sync::Arc;

/// Events emitted during a sync run for progress reporting
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A page of raw entries is being fetched
    FetchingPage { page: u32 },

    /// A page was fetched and classified
    PageFetched {
        page: u32,
        entries: usize,
        candidates: usize,
    },

    /// Paging finished; candidates are about to be processed
    CandidatesCollected {
        /// Highest sequence known to the store when the run started
        boundary: u32,
        total: usize,
    },

    /// A worker picked up an episode
    EpisodeStarting {
        /// Identifies the worker slot (0 to workers-1)
        slot: usize,
        sequence: u32,
        title: String,
        /// Index of this episode in the candidate list
        index: usize,
        total: usize,
    },

    /// Source audio download is starting
    DownloadStarting {
        sequence: u32,
        /// Expected content length in bytes, if known
        content_length: Option<u64>,
    },

    /// Download progress update
    DownloadProgress {
        sequence: u32,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },

    /// The downloaded audio is being uploaded to the archive
    Uploading { sequence: u32, remote_path: String },

    /// Audio is now durably archived
    EpisodeArchived {
        sequence: u32,
        remote_path: String,
        hash: String,
    },

    /// The archive already held this episode; nothing was transferred
    EpisodeAlreadyArchived { sequence: u32 },

    /// Processing an episode failed
    EpisodeFailed { sequence: u32, error: String },

    /// Sync run completed
    SyncCompleted {
        succeeded: usize,
        failed: usize,
        skipped: usize,
        cancelled: usize,
    },
}

/// Trait for reporting progress events during synchronization.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {}
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}
