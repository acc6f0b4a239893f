pub mod archive;
pub mod config;
pub mod episode;
pub mod error;
pub mod extract;
pub mod http;
pub mod progress;
pub mod retry;
pub mod source;
pub mod store;
pub mod sync;

// Re-export main types for convenience
pub use archive::{
    ArchiveLayout, ArchiveOutcome, ArchiveRetries, ArchiveStore, EpisodeArchiver,
    FileStationClient, LocalDirectoryStore, RemoteFileStore,
};
pub use config::SyncConfig;
pub use episode::{Episode, ExtraLink, Track};
pub use error::{
    ArchiveError, DownloadError, EpisodeError, FetchError, ParseError, PersistenceError,
    RemoteStoreError, SyncError,
};
pub use extract::{Extraction, MetadataExtractor, parse_playlist, parse_playlist_text};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
pub use retry::RetryPolicy;
pub use source::{ContentFetcher, FeedFetcher, RawEntry, WordPressFetcher};
pub use store::{JsonDirectoryStore, PersistenceGateway};
pub use sync::{
    ArchiveStatus, CandidateReason, EpisodeOutcome, SyncController, SyncOptions, SyncReport,
};
