// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveOutcome, EpisodeArchiver};
use crate::episode::Episode;
use crate::error::{EpisodeError, FetchError, ParseError, SyncError};
use crate::extract::MetadataExtractor;
use crate::progress::{NoopReporter, ProgressEvent, SharedProgressReporter};
use crate::source::{ContentFetcher, RawEntry};
use crate::store::PersistenceGateway;

/// Options for a sync run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum number of episodes processed concurrently
    pub workers: usize,
    /// Extract and report candidates without persisting or archiving
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            dry_run: false,
        }
    }
}

/// Why an entry was selected for processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateReason {
    /// Sequence is above the boundary read at the start of the run
    New,
    /// At or below the boundary but the store has no record of it
    Missing,
    /// Stored, but its audio was never confirmed archived
    Unarchived,
}

/// What happened to a successfully processed episode's audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveStatus {
    Archived {
        remote_path: String,
        content_hash: String,
    },
    AlreadyArchived {
        remote_path: String,
    },
    /// Nothing was written (dry run)
    DryRun,
}

/// Result of processing one candidate
#[derive(Debug)]
pub struct EpisodeOutcome {
    /// The episode as extracted, with archive fields filled on success
    pub episode: Episode,
    pub reason: CandidateReason,
    /// Metadata that could not be recovered
    pub warnings: Vec<ParseError>,
    pub result: Result<ArchiveStatus, EpisodeError>,
}

impl EpisodeOutcome {
    pub fn sequence(&self) -> u32 {
        self.episode.sequence
    }
}

/// Summary of a sync run
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Highest known sequence when the run started
    pub boundary: u32,
    pub pages_fetched: u32,
    /// Per-candidate outcomes, ascending by sequence
    pub outcomes: Vec<EpisodeOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    /// Entries whose title carries no sequence number
    pub skipped: usize,
    /// Candidates never dispatched because the run was cancelled
    pub cancelled: usize,
    /// Page fetches that failed after retries; paging stopped at the first
    pub page_errors: Vec<(u32, FetchError)>,
}

impl SyncReport {
    pub fn failures(&self) -> impl Iterator<Item = (&EpisodeOutcome, &EpisodeError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o, e)))
    }
}

struct Candidate {
    sequence: u32,
    reason: CandidateReason,
    raw: RawEntry,
}

#[derive(Default)]
struct Collected {
    candidates: Vec<Candidate>,
    pages_fetched: u32,
    skipped: usize,
    page_errors: Vec<(u32, FetchError)>,
}

/// Orchestrates fetch, extract, persist and archive for one show
pub struct SyncController<F: ?Sized, P: ?Sized, A: ?Sized> {
    fetcher: Arc<F>,
    store: Arc<P>,
    archiver: Arc<A>,
    extractor: MetadataExtractor,
    options: SyncOptions,
    reporter: SharedProgressReporter,
    cancel: CancellationToken,
}

impl<F, P, A> SyncController<F, P, A>
where
    F: ContentFetcher + ?Sized,
    P: PersistenceGateway + ?Sized + 'static,
    A: EpisodeArchiver + ?Sized + 'static,
{
    pub fn new(
        fetcher: Arc<F>,
        store: Arc<P>,
        archiver: Arc<A>,
        extractor: MetadataExtractor,
        options: SyncOptions,
    ) -> Self {
        Self {
            fetcher,
            store,
            archiver,
            extractor,
            options,
            reporter: NoopReporter::shared(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: SharedProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Once cancelled, no further candidates are dispatched; episodes in
    /// flight run to completion
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run one incremental sync, fetching at most `max_pages` pages.
    ///
    /// Only a failure to read the sync boundary is an error; everything
    /// after that is recorded per episode in the report.
    pub async fn sync(&self, max_pages: u32) -> Result<SyncReport, SyncError> {
        let boundary = self
            .store
            .highest_known_sequence()
            .await
            .map_err(SyncError::Boundary)?;
        info!(boundary, max_pages, dry_run = self.options.dry_run, "starting sync");

        let mut collected = self.collect_candidates(boundary, max_pages).await;
        collected.candidates.sort_by_key(|c| c.sequence);

        self.reporter.report(ProgressEvent::CandidatesCollected {
            boundary,
            total: collected.candidates.len(),
        });

        let (mut outcomes, cancelled) = self.dispatch(collected.candidates).await;
        outcomes.sort_by_key(EpisodeOutcome::sequence);

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        let succeeded = outcomes.len() - failed;

        self.reporter.report(ProgressEvent::SyncCompleted {
            succeeded,
            failed,
            skipped: collected.skipped,
            cancelled,
        });
        info!(succeeded, failed, skipped = collected.skipped, cancelled, "sync finished");

        Ok(SyncReport {
            boundary,
            pages_fetched: collected.pages_fetched,
            outcomes,
            succeeded,
            failed,
            skipped: collected.skipped,
            cancelled,
            page_errors: collected.page_errors,
        })
    }

    /// Page through the source, newest first, until a page holds nothing
    /// above the boundary or the page ceiling is reached
    async fn collect_candidates(&self, boundary: u32, max_pages: u32) -> Collected {
        let mut collected = Collected::default();
        let mut seen = HashSet::new();

        for page in 1..=max_pages {
            if self.cancel.is_cancelled() {
                debug!(page, "cancelled before fetching page");
                break;
            }

            self.reporter.report(ProgressEvent::FetchingPage { page });
            let entries = match self.fetcher.fetch_page(page).await {
                Ok(entries) => entries,
                Err(e) => {
                    error!(page, error = %e, "page fetch failed, ending paging");
                    collected.page_errors.push((page, e));
                    break;
                }
            };
            collected.pages_fetched = page;

            if entries.is_empty() {
                debug!(page, "source exhausted");
                break;
            }

            let entry_count = entries.len();
            let before = collected.candidates.len();
            let mut page_has_new = false;

            for raw in entries {
                let Some(sequence) = self.extractor.sequence_of(&raw) else {
                    debug!(title = %raw.title, "entry has no sequence number");
                    collected.skipped += 1;
                    continue;
                };

                page_has_new |= sequence > boundary;
                if !seen.insert(sequence) {
                    continue;
                }

                if let Some(reason) = self.classify(sequence, boundary).await {
                    collected.candidates.push(Candidate {
                        sequence,
                        reason,
                        raw,
                    });
                }
            }

            self.reporter.report(ProgressEvent::PageFetched {
                page,
                entries: entry_count,
                candidates: collected.candidates.len() - before,
            });

            if !page_has_new {
                debug!(page, "no entries above boundary, stopping");
                break;
            }
        }

        collected
    }

    async fn classify(&self, sequence: u32, boundary: u32) -> Option<CandidateReason> {
        if sequence > boundary {
            return Some(CandidateReason::New);
        }

        let present = match self.store.is_sequence_present(sequence).await {
            Ok(present) => present,
            Err(e) => {
                warn!(sequence, error = %e, "store lookup failed, treating as missing");
                return Some(CandidateReason::Missing);
            }
        };
        if !present {
            return Some(CandidateReason::Missing);
        }

        match self.store.is_archived(sequence).await {
            Ok(true) => None,
            Ok(false) => Some(CandidateReason::Unarchived),
            Err(e) => {
                warn!(sequence, error = %e, "store lookup failed, treating as unarchived");
                Some(CandidateReason::Unarchived)
            }
        }
    }

    /// Process candidates on a fixed pool of worker slots.
    ///
    /// A slot is acquired before each spawn, so episodes start in ascending
    /// order. Returns the outcomes and the number of candidates never started.
    async fn dispatch(&self, candidates: Vec<Candidate>) -> (Vec<EpisodeOutcome>, usize) {
        let workers = self.options.workers.max(1);
        let total = candidates.len();

        let (slot_tx, mut slot_rx) = mpsc::channel(workers);
        for slot in 0..workers {
            let _ = slot_tx.try_send(slot);
        }

        let mut running: Vec<(EpisodeOutcome, JoinHandle<EpisodeOutcome>)> = Vec::new();
        let mut cancelled = 0;
        let mut pending = candidates.into_iter().enumerate();

        while let Some((index, candidate)) = pending.next() {
            let slot = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                slot = slot_rx.recv() => slot,
            };
            let Some(slot) = slot else {
                cancelled = 1 + pending.len();
                info!(cancelled, "sync cancelled, not dispatching remaining episodes");
                break;
            };

            let extraction = self.extractor.extract(&candidate.raw, candidate.sequence);
            let outcome = EpisodeOutcome {
                episode: extraction.episode,
                reason: candidate.reason,
                warnings: extraction.warnings,
                result: Ok(ArchiveStatus::DryRun),
            };

            self.reporter.report(ProgressEvent::EpisodeStarting {
                slot,
                sequence: candidate.sequence,
                title: outcome.episode.title.clone(),
                index,
                total,
            });

            let worker = EpisodeWorker {
                store: self.store.clone(),
                archiver: self.archiver.clone(),
                reporter: self.reporter.clone(),
                dry_run: self.options.dry_run,
            };
            let fallback = EpisodeOutcome {
                episode: outcome.episode.clone(),
                reason: outcome.reason,
                warnings: outcome.warnings.clone(),
                result: Ok(ArchiveStatus::DryRun),
            };
            let lease = SlotLease {
                slot,
                pool: slot_tx.clone(),
            };

            let handle = tokio::spawn(async move {
                let _lease = lease;
                worker.run(outcome).await
            });
            running.push((fallback, handle));
        }

        let mut outcomes = Vec::with_capacity(running.len());
        for (fallback, handle) in running {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(sequence = fallback.sequence(), error = %e, "episode worker stopped");
                    outcomes.push(EpisodeOutcome {
                        result: Err(EpisodeError::Worker(e.to_string())),
                        ..fallback
                    });
                }
            }
        }

        (outcomes, cancelled)
    }
}

/// A worker slot taken from the pool; returned on drop, including when the
/// episode task panics
struct SlotLease {
    slot: usize,
    pool: mpsc::Sender<usize>,
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        // the channel holds one place per slot, so this never finds it full
        let _ = self.pool.try_send(self.slot);
    }
}

/// Everything one spawned episode task needs
struct EpisodeWorker<P: ?Sized, A: ?Sized> {
    store: Arc<P>,
    archiver: Arc<A>,
    reporter: SharedProgressReporter,
    dry_run: bool,
}

impl<P: PersistenceGateway + ?Sized, A: EpisodeArchiver + ?Sized> EpisodeWorker<P, A> {
    async fn run(&self, mut outcome: EpisodeOutcome) -> EpisodeOutcome {
        let sequence = outcome.sequence();

        if self.dry_run {
            debug!(sequence, tracks = outcome.episode.playlist.len(), "dry run, nothing written");
            outcome.result = Ok(ArchiveStatus::DryRun);
            return outcome;
        }

        outcome.result = self.persist_and_archive(&mut outcome.episode, outcome.reason).await;

        match &outcome.result {
            Ok(ArchiveStatus::Archived {
                remote_path,
                content_hash,
            }) => self.reporter.report(ProgressEvent::EpisodeArchived {
                sequence,
                remote_path: remote_path.clone(),
                hash: content_hash.clone(),
            }),
            Ok(_) => self
                .reporter
                .report(ProgressEvent::EpisodeAlreadyArchived { sequence }),
            Err(e) => {
                error!(sequence, error = %e, "episode failed");
                self.reporter.report(ProgressEvent::EpisodeFailed {
                    sequence,
                    error: e.to_string(),
                });
            }
        }

        outcome
    }

    /// Record the episode, archive its audio, then mark it archived.
    ///
    /// The record stays `archived = false` unless every step succeeds.
    async fn persist_and_archive(
        &self,
        episode: &mut Episode,
        reason: CandidateReason,
    ) -> Result<ArchiveStatus, EpisodeError> {
        if reason != CandidateReason::New
            && let Some(previous) = self.store.load(episode.sequence).await?
        {
            episode.file_size_bytes = episode.file_size_bytes.or(previous.file_size_bytes);
            episode.duration_seconds = episode.duration_seconds.or(previous.duration_seconds);
        }

        episode.archived = false;
        self.store.upsert(episode).await?;

        let status = match self.archiver.archive(episode).await? {
            ArchiveOutcome::Archived {
                remote_path,
                bytes,
                content_hash,
                duration_seconds,
            } => {
                episode.file_size_bytes = episode.file_size_bytes.or(Some(bytes));
                episode.duration_seconds = duration_seconds.or(episode.duration_seconds);
                ArchiveStatus::Archived {
                    remote_path,
                    content_hash,
                }
            }
            ArchiveOutcome::AlreadyArchived { remote_path } => {
                ArchiveStatus::AlreadyArchived { remote_path }
            }
        };

        episode.archived = true;
        self.store.upsert(episode).await?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::{ArchiveError, DownloadError, PersistenceError};
    use crate::progress::tests::RecordingReporter;
    use crate::source::Enclosure;

    fn entry(sequence: u32) -> RawEntry {
        RawEntry {
            title: format!("Popcasting{sequence}"),
            published: Some("Fri, 18 Jul 2025 10:00:00 +0200".to_string()),
            link: Some(format!("https://popcastingpop.com/popcasting{sequence}/")),
            body: "The Clean · Tally Ho :: Pavement · Cut Your Hair".to_string(),
            enclosure: Some(Enclosure {
                url: format!("https://www.ivoox.com/popcasting{sequence}.mp3"),
                length: None,
            }),
        }
    }

    /// Serves fixed pages; `failing_page` answers with an HTTP error
    struct FixtureFetcher {
        pages: Vec<Vec<RawEntry>>,
        failing_page: Option<u32>,
        requests: AtomicU32,
    }

    impl FixtureFetcher {
        fn new(pages: Vec<Vec<RawEntry>>) -> Self {
            Self {
                pages,
                failing_page: None,
                requests: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ContentFetcher for FixtureFetcher {
        async fn fetch_page(&self, page: u32) -> Result<Vec<RawEntry>, FetchError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.failing_page == Some(page) {
                return Err(FetchError::HttpStatus {
                    url: format!("https://popcastingpop.com/page/{page}"),
                    status: 404,
                });
            }
            Ok(self
                .pages
                .get(page as usize - 1)
                .cloned()
                .unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<HashMap<u32, Episode>>,
        upserts: Mutex<Vec<(u32, bool)>>,
        broken: bool,
    }

    impl MemoryStore {
        fn with_archived(sequences: impl IntoIterator<Item = u32>) -> Self {
            let store = Self::default();
            for sequence in sequences {
                let mut episode = episode_record(sequence);
                episode.archived = true;
                store.records.lock().unwrap().insert(sequence, episode);
            }
            store
        }

        fn record(&self, sequence: u32) -> Option<Episode> {
            self.records.lock().unwrap().get(&sequence).cloned()
        }
    }

    fn episode_record(sequence: u32) -> Episode {
        Episode {
            sequence,
            title: format!("Popcasting{sequence}"),
            publish_date: None,
            source_url: None,
            audio_url: None,
            file_size_bytes: None,
            cover_image_url: None,
            duration_seconds: None,
            playlist: Vec::new(),
            extra_links: Vec::new(),
            archived: false,
        }
    }

    #[async_trait]
    impl PersistenceGateway for MemoryStore {
        async fn highest_known_sequence(&self) -> Result<u32, PersistenceError> {
            if self.broken {
                return Err(PersistenceError::ReadFailed {
                    path: "records".into(),
                    source: std::io::Error::other("disk gone"),
                });
            }
            Ok(self.records.lock().unwrap().keys().max().copied().unwrap_or(0))
        }

        async fn upsert(&self, episode: &Episode) -> Result<(), PersistenceError> {
            self.upserts
                .lock()
                .unwrap()
                .push((episode.sequence, episode.archived));
            self.records
                .lock()
                .unwrap()
                .insert(episode.sequence, episode.clone());
            Ok(())
        }

        async fn load(&self, sequence: u32) -> Result<Option<Episode>, PersistenceError> {
            Ok(self.record(sequence))
        }
    }

    /// Archives everything except `failing`; optionally cancels a token on
    /// its first call, panics on one sequence, or holds each call for a while
    #[derive(Default)]
    struct FakeArchiver {
        failing: HashSet<u32>,
        panics_on: Option<u32>,
        hold: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
        cancel_on_first: Option<CancellationToken>,
    }

    #[async_trait]
    impl EpisodeArchiver for FakeArchiver {
        async fn archive(&self, episode: &Episode) -> Result<ArchiveOutcome, ArchiveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(token) = &self.cancel_on_first {
                token.cancel();
            }
            if self.panics_on == Some(episode.sequence) {
                panic!("archiver blew up on #{}", episode.sequence);
            }

            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
            if !self.hold.is_zero() {
                tokio::time::sleep(self.hold).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&episode.sequence) {
                return Err(ArchiveError::Download(DownloadError::HttpStatus {
                    url: episode.audio_url.clone().unwrap_or_default(),
                    status: 503,
                }));
            }
            Ok(ArchiveOutcome::Archived {
                remote_path: format!("/mp3/popcasting_{:04}.mp3", episode.sequence),
                bytes: 1000,
                content_hash: "sha256:abc".to_string(),
                duration_seconds: Some(3600),
            })
        }
    }

    fn controller(
        fetcher: FixtureFetcher,
        store: Arc<MemoryStore>,
        archiver: Arc<FakeArchiver>,
        options: SyncOptions,
    ) -> SyncController<FixtureFetcher, MemoryStore, FakeArchiver> {
        SyncController::new(
            Arc::new(fetcher),
            store,
            archiver,
            MetadataExtractor::new("Popcasting").unwrap(),
            options,
        )
    }

    fn sequences(report: &SyncReport) -> Vec<u32> {
        report.outcomes.iter().map(EpisodeOutcome::sequence).collect()
    }

    #[tokio::test]
    async fn empty_store_takes_every_entry_in_ascending_order() {
        let store = Arc::new(MemoryStore::default());
        let archiver = Arc::new(FakeArchiver::default());
        let fetcher = FixtureFetcher::new(vec![vec![entry(3), entry(2), entry(1)]]);

        let report = controller(fetcher, store.clone(), archiver.clone(), SyncOptions::default())
            .sync(10)
            .await
            .unwrap();

        assert_eq!(report.boundary, 0);
        assert_eq!(sequences(&report), vec![1, 2, 3]);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 0);
        assert!(report.outcomes.iter().all(|o| o.reason == CandidateReason::New));

        for sequence in 1..=3 {
            let record = store.record(sequence).unwrap();
            assert!(record.archived);
            assert_eq!(record.duration_seconds, Some(3600));
            assert_eq!(record.file_size_bytes, Some(1000));
            assert_eq!(record.playlist.len(), 2);
        }
        assert_eq!(archiver.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn up_to_date_store_has_no_candidates() {
        let store = Arc::new(MemoryStore::with_archived([1, 2, 3]));
        let archiver = Arc::new(FakeArchiver::default());
        let fetcher = FixtureFetcher::new(vec![vec![entry(3), entry(2), entry(1)], vec![entry(0)]]);

        let report = controller(fetcher, store.clone(), archiver.clone(), SyncOptions::default())
            .sync(10)
            .await
            .unwrap();

        assert_eq!(report.boundary, 3);
        assert!(report.outcomes.is_empty());
        assert_eq!(report.pages_fetched, 1);
        assert_eq!(archiver.calls.load(Ordering::SeqCst), 0);
        assert!(store.upserts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn paging_stops_at_first_page_without_new_entries() {
        let store = Arc::new(MemoryStore::with_archived(1..=10));
        let archiver = Arc::new(FakeArchiver::default());
        let fetcher = FixtureFetcher::new(vec![
            vec![entry(12), entry(11)],
            vec![entry(10), entry(9)],
            vec![entry(8), entry(7)],
        ]);

        let sync = controller(fetcher, store, archiver, SyncOptions::default());
        let report = sync.sync(10).await.unwrap();

        assert_eq!(sequences(&report), vec![11, 12]);
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(sync.fetcher.requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn page_ceiling_bounds_the_run() {
        let pages = (0..5)
            .map(|p| vec![entry(100 - 2 * p), entry(99 - 2 * p)])
            .collect();
        let store = Arc::new(MemoryStore::default());
        let archiver = Arc::new(FakeArchiver::default());

        let sync = controller(FixtureFetcher::new(pages), store, archiver, SyncOptions::default());
        let report = sync.sync(2).await.unwrap();

        assert_eq!(sync.fetcher.requests.load(Ordering::SeqCst), 2);
        assert_eq!(sequences(&report), vec![97, 98, 99, 100]);
        assert!(report.page_errors.is_empty());
    }

    #[tokio::test]
    async fn one_failing_episode_does_not_stop_the_others() {
        let store = Arc::new(MemoryStore::default());
        let archiver = Arc::new(FakeArchiver {
            failing: HashSet::from([2]),
            ..FakeArchiver::default()
        });
        let fetcher = FixtureFetcher::new(vec![vec![entry(3), entry(2), entry(1)]]);
        let recorder = Arc::new(RecordingReporter::default());

        let report = controller(fetcher, store.clone(), archiver, SyncOptions::default())
            .with_reporter(recorder.clone())
            .sync(10)
            .await
            .unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        let failures: Vec<u32> = report.failures().map(|(o, _)| o.sequence()).collect();
        assert_eq!(failures, vec![2]);
        assert!(matches!(
            report.outcomes[1].result,
            Err(EpisodeError::Archive(ArchiveError::Download(_)))
        ));

        assert!(store.record(1).unwrap().archived);
        assert!(!store.record(2).unwrap().archived);
        assert!(store.record(3).unwrap().archived);

        let events = recorder.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::EpisodeFailed { sequence: 2, .. }
        )));
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::SyncCompleted {
                succeeded: 2,
                failed: 1,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn earlier_failures_are_retried_on_the_next_run() {
        let store = Arc::new(MemoryStore::with_archived([6]));
        store.records.lock().unwrap().insert(5, {
            let mut partial = episode_record(5);
            partial.duration_seconds = Some(1800);
            partial
        });
        let archiver = Arc::new(FakeArchiver::default());
        let fetcher = FixtureFetcher::new(vec![vec![entry(7), entry(6), entry(5), entry(4)]]);

        let report = controller(fetcher, store.clone(), archiver, SyncOptions::default())
            .sync(10)
            .await
            .unwrap();

        let reasons: Vec<(u32, CandidateReason)> = report
            .outcomes
            .iter()
            .map(|o| (o.sequence(), o.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                (4, CandidateReason::Missing),
                (5, CandidateReason::Unarchived),
                (7, CandidateReason::New),
            ]
        );
        assert!(store.record(4).unwrap().archived);
        assert!(store.record(5).unwrap().archived);
    }

    #[tokio::test]
    async fn entries_without_sequence_are_skipped_and_duplicates_ignored() {
        let mut untitled = entry(1);
        untitled.title = "Especial verano".to_string();
        let store = Arc::new(MemoryStore::default());
        let archiver = Arc::new(FakeArchiver::default());
        let fetcher = FixtureFetcher::new(vec![vec![entry(2), untitled, entry(2), entry(1)]]);

        let report = controller(fetcher, store, archiver.clone(), SyncOptions::default())
            .sync(10)
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(sequences(&report), vec![1, 2]);
        assert_eq!(archiver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_page_keeps_what_was_collected() {
        let store = Arc::new(MemoryStore::default());
        let archiver = Arc::new(FakeArchiver::default());
        let mut fetcher = FixtureFetcher::new(vec![vec![entry(4), entry(3)], vec![entry(2)]]);
        fetcher.failing_page = Some(2);

        let report = controller(fetcher, store, archiver, SyncOptions::default())
            .sync(10)
            .await
            .unwrap();

        assert_eq!(sequences(&report), vec![3, 4]);
        assert_eq!(report.page_errors.len(), 1);
        assert_eq!(report.page_errors[0].0, 2);
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let store = Arc::new(MemoryStore::default());
        let archiver = Arc::new(FakeArchiver::default());
        let fetcher = FixtureFetcher::new(vec![vec![entry(2), entry(1)]]);
        let options = SyncOptions {
            dry_run: true,
            ..SyncOptions::default()
        };

        let report = controller(fetcher, store.clone(), archiver.clone(), options)
            .sync(10)
            .await
            .unwrap();

        assert_eq!(report.succeeded, 2);
        assert!(
            report
                .outcomes
                .iter()
                .all(|o| matches!(o.result, Ok(ArchiveStatus::DryRun)))
        );
        assert_eq!(report.outcomes[0].episode.playlist.len(), 2);
        assert!(store.upserts.lock().unwrap().is_empty());
        assert_eq!(archiver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_stops_dispatch_but_finishes_in_flight_work() {
        let cancel = CancellationToken::new();
        let store = Arc::new(MemoryStore::default());
        let archiver = Arc::new(FakeArchiver {
            cancel_on_first: Some(cancel.clone()),
            ..FakeArchiver::default()
        });
        let fetcher = FixtureFetcher::new(vec![vec![entry(3), entry(2), entry(1)]]);
        let options = SyncOptions {
            workers: 1,
            dry_run: false,
        };

        let report = controller(fetcher, store.clone(), archiver.clone(), options)
            .with_cancellation(cancel)
            .sync(10)
            .await
            .unwrap();

        assert_eq!(sequences(&report), vec![1]);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.cancelled, 2);
        assert!(store.record(1).unwrap().archived);
        assert!(store.record(2).is_none());
        assert_eq!(archiver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_worker_fails_only_its_episode() {
        let store = Arc::new(MemoryStore::default());
        let archiver = Arc::new(FakeArchiver {
            panics_on: Some(2),
            ..FakeArchiver::default()
        });
        let fetcher = FixtureFetcher::new(vec![vec![entry(3), entry(2), entry(1)]]);
        let options = SyncOptions {
            workers: 1,
            dry_run: false,
        };

        let sync = controller(fetcher, store.clone(), archiver, options);
        let report = tokio::time::timeout(Duration::from_secs(5), sync.sync(1))
            .await
            .expect("sync must finish after a worker panic")
            .unwrap();

        assert_eq!(sequences(&report), vec![1, 2, 3]);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert!(matches!(report.outcomes[1].result, Err(EpisodeError::Worker(_))));
        assert!(store.record(1).unwrap().archived);
        assert!(!store.record(2).unwrap().archived);
        assert!(store.record(3).unwrap().archived);
    }

    #[tokio::test]
    async fn concurrency_stays_within_worker_count() {
        let store = Arc::new(MemoryStore::default());
        let archiver = Arc::new(FakeArchiver {
            hold: Duration::from_millis(20),
            ..FakeArchiver::default()
        });
        let fetcher = FixtureFetcher::new(vec![(1..=7).rev().map(entry).collect()]);
        let options = SyncOptions {
            workers: 2,
            dry_run: false,
        };

        let report = controller(fetcher, store, archiver.clone(), options)
            .sync(1)
            .await
            .unwrap();

        assert_eq!(report.succeeded, 7);
        assert_eq!(archiver.peak_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unreadable_boundary_aborts_before_any_work() {
        let store = Arc::new(MemoryStore {
            broken: true,
            ..MemoryStore::default()
        });
        let archiver = Arc::new(FakeArchiver::default());

        let sync = controller(
            FixtureFetcher::new(vec![vec![entry(1)]]),
            store,
            archiver,
            SyncOptions::default(),
        );
        let result = sync.sync(10).await;

        assert!(matches!(result, Err(SyncError::Boundary(_))));
        assert_eq!(sync.fetcher.requests.load(Ordering::SeqCst), 0);
    }
}
