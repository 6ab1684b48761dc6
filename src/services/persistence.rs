//! Schedule persistence
//!
//! One JSON document per calendar date behind [`ScheduleRepository`]
//! (JSON files on disk, PostgreSQL in `db`, or memory). The
//! [`DebouncedPersister`] coalesces bursts of edits into one write per quiet
//! period and keeps a failed document pending until a later cycle succeeds.
//! Its snapshot version advances only after a successful write; range views
//! reload off that version.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::types::ScheduleDocument;

/// Result of a last-write-wins save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { revision: u64 },
    /// Another writer had stored a newer revision; it was replaced
    Overwrote { revision: u64, stored_revision: u64 },
}

impl WriteOutcome {
    /// Revision stored by this write.
    pub fn revision(&self) -> u64 {
        match self {
            WriteOutcome::Written { revision } | WriteOutcome::Overwrote { revision, .. } => *revision,
        }
    }

    /// Outcome of writing over `stored` when the writer last saw `seen`.
    pub fn next(stored: Option<u64>, seen: u64) -> Self {
        let stored_revision = stored.unwrap_or(0);
        let revision = stored_revision.max(seen) + 1;
        if stored_revision > seen {
            WriteOutcome::Overwrote { revision, stored_revision }
        } else {
            WriteOutcome::Written { revision }
        }
    }
}

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn load(&self, date: NaiveDate) -> DispatchResult<Option<ScheduleDocument>>;

    /// Store `document`, whose `revision` is the last one its writer saw.
    async fn save(&self, document: &ScheduleDocument) -> DispatchResult<WriteOutcome>;

    /// Stored documents for `days` consecutive dates from `start`.
    async fn load_range(&self, start: NaiveDate, days: u32) -> DispatchResult<Vec<ScheduleDocument>> {
        let mut documents = Vec::new();
        for offset in 0..days {
            let Some(date) = start.checked_add_days(Days::new(offset as u64)) else {
                break;
            };
            if let Some(document) = self.load(date).await? {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    fn name(&self) -> &'static str;
}

// ==========================================================================
// In-memory repository
// ==========================================================================

#[derive(Default)]
pub struct MemoryScheduleRepository {
    documents: Mutex<BTreeMap<NaiveDate, ScheduleDocument>>,
    saves: AtomicUsize,
}

impl MemoryScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn get(&self, date: NaiveDate) -> Option<ScheduleDocument> {
        self.documents.lock().get(&date).cloned()
    }
}

#[async_trait]
impl ScheduleRepository for MemoryScheduleRepository {
    async fn load(&self, date: NaiveDate) -> DispatchResult<Option<ScheduleDocument>> {
        Ok(self.get(date))
    }

    async fn save(&self, document: &ScheduleDocument) -> DispatchResult<WriteOutcome> {
        let mut documents = self.documents.lock();
        let outcome = WriteOutcome::next(documents.get(&document.date).map(|d| d.revision), document.revision);
        let mut stored = document.clone();
        stored.revision = outcome.revision();
        documents.insert(document.date, stored);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(outcome)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ==========================================================================
// File repository
// ==========================================================================

/// One `schedule-YYYY-MM-DD.json` per date under a data directory
pub struct FileScheduleRepository {
    dir: PathBuf,
}

impl FileScheduleRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("schedule-{}.json", date.format("%Y-%m-%d")))
    }

    async fn read(path: &Path) -> DispatchResult<Option<ScheduleDocument>> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ScheduleRepository for FileScheduleRepository {
    async fn load(&self, date: NaiveDate) -> DispatchResult<Option<ScheduleDocument>> {
        Self::read(&self.path_for(date)).await
    }

    async fn save(&self, document: &ScheduleDocument) -> DispatchResult<WriteOutcome> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(document.date);

        let stored = Self::read(&path).await?.map(|d| d.revision);
        let outcome = WriteOutcome::next(stored, document.revision);

        let mut written = document.clone();
        written.revision = outcome.revision();
        written.saved_at = Utc::now();
        let json = serde_json::to_string_pretty(&written)?;

        // write-then-rename so a crash never leaves a half-written document
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!("Saved {} (revision {})", path.display(), outcome.revision());
        Ok(outcome)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

// ==========================================================================
// Debounced persister
// ==========================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum PersistStatus {
    Idle,
    /// Edits waiting for the quiet period to elapse
    Pending,
    Saved { revision: u64, at: DateTime<Utc> },
    /// Last attempt failed; the document is kept and retried next cycle
    Failed { message: String, at: DateTime<Utc> },
}

struct Shared {
    status: Mutex<PersistStatus>,
    /// Last revision written per date by this persister
    written: Mutex<BTreeMap<NaiveDate, u64>>,
}

pub struct DebouncedPersister {
    sender: mpsc::UnboundedSender<ScheduleDocument>,
    version: watch::Receiver<u64>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DebouncedPersister {
    pub fn spawn(repository: Arc<dyn ScheduleRepository>, debounce: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (version_tx, version) = watch::channel(0u64);
        let shared = Arc::new(Shared {
            status: Mutex::new(PersistStatus::Idle),
            written: Mutex::new(BTreeMap::new()),
        });
        let cancel = CancellationToken::new();

        info!("Persisting schedules via {} repository ({:?} debounce)", repository.name(), debounce);
        let task = tokio::spawn(run(
            repository,
            debounce,
            receiver,
            version_tx,
            shared.clone(),
            cancel.clone(),
        ));

        Self {
            sender,
            version,
            shared,
            cancel,
            task,
        }
    }

    /// Queue the latest state of a date. Replaces any pending document for it.
    pub fn submit(&self, document: ScheduleDocument) {
        if self.sender.send(document).is_err() {
            error!("Persister task is gone; schedule not queued");
        }
    }

    /// Count of successful writes so far.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.clone()
    }

    pub fn status(&self) -> PersistStatus {
        self.shared.status.lock().clone()
    }

    pub fn written_revision(&self, date: NaiveDate) -> Option<u64> {
        self.shared.written.lock().get(&date).copied()
    }

    /// Flush anything pending and stop the background task.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("Persister task failed: {}", e);
        }
    }
}

async fn run(
    repository: Arc<dyn ScheduleRepository>,
    debounce: Duration,
    mut receiver: mpsc::UnboundedReceiver<ScheduleDocument>,
    version: watch::Sender<u64>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let mut pending: BTreeMap<NaiveDate, ScheduleDocument> = BTreeMap::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let wait = deadline;
        let quiet = async move {
            match wait {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            received = receiver.recv() => match received {
                Some(document) => {
                    pending.insert(document.date, document);
                    *shared.status.lock() = PersistStatus::Pending;
                    deadline = Some(Instant::now() + debounce);
                }
                None => break,
            },
            _ = quiet => {
                flush(repository.as_ref(), &mut pending, &version, &shared).await;
                deadline = (!pending.is_empty()).then(|| Instant::now() + debounce);
            }
        }
    }

    while let Ok(document) = receiver.try_recv() {
        pending.insert(document.date, document);
    }
    if !pending.is_empty() {
        flush(repository.as_ref(), &mut pending, &version, &shared).await;
        if !pending.is_empty() {
            warn!("{} schedule(s) could not be saved before shutdown", pending.len());
        }
    }
}

async fn flush(
    repository: &dyn ScheduleRepository,
    pending: &mut BTreeMap<NaiveDate, ScheduleDocument>,
    version: &watch::Sender<u64>,
    shared: &Shared,
) {
    let dates: Vec<NaiveDate> = pending.keys().copied().collect();

    for date in dates {
        let Some(mut document) = pending.remove(&date) else {
            continue;
        };
        let written = shared.written.lock().get(&date).copied();
        if let Some(written) = written {
            document.revision = document.revision.max(written);
        }

        match repository.save(&document).await {
            Ok(outcome) => {
                if let WriteOutcome::Overwrote { stored_revision, revision } = outcome {
                    warn!(
                        "Schedule {} overwrote revision {} written by another session (now {})",
                        date, stored_revision, revision
                    );
                }
                shared.written.lock().insert(date, outcome.revision());
                version.send_modify(|v| *v += 1);
                *shared.status.lock() = PersistStatus::Saved {
                    revision: outcome.revision(),
                    at: Utc::now(),
                };
                debug!("Persisted schedule {} as revision {}", date, outcome.revision());
            }
            Err(e) => {
                warn!("Failed to persist schedule {}: {}. Retrying next cycle", date, e);
                *shared.status.lock() = PersistStatus::Failed {
                    message: e.to_string(),
                    at: Utc::now(),
                };
                pending.insert(date, document);
            }
        }
    }
}

// ==========================================================================
// Range views
// ==========================================================================

struct CachedRange {
    start: NaiveDate,
    days: u32,
    version: u64,
    documents: Arc<Vec<ScheduleDocument>>,
}

/// Multi-day view reloaded only when the snapshot version moves
pub struct RangeView {
    repository: Arc<dyn ScheduleRepository>,
    version: watch::Receiver<u64>,
    cache: Mutex<Option<CachedRange>>,
    loads: AtomicUsize,
}

impl RangeView {
    pub fn new(repository: Arc<dyn ScheduleRepository>, version: watch::Receiver<u64>) -> Self {
        Self {
            repository,
            version,
            cache: Mutex::new(None),
            loads: AtomicUsize::new(0),
        }
    }

    pub async fn load(&self, start: NaiveDate, days: u32) -> DispatchResult<Arc<Vec<ScheduleDocument>>> {
        if days == 0 {
            return Err(DispatchError::InvalidConfig("range must cover at least one day".to_string()));
        }
        let version = *self.version.borrow();

        let cached = self
            .cache
            .lock()
            .as_ref()
            .filter(|c| c.start == start && c.days == days && c.version == version)
            .map(|c| c.documents.clone());
        if let Some(documents) = cached {
            return Ok(documents);
        }

        let documents = Arc::new(self.repository.load_range(start, days).await?);
        self.loads.fetch_add(1, Ordering::SeqCst);
        debug!("Loaded {} schedule(s) for {} +{} days at version {}", documents.len(), start, days, version);

        *self.cache.lock() = Some(CachedRange {
            start,
            days,
            version,
            documents: documents.clone(),
        });
        Ok(documents)
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Roster, Schedule};
    use tokio::time::{sleep, timeout};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn document(day: u32, revision: u64) -> ScheduleDocument {
        ScheduleDocument {
            date: date(day),
            revision,
            schedule: Schedule::new(date(day), Roster::default(), vec![]),
            drive_times: Default::default(),
            saved_at: Utc::now(),
        }
    }

    /// Fails the first `failures` saves, then delegates
    struct FlakyRepository {
        inner: MemoryScheduleRepository,
        failures: AtomicUsize,
        attempts: AtomicUsize,
    }

    impl FlakyRepository {
        fn new(failures: usize) -> Self {
            Self {
                inner: MemoryScheduleRepository::new(),
                failures: AtomicUsize::new(failures),
                attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ScheduleRepository for FlakyRepository {
        async fn load(&self, date: NaiveDate) -> DispatchResult<Option<ScheduleDocument>> {
            self.inner.load(date).await
        }

        async fn save(&self, document: &ScheduleDocument) -> DispatchResult<WriteOutcome> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(DispatchError::Persistence("disk unavailable".to_string()));
            }
            self.inner.save(document).await
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[test]
    fn write_outcome_detects_newer_stored_revision() {
        assert_eq!(WriteOutcome::next(None, 0), WriteOutcome::Written { revision: 1 });
        assert_eq!(WriteOutcome::next(Some(4), 4), WriteOutcome::Written { revision: 5 });
        assert_eq!(
            WriteOutcome::next(Some(7), 4),
            WriteOutcome::Overwrote { revision: 8, stored_revision: 7 }
        );
    }

    #[tokio::test]
    async fn memory_repository_is_last_write_wins() {
        let repo = MemoryScheduleRepository::new();
        assert_eq!(repo.save(&document(2, 0)).await.unwrap(), WriteOutcome::Written { revision: 1 });
        assert_eq!(repo.save(&document(2, 1)).await.unwrap(), WriteOutcome::Written { revision: 2 });

        // a second session that last saw revision 1
        let outcome = repo.save(&document(2, 1)).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Overwrote { revision: 3, stored_revision: 2 });
        assert_eq!(repo.get(date(2)).unwrap().revision, 3);
    }

    #[tokio::test]
    async fn file_repository_round_trip_and_range() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileScheduleRepository::new(dir.path().join("schedules"));

        assert!(repo.load(date(2)).await.unwrap().is_none());

        repo.save(&document(2, 0)).await.unwrap();
        repo.save(&document(4, 0)).await.unwrap();
        let outcome = repo.save(&document(4, 1)).await.unwrap();
        assert_eq!(outcome.revision(), 2);

        let loaded = repo.load(date(4)).await.unwrap().unwrap();
        assert_eq!(loaded.revision, 2);
        assert_eq!(loaded.schedule, document(4, 0).schedule);

        let range = repo.load_range(date(1), 7).await.unwrap();
        let dates: Vec<NaiveDate> = range.iter().map(|d| d.date).collect();
        assert_eq!(dates, vec![date(2), date(4)]);
        assert!(repo.path_for(date(2)).exists());
    }

    #[tokio::test]
    async fn file_repository_reports_corrupt_documents() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileScheduleRepository::new(dir.path());
        std::fs::write(repo.path_for(date(9)), "{not json").unwrap();

        assert!(matches!(repo.load(date(9)).await, Err(DispatchError::Serialization(_))));
    }

    #[tokio::test]
    async fn burst_of_edits_is_one_write() {
        let repo = Arc::new(MemoryScheduleRepository::new());
        let persister = DebouncedPersister::spawn(repo.clone(), Duration::from_millis(50));
        let mut version = persister.subscribe();

        for i in 0..5 {
            let mut doc = document(2, 0);
            doc.schedule.finalized = i == 4;
            persister.submit(doc);
        }

        assert!(timeout(Duration::from_secs(2), version.wait_for(|v| *v >= 1)).await.is_ok());
        sleep(Duration::from_millis(150)).await;

        assert_eq!(repo.save_count(), 1);
        assert!(repo.get(date(2)).unwrap().schedule.finalized);
        assert_eq!(persister.version(), 1);
        assert_eq!(persister.written_revision(date(2)), Some(1));
        assert!(matches!(persister.status(), PersistStatus::Saved { revision: 1, .. }));
        persister.shutdown().await;
    }

    #[tokio::test]
    async fn failed_write_is_retried_and_version_waits_for_success() {
        let repo = Arc::new(FlakyRepository::new(2));
        let persister = DebouncedPersister::spawn(repo.clone(), Duration::from_millis(20));
        let mut version = persister.subscribe();

        persister.submit(document(3, 0));

        assert!(timeout(Duration::from_secs(2), version.wait_for(|v| *v >= 1)).await.is_ok());
        assert_eq!(repo.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(repo.inner.get(date(3)).unwrap().revision, 1);
        persister.shutdown().await;
    }

    #[tokio::test]
    async fn version_stays_put_while_writes_fail() {
        let repo = Arc::new(FlakyRepository::new(usize::MAX));
        let persister = DebouncedPersister::spawn(repo.clone(), Duration::from_millis(10));

        persister.submit(document(3, 0));
        sleep(Duration::from_millis(120)).await;

        assert_eq!(persister.version(), 0);
        assert!(matches!(persister.status(), PersistStatus::Failed { .. }));
        assert!(repo.attempts.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_document() {
        let repo = Arc::new(MemoryScheduleRepository::new());
        let persister = DebouncedPersister::spawn(repo.clone(), Duration::from_secs(60));

        persister.submit(document(5, 0));
        sleep(Duration::from_millis(20)).await;
        assert_eq!(repo.save_count(), 0);

        persister.shutdown().await;
        assert_eq!(repo.save_count(), 1);
    }

    #[tokio::test]
    async fn later_writes_carry_the_written_revision() {
        let repo = Arc::new(MemoryScheduleRepository::new());
        let persister = DebouncedPersister::spawn(repo.clone(), Duration::from_millis(10));
        let mut version = persister.subscribe();

        persister.submit(document(6, 0));
        assert!(timeout(Duration::from_secs(2), version.wait_for(|v| *v >= 1)).await.is_ok());
        // the store still reports revision 0; no overwrite is flagged
        persister.submit(document(6, 0));
        assert!(timeout(Duration::from_secs(2), version.wait_for(|v| *v >= 2)).await.is_ok());

        assert_eq!(repo.get(date(6)).unwrap().revision, 2);
        persister.shutdown().await;
    }

    #[tokio::test]
    async fn range_view_reloads_only_on_new_version() {
        let repo = Arc::new(MemoryScheduleRepository::new());
        repo.save(&document(2, 0)).await.unwrap();
        repo.save(&document(3, 0)).await.unwrap();
        let (version_tx, version_rx) = watch::channel(0u64);
        let view = RangeView::new(repo.clone(), version_rx);

        let first = view.load(date(2), 7).await.unwrap();
        let again = view.load(date(2), 7).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(view.load_count(), 1);

        repo.save(&document(4, 0)).await.unwrap();
        version_tx.send_replace(1);
        let reloaded = view.load(date(2), 7).await.unwrap();
        assert_eq!(reloaded.len(), 3);
        assert_eq!(view.load_count(), 2);

        view.load(date(2), 3).await.unwrap();
        assert_eq!(view.load_count(), 3);
        assert!(view.load(date(2), 0).await.is_err());
    }
}
