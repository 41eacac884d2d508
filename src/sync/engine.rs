use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::Repository;
use crate::error::{FetchError, Result};
use crate::fetcher::MetadataFetcher;
use crate::models::{Article, AttachOutcome};

type PassObserver = Arc<dyn Fn(&SyncReport, &[Article]) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Upper bound for a single fetch, including connect and body read.
    pub fetch_timeout: Duration,
    /// Articles with this many recorded failures are left out of new passes.
    pub max_fetch_attempts: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(15),
            max_fetch_attempts: 5,
        }
    }
}

/// Outcome counts for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Articles in the snapshot taken when the pass started.
    pub snapshot: usize,
    pub fetched: usize,
    /// Gained a preview or disappeared after the snapshot was taken.
    pub skipped: usize,
    pub failed: usize,
    /// Stopped early; the rest of the snapshot was left for a later pass.
    pub cancelled: bool,
}

/// Fills in missing article previews in the background.
///
/// At most one pass runs at a time. A trigger that arrives while a pass is
/// running is dropped, not queued. Items are processed one after another and
/// cancellation is only checked between items.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

struct Inner {
    repository: Repository,
    fetcher: Arc<dyn MetadataFetcher>,
    settings: SyncSettings,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
    observers: Mutex<Vec<PassObserver>>,
}

impl SyncEngine {
    pub fn new(repository: Repository, fetcher: Arc<dyn MetadataFetcher>, settings: SyncSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                repository,
                fetcher,
                settings,
                running: AtomicBool::new(false),
                cancel: Mutex::new(CancellationToken::new()),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Registers a callback run after every completed pass with the report and
    /// the reloaded article list.
    ///
    /// Callbacks run while the engine is still RUNNING, so a trigger issued
    /// synchronously from inside one is dropped.
    pub fn on_sync_pass_completed<F>(&self, callback: F)
    where
        F: Fn(&SyncReport, &[Article]) + Send + Sync + 'static,
    {
        self.inner.lock_observers().push(Arc::new(callback));
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Starts a pass on a background task.
    ///
    /// Returns `None` when a pass is already running. The handle resolves to
    /// `None` when there was nothing to fetch or the snapshot could not be read.
    pub fn trigger_sync(&self) -> Option<JoinHandle<Option<SyncReport>>> {
        if !self.inner.try_start() {
            tracing::debug!("Sync pass already running, dropping trigger");
            return None;
        }

        // a cancel issued once this returns must reach the new pass
        let cancel = CancellationToken::new();
        *self.inner.lock_cancel() = cancel.clone();

        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move {
            let _running = RunningGuard(&inner.running);
            match inner.run(cancel).await {
                Ok(report) => report,
                Err(e) => {
                    tracing::warn!("Sync pass aborted: {}", e);
                    None
                }
            }
        }))
    }

    /// Asks the running pass to stop before its next item.
    pub fn cancel(&self) {
        self.inner.lock_cancel().cancel();
    }
}

impl Inner {
    fn try_start(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn lock_cancel(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.cancel.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_observers(&self) -> std::sync::MutexGuard<'_, Vec<PassObserver>> {
        self.observers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run(&self, cancel: CancellationToken) -> Result<Option<SyncReport>> {
        let snapshot = self
            .repository
            .articles_missing_preview(self.settings.max_fetch_attempts)
            .await?;
        if snapshot.is_empty() {
            tracing::debug!("No articles missing a preview");
            return Ok(None);
        }

        tracing::info!(
            "Sync pass started: {} articles via {}",
            snapshot.len(),
            self.fetcher.name()
        );

        let mut report = SyncReport {
            snapshot: snapshot.len(),
            ..SyncReport::default()
        };

        for article in &snapshot {
            if cancel.is_cancelled() {
                tracing::info!("Sync pass cancelled");
                report.cancelled = true;
                break;
            }
            self.process(article, &mut report).await;
        }

        match self.repository.list_articles(None).await {
            Ok(articles) => {
                let observers = self.lock_observers().clone();
                for observer in &observers {
                    observer(&report, &articles);
                }
            }
            Err(e) => tracing::warn!("Failed to reload articles after sync: {}", e),
        }

        tracing::info!(
            "Sync pass finished: {} fetched, {} skipped, {} failed",
            report.fetched,
            report.skipped,
            report.failed
        );
        Ok(Some(report))
    }

    async fn process(&self, article: &Article, report: &mut SyncReport) {
        // the snapshot may be stale by now
        let current = match self.repository.get_article(&article.id).await {
            Ok(Some(current)) if !current.has_preview() => current,
            Ok(_) => {
                report.skipped += 1;
                return;
            }
            Err(e) => {
                tracing::warn!("Failed to re-read article {}: {}", article.id, e);
                report.failed += 1;
                return;
            }
        };

        let fetched = match tokio::time::timeout(
            self.settings.fetch_timeout,
            self.fetcher.fetch(&current.url),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.settings.fetch_timeout)),
        };

        let metadata = match fetched {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!("Failed to fetch preview for {}: {}", current.url, e);
                report.failed += 1;
                if let Err(e) = self
                    .repository
                    .record_fetch_failure(&current.id, &e.to_string())
                    .await
                {
                    tracing::warn!("Failed to record fetch failure for {}: {}", current.id, e);
                }
                return;
            }
        };

        match self.repository.attach_preview(&current.id, metadata.into()).await {
            Ok(AttachOutcome::Attached) => report.fetched += 1,
            Ok(AttachOutcome::AlreadyPresent | AttachOutcome::ArticleMissing) => report.skipped += 1,
            Err(e) => {
                tracing::warn!("Failed to save preview for {}: {}", current.id, e);
                report.failed += 1;
            }
        }
    }
}

/// Returns the engine to IDLE when dropped, including on panic or abort.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
