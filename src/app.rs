use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::db::{Repository, Store};
use crate::error::{AppError, Result};
use crate::fetcher::{FetchedMetadata, MetadataFetcher, OpenGraphFetcher};
use crate::models::{Article, Group, GroupId};
use crate::sync::{SyncEngine, SyncReport, SyncSettings};

// Message for a completed sync pass
pub struct SyncResult {
    pub report: SyncReport,
    pub articles: Vec<Article>,
}

/// Application root: owns the store handle and everything built on it.
pub struct App {
    // Data
    pub articles: Vec<Article>,
    pub groups: Vec<Group>,
    pub group_filter: Option<GroupId>,

    // Async state
    pub last_sync: Option<SyncReport>,
    sync_rx: mpsc::Receiver<SyncResult>,

    // Services
    pub repository: Repository,
    sync: SyncEngine,
    fetcher: Arc<dyn MetadataFetcher>,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let store = Store::open(&config.db_path).await?;
        let fetcher = OpenGraphFetcher::new(config.fetch_timeout(), &config.user_agent)?;
        Self::with_store(store, Arc::new(fetcher), config.sync_settings()).await
    }

    pub async fn with_store(
        store: Store,
        fetcher: Arc<dyn MetadataFetcher>,
        settings: SyncSettings,
    ) -> Result<Self> {
        let repository = Repository::new(store);
        let sync = SyncEngine::new(repository.clone(), Arc::clone(&fetcher), settings);

        let (sync_tx, sync_rx) = mpsc::channel(4);
        sync.on_sync_pass_completed(move |report, articles| {
            let result = SyncResult {
                report: report.clone(),
                articles: articles.to_vec(),
            };
            if sync_tx.try_send(result).is_err() {
                tracing::debug!("Sync result dropped, receiver busy or closed");
            }
        });

        let articles = repository.list_articles(None).await?;
        let groups = repository.list_groups().await?;

        Ok(Self {
            articles,
            groups,
            group_filter: None,
            last_sync: None,
            sync_rx,
            repository,
            sync,
            fetcher,
        })
    }

    pub async fn set_group_filter(&mut self, group: Option<GroupId>) -> Result<()> {
        if let Some(id) = group {
            if self.repository.get_group(id).await?.is_none() {
                return Err(AppError::not_found("group", id));
            }
        }
        self.group_filter = group;
        self.reload_articles().await
    }

    pub async fn add_article(&mut self, url: &str) -> Result<Article> {
        let article = self.repository.add_article(url).await?;
        self.reload_articles().await?;
        Ok(article)
    }

    pub async fn add_group(&mut self, name: &str) -> Result<Group> {
        let group = self.repository.add_group(name).await?;
        self.reload_groups().await?;
        Ok(group)
    }

    pub async fn delete_article(&mut self, id: &str) -> Result<()> {
        self.repository.delete_article(id).await?;
        self.reload_all().await
    }

    pub async fn delete_group(&mut self, id: GroupId) -> Result<()> {
        self.repository.delete_group(id).await?;
        if self.group_filter == Some(id) {
            self.group_filter = None;
        }
        self.reload_all().await
    }

    pub async fn assign_group(&mut self, article_id: &str, group_id: GroupId) -> Result<()> {
        self.repository.assign_group(article_id, group_id).await?;
        self.reload_all().await
    }

    pub async fn unassign_group(&mut self, article_id: &str, group_id: GroupId) -> Result<()> {
        self.repository.unassign_group(article_id, group_id).await?;
        self.reload_all().await
    }

    /// Fire-and-forget; results arrive through [`App::poll_sync_result`].
    pub fn trigger_sync(&self) -> Option<JoinHandle<Option<SyncReport>>> {
        self.sync.trigger_sync()
    }

    pub fn sync_engine(&self) -> &SyncEngine {
        &self.sync
    }

    /// Poll for a completed sync pass (non-blocking)
    pub async fn poll_sync_result(&mut self) -> Result<bool> {
        let Ok(result) = self.sync_rx.try_recv() else {
            return Ok(false);
        };

        self.last_sync = Some(result.report);
        match self.group_filter {
            // the observer always sends the full list
            None => self.articles = result.articles,
            Some(_) => self.reload_articles().await?,
        }
        self.reload_groups().await?;
        Ok(true)
    }

    /// Runs a pass to completion, waiting on one already in flight if needed.
    ///
    /// When a pass was already in flight, its report is the one returned.
    pub async fn sync_blocking(&mut self) -> Result<Option<SyncReport>> {
        let own = match self.trigger_sync() {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                tracing::error!("Sync task failed: {}", e);
                None
            }),
            None => {
                while self.sync.is_running() {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
                None
            }
        };

        let delivered = self.poll_sync_result().await?;
        match own {
            Some(report) => Ok(Some(report)),
            None if delivered => Ok(self.last_sync.clone()),
            None => Ok(None),
        }
    }

    /// Fetches preview data for a URL without storing anything.
    pub async fn preview(&self, url: &str) -> Result<FetchedMetadata> {
        Ok(self.fetcher.fetch(url).await?)
    }

    async fn reload_articles(&mut self) -> Result<()> {
        self.articles = self.repository.list_articles(self.group_filter).await?;
        Ok(())
    }

    async fn reload_groups(&mut self) -> Result<()> {
        self.groups = self.repository.list_groups().await?;
        Ok(())
    }

    async fn reload_all(&mut self) -> Result<()> {
        self.reload_articles().await?;
        self.reload_groups().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetcher::stub::StubFetcher;

    async fn app(fetcher: StubFetcher) -> App {
        let store = Store::open_in_memory().await.unwrap();
        App::with_store(store, Arc::new(fetcher), SyncSettings::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn sync_result_refreshes_cached_articles() {
        let fetcher = StubFetcher::new().respond("https://a.example.com", "A", "https://a.example.com/i.png");
        let mut app = app(fetcher).await;

        let article = app.add_article("https://a.example.com").await.unwrap();
        assert_eq!(app.articles.len(), 1);
        assert!(app.articles[0].preview.is_none());

        let report = app.sync_blocking().await.unwrap().unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(app.last_sync, Some(report));
        assert_eq!(app.articles[0].id, article.id);
        assert_eq!(
            app.articles[0].preview.as_ref().and_then(|p| p.title.as_deref()),
            Some("A")
        );
        assert!(!app.poll_sync_result().await.unwrap());
    }

    #[tokio::test]
    async fn sync_blocking_reports_the_pass_already_in_flight() {
        let fetcher = StubFetcher::gated().respond("https://a.example.com", "A", "https://a.example.com/i.png");
        let mut app = app(fetcher.clone()).await;
        app.add_article("https://a.example.com").await.unwrap();

        assert!(app.trigger_sync().is_some());
        let gate = fetcher.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            gate.release(1);
        });

        let report = app.sync_blocking().await.unwrap().expect("in-flight report");
        assert_eq!(report.fetched, 1);
        assert_eq!(fetcher.calls_for("https://a.example.com"), 1);
        assert!(app.articles[0].has_preview());
    }

    #[tokio::test]
    async fn group_filter_applies_to_cached_articles() {
        let mut app = app(StubFetcher::new()).await;
        let inside = app.add_article("https://in.example.com").await.unwrap();
        app.add_article("https://out.example.com").await.unwrap();
        let group = app.add_group("Reading").await.unwrap();
        app.assign_group(&inside.id, group.id).await.unwrap();

        app.set_group_filter(Some(group.id)).await.unwrap();
        assert_eq!(app.articles.len(), 1);
        assert_eq!(app.groups[0].article_ids, vec![inside.id.clone()]);

        app.delete_group(group.id).await.unwrap();
        assert_eq!(app.group_filter, None);
        let err = app.set_group_filter(Some(group.id)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { entity: "group", .. }));
        assert_eq!(app.articles.len(), 2);
        assert!(app.groups.is_empty());
    }

    #[tokio::test]
    async fn delete_article_updates_cached_lists() {
        let mut app = app(StubFetcher::new()).await;
        let article = app.add_article("https://example.com").await.unwrap();
        let group = app.add_group("G").await.unwrap();
        app.assign_group(&article.id, group.id).await.unwrap();

        app.delete_article(&article.id).await.unwrap();
        assert!(app.articles.is_empty());
        assert!(app.groups[0].article_ids.is_empty());
    }

    #[tokio::test]
    async fn preview_surfaces_fetch_errors() {
        let app = app(StubFetcher::new().fail("https://down.example.com")).await;
        let err = app.preview("https://down.example.com").await.unwrap_err();
        assert!(matches!(err, AppError::Fetch(FetchError::Status(503))));
    }
}
