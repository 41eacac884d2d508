use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::FetchError;

use super::{FetchedMetadata, MetadataFetcher};

/// Deterministic fetcher for tests.
///
/// Returns canned metadata per URL, fails for URLs marked as failing (and for
/// unknown URLs), and records every call. When gated, each fetch waits for a
/// permit from [`StubFetcher::release`].
#[derive(Clone, Default)]
pub struct StubFetcher {
    responses: Arc<Mutex<HashMap<String, FetchedMetadata>>>,
    failing: Arc<Mutex<Vec<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
    started: Arc<AtomicUsize>,
    gate: Option<Arc<Semaphore>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stub whose fetches block until [`StubFetcher::release`] is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn respond(self, url: &str, title: &str, image_url: &str) -> Self {
        self.responses.lock().unwrap().insert(
            url.to_string(),
            FetchedMetadata {
                title: Some(title.to_string()),
                image_url: Some(image_url.to_string()),
            },
        );
        self
    }

    pub fn fail(self, url: &str) -> Self {
        self.set_failing(url, true);
        self
    }

    pub fn set_failing(&self, url: &str, failing: bool) {
        let mut list = self.failing.lock().unwrap();
        list.retain(|u| u != url);
        if failing {
            list.push(url.to_string());
        }
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    /// Number of fetches that have begun, including ones still waiting on the gate.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl MetadataFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedMetadata, FetchError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.calls.lock().unwrap().push(url.to_string());

        if self.failing.lock().unwrap().iter().any(|u| u == url) {
            return Err(FetchError::Status(503));
        }
        self.responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or(FetchError::Status(404))
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
