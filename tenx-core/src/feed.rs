use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::ApiClient;
use crate::cache::{ListKey, ListScope, QueryKey, ResourceCache};
use crate::config::ClientConfig;
use crate::debounce::Debouncer;
use crate::error::{ClientError, ClientResult};
use crate::filters::{FilterChange, FilterSet};
use crate::models::{Category, ResourceSummary, Tag};

/// Cache-aware reads against the API.
#[derive(Debug, Clone)]
pub struct Queries {
    api: ApiClient,
    cache: ResourceCache,
}

impl Queries {
    pub fn new(api: ApiClient, cache: ResourceCache) -> Self {
        Self { api, cache }
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// Fetches one page of `key`; with a cursor the page is appended.
    pub async fn fetch_page(&self, key: &ListKey, cursor: Option<String>) -> ClientResult<()> {
        let ticket = self.cache.begin_fetch(QueryKey::List(key.clone())).await;
        let cursor_ref = cursor.as_deref();
        let page = match key.scope {
            ListScope::Feed => self.api.list_resources(&key.filters, cursor_ref).await?,
            ListScope::Search => {
                let query = key.filters.query.as_deref().unwrap_or_default();
                self.api.search(query, cursor_ref).await?
            }
            ListScope::Submissions => self.api.user_resources(cursor_ref).await?,
            ListScope::Bookmarks => self.api.bookmarks(cursor_ref).await?,
        };
        debug!(?key, count = page.resources.len(), "fetched page");
        self.cache
            .finish_list_fetch(&ticket, page, cursor.is_some())
            .await
    }

    /// Loads the first page unless a fresh copy is already cached.
    pub async fn load_first(&self, key: &ListKey) -> ClientResult<bool> {
        if self.cache.is_fresh(key).await {
            debug!(?key, "serving partition from cache");
            return Ok(false);
        }
        if key.scope == ListScope::Search
            && key.filters.query.as_deref().map_or(true, |q| q.trim().is_empty())
        {
            debug!("search without a query, nothing to fetch");
            return Ok(false);
        }
        self.fetch_page(key, None).await?;
        Ok(true)
    }

    /// Follows the last cursor of `key`. Returns `false` when nothing is left.
    pub async fn load_more(&self, key: &ListKey) -> ClientResult<bool> {
        match self.cache.next_cursor(key).await {
            Some(cursor) => {
                self.fetch_page(key, Some(cursor)).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn resource(&self, resource_id: &str) -> ClientResult<Arc<ResourceSummary>> {
        if let Some(cached) = self.cache.resource(resource_id).await {
            return Ok(cached);
        }
        let ticket = self
            .cache
            .begin_fetch(QueryKey::Resource(resource_id.to_owned()))
            .await;
        let resource = self.api.get_resource(resource_id).await?;
        self.cache.finish_resource_fetch(&ticket, resource).await?;
        self.cache
            .resource(resource_id)
            .await
            .ok_or(ClientError::Cancelled)
    }

    pub async fn categories(&self) -> ClientResult<Vec<Category>> {
        if let Some(categories) = self.cache.categories().await {
            return Ok(categories);
        }
        let categories = self.api.categories().await?;
        self.cache.put_categories(categories.clone()).await;
        Ok(categories)
    }

    pub async fn tags(&self) -> ClientResult<Vec<Tag>> {
        if let Some(tags) = self.cache.tags().await {
            return Ok(tags);
        }
        let tags = self.api.tags().await?;
        self.cache.put_tags(tags.clone()).await;
        Ok(tags)
    }
}

fn spawn_load(queries: &Queries, key: ListKey) -> JoinHandle<()> {
    let queries = queries.clone();
    tokio::spawn(async move {
        match queries.load_first(&key).await {
            Ok(_) => {}
            Err(ClientError::Cancelled) => debug!(?key, "list fetch superseded"),
            Err(err) => warn!(?key, error = %err, "failed to load resources"),
        }
    })
}

/// The filtered resource feed.
///
/// Filter edits apply to the pending state at once but only reach the cache
/// key, the network and the shareable URL after the quiet window.
pub struct ResourceFeed {
    queries: Queries,
    pending: Mutex<FilterSet>,
    debouncer: Debouncer<FilterSet>,
    active: watch::Receiver<ListKey>,
    url: watch::Receiver<Url>,
    driver: JoinHandle<()>,
}

impl ResourceFeed {
    pub fn start(queries: Queries, page_url: Url, window: Duration) -> Self {
        let initial = FilterSet::from_url(&page_url);
        let initial_key = ListKey::feed(initial.clone());
        let (key_tx, active) = watch::channel(initial_key.clone());
        let (url_tx, url) = watch::channel(initial.to_url(&page_url));
        let (debouncer, mut settled) = Debouncer::<FilterSet>::spawn(window);

        let driver_queries = queries.clone();
        let driver = tokio::spawn(async move {
            let mut inflight = Some(spawn_load(&driver_queries, initial_key));

            while let Some(filters) = settled.recv().await {
                url_tx.send_replace(filters.to_url(&page_url));
                let key = ListKey::feed(filters);
                if *key_tx.borrow() == key {
                    continue;
                }
                key_tx.send_replace(key.clone());
                info!(?key, "feed filters settled");

                if let Some(previous) = inflight.take() {
                    if !previous.is_finished() {
                        previous.abort();
                        debug!("aborted superseded list fetch");
                    }
                }
                inflight = Some(spawn_load(&driver_queries, key));
            }

            if let Some(previous) = inflight {
                previous.abort();
            }
        });

        Self {
            queries,
            pending: Mutex::new(initial),
            debouncer,
            active,
            url,
            driver,
        }
    }

    /// Starts a feed using the configured quiet window.
    pub fn from_config(queries: Queries, page_url: Url, config: &ClientConfig) -> Self {
        Self::start(queries, page_url, config.feed.debounce())
    }

    pub async fn update(&self, change: FilterChange) {
        let mut pending = self.pending.lock().await;
        pending.apply(change);
        self.debouncer.push(pending.clone());
    }

    /// Filters as currently edited, including changes still in the quiet window.
    pub async fn pending(&self) -> FilterSet {
        self.pending.lock().await.clone()
    }

    pub fn active_key(&self) -> ListKey {
        self.active.borrow().clone()
    }

    pub fn subscribe_key(&self) -> watch::Receiver<ListKey> {
        self.active.clone()
    }

    pub fn current_url(&self) -> Url {
        self.url.borrow().clone()
    }

    pub fn subscribe_url(&self) -> watch::Receiver<Url> {
        self.url.clone()
    }

    pub async fn resources(&self) -> Vec<Arc<ResourceSummary>> {
        self.queries.cache().resources(&self.active_key()).await
    }

    pub async fn has_more(&self) -> bool {
        self.queries.cache().has_more(&self.active_key()).await
    }

    pub async fn load_more(&self) -> ClientResult<bool> {
        self.queries.load_more(&self.active_key()).await
    }

    pub async fn refresh(&self) -> ClientResult<()> {
        self.queries.fetch_page(&self.active_key(), None).await
    }

    pub async fn shutdown(self) -> ClientResult<()> {
        self.debouncer.close().await?;
        self.driver.await?;
        Ok(())
    }
}
