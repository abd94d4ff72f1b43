//! Resource list cache.
//!
//! Listings are partitioned by [`ListKey`]; every partition holds the pages
//! fetched so far. Entries are `Arc`s so a patch can replace exactly the
//! summaries it changes while every other entry keeps its identity.
//!
//! All field-level updates, whether they come from the live stream or from
//! a mutation, go through [`visit_snapshot`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::{ClientError, ClientResult};
use crate::filters::FilterSet;
use crate::models::{Category, ResourcePage, ResourceSummary, Tag};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListScope {
    Feed,
    Search,
    Submissions,
    Bookmarks,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListKey {
    pub scope: ListScope,
    pub filters: FilterSet,
}

impl ListKey {
    pub fn feed(filters: FilterSet) -> Self {
        Self {
            scope: ListScope::Feed,
            filters,
        }
    }

    /// A blank query yields a key that never fetches.
    pub fn search(query: &str) -> Self {
        let query = query.trim();
        Self {
            scope: ListScope::Search,
            filters: FilterSet {
                query: (!query.is_empty()).then(|| query.to_owned()),
                ..FilterSet::default()
            },
        }
    }

    pub fn submissions() -> Self {
        Self {
            scope: ListScope::Submissions,
            filters: FilterSet::default(),
        }
    }

    pub fn bookmarks() -> Self {
        Self {
            scope: ListScope::Bookmarks,
            filters: FilterSet::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedPage {
    pub resources: Vec<Arc<ResourceSummary>>,
    pub next_cursor: Option<String>,
}

impl From<ResourcePage> for CachedPage {
    fn from(page: ResourcePage) -> Self {
        Self {
            resources: page.resources.into_iter().map(Arc::new).collect(),
            next_cursor: page.next_cursor,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Partition {
    pub pages: Vec<CachedPage>,
    pub fetched_at: Instant,
}

impl Partition {
    fn new(first: CachedPage) -> Self {
        Self {
            pages: vec![first],
            fetched_at: Instant::now(),
        }
    }

    /// True iff the last fetched page carried a cursor.
    pub fn has_more(&self) -> bool {
        self.next_cursor().is_some()
    }

    pub fn next_cursor(&self) -> Option<&str> {
        self.pages.last().and_then(|page| page.next_cursor.as_deref())
    }

    pub fn resources(&self) -> impl Iterator<Item = &Arc<ResourceSummary>> {
        self.pages.iter().flat_map(|page| page.resources.iter())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    pub lists: HashMap<ListKey, Partition>,
    pub resources: HashMap<String, Arc<ResourceSummary>>,
}

/// Where a visited summary lives in the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location<'a> {
    Resource,
    List(&'a ListKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcePatch {
    /// Authoritative upvote state. `has_upvoted` is left alone when `None`.
    Upvotes {
        count: u64,
        has_upvoted: Option<bool>,
    },
    Bookmark {
        is_bookmarked: bool,
        count: Option<u64>,
    },
    /// Flip `is_bookmarked` and move `bookmark_count` by one.
    ToggleBookmark,
}

impl ResourcePatch {
    /// The patched summary, or `None` when nothing would change.
    pub fn apply(&self, current: &ResourceSummary) -> Option<ResourceSummary> {
        let mut next = current.clone();
        match *self {
            ResourcePatch::Upvotes { count, has_upvoted } => {
                next.upvote_count = count;
                if let Some(flag) = has_upvoted {
                    next.has_upvoted = flag;
                }
            }
            ResourcePatch::Bookmark {
                is_bookmarked,
                count,
            } => {
                next.is_bookmarked = is_bookmarked;
                if let Some(count) = count {
                    next.bookmark_count = count;
                }
            }
            ResourcePatch::ToggleBookmark => {
                next.is_bookmarked = !current.is_bookmarked;
                next.bookmark_count = if next.is_bookmarked {
                    current.bookmark_count.saturating_add(1)
                } else {
                    current.bookmark_count.saturating_sub(1)
                };
            }
        }
        (next != *current).then_some(next)
    }
}

#[derive(Debug, Clone)]
pub struct Patched {
    pub snapshot: CacheSnapshot,
    pub touched: usize,
}

/// Walks every partition and the single-resource map, rewriting each entry
/// whose id matches `resource_id` with `edit`. Entries `edit` leaves alone
/// (by returning `None`) and entries for other ids keep their `Arc`.
///
/// Returns `None` if nothing changed.
pub fn visit_snapshot<F>(snapshot: &CacheSnapshot, resource_id: &str, mut edit: F) -> Option<Patched>
where
    F: FnMut(Location<'_>, &ResourceSummary) -> Option<ResourceSummary>,
{
    let mut next = snapshot.clone();
    let mut touched = 0;

    if let Some(entry) = next.resources.get_mut(resource_id) {
        if let Some(updated) = edit(Location::Resource, entry) {
            *entry = Arc::new(updated);
            touched += 1;
        }
    }

    for (key, partition) in next.lists.iter_mut() {
        for page in partition.pages.iter_mut() {
            for entry in page.resources.iter_mut() {
                if entry.id != resource_id {
                    continue;
                }
                if let Some(updated) = edit(Location::List(key), entry) {
                    *entry = Arc::new(updated);
                    touched += 1;
                }
            }
        }
    }

    (touched > 0).then_some(Patched {
        snapshot: next,
        touched,
    })
}

pub fn patch_snapshot(
    snapshot: &CacheSnapshot,
    resource_id: &str,
    patch: &ResourcePatch,
) -> Option<Patched> {
    visit_snapshot(snapshot, resource_id, |_, current| patch.apply(current))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookmarkState {
    pub is_bookmarked: bool,
    pub bookmark_count: u64,
}

impl From<&ResourceSummary> for BookmarkState {
    fn from(summary: &ResourceSummary) -> Self {
        Self {
            is_bookmarked: summary.is_bookmarked,
            bookmark_count: summary.bookmark_count,
        }
    }
}

/// Bookmark fields of a resource as they were at capture time, per location.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceCapture {
    pub resource_id: String,
    pub resource: Option<BookmarkState>,
    pub lists: HashMap<ListKey, BookmarkState>,
}

impl ResourceCapture {
    pub fn is_empty(&self) -> bool {
        self.resource.is_none() && self.lists.is_empty()
    }

    fn state_for(&self, location: Location<'_>) -> Option<BookmarkState> {
        match location {
            Location::Resource => self.resource,
            Location::List(key) => self.lists.get(key).copied(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    List(ListKey),
    Resource(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    key: QueryKey,
    generation: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    ListUpdated(ListKey),
    ResourceUpdated(String),
    Patched { resource_id: String, touched: usize },
    Invalidated(ListScope),
}

#[derive(Debug, Clone)]
struct Timed<T> {
    value: T,
    fetched_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    snapshot: CacheSnapshot,
    generations: HashMap<QueryKey, u64>,
    categories: Option<Timed<Vec<Category>>>,
    tags: Option<Timed<Vec<Tag>>>,
}

impl CacheState {
    fn bump(&mut self, key: QueryKey) -> u64 {
        let generation = self.generations.entry(key).or_insert(0);
        *generation += 1;
        *generation
    }

    fn is_current(&self, ticket: &FetchTicket) -> bool {
        self.generations.get(&ticket.key).copied() == Some(ticket.generation)
    }
}

/// Shared handle to the cache. Clones share the same state.
#[derive(Debug, Clone)]
pub struct ResourceCache {
    inner: Arc<RwLock<CacheState>>,
    events: broadcast::Sender<CacheEvent>,
    config: CacheConfig,
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ResourceCache {
    pub fn new(config: CacheConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(RwLock::new(CacheState::default())),
            events,
            config,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub async fn snapshot(&self) -> CacheSnapshot {
        self.inner.read().await.snapshot.clone()
    }

    pub async fn partition(&self, key: &ListKey) -> Option<Partition> {
        self.inner.read().await.snapshot.lists.get(key).cloned()
    }

    pub async fn contains(&self, key: &ListKey) -> bool {
        self.inner.read().await.snapshot.lists.contains_key(key)
    }

    /// All cached summaries of a partition in page order.
    pub async fn resources(&self, key: &ListKey) -> Vec<Arc<ResourceSummary>> {
        let state = self.inner.read().await;
        state
            .snapshot
            .lists
            .get(key)
            .map(|partition| partition.resources().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn has_more(&self, key: &ListKey) -> bool {
        let state = self.inner.read().await;
        state
            .snapshot
            .lists
            .get(key)
            .map(Partition::has_more)
            .unwrap_or(false)
    }

    pub async fn next_cursor(&self, key: &ListKey) -> Option<String> {
        let state = self.inner.read().await;
        state
            .snapshot
            .lists
            .get(key)
            .and_then(|partition| partition.next_cursor().map(ToOwned::to_owned))
    }

    pub async fn is_fresh(&self, key: &ListKey) -> bool {
        let stale_after = self.config.list_stale_after();
        let state = self.inner.read().await;
        state
            .snapshot
            .lists
            .get(key)
            .map(|partition| partition.fetched_at.elapsed() < stale_after)
            .unwrap_or(false)
    }

    /// Replaces the partition with a freshly fetched first page.
    pub async fn insert_first_page(&self, key: ListKey, page: ResourcePage) {
        {
            let mut state = self.inner.write().await;
            state
                .snapshot
                .lists
                .insert(key.clone(), Partition::new(page.into()));
        }
        self.emit(CacheEvent::ListUpdated(key));
    }

    pub async fn append_page(&self, key: ListKey, page: ResourcePage) {
        {
            let mut state = self.inner.write().await;
            match state.snapshot.lists.get_mut(&key) {
                Some(partition) => partition.pages.push(page.into()),
                None => {
                    state
                        .snapshot
                        .lists
                        .insert(key.clone(), Partition::new(page.into()));
                }
            }
        }
        self.emit(CacheEvent::ListUpdated(key));
    }

    pub async fn put_resource(&self, resource: ResourceSummary) {
        let id = resource.id.clone();
        {
            let mut state = self.inner.write().await;
            state
                .snapshot
                .resources
                .insert(id.clone(), Arc::new(resource));
        }
        self.emit(CacheEvent::ResourceUpdated(id));
    }

    pub async fn resource(&self, resource_id: &str) -> Option<Arc<ResourceSummary>> {
        self.inner
            .read()
            .await
            .snapshot
            .resources
            .get(resource_id)
            .cloned()
    }

    /// Applies `patch` to every cached occurrence of the resource.
    /// Returns the number of entries that changed.
    pub async fn patch(&self, resource_id: &str, patch: &ResourcePatch) -> usize {
        let touched = {
            let mut state = self.inner.write().await;
            match patch_snapshot(&state.snapshot, resource_id, patch) {
                Some(patched) => {
                    state.snapshot = patched.snapshot;
                    patched.touched
                }
                None => 0,
            }
        };
        if touched > 0 {
            debug!(resource_id, touched, ?patch, "patched cached resource");
            self.emit(CacheEvent::Patched {
                resource_id: resource_id.to_owned(),
                touched,
            });
        }
        touched
    }

    pub async fn capture(&self, resource_id: &str) -> ResourceCapture {
        let state = self.inner.read().await;
        let resource = state
            .snapshot
            .resources
            .get(resource_id)
            .map(|summary| BookmarkState::from(summary.as_ref()));
        let lists = state
            .snapshot
            .lists
            .iter()
            .filter_map(|(key, partition)| {
                partition
                    .resources()
                    .find(|summary| summary.id == resource_id)
                    .map(|summary| (key.clone(), BookmarkState::from(summary.as_ref())))
            })
            .collect();
        ResourceCapture {
            resource_id: resource_id.to_owned(),
            resource,
            lists,
        }
    }

    /// Puts the captured bookmark fields back wherever they were captured.
    /// Other fields, and partitions fetched after the capture, are left alone.
    pub async fn restore(&self, capture: &ResourceCapture) -> usize {
        let touched = {
            let mut state = self.inner.write().await;
            let patched = visit_snapshot(&state.snapshot, &capture.resource_id, |location, current| {
                let saved = capture.state_for(location)?;
                ResourcePatch::Bookmark {
                    is_bookmarked: saved.is_bookmarked,
                    count: Some(saved.bookmark_count),
                }
                .apply(current)
            });
            match patched {
                Some(patched) => {
                    state.snapshot = patched.snapshot;
                    patched.touched
                }
                None => 0,
            }
        };
        if touched > 0 {
            self.emit(CacheEvent::Patched {
                resource_id: capture.resource_id.clone(),
                touched,
            });
        }
        touched
    }

    /// Drops every partition of `scope` so the next read refetches.
    /// List fetches of that scope still in flight are superseded.
    pub async fn invalidate_scope(&self, scope: ListScope) -> usize {
        let removed = {
            let mut state = self.inner.write().await;
            let before = state.snapshot.lists.len();
            state.snapshot.lists.retain(|key, _| key.scope != scope);
            let in_flight: Vec<QueryKey> = state
                .generations
                .keys()
                .filter(|key| matches!(key, QueryKey::List(list) if list.scope == scope))
                .cloned()
                .collect();
            for key in in_flight {
                state.bump(key);
            }
            before - state.snapshot.lists.len()
        };
        self.emit(CacheEvent::Invalidated(scope));
        removed
    }

    /// Starts a fetch for `key`, superseding any fetch already in flight.
    pub async fn begin_fetch(&self, key: QueryKey) -> FetchTicket {
        let mut state = self.inner.write().await;
        let generation = state.bump(key.clone());
        FetchTicket { key, generation }
    }

    pub async fn cancel(&self, key: QueryKey) {
        self.inner.write().await.bump(key);
    }

    pub async fn cancel_resource_queries(&self, resource_id: &str) {
        self.cancel(QueryKey::Resource(resource_id.to_owned())).await;
    }

    /// Stores a fetched list page unless the ticket was superseded meanwhile.
    /// A follow-up page whose partition has gone is dropped too.
    pub async fn finish_list_fetch(
        &self,
        ticket: &FetchTicket,
        page: ResourcePage,
        append: bool,
    ) -> ClientResult<()> {
        let key = match &ticket.key {
            QueryKey::List(key) => key.clone(),
            QueryKey::Resource(_) => return Err(ClientError::Cancelled),
        };
        {
            let mut state = self.inner.write().await;
            if !state.is_current(ticket) {
                debug!(?key, "dropping superseded list page");
                return Err(ClientError::Cancelled);
            }
            let page = CachedPage::from(page);
            match state.snapshot.lists.get_mut(&key) {
                Some(partition) if append => partition.pages.push(page),
                None if append => {
                    debug!(?key, "dropping page for a partition that is gone");
                    return Err(ClientError::Cancelled);
                }
                _ => {
                    state.snapshot.lists.insert(key.clone(), Partition::new(page));
                }
            }
        }
        self.emit(CacheEvent::ListUpdated(key));
        Ok(())
    }

    pub async fn finish_resource_fetch(
        &self,
        ticket: &FetchTicket,
        resource: ResourceSummary,
    ) -> ClientResult<()> {
        {
            let mut state = self.inner.write().await;
            if !state.is_current(ticket) {
                debug!(resource_id = %resource.id, "dropping superseded resource fetch");
                return Err(ClientError::Cancelled);
            }
            state
                .snapshot
                .resources
                .insert(resource.id.clone(), Arc::new(resource.clone()));
        }
        self.emit(CacheEvent::ResourceUpdated(resource.id));
        Ok(())
    }

    fn fresh<T: Clone>(entry: &Option<Timed<T>>, stale_after: Duration) -> Option<T> {
        entry
            .as_ref()
            .filter(|timed| timed.fetched_at.elapsed() < stale_after)
            .map(|timed| timed.value.clone())
    }

    pub async fn categories(&self) -> Option<Vec<Category>> {
        let state = self.inner.read().await;
        Self::fresh(&state.categories, self.config.taxonomy_stale_after())
    }

    pub async fn put_categories(&self, categories: Vec<Category>) {
        self.inner.write().await.categories = Some(Timed {
            value: categories,
            fetched_at: Instant::now(),
        });
    }

    pub async fn tags(&self) -> Option<Vec<Tag>> {
        let state = self.inner.read().await;
        Self::fresh(&state.tags, self.config.taxonomy_stale_after())
    }

    pub async fn put_tags(&self, tags: Vec<Tag>) {
        self.inner.write().await.tags = Some(Timed {
            value: tags,
            fetched_at: Instant::now(),
        });
    }
}
