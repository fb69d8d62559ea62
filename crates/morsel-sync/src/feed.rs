use std::collections::HashSet;

use tracing::{debug, trace};

use morsel_types::models::{FeedFilter, FeedItem, FoodPost, HungerBroadcast};

/// Local copy of the community feed.
///
/// One list, unique by id. Snapshot order is kept as delivered; pushed items
/// go to the front. Sections are computed from the list on every call.
///
/// Ids that expired or were removed are remembered until the next snapshot,
/// so a late duplicate push cannot bring them back. A snapshot is
/// authoritative and replaces everything, tombstones included.
#[derive(Debug, Default)]
pub struct FeedReconciler {
    items: Vec<FeedItem>,
    removed: HashSet<String>,
}

impl FeedReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list with a fresh snapshot. Repeated ids keep their first
    /// occurrence.
    pub fn load_snapshot(&mut self, items: Vec<FeedItem>) {
        let mut seen = HashSet::new();
        let total = items.len();
        self.items = items
            .into_iter()
            .filter(|item| seen.insert(item.id().to_string()))
            .collect();
        self.removed.clear();
        debug!(
            items = self.items.len(),
            dropped = total - self.items.len(),
            "Feed snapshot loaded"
        );
    }

    /// Prepend a pushed post. Returns false if the id is already listed or
    /// has been removed.
    pub fn apply_broadcast(&mut self, item: FeedItem) -> bool {
        if self.contains(item.id()) || self.removed.contains(item.id()) {
            trace!(id = %item.id(), "Duplicate feed push ignored");
            return false;
        }
        self.items.insert(0, item);
        true
    }

    /// Drop an expired broadcast. Returns false if it was not listed.
    pub fn apply_expiry(&mut self, id: &str) -> bool {
        self.remove(id)
    }

    /// Drop a post the local user resolved or deleted.
    pub fn remove(&mut self, id: &str) -> bool {
        self.removed.insert(id.to_string());
        let before = self.items.len();
        self.items.retain(|item| item.id() != id);
        self.items.len() != before
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id() == id)
    }

    pub fn get(&self, id: &str) -> Option<&FeedItem> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn items(&self) -> &[FeedItem] {
        &self.items
    }

    /// Items for one feed tab.
    pub fn filtered(&self, filter: FeedFilter) -> Vec<&FeedItem> {
        self.items.iter().filter(|item| filter.matches(item)).collect()
    }

    /// Food that can still be requested: `available` or `requested`.
    pub fn available(&self) -> Vec<&FoodPost> {
        self.food().filter(|post| post.status.is_open()).collect()
    }

    /// Food that is gone. Decided by status alone; a post past its expiry
    /// date stays available until the server says otherwise.
    pub fn expired_or_taken(&self) -> Vec<&FoodPost> {
        self.food().filter(|post| !post.status.is_open()).collect()
    }

    pub fn hungry(&self) -> Vec<&HungerBroadcast> {
        self.items.iter().filter_map(FeedItem::as_hunger).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn food(&self) -> impl Iterator<Item = &FoodPost> {
        self.items.iter().filter_map(FeedItem::as_food)
    }
}
