//! Durable store contract consumed by the engine, plus an in-memory store.

use async_trait::async_trait;
use chime_core::Result;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::timer::Timer;

/// Row filter. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerFilter {
    pub id: Option<i64>,
    pub event: Option<String>,
    pub author_id: Option<i64>,
}

impl TimerFilter {
    /// Matches every timer.
    pub fn all() -> Self {
        Self::default()
    }

    /// Timers of one event kind scheduled by `author_id`.
    pub fn owned_by(event: &str, author_id: i64) -> Self {
        Self {
            id: None,
            event: Some(event.to_string()),
            author_id: Some(author_id),
        }
    }

    /// Narrow to a single timer id.
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Whether `timer` passes every set field.
    pub fn matches(&self, timer: &Timer) -> bool {
        self.id.is_none_or(|id| timer.id == Some(id))
            && self.event.as_deref().is_none_or(|event| timer.event == event)
            && self.author_id.is_none_or(|author| timer.author_id == author)
    }
}

/// Ordered persistence for timers.
///
/// Every method may fail with a transient error; the engine recovers
/// rather than giving up.
#[async_trait]
pub trait TimerStore: Send + Sync + 'static {
    /// Pending timer with the smallest `expires_at` strictly before `before`.
    /// Ties resolve by ascending id.
    async fn find_earliest(&self, before: NaiveDateTime) -> Result<Option<Timer>>;

    /// Persist a timer and return its new id. Any id on the input is ignored.
    async fn insert(&self, timer: &Timer) -> Result<i64>;

    /// `false` if the timer was already gone.
    async fn delete_by_id(&self, id: i64) -> Result<bool>;

    /// Delete every matching timer, returning how many were removed.
    async fn delete_matching(&self, filter: &TimerFilter) -> Result<u64>;

    async fn count_pending(&self, filter: &TimerFilter) -> Result<u64>;

    /// Up to `limit` matching timers ordered by expiry, then id.
    async fn list_pending(&self, filter: &TimerFilter, limit: usize) -> Result<Vec<Timer>>;
}

#[derive(Debug, Default)]
struct MemoryRows {
    next_id: i64,
    // Keyed by (expires_at, id) so iteration order is the dispatch order.
    rows: BTreeMap<(NaiveDateTime, i64), Timer>,
}

/// Non-durable store backed by an ordered map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryRows>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, MemoryRows> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.rows().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TimerStore for MemoryStore {
    async fn find_earliest(&self, before: NaiveDateTime) -> Result<Option<Timer>> {
        Ok(self
            .rows()
            .rows
            .values()
            .next()
            .filter(|timer| timer.expires_at < before)
            .cloned())
    }

    async fn insert(&self, timer: &Timer) -> Result<i64> {
        let mut store = self.rows();
        store.next_id += 1;
        let id = store.next_id;
        let mut row = timer.clone();
        row.id = Some(id);
        store.rows.insert((row.expires_at, id), row);
        Ok(id)
    }

    async fn delete_by_id(&self, id: i64) -> Result<bool> {
        let mut store = self.rows();
        let key = store.rows.iter().find(|(_, t)| t.id == Some(id)).map(|(k, _)| *k);
        Ok(key.and_then(|k| store.rows.remove(&k)).is_some())
    }

    async fn delete_matching(&self, filter: &TimerFilter) -> Result<u64> {
        let mut store = self.rows();
        let before = store.rows.len();
        store.rows.retain(|_, timer| !filter.matches(timer));
        Ok((before - store.rows.len()) as u64)
    }

    async fn count_pending(&self, filter: &TimerFilter) -> Result<u64> {
        Ok(self.rows().rows.values().filter(|t| filter.matches(t)).count() as u64)
    }

    async fn list_pending(&self, filter: &TimerFilter, limit: usize) -> Result<Vec<Timer>> {
        Ok(self
            .rows()
            .rows
            .values()
            .filter(|t| filter.matches(t))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerPayload;
    use chrono::{Duration, NaiveDate};

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, 1).unwrap().and_hms_opt(9, 0, 0).unwrap()
    }

    fn timer(event: &str, author: i64, minutes: i64) -> Timer {
        Timer::new(event, author, base(), base() + Duration::minutes(minutes), TimerPayload::new()).unwrap()
    }

    #[tokio::test]
    async fn test_find_earliest_respects_horizon() {
        let store = MemoryStore::new();
        store.insert(&timer("reminder", 1, 10)).await.unwrap();
        store.insert(&timer("reminder", 1, 5)).await.unwrap();
        store.insert(&timer("reminder", 1, 60)).await.unwrap();

        let earliest = store.find_earliest(base() + Duration::days(1)).await.unwrap().unwrap();
        assert_eq!(earliest.expires_at, base() + Duration::minutes(5));
        assert_eq!(earliest.id, Some(2));

        assert!(store.find_earliest(base() + Duration::minutes(5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ties_break_by_id() {
        let store = MemoryStore::new();
        let first = store.insert(&timer("a", 1, 30)).await.unwrap();
        let second = store.insert(&timer("b", 1, 30)).await.unwrap();
        assert!(first < second);

        let earliest = store.find_earliest(base() + Duration::days(1)).await.unwrap().unwrap();
        assert_eq!(earliest.id, Some(first));
        store.delete_by_id(first).await.unwrap();
        let next = store.find_earliest(base() + Duration::days(1)).await.unwrap().unwrap();
        assert_eq!(next.id, Some(second));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        let id = store.insert(&timer("reminder", 1, 10)).await.unwrap();
        assert!(store.delete_by_id(id).await.unwrap());
        assert!(!store.delete_by_id(id).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_filters() {
        let store = MemoryStore::new();
        store.insert(&timer("reminder", 1, 10)).await.unwrap();
        store.insert(&timer("reminder", 2, 20)).await.unwrap();
        let muted = store.insert(&timer("tempmute", 1, 30)).await.unwrap();

        let mine = TimerFilter::owned_by("reminder", 1);
        assert_eq!(store.count_pending(&mine).await.unwrap(), 1);
        assert_eq!(store.count_pending(&TimerFilter::all()).await.unwrap(), 3);

        // Wrong owner: nothing removed.
        let foreign = TimerFilter::owned_by("reminder", 2).with_id(muted);
        assert_eq!(store.delete_matching(&foreign).await.unwrap(), 0);

        let listed = store.list_pending(&TimerFilter { author_id: Some(1), ..Default::default() }, 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].expires_at < listed[1].expires_at);

        assert_eq!(store.delete_matching(&mine).await.unwrap(), 1);
        assert_eq!(store.len(), 2);
    }
}
