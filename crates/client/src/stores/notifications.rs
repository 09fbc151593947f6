//! Notification store for the signed-in user.
//!
//! Records are kept newest first. The unread counter is maintained
//! incrementally from each mutation rather than recomputed, so it can drift
//! from the true number of unread records when a pushed count and a local
//! change race. It never goes below zero.

use std::sync::Arc;

use academia_shared::{NotificationId, NotificationPatch, NotificationRecord};
use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::watch;

/// Plain notification state; see [`NotificationsHandle`] for the shared form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationStore {
    records: Vec<NotificationRecord>,
    unread: u64,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[NotificationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn unread_count(&self) -> u64 {
        self.unread
    }

    pub fn get(&self, id: &NotificationId) -> Option<&NotificationRecord> {
        self.records.iter().find(|r| &r.id == id)
    }

    fn position(&self, id: &NotificationId) -> Option<usize> {
        self.records.iter().position(|r| &r.id == id)
    }

    /// Replace everything with a freshly fetched list and count.
    pub fn replace_all(&mut self, mut records: Vec<NotificationRecord>, unread: u64) {
        let now = Utc::now();
        for record in &mut records {
            record.normalize_read_state(now);
        }
        self.records = records;
        self.unread = unread;
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.unread = 0;
    }

    /// Prepend a record. Returns false if a record with the same id exists.
    pub fn add(&mut self, record: NotificationRecord) -> bool {
        if self.get(&record.id).is_some() {
            return false;
        }
        if !record.read {
            self.unread += 1;
        }
        self.records.insert(0, record);
        true
    }

    /// Merge `patch` into the record with `id`. Returns false if not found.
    pub fn update_fields(&mut self, id: &NotificationId, patch: NotificationPatch) -> bool {
        let Some(record) = self.records.iter_mut().find(|r| &r.id == id) else {
            return false;
        };
        let was_read = record.read;

        if let Some(kind) = patch.kind {
            record.kind = kind;
        }
        if let Some(title) = patch.title {
            record.title = title;
        }
        if let Some(message) = patch.message {
            record.message = message;
        }
        if let Some(route) = patch.route {
            record.route = route;
        }
        if let Some(json) = patch.json {
            record.json = json;
        }
        if let Some(read) = patch.read {
            record.read = read;
        }
        if let Some(read_at) = patch.read_at {
            record.read_at = read_at;
        }
        record.normalize_read_state(Utc::now());

        match (was_read, record.read) {
            (false, true) => self.unread = self.unread.saturating_sub(1),
            (true, false) => self.unread += 1,
            _ => {}
        }
        true
    }

    /// Delete the record with `id`, returning it and its former position.
    pub fn remove(&mut self, id: &NotificationId) -> Option<(usize, NotificationRecord)> {
        let index = self.position(id)?;
        let record = self.records.remove(index);
        if !record.read {
            self.unread = self.unread.saturating_sub(1);
        }
        Some((index, record))
    }

    /// Remove every read record, returning them with their former positions.
    pub fn remove_read(&mut self) -> Vec<(usize, NotificationRecord)> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.records.len());
        for (index, record) in std::mem::take(&mut self.records).into_iter().enumerate() {
            if record.read {
                removed.push((index, record));
            } else {
                kept.push(record);
            }
        }
        self.records = kept;
        removed
    }

    /// Put previously removed records back where they were.
    ///
    /// `removed` must be ordered by ascending index, as returned by
    /// [`remove`](Self::remove) and [`remove_read`](Self::remove_read).
    pub fn reinsert(&mut self, removed: Vec<(usize, NotificationRecord)>) {
        for (index, record) in removed {
            if self.get(&record.id).is_some() {
                continue;
            }
            if !record.read {
                self.unread += 1;
            }
            let index = index.min(self.records.len());
            self.records.insert(index, record);
        }
    }

    /// Absolute overwrite with a server-pushed count.
    pub fn set_unread_count(&mut self, count: u64) {
        self.unread = count;
    }
}

/// Shared, session-scoped handle to the notification store.
///
/// Every mutation takes the write lock for its whole duration, so mutations
/// are atomic with respect to each other. The unread count is republished on
/// a watch channel after each mutation.
#[derive(Clone)]
pub struct NotificationsHandle {
    store: Arc<RwLock<NotificationStore>>,
    unread_tx: Arc<watch::Sender<u64>>,
}

impl Default for NotificationsHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationsHandle {
    pub fn new() -> Self {
        let (unread_tx, _) = watch::channel(0);
        Self {
            store: Arc::new(RwLock::new(NotificationStore::new())),
            unread_tx: Arc::new(unread_tx),
        }
    }

    /// Run `f` against the store under the write lock and publish the new count.
    pub fn update<R>(&self, f: impl FnOnce(&mut NotificationStore) -> R) -> R {
        let (result, unread) = {
            let mut store = self.store.write();
            let result = f(&mut store);
            (result, store.unread_count())
        };
        self.unread_tx.send_replace(unread);
        result
    }

    pub fn read<R>(&self, f: impl FnOnce(&NotificationStore) -> R) -> R {
        f(&self.store.read())
    }

    pub fn snapshot(&self) -> Vec<NotificationRecord> {
        self.read(|s| s.records().to_vec())
    }

    pub fn get(&self, id: &NotificationId) -> Option<NotificationRecord> {
        self.read(|s| s.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.read(NotificationStore::len)
    }

    pub fn is_empty(&self) -> bool {
        self.read(NotificationStore::is_empty)
    }

    pub fn unread_count(&self) -> u64 {
        self.read(NotificationStore::unread_count)
    }

    pub fn watch_unread(&self) -> watch::Receiver<u64> {
        self.unread_tx.subscribe()
    }

    pub fn replace_all(&self, records: Vec<NotificationRecord>, unread: u64) {
        self.update(|s| s.replace_all(records, unread))
    }

    pub fn clear(&self) {
        self.update(NotificationStore::clear)
    }

    pub fn add(&self, record: NotificationRecord) -> bool {
        self.update(|s| s.add(record))
    }

    pub fn update_fields(&self, id: &NotificationId, patch: NotificationPatch) -> bool {
        self.update(|s| s.update_fields(id, patch))
    }

    pub fn remove(&self, id: &NotificationId) -> Option<(usize, NotificationRecord)> {
        self.update(|s| s.remove(id))
    }

    pub fn remove_read(&self) -> Vec<(usize, NotificationRecord)> {
        self.update(NotificationStore::remove_read)
    }

    pub fn reinsert(&self, removed: Vec<(usize, NotificationRecord)>) {
        self.update(|s| s.reinsert(removed))
    }

    pub fn set_unread_count(&self, count: u64) {
        self.update(|s| s.set_unread_count(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use academia_shared::NotificationKind;
    use chrono::{TimeZone, Utc};

    fn record(id: &str, read: bool) -> NotificationRecord {
        let created = Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap();
        NotificationRecord {
            id: id.into(),
            kind: NotificationKind::Info,
            title: format!("title {id}"),
            message: format!("message {id}"),
            user_id: "u-1".to_string(),
            read,
            read_at: read.then_some(created),
            created_at: created,
            route: None,
            json: None,
        }
    }

    #[test]
    fn replace_all_normalizes_read_at() {
        let mut store = NotificationStore::new();
        let mut read_without_time = record("a", true);
        read_without_time.read_at = None;
        let mut unread_with_time = record("b", false);
        unread_with_time.read_at = Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());

        store.replace_all(vec![read_without_time, unread_with_time], 1);

        assert!(store.get(&"a".into()).unwrap().read_at.is_some());
        assert!(store.get(&"b".into()).unwrap().read_at.is_none());
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn add_prepends_and_counts_unread_only() {
        let mut store = NotificationStore::new();
        assert!(store.add(record("a", false)));
        assert!(store.add(record("b", true)));
        assert_eq!(store.records()[0].id.as_str(), "b");
        assert_eq!(store.unread_count(), 1);

        // Duplicate ids are not counted twice.
        assert!(!store.add(record("a", false)));
        assert_eq!(store.len(), 2);
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn add_then_remove_restores_counter() {
        let mut store = NotificationStore::new();
        store.set_unread_count(5);
        store.add(record("x", false));
        assert_eq!(store.unread_count(), 6);
        store.remove(&"x".into());
        assert_eq!(store.unread_count(), 5);
    }

    #[test]
    fn mark_read_decrements_once_and_sets_read_at() {
        let mut store = NotificationStore::new();
        store.add(record("a", false));
        store.add(record("b", false));
        let t = Utc.with_ymd_and_hms(2026, 4, 2, 15, 30, 0).unwrap();

        assert!(store.update_fields(&"a".into(), NotificationPatch::mark_read(t)));
        assert_eq!(store.unread_count(), 1);
        assert_eq!(store.get(&"a".into()).unwrap().read_at, Some(t));

        // Marking an already read record again changes nothing.
        store.update_fields(&"a".into(), NotificationPatch::mark_read(t));
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn mark_unread_increments_and_clears_read_at() {
        let mut store = NotificationStore::new();
        store.add(record("a", true));
        assert!(store.update_fields(&"a".into(), NotificationPatch::mark_unread()));
        let a = store.get(&"a".into()).unwrap();
        assert!(!a.read);
        assert!(a.read_at.is_none());
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn read_without_timestamp_is_stamped_locally() {
        let mut store = NotificationStore::new();
        store.add(record("a", false));
        let patch = NotificationPatch {
            read: Some(true),
            ..Default::default()
        };
        store.update_fields(&"a".into(), patch);
        assert!(store.get(&"a".into()).unwrap().read_at.is_some());
    }

    #[test]
    fn unknown_id_is_a_noop() {
        let mut store = NotificationStore::new();
        store.add(record("a", false));
        let before = store.clone();
        assert!(!store.update_fields(&"zzz".into(), NotificationPatch::mark_unread()));
        assert!(store.remove(&"zzz".into()).is_none());
        assert_eq!(store, before);
    }

    #[test]
    fn counter_never_goes_negative() {
        let mut store = NotificationStore::new();
        for id in ["a", "b", "c"] {
            store.add(record(id, false));
        }
        // Server says zero while local records are still unread.
        store.set_unread_count(0);

        let t = Utc::now();
        store.update_fields(&"a".into(), NotificationPatch::mark_read(t));
        assert_eq!(store.unread_count(), 0);
        store.remove(&"b".into());
        assert_eq!(store.unread_count(), 0);
        store.update_fields(&"c".into(), NotificationPatch::mark_read(t));
        store.update_fields(&"c".into(), NotificationPatch::mark_unread());
        store.update_fields(&"c".into(), NotificationPatch::mark_read(t));
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn remove_read_and_reinsert_keep_positions() {
        let mut store = NotificationStore::new();
        store.replace_all(
            vec![
                record("a", true),
                record("b", false),
                record("c", true),
                record("d", false),
            ],
            2,
        );

        let removed = store.remove_read();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.unread_count(), 2);

        store.reinsert(removed);
        let ids: Vec<_> = store.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c", "d"]);
        assert_eq!(store.unread_count(), 2);
    }

    #[test]
    fn handle_publishes_unread_count() {
        let handle = NotificationsHandle::new();
        let rx = handle.watch_unread();
        handle.add(record("a", false));
        handle.add(record("b", false));
        assert_eq!(*rx.borrow(), 2);

        handle.set_unread_count(7);
        assert_eq!(*rx.borrow(), 7);

        handle.clear();
        assert_eq!(*rx.borrow(), 0);
        assert!(handle.is_empty());
    }
}
