//! In-memory record store
//!
//! One per process. Not synchronized: the worker wraps it in a mutex and
//! every mutation goes through the operations below.

use crate::common::{parse_id, Error, Record, RecordFields, Result};
use uuid::Uuid;

/// Outcome of applying a sync snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Applied,
    /// Sequence number not newer than the last applied one
    Stale { last: u64 },
}

#[derive(Debug, Default)]
pub struct RecordStore {
    records: Vec<Record>,
    synced_seq: u64,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<Record>) -> Self {
        Self {
            records,
            synced_seq: 0,
        }
    }

    pub fn list(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sequence number of the last applied snapshot (0 = none).
    pub fn synced_seq(&self) -> u64 {
        self.synced_seq
    }

    pub fn get(&self, id: &str) -> Result<&Record> {
        let id = parse_id(id)?;
        self.records
            .iter()
            .find(|r| r.id == id)
            .ok_or(Error::NotFound(id))
    }

    pub fn insert(&mut self, fields: RecordFields) -> Result<Record> {
        fields.validate()?;
        let id = self.fresh_id();
        let record = Record::new(id, fields);
        self.records.push(record.clone());
        Ok(record)
    }

    /// Replace every non-id field of an existing record.
    pub fn update(&mut self, id: &str, fields: RecordFields) -> Result<Record> {
        let id = parse_id(id)?;
        fields.validate()?;
        let slot = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(Error::NotFound(id))?;
        *slot = Record::new(id, fields);
        Ok(slot.clone())
    }

    /// Remove a record. Returns whether anything was removed; a missing id is
    /// not an error.
    pub fn delete(&mut self, id: &str) -> Result<bool> {
        let id = parse_id(id)?;
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        Ok(self.records.len() != before)
    }

    /// Overwrite the whole record set.
    pub fn replace(&mut self, records: Vec<Record>) {
        self.records = records;
    }

    /// Apply a coordinator snapshot unless an equal or newer one was already
    /// applied.
    pub fn apply_sync(&mut self, seq: u64, records: Vec<Record>) -> SyncOutcome {
        if seq <= self.synced_seq {
            return SyncOutcome::Stale {
                last: self.synced_seq,
            };
        }
        self.replace(records);
        self.synced_seq = seq;
        SyncOutcome::Applied
    }

    fn fresh_id(&self) -> Uuid {
        loop {
            let id = Uuid::new_v4();
            if !self.records.iter().any(|r| r.id == id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn fields(name: &str, age: i64) -> RecordFields {
        RecordFields {
            username: name.to_string(),
            age,
            hobbies: vec!["reading".to_string(), "swimming".to_string()],
        }
    }

    #[test]
    fn test_insert_then_get() {
        let mut store = RecordStore::new();
        let created = store.insert(fields("John", 30)).unwrap();

        let fetched = store.get(&created.id.to_string()).unwrap();
        assert_eq!(fetched, &created);
        assert_eq!(created.id.get_version_num(), 4);
    }

    #[test]
    fn test_insert_preserves_order_and_unique_ids() {
        let mut store = RecordStore::new();
        let mut ids = HashSet::new();
        for i in 0..100 {
            let record = store.insert(fields(&format!("user{}", i), i)).unwrap();
            assert!(ids.insert(record.id));
        }
        let names: Vec<_> = store.list().iter().map(|r| r.username.clone()).collect();
        assert_eq!(names[0], "user0");
        assert_eq!(names[99], "user99");
    }

    #[test]
    fn test_insert_rejects_empty_username() {
        let mut store = RecordStore::new();
        assert!(matches!(
            store.insert(fields("", 30)),
            Err(Error::InvalidInput(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_invalid_ids_leave_store_untouched() {
        let mut store = RecordStore::with_records(crate::common::seed_records());
        let before = store.list().to_vec();

        assert!(matches!(store.get("nope"), Err(Error::InvalidIdentifier(_))));
        assert!(matches!(
            store.update("nope", fields("X", 1)),
            Err(Error::InvalidIdentifier(_))
        ));
        assert!(matches!(store.delete("nope"), Err(Error::InvalidIdentifier(_))));
        assert_eq!(store.list(), &before[..]);
    }

    #[test]
    fn test_get_missing() {
        let store = RecordStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.get(&id.to_string()),
            Err(Error::NotFound(missing)) if missing == id
        ));
    }

    #[test]
    fn test_update_replaces_all_fields() {
        let mut store = RecordStore::new();
        let created = store.insert(fields("Jane Doe", 25)).unwrap();

        let replacement = RecordFields {
            username: "Jane Smith".to_string(),
            age: 26,
            hobbies: vec![],
        };
        let updated = store
            .update(&created.id.to_string(), replacement.clone())
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated, Record::new(created.id, replacement));
        assert_eq!(store.list(), &[updated][..]);
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let mut store = RecordStore::new();
        let id = Uuid::new_v4().to_string();
        assert!(matches!(
            store.update(&id, fields("Ghost", 1)),
            Err(Error::NotFound(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut store = RecordStore::new();
        let created = store.insert(fields("Bob", 40)).unwrap();
        let id = created.id.to_string();

        assert!(store.delete(&id).unwrap());
        assert!(!store.delete(&id).unwrap());
        assert!(!store.delete(&id).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_apply_sync_discards_stale() {
        let mut store = RecordStore::new();
        let seed = crate::common::seed_records();

        assert_eq!(store.apply_sync(2, seed.clone()), SyncOutcome::Applied);
        assert_eq!(store.synced_seq(), 2);

        // An older snapshot arriving late must not roll the store back.
        assert_eq!(
            store.apply_sync(1, vec![]),
            SyncOutcome::Stale { last: 2 }
        );
        assert_eq!(store.apply_sync(2, vec![]), SyncOutcome::Stale { last: 2 });
        assert_eq!(store.list(), &seed[..]);

        assert_eq!(store.apply_sync(3, vec![]), SyncOutcome::Applied);
        assert!(store.is_empty());
    }

    #[test]
    fn test_replace_is_unconditional() {
        let mut store = RecordStore::with_records(crate::common::seed_records());
        store.replace(vec![]);
        assert!(store.is_empty());
        assert_eq!(store.synced_seq(), 0);
    }
}
