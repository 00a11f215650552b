//! In-process [`Store`] backend.
//!
//! Every operation runs under one mutex, so each is trivially atomic. Used by
//! the test suite and for local runs without a Redis instance.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;

use super::{
    AdminRecord, NewOption, OptionRecord, Store, StoreError, VoteOutcome,
};

#[derive(Default)]
struct Inner {
    /// Insertion-ordered, mirroring how records land in the store.
    options: Vec<OptionRecord>,
    admins: BTreeMap<String, AdminRecord>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    snapshot: watch::Sender<Vec<OptionRecord>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Vec::new());
        Self {
            inner: Mutex::new(Inner::default()),
            snapshot,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("store mutex poisoned")
    }

    /// Publish the current snapshot. Called with the lock still held so
    /// snapshots hit the channel in mutation order.
    fn publish(&self, inner: &Inner) {
        self.snapshot.send_replace(inner.options.clone());
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_options(&self) -> Result<Vec<OptionRecord>, StoreError> {
        Ok(self.lock().options.clone())
    }

    async fn seed_options(&self, defaults: &[NewOption]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.options.is_empty() {
            return Ok(());
        }
        for new in defaults {
            inner.options.push(OptionRecord {
                id: new.id(),
                name: new.name.clone(),
                emoji: new.emoji.clone(),
                color: new.color.clone(),
                votes: 0,
                voters: Vec::new(),
            });
        }
        self.publish(&inner);
        Ok(())
    }

    async fn add_option(&self, new: NewOption) -> Result<OptionRecord, StoreError> {
        let id = new.id();
        let mut inner = self.lock();
        if inner.options.iter().any(|o| o.id == id) {
            return Err(StoreError::DuplicateOption(id));
        }
        let record = OptionRecord {
            id,
            name: new.name,
            emoji: new.emoji,
            color: new.color,
            votes: 0,
            voters: Vec::new(),
        };
        inner.options.push(record.clone());
        self.publish(&inner);
        Ok(record)
    }

    async fn remove_option(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let before = inner.options.len();
        inner.options.retain(|o| o.id != id);
        if inner.options.len() == before {
            return Err(StoreError::OptionNotFound(id.to_string()));
        }
        self.publish(&inner);
        Ok(())
    }

    async fn cast_vote(&self, uid: &str, option_id: &str) -> Result<VoteOutcome, StoreError> {
        let mut inner = self.lock();
        if !inner.options.iter().any(|o| o.id == option_id) {
            return Err(StoreError::OptionNotFound(option_id.to_string()));
        }
        let already = inner
            .options
            .iter()
            .any(|o| o.voters.iter().any(|v| v == uid));
        if already {
            return Ok(VoteOutcome::AlreadyVoted);
        }
        let target = inner
            .options
            .iter_mut()
            .find(|o| o.id == option_id)
            .expect("target checked above");
        target.votes += 1;
        target.voters.push(uid.to_string());
        self.publish(&inner);
        Ok(VoteOutcome::Recorded)
    }

    async fn reset_votes(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        for option in &mut inner.options {
            option.votes = 0;
            option.voters.clear();
        }
        self.publish(&inner);
        Ok(())
    }

    async fn list_admins(&self) -> Result<Vec<AdminRecord>, StoreError> {
        Ok(self.lock().admins.values().cloned().collect())
    }

    async fn is_admin(&self, uid: &str) -> Result<bool, StoreError> {
        Ok(self.lock().admins.contains_key(uid))
    }

    async fn put_admin(&self, mut record: AdminRecord) -> Result<AdminRecord, StoreError> {
        let mut inner = self.lock();
        if record.email.is_none() {
            if let Some(existing) = inner.admins.get(&record.uid) {
                record.email = existing.email.clone();
            }
        }
        inner.admins.insert(record.uid.clone(), record.clone());
        Ok(record)
    }

    async fn remove_admin(&self, uid: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.admins.contains_key(uid) {
            return Err(StoreError::AdminNotFound(uid.to_string()));
        }
        if inner.admins.len() <= 1 {
            return Err(StoreError::LastAdmin);
        }
        inner.admins.remove(uid);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Vec<OptionRecord>> {
        self.snapshot.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{default_options, unix_millis};

    fn admin(uid: &str) -> AdminRecord {
        AdminRecord {
            uid: uid.to_string(),
            created_at: unix_millis(),
            created_by: "test".to_string(),
            email: None,
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .seed_options(&[
                NewOption::new("A", "🍕", "red"),
                NewOption::new("B", "🍅", "green"),
            ])
            .await
            .unwrap();
        store
    }

    fn assert_tallies_consistent(options: &[OptionRecord]) {
        for option in options {
            assert_eq!(option.votes as usize, option.voters.len(), "{}", option.id);
        }
    }

    #[tokio::test]
    async fn first_vote_counts_second_is_a_noop() {
        let store = seeded().await;

        assert_eq!(store.cast_vote("u1", "a").await.unwrap(), VoteOutcome::Recorded);
        let options = store.list_options().await.unwrap();
        assert_eq!(options[0].votes, 1);
        assert_eq!(options[0].voters, vec!["u1".to_string()]);
        assert_eq!(options[1].votes, 0);

        // Same caller, different option: already voted, nothing moves.
        assert_eq!(store.cast_vote("u1", "b").await.unwrap(), VoteOutcome::AlreadyVoted);
        let options = store.list_options().await.unwrap();
        assert_eq!(options[0].votes, 1);
        assert_eq!(options[1].votes, 0);
        assert_tallies_consistent(&options);
    }

    #[tokio::test]
    async fn vote_for_unknown_option_is_rejected() {
        let store = seeded().await;
        assert!(matches!(
            store.cast_vote("u1", "calzone").await,
            Err(StoreError::OptionNotFound(_))
        ));
        let options = store.list_options().await.unwrap();
        assert!(options.iter().all(|o| o.votes == 0));
    }

    #[tokio::test]
    async fn distinct_callers_accumulate() {
        let store = seeded().await;
        for uid in ["u1", "u2", "u3"] {
            assert_eq!(store.cast_vote(uid, "a").await.unwrap(), VoteOutcome::Recorded);
        }
        let options = store.list_options().await.unwrap();
        assert_eq!(options[0].votes, 3);
        assert_tallies_consistent(&options);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_votes_commit_at_most_once() {
        let store = Arc::new(seeded().await);
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let target = if i % 2 == 0 { "a" } else { "b" };
            handles.push(tokio::spawn(async move {
                store.cast_vote("u1", target).await.unwrap()
            }));
        }
        let mut recorded = 0;
        for handle in handles {
            if handle.await.unwrap() == VoteOutcome::Recorded {
                recorded += 1;
            }
        }
        assert_eq!(recorded, 1);

        let options = store.list_options().await.unwrap();
        let total: u64 = options.iter().map(|o| o.votes).sum();
        assert_eq!(total, 1);
        assert_tallies_consistent(&options);
    }

    #[tokio::test]
    async fn reset_is_idempotent() {
        let store = seeded().await;
        store.cast_vote("u1", "a").await.unwrap();
        store.cast_vote("u2", "b").await.unwrap();

        store.reset_votes().await.unwrap();
        let after_one = store.list_options().await.unwrap();
        assert!(after_one.iter().all(|o| o.votes == 0 && o.voters.is_empty()));

        store.reset_votes().await.unwrap();
        assert_eq!(store.list_options().await.unwrap(), after_one);

        // Everyone may vote again after a reset.
        assert_eq!(store.cast_vote("u1", "b").await.unwrap(), VoteOutcome::Recorded);
    }

    #[tokio::test]
    async fn seeding_is_a_noop_when_options_exist() {
        let store = seeded().await;
        store.cast_vote("u1", "a").await.unwrap();
        store.seed_options(&default_options()).await.unwrap();
        let options = store.list_options().await.unwrap();
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].votes, 1);
    }

    #[tokio::test]
    async fn removing_an_option_drops_its_voters() {
        let store = seeded().await;
        store.cast_vote("u1", "a").await.unwrap();
        store.remove_option("a").await.unwrap();
        let options = store.list_options().await.unwrap();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].id, "b");
        assert!(matches!(
            store.remove_option("a").await,
            Err(StoreError::OptionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_option_ids_are_rejected() {
        let store = seeded().await;
        assert!(matches!(
            store.add_option(NewOption::new("A", "🧀", "blue")).await,
            Err(StoreError::DuplicateOption(_))
        ));
        let created = store
            .add_option(NewOption::new("BBQ Chicken", "🍗", "amber"))
            .await
            .unwrap();
        assert_eq!(created.id, "bbq-chicken");
        assert_eq!(created.votes, 0);
    }

    #[tokio::test]
    async fn last_admin_cannot_be_removed() {
        let store = MemoryStore::new();
        store.put_admin(admin("admin1")).await.unwrap();

        assert!(matches!(
            store.remove_admin("admin1").await,
            Err(StoreError::LastAdmin)
        ));
        assert_eq!(store.list_admins().await.unwrap().len(), 1);

        store.put_admin(admin("admin2")).await.unwrap();
        store.remove_admin("admin2").await.unwrap();
        let admins = store.list_admins().await.unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].uid, "admin1");
    }

    #[tokio::test]
    async fn upsert_preserves_email_when_incoming_has_none() {
        let store = MemoryStore::new();
        let mut with_email = admin("admin1");
        with_email.email = Some("one@example.com".to_string());
        store.put_admin(with_email).await.unwrap();

        let merged = store.put_admin(admin("admin1")).await.unwrap();
        assert_eq!(merged.email.as_deref(), Some("one@example.com"));
        assert!(store.is_admin("admin1").await.unwrap());
        assert!(!store.is_admin("someone-else").await.unwrap());
    }

    #[tokio::test]
    async fn subscription_sees_latest_snapshot() {
        let store = seeded().await;
        let rx = store.subscribe();
        store.cast_vote("u1", "a").await.unwrap();
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot[0].votes, 1);
    }
}
