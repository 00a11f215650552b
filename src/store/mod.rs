//! # Store
//!
//! Shared vote state behind the [`Store`] trait.
//!
//! Two collections: options (display fields, tally, voter set) and admin
//! markers. The hard requirement is the **at-most-one-vote** invariant: a
//! caller uid may appear in at most one option's voter set, and a vote for a
//! caller that already appears anywhere is a no-op. Enforcing that takes an
//! atomic read-modify-write over all voter sets, so the trait exposes the
//! whole vote as one operation ([`Store::cast_vote`]) and each backend
//! supplies its own atomicity primitive:
//!
//! - [`RedisStore`](crate::store::redis::RedisStore): a Lua script, which
//!   Redis runs without interleaving any other command.
//! - [`MemoryStore`](crate::store::memory::MemoryStore): a mutex-guarded
//!   critical section.
//!
//! Every mutation republishes the full option snapshot on a watch channel;
//! readers only ever observe the latest snapshot (no ordering guarantee, no
//! backpressure).

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

pub mod memory;
pub mod redis;

/// A votable choice with display identity and a running tally.
///
/// Invariant: `votes == voters.len()` at all times.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptionRecord {
    pub id: String,
    pub name: String,
    pub emoji: String,
    pub color: String,
    pub votes: u64,
    pub voters: Vec<String>,
}

/// Display fields for an option not yet in the store.
#[derive(Clone, Debug)]
pub struct NewOption {
    pub name: String,
    pub emoji: String,
    pub color: String,
}

impl NewOption {
    pub fn new(name: &str, emoji: &str, color: &str) -> Self {
        Self {
            name: name.to_string(),
            emoji: emoji.to_string(),
            color: color.to_string(),
        }
    }

    /// Option ids are slugs of the display name.
    pub fn id(&self) -> String {
        slug(&self.name)
    }
}

/// Marker conferring admin privilege on `uid`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdminRecord {
    pub uid: String,
    pub created_at: u64,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteOutcome {
    /// The tally was incremented and the caller added to the voter set.
    Recorded,
    /// The caller already appears in some voter set; nothing changed.
    AlreadyVoted,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("option {0} not found")]
    OptionNotFound(String),

    #[error("admin {0} not found")]
    AdminNotFound(String),

    #[error("option {0} already exists")]
    DuplicateOption(String),

    #[error("cannot remove last admin")]
    LastAdmin,

    #[error("store backend: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Shared vote state. All mutations are atomic per operation; none leave a
/// partial write behind on failure.
#[async_trait]
pub trait Store: Send + Sync {
    /// Current snapshot of every option.
    async fn list_options(&self) -> Result<Vec<OptionRecord>, StoreError>;

    /// Writes `defaults` with zero votes if the option collection is empty,
    /// otherwise does nothing.
    async fn seed_options(&self, defaults: &[NewOption]) -> Result<(), StoreError>;

    /// Creates a new option with zero votes. Fails on an existing id.
    async fn add_option(&self, new: NewOption) -> Result<OptionRecord, StoreError>;

    /// Deletes an option, its tally and its voter set.
    async fn remove_option(&self, id: &str) -> Result<(), StoreError>;

    /// The vote transaction: if `uid` appears in no voter set, increments the
    /// target tally and records `uid` against it; if it appears anywhere,
    /// changes nothing. Atomic, so concurrent duplicate requests commit at
    /// most one increment in total.
    async fn cast_vote(&self, uid: &str, option_id: &str) -> Result<VoteOutcome, StoreError>;

    /// Zeroes every tally and clears every voter set. Idempotent.
    async fn reset_votes(&self) -> Result<(), StoreError>;

    async fn list_admins(&self) -> Result<Vec<AdminRecord>, StoreError>;

    async fn is_admin(&self, uid: &str) -> Result<bool, StoreError>;

    /// Upserts an admin marker. An existing record's email survives when the
    /// incoming one carries none.
    async fn put_admin(&self, record: AdminRecord) -> Result<AdminRecord, StoreError>;

    /// Deletes an admin marker, refusing while the collection has one entry
    /// or fewer. The size check and the delete are a single atomic step.
    async fn remove_admin(&self, uid: &str) -> Result<(), StoreError>;

    /// Full-snapshot subscription channel; updated after every mutation.
    fn subscribe(&self) -> watch::Receiver<Vec<OptionRecord>>;
}

/// The seed list written on first startup, matching the classic lineup.
pub fn default_options() -> Vec<NewOption> {
    vec![
        NewOption::new("Pepperoni", "🍕", "red"),
        NewOption::new("Margherita", "🍅", "green"),
        NewOption::new("Hawaiian", "🍍", "yellow"),
        NewOption::new("Veggie Special", "🥬", "emerald"),
        NewOption::new("Meat Lovers", "🥓", "orange"),
    ]
}

/// Lowercased alphanumeric words joined by `-`.
pub fn slug(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
