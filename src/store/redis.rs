//! # Redis
//!
//! Production [`Store`] backend.
//!
//! ## Requirements
//!
//! - Fast lookups over a small dataset: a handful of options, one voter set
//!   per option, one admin hash
//! - Atomic vote transaction spanning every voter set
//!
//! ## Layout
//!
//! - Hash `options`: option id → JSON display doc (name, emoji, color)
//! - Hash `votes`: option id → tally int
//! - Set `voters:{id}`: caller uids recorded against that option
//! - Hash `admins`: uid → JSON admin marker
//!
//! The tally lives outside the display doc so the vote transaction and reset
//! never rewrite JSON: they run as Lua scripts touching only the `votes` hash
//! and the `voters:*` sets. Redis executes a script without interleaving any
//! other command, which is what makes the vote a real transaction: the
//! already-voted scan and the increment cannot be split by a concurrent
//! duplicate request.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::{
    aio::{ConnectionManager, ConnectionManagerConfig},
    AsyncCommands, Client, Script,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::{AdminRecord, NewOption, OptionRecord, Store, StoreError, VoteOutcome};

const OPTIONS_KEY: &str = "options";
const VOTES_KEY: &str = "votes";
const ADMINS_KEY: &str = "admins";

fn voters_key(id: &str) -> String {
    format!("voters:{id}")
}

/// Returns 1 when the vote was recorded, 0 when the caller already voted
/// anywhere, -1 when the target option is missing.
const CAST_VOTE_SCRIPT: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[2]) == 0 then
  return -1
end
local ids = redis.call('HKEYS', KEYS[1])
for _, id in ipairs(ids) do
  if redis.call('SISMEMBER', 'voters:' .. id, ARGV[1]) == 1 then
    return 0
  end
end
redis.call('HINCRBY', KEYS[2], ARGV[2], 1)
redis.call('SADD', 'voters:' .. ARGV[2], ARGV[1])
return 1
"#;

const RESET_SCRIPT: &str = r#"
redis.call('DEL', KEYS[2])
local ids = redis.call('HKEYS', KEYS[1])
for _, id in ipairs(ids) do
  redis.call('DEL', 'voters:' .. id)
end
return #ids
"#;

/// Returns the number of deleted markers, -1 when the collection is at its
/// last marker, -2 when the target is missing.
const REMOVE_ADMIN_SCRIPT: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then
  return -2
end
if redis.call('HLEN', KEYS[1]) <= 1 then
  return -1
end
return redis.call('HDEL', KEYS[1], ARGV[1])
"#;

/// Static display fields; the tally and voter set live in their own keys.
#[derive(Serialize, Deserialize)]
struct DisplayDoc {
    name: String,
    emoji: String,
    color: String,
}

pub struct RedisStore {
    conn: ConnectionManager,
    snapshot: watch::Sender<Vec<OptionRecord>>,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(Duration::from_millis(100));

        let client = Client::open(redis_url)?;
        let conn = client.get_connection_manager_with_config(config).await?;

        let (snapshot, _) = watch::channel(Vec::new());
        let store = Self { conn, snapshot };
        let current = store.load_options().await?;
        store.snapshot.send_replace(current);
        Ok(store)
    }

    async fn load_options(&self) -> Result<Vec<OptionRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let docs: HashMap<String, String> = conn.hgetall(OPTIONS_KEY).await?;
        let tallies: HashMap<String, u64> = conn.hgetall(VOTES_KEY).await?;

        let mut options = Vec::with_capacity(docs.len());
        for (id, doc) in docs {
            let display: DisplayDoc = serde_json::from_str(&doc)?;
            let voters: Vec<String> = conn.smembers(voters_key(&id)).await?;
            options.push(OptionRecord {
                votes: tallies.get(&id).copied().unwrap_or(0),
                id,
                name: display.name,
                emoji: display.emoji,
                color: display.color,
                voters,
            });
        }
        options.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(options)
    }

    /// Refresh the snapshot channel from the store. Subscribers in other
    /// processes are outside this channel; each serving process republishes
    /// after its own mutations.
    async fn publish(&self) -> Result<(), StoreError> {
        let current = self.load_options().await?;
        self.snapshot.send_replace(current);
        Ok(())
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn list_options(&self) -> Result<Vec<OptionRecord>, StoreError> {
        self.load_options().await
    }

    async fn seed_options(&self, defaults: &[NewOption]) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let existing: usize = conn.hlen(OPTIONS_KEY).await?;
        if existing > 0 {
            return Ok(());
        }
        for new in defaults {
            let doc = serde_json::to_string(&DisplayDoc {
                name: new.name.clone(),
                emoji: new.emoji.clone(),
                color: new.color.clone(),
            })?;
            let _: bool = conn.hset_nx(OPTIONS_KEY, new.id(), doc).await?;
        }
        self.publish().await
    }

    async fn add_option(&self, new: NewOption) -> Result<OptionRecord, StoreError> {
        let id = new.id();
        let doc = serde_json::to_string(&DisplayDoc {
            name: new.name.clone(),
            emoji: new.emoji.clone(),
            color: new.color.clone(),
        })?;

        let mut conn = self.conn.clone();
        let created: bool = conn.hset_nx(OPTIONS_KEY, &id, doc).await?;
        if !created {
            return Err(StoreError::DuplicateOption(id));
        }
        self.publish().await?;
        Ok(OptionRecord {
            id,
            name: new.name,
            emoji: new.emoji,
            color: new.color,
            votes: 0,
            voters: Vec::new(),
        })
    }

    async fn remove_option(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let (removed, _, _): (i64, i64, i64) = redis::pipe()
            .atomic()
            .hdel(OPTIONS_KEY, id)
            .hdel(VOTES_KEY, id)
            .del(voters_key(id))
            .query_async(&mut conn)
            .await?;
        if removed == 0 {
            return Err(StoreError::OptionNotFound(id.to_string()));
        }
        self.publish().await
    }

    async fn cast_vote(&self, uid: &str, option_id: &str) -> Result<VoteOutcome, StoreError> {
        let mut conn = self.conn.clone();
        let result: i64 = Script::new(CAST_VOTE_SCRIPT)
            .key(OPTIONS_KEY)
            .key(VOTES_KEY)
            .arg(uid)
            .arg(option_id)
            .invoke_async(&mut conn)
            .await?;
        match result {
            1 => {
                self.publish().await?;
                Ok(VoteOutcome::Recorded)
            }
            0 => Ok(VoteOutcome::AlreadyVoted),
            _ => Err(StoreError::OptionNotFound(option_id.to_string())),
        }
    }

    async fn reset_votes(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = Script::new(RESET_SCRIPT)
            .key(OPTIONS_KEY)
            .key(VOTES_KEY)
            .invoke_async(&mut conn)
            .await?;
        self.publish().await
    }

    async fn list_admins(&self) -> Result<Vec<AdminRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(ADMINS_KEY).await?;
        let mut admins = Vec::with_capacity(raw.len());
        for doc in raw.into_values() {
            admins.push(serde_json::from_str(&doc)?);
        }
        admins.sort_by(|a: &AdminRecord, b: &AdminRecord| {
            a.created_at.cmp(&b.created_at).then(a.uid.cmp(&b.uid))
        });
        Ok(admins)
    }

    async fn is_admin(&self, uid: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.hexists(ADMINS_KEY, uid).await?)
    }

    async fn put_admin(&self, mut record: AdminRecord) -> Result<AdminRecord, StoreError> {
        let mut conn = self.conn.clone();
        if record.email.is_none() {
            let existing: Option<String> = conn.hget(ADMINS_KEY, &record.uid).await?;
            if let Some(doc) = existing {
                let existing: AdminRecord = serde_json::from_str(&doc)?;
                record.email = existing.email;
            }
        }
        let doc = serde_json::to_string(&record)?;
        let _: () = conn.hset(ADMINS_KEY, &record.uid, doc).await?;
        Ok(record)
    }

    async fn remove_admin(&self, uid: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let result: i64 = Script::new(REMOVE_ADMIN_SCRIPT)
            .key(ADMINS_KEY)
            .arg(uid)
            .invoke_async(&mut conn)
            .await?;
        match result {
            -2 => Err(StoreError::AdminNotFound(uid.to_string())),
            -1 => Err(StoreError::LastAdmin),
            _ => Ok(()),
        }
    }

    fn subscribe(&self) -> watch::Receiver<Vec<OptionRecord>> {
        self.snapshot.subscribe()
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}
