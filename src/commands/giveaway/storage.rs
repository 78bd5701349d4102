use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serenity::async_trait;
use serenity::model::id::{GuildId, MessageId, UserId};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::commands::giveaway::models::{GiveawayKey, GiveawayRecord, GiveawayStatus};
use crate::error::{Error, Result};

#[async_trait]
pub trait GiveawayStore: Send + Sync {
    async fn insert(&self, record: GiveawayRecord) -> Result<()>;

    async fn get(&self, key: &GiveawayKey) -> Result<Option<GiveawayRecord>>;

    // Moves an active giveaway into a terminal state. Fails with
    // `Error::NotActive` if somebody else settled it first.
    async fn settle(
        &self,
        key: &GiveawayKey,
        status: GiveawayStatus,
        winners: Vec<UserId>,
        at: DateTime<Utc>,
    ) -> Result<GiveawayRecord>;

    // Replaces the winners of an ended giveaway.
    async fn record_winners(
        &self,
        key: &GiveawayKey,
        winners: Vec<UserId>,
        at: DateTime<Utc>,
    ) -> Result<GiveawayRecord>;

    async fn list_active(&self, guild_id: GuildId) -> Result<Vec<GiveawayRecord>>;

    async fn list(&self, guild_id: GuildId) -> Result<Vec<GiveawayRecord>>;

    // Every guild that has at least one stored giveaway.
    async fn guilds(&self) -> Result<Vec<GuildId>>;

    // Deletes finished giveaways of the guild, except for the listed ones.
    async fn purge_ended(&self, guild_id: GuildId, keep: &[MessageId]) -> Result<usize>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<GiveawayKey, GiveawayRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            records: DashMap::new(),
        }
    }

    fn with_records(records: Vec<GiveawayRecord>) -> Self {
        let store = MemoryStore::new();
        for record in records {
            store.records.insert(record.key(), record);
        }
        store
    }

    fn snapshot(&self) -> Vec<GiveawayRecord> {
        let mut records = self
            .records
            .iter()
            .map(|pair| pair.value().clone())
            .collect::<Vec<GiveawayRecord>>();
        records.sort_by_key(|record| record.key());
        records
    }

    fn insert_record(&self, record: GiveawayRecord) -> Result<()> {
        let key = record.key();
        match self.records.entry(key) {
            Entry::Occupied(_) => {
                let message = format!("The giveaway {} already exists.", key);
                Err(Error::Storage(message))
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(())
            }
        }
    }

    // The entry stays locked while the status is checked and written. Returns
    // the record before and after the change.
    fn settle_record(
        &self,
        key: &GiveawayKey,
        status: GiveawayStatus,
        winners: Vec<UserId>,
        at: DateTime<Utc>,
    ) -> Result<(GiveawayRecord, GiveawayRecord)> {
        if !status.is_terminal() {
            let message = "A giveaway can only be settled as ended or cancelled.".to_string();
            return Err(Error::Giveaway(message));
        }

        let mut record = self.records.get_mut(key).ok_or(Error::NotFound)?;
        if !record.is_active() {
            return Err(Error::NotActive);
        }

        let previous = record.clone();
        record.settle(status, winners, at);
        Ok((previous, record.clone()))
    }

    fn record_winners_of(
        &self,
        key: &GiveawayKey,
        winners: Vec<UserId>,
        at: DateTime<Utc>,
    ) -> Result<(GiveawayRecord, GiveawayRecord)> {
        let mut record = self.records.get_mut(key).ok_or(Error::NotFound)?;
        if record.status != GiveawayStatus::Ended {
            return Err(Error::NotEnded);
        }

        let previous = record.clone();
        record.replace_winners(winners, at);
        Ok((previous, record.clone()))
    }

    // Puts back the state a failed write was based on.
    fn restore(&self, record: GiveawayRecord) {
        self.records.insert(record.key(), record);
    }

    fn records_of(&self, guild_id: GuildId, active_only: bool) -> Vec<GiveawayRecord> {
        let mut records = self
            .records
            .iter()
            .filter(|pair| pair.key().guild_id == guild_id)
            .filter(|pair| !active_only || pair.value().is_active())
            .map(|pair| pair.value().clone())
            .collect::<Vec<GiveawayRecord>>();
        records.sort_by_key(|record| record.end_at);
        records
    }

    fn purge_ended_of(&self, guild_id: GuildId, keep: &[MessageId]) -> Vec<GiveawayRecord> {
        let mut purged = Vec::new();
        self.records.retain(|key, record| {
            let kept =
                key.guild_id != guild_id || record.is_active() || keep.contains(&key.message_id);
            if !kept {
                purged.push(record.clone());
            }
            kept
        });
        purged
    }
}

#[async_trait]
impl GiveawayStore for MemoryStore {
    async fn insert(&self, record: GiveawayRecord) -> Result<()> {
        self.insert_record(record)
    }

    async fn get(&self, key: &GiveawayKey) -> Result<Option<GiveawayRecord>> {
        Ok(self.records.get(key).map(|record| record.clone()))
    }

    async fn settle(
        &self,
        key: &GiveawayKey,
        status: GiveawayStatus,
        winners: Vec<UserId>,
        at: DateTime<Utc>,
    ) -> Result<GiveawayRecord> {
        let (_, settled) = self.settle_record(key, status, winners, at)?;
        Ok(settled)
    }

    async fn record_winners(
        &self,
        key: &GiveawayKey,
        winners: Vec<UserId>,
        at: DateTime<Utc>,
    ) -> Result<GiveawayRecord> {
        let (_, rerolled) = self.record_winners_of(key, winners, at)?;
        Ok(rerolled)
    }

    async fn list_active(&self, guild_id: GuildId) -> Result<Vec<GiveawayRecord>> {
        Ok(self.records_of(guild_id, true))
    }

    async fn list(&self, guild_id: GuildId) -> Result<Vec<GiveawayRecord>> {
        Ok(self.records_of(guild_id, false))
    }

    async fn guilds(&self) -> Result<Vec<GuildId>> {
        let guilds = self
            .records
            .iter()
            .map(|pair| pair.key().guild_id)
            .collect::<BTreeSet<GuildId>>();
        Ok(guilds.into_iter().collect())
    }

    async fn purge_ended(&self, guild_id: GuildId, keep: &[MessageId]) -> Result<usize> {
        Ok(self.purge_ended_of(guild_id, keep).len())
    }
}

// A JSON document kept in one file. Every save replaces the whole file
// through a temporary one, so a crash never leaves half a document behind.
#[derive(Debug)]
pub struct JsonSnapshot {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonSnapshot {
    pub fn new(path: impl AsRef<Path>) -> Self {
        JsonSnapshot {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // A missing file reads as the default value.
    pub async fn load<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        match fs::read(&self.path).await {
            Ok(raw) => Ok(serde_json::from_slice::<T>(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(err) => Err(Error::from(err)),
        }
    }

    // The value is taken under the write lock, so a newer state can't be
    // overwritten by an older one.
    pub async fn save_with<T, F>(&self, snapshot: F) -> Result<()>
    where
        T: Serialize,
        F: FnOnce() -> T,
    {
        let _guard = self.write_lock.lock().await;
        let raw = serde_json::to_vec_pretty(&snapshot())?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, raw).await?;
        fs::rename(&temp_path, &self.path).await?;
        debug!("Saved {}", self.path.display());
        Ok(())
    }
}

// Keeps every giveaway in memory and rewrites a JSON file after each change,
// so that running giveaways survive a restart of the bot. A change is only
// kept in memory once it reached the file.
#[derive(Debug)]
pub struct JsonFileStore {
    file: JsonSnapshot,
    memory: MemoryStore,
}

impl JsonFileStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = JsonSnapshot::new(path);
        let records = file.load::<Vec<GiveawayRecord>>().await?;
        info!(
            "Loaded {} giveaways from {}",
            records.len(),
            file.path().display()
        );

        Ok(JsonFileStore {
            file,
            memory: MemoryStore::with_records(records),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    async fn persist(&self) -> Result<()> {
        self.file.save_with(|| self.memory.snapshot()).await
    }
}

#[async_trait]
impl GiveawayStore for JsonFileStore {
    async fn insert(&self, record: GiveawayRecord) -> Result<()> {
        let key = record.key();
        self.memory.insert_record(record)?;
        if let Err(err) = self.persist().await {
            self.memory.records.remove(&key);
            return Err(err);
        }
        Ok(())
    }

    async fn get(&self, key: &GiveawayKey) -> Result<Option<GiveawayRecord>> {
        self.memory.get(key).await
    }

    async fn settle(
        &self,
        key: &GiveawayKey,
        status: GiveawayStatus,
        winners: Vec<UserId>,
        at: DateTime<Utc>,
    ) -> Result<GiveawayRecord> {
        let (previous, settled) = self.memory.settle_record(key, status, winners, at)?;
        if let Err(err) = self.persist().await {
            self.memory.restore(previous);
            return Err(err);
        }
        Ok(settled)
    }

    async fn record_winners(
        &self,
        key: &GiveawayKey,
        winners: Vec<UserId>,
        at: DateTime<Utc>,
    ) -> Result<GiveawayRecord> {
        let (previous, rerolled) = self.memory.record_winners_of(key, winners, at)?;
        if let Err(err) = self.persist().await {
            self.memory.restore(previous);
            return Err(err);
        }
        Ok(rerolled)
    }

    async fn list_active(&self, guild_id: GuildId) -> Result<Vec<GiveawayRecord>> {
        self.memory.list_active(guild_id).await
    }

    async fn list(&self, guild_id: GuildId) -> Result<Vec<GiveawayRecord>> {
        self.memory.list(guild_id).await
    }

    async fn guilds(&self) -> Result<Vec<GuildId>> {
        self.memory.guilds().await
    }

    async fn purge_ended(&self, guild_id: GuildId, keep: &[MessageId]) -> Result<usize> {
        let purged = self.memory.purge_ended_of(guild_id, keep);
        if purged.is_empty() {
            return Ok(0);
        }

        let count = purged.len();
        if let Err(err) = self.persist().await {
            for record in purged {
                self.memory.restore(record);
            }
            return Err(err);
        }
        Ok(count)
    }
}
