// Fake collaborators for the giveaway tests.
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::{DashMap, DashSet};
use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use tokio::time::Instant;

use crate::commands::giveaway::collaborators::{
    Clock, Collaborators, DisplayRefresh, EntrantSource, MemberDirectory, MetricsSource,
    NotificationSink,
};
use crate::commands::giveaway::models::{
    GiveawayKey, GiveawayRecord, MemberInfo, MetricKind, NewGiveaway, RequirementSet, Urgency,
};
use crate::commands::giveaway::settings::SettingsBook;
use crate::error::{Error, Result};

pub fn get_request(guild_id: u64, message_id: u64, duration: Duration) -> NewGiveaway {
    NewGiveaway {
        guild_id: GuildId::new(guild_id),
        message_id: MessageId::new(message_id),
        channel_id: ChannelId::new(100),
        host_id: UserId::new(1000),
        donor_id: None,
        title: "Nitro".to_string(),
        winner_count: 1,
        duration,
        requirements: RequirementSet::default(),
    }
}

pub fn get_record(guild_id: u64, message_id: u64, duration: Duration) -> GiveawayRecord {
    GiveawayRecord::create(get_request(guild_id, message_id, duration), Utc::now()).unwrap()
}

// Wall clock driven by tokio's (possibly paused) time.
#[derive(Debug)]
pub struct PausedClock {
    base: DateTime<Utc>,
    started: Instant,
}

impl PausedClock {
    pub fn new() -> Self {
        PausedClock {
            base: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            started: Instant::now(),
        }
    }
}

impl Clock for PausedClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().duration_since(self.started);
        self.base + chrono::Duration::from_std(elapsed).unwrap()
    }
}

#[derive(Debug, Default)]
pub struct FakeMetrics {
    values: DashMap<(UserId, MetricKind), u64>,
    failing: DashSet<MetricKind>,
    calls: AtomicUsize,
}

impl FakeMetrics {
    pub fn new() -> Self {
        FakeMetrics::default()
    }

    pub fn set(&self, user_id: UserId, kind: MetricKind, value: u64) {
        self.values.insert((user_id, kind), value);
    }

    pub fn fail(&self, kind: MetricKind) {
        self.failing.insert(kind);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSource for FakeMetrics {
    async fn metric(&self, _guild_id: GuildId, user_id: UserId, kind: MetricKind) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&kind) {
            return Err(Error::Unavailable(format!("{} is down", kind.as_str())));
        }
        Ok(self
            .values
            .get(&(user_id, kind))
            .map(|value| *value)
            .unwrap_or(0))
    }
}

#[derive(Debug, Default)]
pub struct FakeMembers {
    members: DashMap<(GuildId, UserId), MemberInfo>,
}

impl FakeMembers {
    pub fn new() -> Self {
        FakeMembers::default()
    }

    pub fn join(&self, guild_id: GuildId, user_id: UserId) {
        self.add(
            guild_id,
            MemberInfo {
                user_id,
                roles: HashSet::new(),
                joined_at: None,
                bot: false,
            },
        );
    }

    pub fn add(&self, guild_id: GuildId, member: MemberInfo) {
        self.members.insert((guild_id, member.user_id), member);
    }
}

#[async_trait]
impl MemberDirectory for FakeMembers {
    async fn member(&self, guild_id: GuildId, user_id: UserId) -> Result<Option<MemberInfo>> {
        Ok(self
            .members
            .get(&(guild_id, user_id))
            .map(|member| member.value().clone()))
    }

    async fn is_member(&self, guild_id: GuildId, user_id: UserId) -> Result<bool> {
        Ok(self.members.contains_key(&(guild_id, user_id)))
    }
}

#[derive(Debug, Default)]
pub struct FakeDisplay {
    updates: Mutex<Vec<(GiveawayKey, Duration, Urgency)>>,
    deleted: AtomicBool,
}

impl FakeDisplay {
    pub fn new() -> Self {
        FakeDisplay::default()
    }

    // Every further update fails as if the message was deleted.
    pub fn delete_message(&self) {
        self.deleted.store(true, Ordering::SeqCst);
    }

    pub fn updates(&self) -> Vec<(GiveawayKey, Duration, Urgency)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl DisplayRefresh for FakeDisplay {
    async fn update(
        &self,
        record: &GiveawayRecord,
        remaining: Duration,
        urgency: Urgency,
    ) -> Result<()> {
        if self.deleted.load(Ordering::SeqCst) {
            return Err(Error::ResourceGone);
        }
        self.updates
            .lock()
            .unwrap()
            .push((record.key(), remaining, urgency));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeEntrants {
    entrants: DashMap<GiveawayKey, Vec<UserId>>,
}

impl FakeEntrants {
    pub fn new() -> Self {
        FakeEntrants::default()
    }

    pub fn set(&self, key: GiveawayKey, users: &[u64]) {
        let users = users.iter().map(|id| UserId::new(*id)).collect();
        self.entrants.insert(key, users);
    }
}

#[async_trait]
impl EntrantSource for FakeEntrants {
    async fn list_entrants(&self, record: &GiveawayRecord) -> Result<Vec<UserId>> {
        Ok(self
            .entrants
            .get(&record.key())
            .map(|users| users.value().clone())
            .unwrap_or_default())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Notification {
    Result(GiveawayKey, Vec<UserId>),
    Cancelled(GiveawayKey, UserId),
    Host(GiveawayKey, Vec<UserId>),
    Winner(GiveawayKey, UserId),
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        RecordingNotifier::default()
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, notification: Notification) {
        self.events.lock().unwrap().push(notification);
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn announce_result(&self, record: &GiveawayRecord, winners: &[UserId]) -> Result<()> {
        self.push(Notification::Result(record.key(), winners.to_vec()));
        Ok(())
    }

    async fn announce_cancelled(
        &self,
        record: &GiveawayRecord,
        cancelled_by: UserId,
    ) -> Result<()> {
        self.push(Notification::Cancelled(record.key(), cancelled_by));
        Ok(())
    }

    async fn notify_host(&self, record: &GiveawayRecord, winners: &[UserId]) -> Result<()> {
        self.push(Notification::Host(record.key(), winners.to_vec()));
        Ok(())
    }

    async fn notify_winner(&self, record: &GiveawayRecord, winner: UserId) -> Result<()> {
        self.push(Notification::Winner(record.key(), winner));
        Ok(())
    }
}

// All fakes at once, with handles kept for assertions.
pub struct FakeWorld {
    pub display: Arc<FakeDisplay>,
    pub entrants: Arc<FakeEntrants>,
    pub members: Arc<FakeMembers>,
    pub metrics: Arc<FakeMetrics>,
    pub notifier: Arc<RecordingNotifier>,
    pub settings: Arc<SettingsBook>,
    pub clock: Arc<PausedClock>,
}

impl FakeWorld {
    pub fn new() -> Self {
        FakeWorld {
            display: Arc::new(FakeDisplay::new()),
            entrants: Arc::new(FakeEntrants::new()),
            members: Arc::new(FakeMembers::new()),
            metrics: Arc::new(FakeMetrics::new()),
            notifier: Arc::new(RecordingNotifier::new()),
            settings: Arc::new(SettingsBook::new()),
            clock: Arc::new(PausedClock::new()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            display: self.display.clone(),
            entrants: self.entrants.clone(),
            members: self.members.clone(),
            metrics: self.metrics.clone(),
            notifier: self.notifier.clone(),
            settings: self.settings.clone(),
            clock: self.clock.clone(),
        }
    }
}
