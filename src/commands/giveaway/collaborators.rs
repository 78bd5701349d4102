// Seams between the giveaway engine and the outside world. The Discord
// implementations live in `discord.rs`, the metric APIs in `metrics.rs`.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serenity::async_trait;
use serenity::model::id::{GuildId, UserId};

use crate::commands::giveaway::models::{
    GiveawayRecord, GuildSettings, MemberInfo, MetricKind, Urgency,
};
use crate::error::Result;

#[async_trait]
pub trait DisplayRefresh: Send + Sync {
    // Re-renders the countdown of a running giveaway. Returns
    // `Error::ResourceGone` when the giveaway message was deleted.
    async fn update(&self, record: &GiveawayRecord, remaining: Duration, urgency: Urgency)
    -> Result<()>;
}

#[async_trait]
pub trait EntrantSource: Send + Sync {
    // Everyone who expressed interest in the giveaway, as the platform reports it.
    async fn list_entrants(&self, record: &GiveawayRecord) -> Result<Vec<UserId>>;
}

#[async_trait]
pub trait MemberDirectory: Send + Sync {
    // Returns None when the user isn't a member of the guild (anymore).
    async fn member(&self, guild_id: GuildId, user_id: UserId) -> Result<Option<MemberInfo>>;

    async fn is_member(&self, guild_id: GuildId, user_id: UserId) -> Result<bool>;
}

#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn metric(&self, guild_id: GuildId, user_id: UserId, kind: MetricKind) -> Result<u64>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn announce_result(&self, record: &GiveawayRecord, winners: &[UserId]) -> Result<()>;

    async fn announce_cancelled(&self, record: &GiveawayRecord, cancelled_by: UserId)
    -> Result<()>;

    async fn notify_host(&self, record: &GiveawayRecord, winners: &[UserId]) -> Result<()>;

    async fn notify_winner(&self, record: &GiveawayRecord, winner: UserId) -> Result<()>;
}

#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn guild_settings(&self, guild_id: GuildId) -> GuildSettings;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// Everything the giveaway manager talks to, except the store.
#[derive(Clone)]
pub struct Collaborators {
    pub display: Arc<dyn DisplayRefresh>,
    pub entrants: Arc<dyn EntrantSource>,
    pub members: Arc<dyn MemberDirectory>,
    pub metrics: Arc<dyn MetricsSource>,
    pub notifier: Arc<dyn NotificationSink>,
    pub settings: Arc<dyn SettingsSource>,
    pub clock: Arc<dyn Clock>,
}
