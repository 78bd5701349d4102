use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId, UserId};

use crate::error::{Error, Result};

pub const MIN_GIVEAWAY_DURATION: Duration = Duration::from_secs(2);
pub const MAX_GIVEAWAY_DURATION: Duration = Duration::from_secs(7 * 7 * 24 * 60 * 60);
pub const MAX_TITLE_LENGTH: usize = 256;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct GiveawayKey {
    pub guild_id: GuildId,
    pub message_id: MessageId,
}

impl GiveawayKey {
    pub fn new(guild_id: GuildId, message_id: MessageId) -> Self {
        GiveawayKey {
            guild_id,
            message_id,
        }
    }
}

impl fmt::Display for GiveawayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.guild_id.get(), self.message_id.get())
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum GiveawayStatus {
    Active,
    Ended,
    Cancelled,
}

impl GiveawayStatus {
    pub fn is_terminal(&self) -> bool {
        *self != GiveawayStatus::Active
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RequirementSet {
    #[serde(default)]
    pub role_ids: BTreeSet<RoleId>,
    #[serde(default)]
    pub min_mee6_level: Option<u64>,
    #[serde(default)]
    pub min_amari_level: Option<u64>,
    #[serde(default)]
    pub min_weekly_amari: Option<u64>,
    #[serde(default)]
    pub min_join_days: Option<u64>,
    #[serde(default)]
    pub min_invites: Option<u64>,
    #[serde(default)]
    pub min_shared_currency: Option<u64>,
    #[serde(default)]
    pub required_guild_id: Option<GuildId>,
}

impl RequirementSet {
    // A threshold of zero can't fail, so it's stored as "not enforced".
    pub fn normalized(mut self) -> Self {
        for threshold in [
            &mut self.min_mee6_level,
            &mut self.min_amari_level,
            &mut self.min_weekly_amari,
            &mut self.min_join_days,
            &mut self.min_invites,
            &mut self.min_shared_currency,
        ] {
            if *threshold == Some(0) {
                *threshold = None;
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.role_ids.is_empty()
            && self.min_mee6_level.is_none()
            && self.min_amari_level.is_none()
            && self.min_weekly_amari.is_none()
            && self.min_join_days.is_none()
            && self.min_invites.is_none()
            && self.min_shared_currency.is_none()
            && self.required_guild_id.is_none()
    }

    // Returns the threshold for the given external metric, if enforced.
    pub fn threshold(&self, kind: MetricKind) -> Option<u64> {
        match kind {
            MetricKind::Mee6Level => self.min_mee6_level,
            MetricKind::AmariLevel => self.min_amari_level,
            MetricKind::AmariWeekly => self.min_weekly_amari,
            MetricKind::SharedCurrency => self.min_shared_currency,
            MetricKind::Invites => self.min_invites,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum MetricKind {
    Mee6Level,
    AmariLevel,
    AmariWeekly,
    SharedCurrency,
    Invites,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Mee6Level,
        MetricKind::AmariLevel,
        MetricKind::AmariWeekly,
        MetricKind::SharedCurrency,
        MetricKind::Invites,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Mee6Level => "MEE6 level",
            MetricKind::AmariLevel => "Amari level",
            MetricKind::AmariWeekly => "weekly Amari points",
            MetricKind::SharedCurrency => "shared coins",
            MetricKind::Invites => "invites",
        }
    }
}

// A request for a new giveaway, checked before anything is stored.
#[derive(Clone, Debug)]
pub struct NewGiveaway {
    pub guild_id: GuildId,
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub host_id: UserId,
    pub donor_id: Option<UserId>,
    pub title: String,
    pub winner_count: u32,
    pub duration: Duration,
    pub requirements: RequirementSet,
}

#[readonly::make]
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct GiveawayRecord {
    pub guild_id: GuildId,
    // The message that displays the giveaway; it identifies the giveaway as well.
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub host_id: UserId,
    pub donor_id: Option<UserId>,
    pub title: String,
    pub winner_count: u32,
    pub end_at: DateTime<Utc>,
    pub requirements: RequirementSet,
    pub status: GiveawayStatus,
    pub winners: Vec<UserId>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl GiveawayRecord {
    pub fn create(request: NewGiveaway, now: DateTime<Utc>) -> Result<Self> {
        let title = request.title.trim().to_string();
        if title.is_empty() {
            return Err(Error::Config("The giveaway needs a title.".to_string()));
        }
        if title.chars().count() > MAX_TITLE_LENGTH {
            let message = format!(
                "The giveaway title can't be longer than {} characters.",
                MAX_TITLE_LENGTH
            );
            return Err(Error::Config(message));
        }
        if request.winner_count == 0 {
            return Err(Error::Config("Can't have less than 1 winner.".to_string()));
        }
        if request.duration < MIN_GIVEAWAY_DURATION || request.duration > MAX_GIVEAWAY_DURATION {
            let message = "The time cannot be more than 7 weeks and less than 2 seconds.";
            return Err(Error::Config(message.to_string()));
        }
        if request.requirements.required_guild_id == Some(request.guild_id) {
            let message = "A giveaway can't require joining its own server.";
            return Err(Error::Config(message.to_string()));
        }

        let duration = chrono::Duration::from_std(request.duration)
            .map_err(|err| Error::Config(err.to_string()))?;

        Ok(GiveawayRecord {
            guild_id: request.guild_id,
            id: request.message_id,
            channel_id: request.channel_id,
            host_id: request.host_id,
            donor_id: request.donor_id,
            title,
            winner_count: request.winner_count,
            end_at: now + duration,
            requirements: request.requirements.normalized(),
            status: GiveawayStatus::Active,
            winners: Vec::new(),
            settled_at: None,
        })
    }

    pub fn key(&self) -> GiveawayKey {
        GiveawayKey::new(self.guild_id, self.id)
    }

    pub fn is_active(&self) -> bool {
        self.status == GiveawayStatus::Active
    }

    // Returns the time left until the end, or None once the end has been reached.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        match (self.end_at - now).to_std() {
            Ok(remaining) if !remaining.is_zero() => Some(remaining),
            _ => None,
        }
    }

    // Moves the giveaway into a terminal state together with its results.
    pub fn settle(&mut self, status: GiveawayStatus, winners: Vec<UserId>, at: DateTime<Utc>) {
        self.status = status;
        self.winners = winners;
        self.settled_at = Some(at);
    }

    // Overrides the results of an ended giveaway.
    pub fn replace_winners(&mut self, winners: Vec<UserId>, at: DateTime<Utc>) {
        self.winners = winners;
        self.settled_at = Some(at);
    }

    // Link to the giveaway message in the Discord client.
    pub fn jump_url(&self) -> String {
        format!(
            "https://discord.com/channels/{}/{}/{}",
            self.guild_id.get(),
            self.channel_id.get(),
            self.id.get()
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Urgency {
    Critical,
    Warning,
    Caution,
    Normal,
}

impl Urgency {
    pub fn from_remaining(remaining: Duration) -> Self {
        match remaining.as_secs_f64() {
            secs if secs <= 30.0 => Urgency::Critical,
            secs if secs <= 240.0 => Urgency::Warning,
            secs if secs <= 600.0 => Urgency::Caution,
            _ => Urgency::Normal,
        }
    }

    // The embed colour used while the giveaway is in this band.
    pub fn colour(&self) -> u32 {
        match self {
            Urgency::Critical => 0xff0000,
            Urgency::Warning => 0xe67e22,
            Urgency::Caution => 0xffff00,
            Urgency::Normal => 0x2ecc71,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildSettings {
    // Roles that manage giveaways without the Manage Server permission.
    pub manager_roles: BTreeSet<RoleId>,
    pub bypass_roles: BTreeSet<RoleId>,
    pub blacklist_roles: BTreeSet<RoleId>,
    pub multipliers: HashMap<RoleId, u32>,
    // Users that can't enter giveaways on any server. Never shown to them.
    #[serde(skip)]
    pub denied_users: HashSet<UserId>,
    pub ping_role: Option<RoleId>,
    // Required for entry when the host doesn't name a role.
    pub default_role: Option<RoleId>,
    pub emoji: String,
    pub start_header: String,
    pub end_header: String,
    pub description: String,
    pub win_message: String,
    pub host_message: String,
    pub dm_winners: bool,
    pub dm_host: bool,
}

impl Default for GuildSettings {
    fn default() -> Self {
        GuildSettings {
            manager_roles: BTreeSet::new(),
            bypass_roles: BTreeSet::new(),
            blacklist_roles: BTreeSet::new(),
            multipliers: HashMap::new(),
            denied_users: HashSet::new(),
            ping_role: None,
            default_role: None,
            emoji: "🎉".to_string(),
            start_header: "**{giveawayEmoji}   GIVEAWAY   {giveawayEmoji}**".to_string(),
            end_header: "**{giveawayEmoji}   GIVEAWAY ENDED   {giveawayEmoji}**".to_string(),
            description: "React with {emoji} to enter".to_string(),
            win_message: "You won the giveaway for [{prize}]({url}) in {guild}!".to_string(),
            host_message: "Your giveaway for [{prize}]({url}) in {guild} has ended. \
                The winners were {winners}"
                .to_string(),
            dm_winners: false,
            dm_host: false,
        }
    }
}

impl GuildSettings {
    pub fn is_manager(&self, manage_guild: bool, roles: &[RoleId]) -> bool {
        manage_guild || roles.iter().any(|role_id| self.manager_roles.contains(role_id))
    }

    pub fn required_role(&self, explicit: Option<RoleId>) -> Option<RoleId> {
        explicit.or(self.default_role)
    }

    // Mentions the ping role in front of the text. None when there is
    // nothing to send.
    pub fn ping_message(&self, text: Option<&str>) -> Option<String> {
        let text = text.map(str::trim).filter(|text| !text.is_empty());
        match (self.ping_role, text) {
            (Some(role_id), Some(text)) => Some(format!("<@&{}> {}", role_id.get(), text)),
            (Some(role_id), None) => Some(format!("<@&{}>", role_id.get())),
            (None, Some(text)) => Some(text.to_string()),
            (None, None) => None,
        }
    }
}

// What the member directory knows about a guild member.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemberInfo {
    pub user_id: UserId,
    pub roles: HashSet<RoleId>,
    pub joined_at: Option<DateTime<Utc>>,
    pub bot: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParticipantSnapshot {
    pub user_id: UserId,
    pub roles: HashSet<RoleId>,
    pub joined_at: Option<DateTime<Utc>>,
    pub taken_at: DateTime<Utc>,
    // Metrics that couldn't be fetched are missing and count as zero.
    pub metrics: HashMap<MetricKind, u64>,
    pub in_required_guild: Option<bool>,
}

impl ParticipantSnapshot {
    pub fn new(user_id: UserId, taken_at: DateTime<Utc>) -> Self {
        ParticipantSnapshot {
            user_id,
            roles: HashSet::new(),
            joined_at: None,
            taken_at,
            metrics: HashMap::new(),
            in_required_guild: None,
        }
    }

    pub fn metric(&self, kind: MetricKind) -> u64 {
        self.metrics.get(&kind).copied().unwrap_or(0)
    }

    // Full days spent in the server.
    pub fn tenure_days(&self) -> u64 {
        match self.joined_at {
            Some(joined_at) => (self.taken_at - joined_at).num_days().max(0) as u64,
            None => 0,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EntryWeight {
    pub user_id: UserId,
    pub weight: u32,
}

impl EntryWeight {
    pub fn new(user_id: UserId, weight: u32) -> Self {
        EntryWeight { user_id, weight }
    }
}
