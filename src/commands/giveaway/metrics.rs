// Sources of the numeric participant metrics. Levels come from the MEE6 and
// Amari web APIs, invites and shared coins are reported by the rest of the bot.
use std::path::Path;

use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use serenity::async_trait;
use serenity::model::id::{GuildId, UserId};
use tracing::{debug, info};

use crate::commands::giveaway::collaborators::MetricsSource;
use crate::commands::giveaway::models::MetricKind;
use crate::commands::giveaway::storage::JsonSnapshot;
use crate::error::{Error, Result};

const MEE6_LEADERBOARD_URL: &str = "https://mee6.xyz/api/plugins/levels/leaderboard";
const MEE6_PAGE_SIZE: usize = 1000;
const MEE6_MAX_PAGES: usize = 10;
const AMARI_MEMBER_URL: &str = "https://amaribot.com/api/v1/guild";

#[derive(Debug, Deserialize)]
struct Mee6Leaderboard {
    #[serde(default)]
    players: Vec<Mee6Player>,
}

#[derive(Debug, Deserialize)]
struct Mee6Player {
    id: String,
    #[serde(default)]
    level: u64,
}

#[derive(Debug, Deserialize)]
struct AmariMember {
    #[serde(default)]
    level: Value,
    #[serde(default, rename = "weeklyExp")]
    weekly_exp: Value,
}

// The Amari API isn't consistent about numbers and strings.
fn as_count(value: &Value) -> u64 {
    match value {
        Value::Number(number) => number.as_u64().unwrap_or(0),
        Value::String(text) => text.trim().parse::<u64>().unwrap_or(0),
        _ => 0,
    }
}

type LedgerEntry = (GuildId, UserId, MetricKind, u64);

pub struct ApiMetrics {
    http: Client,
    amari_token: Option<String>,
    ledger: DashMap<(GuildId, UserId, MetricKind), u64>,
    file: Option<JsonSnapshot>,
}

impl ApiMetrics {
    // The ledger is kept in memory only.
    pub fn new(amari_token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("giveaway-bot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(ApiMetrics {
            http,
            amari_token,
            ledger: DashMap::new(),
            file: None,
        })
    }

    pub async fn open(amari_token: Option<String>, ledger_path: impl AsRef<Path>) -> Result<Self> {
        let file = JsonSnapshot::new(ledger_path);
        let entries = file.load::<Vec<LedgerEntry>>().await?;
        info!(
            "Loaded {} tracked metric(s) from {}",
            entries.len(),
            file.path().display()
        );

        let mut metrics = ApiMetrics::new(amari_token)?;
        for (guild_id, user_id, kind, value) in entries {
            metrics.ledger.insert((guild_id, user_id, kind), value);
        }
        metrics.file = Some(file);
        Ok(metrics)
    }

    pub async fn save(&self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        file.save_with(|| {
            let mut entries = self
                .ledger
                .iter()
                .map(|pair| {
                    let (guild_id, user_id, kind) = *pair.key();
                    (guild_id, user_id, kind, *pair.value())
                })
                .collect::<Vec<LedgerEntry>>();
            entries.sort_by_key(|(guild_id, user_id, _, _)| (*guild_id, *user_id));
            entries
        })
        .await
    }

    // Overrides a locally tracked metric, e.g. after an invite tracker update.
    // Call `save` afterwards to keep it.
    pub fn record(&self, guild_id: GuildId, user_id: UserId, kind: MetricKind, value: u64) {
        self.ledger.insert((guild_id, user_id, kind), value);
    }

    fn tracked(&self, guild_id: GuildId, user_id: UserId, kind: MetricKind) -> u64 {
        self.ledger
            .get(&(guild_id, user_id, kind))
            .map(|value| *value)
            .unwrap_or(0)
    }

    async fn mee6_level(&self, guild_id: GuildId, user_id: UserId) -> Result<u64> {
        let user_id = user_id.get().to_string();

        for page in 0..MEE6_MAX_PAGES {
            let url = format!("{}/{}", MEE6_LEADERBOARD_URL, guild_id.get());
            let response = self
                .http
                .get(url)
                .query(&[("limit", MEE6_PAGE_SIZE), ("page", page)])
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(0);
            }
            if !response.status().is_success() {
                let message = format!("MEE6 answered with HTTP {}", response.status().as_u16());
                return Err(Error::Unavailable(message));
            }

            let leaderboard: Mee6Leaderboard = response.json().await?;
            if let Some(player) = leaderboard
                .players
                .iter()
                .find(|player| player.id == user_id)
            {
                return Ok(player.level);
            }
            if leaderboard.players.len() < MEE6_PAGE_SIZE {
                break;
            }
        }

        debug!("User {} isn't on the MEE6 leaderboard", user_id);
        Ok(0)
    }

    async fn amari_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<AmariMember>> {
        let token = self.amari_token.as_ref().ok_or_else(|| {
            Error::Unavailable("The Amari API token isn't configured".to_string())
        })?;

        let url = format!(
            "{}/{}/member/{}",
            AMARI_MEMBER_URL,
            guild_id.get(),
            user_id.get()
        );
        let response = self
            .http
            .get(url)
            .header("Authorization", token.as_str())
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let message = format!("Amari answered with HTTP {}", response.status().as_u16());
            return Err(Error::Unavailable(message));
        }

        Ok(Some(response.json::<AmariMember>().await?))
    }
}

#[async_trait]
impl MetricsSource for ApiMetrics {
    async fn metric(&self, guild_id: GuildId, user_id: UserId, kind: MetricKind) -> Result<u64> {
        match kind {
            MetricKind::Mee6Level => self.mee6_level(guild_id, user_id).await,
            MetricKind::AmariLevel => Ok(self
                .amari_member(guild_id, user_id)
                .await?
                .map(|member| as_count(&member.level))
                .unwrap_or(0)),
            MetricKind::AmariWeekly => Ok(self
                .amari_member(guild_id, user_id)
                .await?
                .map(|member| as_count(&member.weekly_exp))
                .unwrap_or(0)),
            MetricKind::SharedCurrency | MetricKind::Invites => {
                Ok(self.tracked(guild_id, user_id, kind))
            }
        }
    }
}
