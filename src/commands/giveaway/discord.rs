// Discord side of the giveaway collaborators
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use serenity::async_trait;
use serenity::builder::{CreateEmbed, CreateEmbedFooter, CreateMessage, EditMessage};
use serenity::http::Http;
use serenity::model::channel::ReactionType;
use serenity::model::id::{GuildId, RoleId, UserId};
use serenity::model::Timestamp;
use tracing::debug;

use crate::commands::giveaway::collaborators::{
    DisplayRefresh, EntrantSource, MemberDirectory, NotificationSink, SettingsSource,
};
use crate::commands::giveaway::formatters::GiveawayFormatter;
use crate::commands::giveaway::models::{GiveawayRecord, GuildSettings, MemberInfo, Urgency};
use crate::error::{Error, Result};

// Discord returns at most this many users per reaction page.
const REACTION_PAGE_SIZE: u8 = 100;
const ENDED_COLOUR: u32 = 0x95a5a6;

// Accepts unicode emojis as well as custom ones (`<:name:id>`).
pub fn reaction_type(emoji: &str) -> ReactionType {
    ReactionType::try_from(emoji).unwrap_or_else(|_| ReactionType::Unicode(emoji.to_string()))
}

pub struct DiscordGateway {
    http: Arc<Http>,
    settings: Arc<dyn SettingsSource>,
    formatter: Arc<dyn GiveawayFormatter>,
}

impl DiscordGateway {
    pub fn new(
        http: Arc<Http>,
        settings: Arc<dyn SettingsSource>,
        formatter: Arc<dyn GiveawayFormatter>,
    ) -> Self {
        DiscordGateway {
            http,
            settings,
            formatter,
        }
    }

    fn base_embed(&self, record: &GiveawayRecord, settings: &GuildSettings) -> CreateEmbed {
        let mut embed = CreateEmbed::new().title(record.title.clone());
        if let Some(requirements) = self.formatter.requirements(record, settings) {
            embed = embed.field("Requirements", requirements, false);
        }
        if let Some(donor_id) = record.donor_id {
            embed = embed.field("Donor", format!("<@{}>", donor_id.get()), false);
        }
        embed
    }

    fn header(&self, template: &str, settings: &GuildSettings) -> String {
        template.replace("{giveawayEmoji}", &settings.emoji)
    }

    async fn guild_name(&self, guild_id: GuildId) -> String {
        match guild_id.to_partial_guild(self.http.as_ref()).await {
            Ok(guild) => guild.name,
            Err(err) => {
                debug!("Can't fetch guild {}: {}", guild_id.get(), err.to_string());
                "the server".to_string()
            }
        }
    }

    async fn send_private(&self, user_id: UserId, title: &str, text: String) -> Result<()> {
        let embed = CreateEmbed::new().title(title).description(text);
        user_id
            .direct_message(self.http.as_ref(), CreateMessage::new().embed(embed))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DisplayRefresh for DiscordGateway {
    async fn update(
        &self,
        record: &GiveawayRecord,
        remaining: Duration,
        urgency: Urgency,
    ) -> Result<()> {
        let settings = self.settings.guild_settings(record.guild_id).await;
        let mut embed = self
            .base_embed(record, &settings)
            .description(self.formatter.running_description(record, remaining, &settings))
            .colour(urgency.colour())
            .footer(CreateEmbedFooter::new(format!(
                "Winners: {} | Ends at",
                record.winner_count
            )));
        if let Ok(timestamp) = Timestamp::from_unix_timestamp(record.end_at.timestamp()) {
            embed = embed.timestamp(timestamp);
        }

        let message = EditMessage::new()
            .content(self.header(&settings.start_header, &settings))
            .embed(embed);
        record
            .channel_id
            .edit_message(self.http.as_ref(), record.id, message)
            .await?;
        record
            .channel_id
            .create_reaction(self.http.as_ref(), record.id, reaction_type(&settings.emoji))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EntrantSource for DiscordGateway {
    async fn list_entrants(&self, record: &GiveawayRecord) -> Result<Vec<UserId>> {
        let settings = self.settings.guild_settings(record.guild_id).await;
        let emoji = reaction_type(&settings.emoji);

        let mut entrants = Vec::new();
        let mut after: Option<UserId> = None;
        loop {
            let page = record
                .channel_id
                .reaction_users(
                    self.http.as_ref(),
                    record.id,
                    emoji.clone(),
                    Some(REACTION_PAGE_SIZE),
                    after,
                )
                .await?;
            let page_size = page.len();
            after = page.last().map(|user| user.id);
            entrants.extend(page.into_iter().filter(|user| !user.bot).map(|user| user.id));

            if page_size < usize::from(REACTION_PAGE_SIZE) {
                break;
            }
        }

        Ok(entrants)
    }
}

#[async_trait]
impl MemberDirectory for DiscordGateway {
    async fn member(&self, guild_id: GuildId, user_id: UserId) -> Result<Option<MemberInfo>> {
        let member = match guild_id.member(self.http.as_ref(), user_id).await {
            Ok(member) => member,
            Err(err) => {
                return match Error::from(err) {
                    Error::ResourceGone => Ok(None),
                    other => Err(other),
                };
            }
        };

        // Every member holds the @everyone role, its id is the guild id.
        let mut roles = member.roles.iter().copied().collect::<HashSet<RoleId>>();
        roles.insert(RoleId::new(guild_id.get()));
        let joined_at = member
            .joined_at
            .and_then(|joined_at| DateTime::from_timestamp(joined_at.unix_timestamp(), 0));

        Ok(Some(MemberInfo {
            user_id,
            roles,
            joined_at,
            bot: member.user.bot,
        }))
    }

    async fn is_member(&self, guild_id: GuildId, user_id: UserId) -> Result<bool> {
        Ok(self.member(guild_id, user_id).await?.is_some())
    }
}

#[async_trait]
impl NotificationSink for DiscordGateway {
    async fn announce_result(&self, record: &GiveawayRecord, winners: &[UserId]) -> Result<()> {
        let settings = self.settings.guild_settings(record.guild_id).await;
        let mut embed = self
            .base_embed(record, &settings)
            .description(self.formatter.ended_description(record))
            .colour(ENDED_COLOUR)
            .footer(CreateEmbedFooter::new("Ended at"));
        if let Some(settled_at) = record.settled_at {
            if let Ok(timestamp) = Timestamp::from_unix_timestamp(settled_at.timestamp()) {
                embed = embed.timestamp(timestamp);
            }
        }

        let message = EditMessage::new()
            .content(self.header(&settings.end_header, &settings))
            .embed(embed);
        record
            .channel_id
            .edit_message(self.http.as_ref(), record.id, message)
            .await?;
        record
            .channel_id
            .say(self.http.as_ref(), self.formatter.result_message(record, winners))
            .await?;
        Ok(())
    }

    async fn announce_cancelled(
        &self,
        record: &GiveawayRecord,
        cancelled_by: UserId,
    ) -> Result<()> {
        let settings = self.settings.guild_settings(record.guild_id).await;
        let embed = self
            .base_embed(record, &settings)
            .description(format!(
                "Cancelled by <@{}>\nHost: <@{}>",
                cancelled_by.get(),
                record.host_id.get()
            ))
            .colour(ENDED_COLOUR);

        let message = EditMessage::new()
            .content(self.header(&settings.end_header, &settings))
            .embed(embed);
        record
            .channel_id
            .edit_message(self.http.as_ref(), record.id, message)
            .await?;
        Ok(())
    }

    async fn notify_host(&self, record: &GiveawayRecord, winners: &[UserId]) -> Result<()> {
        // Nothing to tell without winners.
        if winners.is_empty() {
            return Ok(());
        }

        let settings = self.settings.guild_settings(record.guild_id).await;
        let guild_name = self.guild_name(record.guild_id).await;
        let text = self
            .formatter
            .host_message(record, winners, &settings, &guild_name);
        self.send_private(record.host_id, "Your giveaway has ended", text)
            .await
    }

    async fn notify_winner(&self, record: &GiveawayRecord, winner: UserId) -> Result<()> {
        let settings = self.settings.guild_settings(record.guild_id).await;
        let guild_name = self.guild_name(record.guild_id).await;
        let text = self.formatter.win_message(record, &settings, &guild_name);
        self.send_private(winner, "You won a giveaway!", text).await
    }
}

#[cfg(test)]
mod tests {
    use serenity::model::channel::ReactionType;

    use crate::commands::giveaway::discord::reaction_type;

    #[test]
    fn test_unicode_reaction() {
        assert_eq!(
            reaction_type("🎉"),
            ReactionType::Unicode("🎉".to_string())
        );
    }

    #[test]
    fn test_custom_reaction() {
        match reaction_type("<:party:123456>") {
            ReactionType::Custom { id, name, .. } => {
                assert_eq!(id.get(), 123456);
                assert_eq!(name, Some("party".to_string()));
            }
            other => panic!("unexpected reaction: {:?}", other),
        }
    }
}
