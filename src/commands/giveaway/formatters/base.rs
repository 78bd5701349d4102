use std::time::Duration;

use serenity::model::id::UserId;

use crate::commands::giveaway::models::{GiveawayRecord, GuildSettings};

pub trait GiveawayFormatter: Send + Sync {
    // Embed description of a running giveaway with the time left.
    fn running_description(
        &self,
        record: &GiveawayRecord,
        remaining: Duration,
        settings: &GuildSettings,
    ) -> String;
    // Embed description after the giveaway has ended.
    fn ended_description(&self, record: &GiveawayRecord) -> String;
    // Requirements field of the embed. None when nothing is required.
    fn requirements(&self, record: &GiveawayRecord, settings: &GuildSettings) -> Option<String>;
    // Message posted in the channel next to the giveaway.
    fn result_message(&self, record: &GiveawayRecord, winners: &[UserId]) -> String;
    fn host_message(
        &self,
        record: &GiveawayRecord,
        winners: &[UserId],
        settings: &GuildSettings,
        guild_name: &str,
    ) -> String;
    fn win_message(&self, record: &GiveawayRecord, settings: &GuildSettings, guild_name: &str)
    -> String;
}
