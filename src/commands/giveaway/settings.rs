use std::path::Path;

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use serenity::async_trait;
use serenity::model::id::{GuildId, RoleId, UserId};
use tracing::info;

use crate::commands::giveaway::collaborators::SettingsSource;
use crate::commands::giveaway::models::GuildSettings;
use crate::commands::giveaway::multiplier::MAX_ROLE_MULTIPLIER;
use crate::commands::giveaway::storage::JsonSnapshot;
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq, poise::ChoiceParameter)]
pub enum Template {
    #[name = "start header"]
    StartHeader,
    #[name = "end header"]
    EndHeader,
    #[name = "description"]
    Description,
    #[name = "win message"]
    WinMessage,
    #[name = "host message"]
    HostMessage,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct StoredSettings {
    #[serde(default)]
    guilds: Vec<(GuildId, GuildSettings)>,
    #[serde(default)]
    denied_users: Vec<UserId>,
}

// Per-guild giveaway settings plus the bot-wide deny-list.
#[derive(Debug, Default)]
pub struct SettingsBook {
    guilds: DashMap<GuildId, GuildSettings>,
    denied_users: DashSet<UserId>,
    file: Option<JsonSnapshot>,
}

impl SettingsBook {
    // Kept in memory only.
    pub fn new() -> Self {
        SettingsBook::default()
    }

    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = JsonSnapshot::new(path);
        let stored = file.load::<StoredSettings>().await?;
        info!(
            "Loaded the settings of {} guild(s) from {}",
            stored.guilds.len(),
            file.path().display()
        );

        Ok(SettingsBook {
            guilds: stored.guilds.into_iter().collect(),
            denied_users: stored.denied_users.into_iter().collect(),
            file: Some(file),
        })
    }

    // Writes the current settings to the file, if the book has one.
    pub async fn save(&self) -> Result<()> {
        match &self.file {
            Some(file) => file.save_with(|| self.stored()).await,
            None => Ok(()),
        }
    }

    fn stored(&self) -> StoredSettings {
        let mut guilds = self
            .guilds
            .iter()
            .map(|pair| (*pair.key(), pair.value().clone()))
            .collect::<Vec<(GuildId, GuildSettings)>>();
        guilds.sort_by_key(|(guild_id, _)| *guild_id);
        let mut denied_users = self
            .denied_users
            .iter()
            .map(|user_id| *user_id)
            .collect::<Vec<UserId>>();
        denied_users.sort();

        StoredSettings {
            guilds,
            denied_users,
        }
    }

    pub fn settings(&self, guild_id: GuildId) -> GuildSettings {
        let mut settings = self
            .guilds
            .get(&guild_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        settings
            .denied_users
            .extend(self.denied_users.iter().map(|user_id| *user_id));
        settings
    }

    fn update<F>(&self, guild_id: GuildId, change: F)
    where
        F: FnOnce(&mut GuildSettings),
    {
        let mut entry = self.guilds.entry(guild_id).or_default();
        change(entry.value_mut());
    }

    // A multiplier of zero removes the role from the multiplier list.
    pub fn set_multiplier(&self, guild_id: GuildId, role_id: RoleId, value: u32) -> Result<()> {
        if value > MAX_ROLE_MULTIPLIER {
            let message = format!(
                "The multiplier can't be larger than {}.",
                MAX_ROLE_MULTIPLIER
            );
            return Err(Error::Config(message));
        }

        self.update(guild_id, |settings| match value {
            0 => {
                settings.multipliers.remove(&role_id);
            }
            value => {
                settings.multipliers.insert(role_id, value);
            }
        });
        info!(
            "Multiplier of role {} in guild {} set to {}",
            role_id.get(),
            guild_id.get(),
            value
        );
        Ok(())
    }

    // Returns false when the role was already there.
    pub fn add_manager_role(&self, guild_id: GuildId, role_id: RoleId) -> bool {
        let mut added = false;
        self.update(guild_id, |settings| added = settings.manager_roles.insert(role_id));
        added
    }

    pub fn remove_manager_role(&self, guild_id: GuildId, role_id: RoleId) -> bool {
        let mut removed = false;
        self.update(guild_id, |settings| {
            removed = settings.manager_roles.remove(&role_id)
        });
        removed
    }

    pub fn add_bypass_role(&self, guild_id: GuildId, role_id: RoleId) -> bool {
        let mut added = false;
        self.update(guild_id, |settings| added = settings.bypass_roles.insert(role_id));
        added
    }

    pub fn remove_bypass_role(&self, guild_id: GuildId, role_id: RoleId) -> bool {
        let mut removed = false;
        self.update(guild_id, |settings| removed = settings.bypass_roles.remove(&role_id));
        removed
    }

    pub fn add_blacklist_role(&self, guild_id: GuildId, role_id: RoleId) -> bool {
        let mut added = false;
        self.update(guild_id, |settings| {
            added = settings.blacklist_roles.insert(role_id)
        });
        added
    }

    pub fn remove_blacklist_role(&self, guild_id: GuildId, role_id: RoleId) -> bool {
        let mut removed = false;
        self.update(guild_id, |settings| {
            removed = settings.blacklist_roles.remove(&role_id)
        });
        removed
    }

    // Bans the user from giveaways on every server.
    pub fn deny_user(&self, user_id: UserId) -> bool {
        self.denied_users.insert(user_id)
    }

    pub fn allow_user(&self, user_id: UserId) -> bool {
        self.denied_users.remove(&user_id).is_some()
    }

    pub fn set_emoji(&self, guild_id: GuildId, emoji: &str) -> Result<()> {
        let emoji = emoji.trim();
        if emoji.is_empty() {
            return Err(Error::Config("The emoji can't be empty.".to_string()));
        }

        self.update(guild_id, |settings| settings.emoji = emoji.to_string());
        Ok(())
    }

    pub fn set_template(&self, guild_id: GuildId, template: Template, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Config("The message can't be empty.".to_string()));
        }

        let text = text.to_string();
        self.update(guild_id, |settings| match template {
            Template::StartHeader => settings.start_header = text,
            Template::EndHeader => settings.end_header = text,
            Template::Description => settings.description = text,
            Template::WinMessage => settings.win_message = text,
            Template::HostMessage => settings.host_message = text,
        });
        Ok(())
    }

    pub fn set_dm_winners(&self, guild_id: GuildId, enabled: bool) {
        self.update(guild_id, |settings| settings.dm_winners = enabled);
    }

    pub fn set_dm_host(&self, guild_id: GuildId, enabled: bool) {
        self.update(guild_id, |settings| settings.dm_host = enabled);
    }

    pub fn set_ping_role(&self, guild_id: GuildId, role_id: Option<RoleId>) {
        self.update(guild_id, |settings| settings.ping_role = role_id);
    }

    pub fn set_default_role(&self, guild_id: GuildId, role_id: Option<RoleId>) {
        self.update(guild_id, |settings| settings.default_role = role_id);
    }
}

#[async_trait]
impl SettingsSource for SettingsBook {
    async fn guild_settings(&self, guild_id: GuildId) -> GuildSettings {
        self.settings(guild_id)
    }
}

#[cfg(test)]
mod tests {
    use serenity::model::id::{GuildId, RoleId, UserId};

    use crate::commands::giveaway::settings::{SettingsBook, Template};
    use crate::error::Error;

    #[test]
    fn test_defaults_for_unknown_guild() {
        let book = SettingsBook::new();
        let settings = book.settings(GuildId::new(1));

        assert_eq!(settings.emoji, "🎉".to_string());
        assert_eq!(settings.multipliers.is_empty(), true);
        assert_eq!(settings.dm_winners, false);
    }

    #[test]
    fn test_get_error_for_too_large_multiplier() {
        let book = SettingsBook::new();

        let result = book.set_multiplier(GuildId::new(1), RoleId::new(2), 501);
        assert_eq!(
            result.unwrap_err(),
            Error::Config("The multiplier can't be larger than 500.".to_string())
        );
        assert_eq!(book.settings(GuildId::new(1)).multipliers.is_empty(), true);
    }

    #[test]
    fn test_zero_multiplier_removes_the_role() {
        let book = SettingsBook::new();
        book.set_multiplier(GuildId::new(1), RoleId::new(2), 500).unwrap();
        assert_eq!(
            book.settings(GuildId::new(1)).multipliers.get(&RoleId::new(2)),
            Some(&500)
        );

        book.set_multiplier(GuildId::new(1), RoleId::new(2), 0).unwrap();
        assert_eq!(book.settings(GuildId::new(1)).multipliers.is_empty(), true);
    }

    #[test]
    fn test_denied_users_are_merged_into_every_guild() {
        let book = SettingsBook::new();
        assert_eq!(book.deny_user(UserId::new(5)), true);
        assert_eq!(book.deny_user(UserId::new(5)), false);

        for guild_id in [1, 2] {
            let settings = book.settings(GuildId::new(guild_id));
            assert_eq!(settings.denied_users.contains(&UserId::new(5)), true);
        }

        assert_eq!(book.allow_user(UserId::new(5)), true);
        let settings = book.settings(GuildId::new(1));
        assert_eq!(settings.denied_users.is_empty(), true);
    }

    #[test]
    fn test_roles_per_guild() {
        let book = SettingsBook::new();
        assert_eq!(book.add_bypass_role(GuildId::new(1), RoleId::new(3)), true);
        assert_eq!(book.add_blacklist_role(GuildId::new(2), RoleId::new(4)), true);

        let first = book.settings(GuildId::new(1));
        let second = book.settings(GuildId::new(2));
        assert_eq!(first.bypass_roles.contains(&RoleId::new(3)), true);
        assert_eq!(first.blacklist_roles.is_empty(), true);
        assert_eq!(second.blacklist_roles.contains(&RoleId::new(4)), true);

        assert_eq!(book.remove_bypass_role(GuildId::new(1), RoleId::new(3)), true);
        assert_eq!(book.remove_bypass_role(GuildId::new(1), RoleId::new(3)), false);
        assert_eq!(book.remove_blacklist_role(GuildId::new(2), RoleId::new(4)), true);
    }

    #[test]
    fn test_update_templates_and_flags() {
        let book = SettingsBook::new();
        book.set_template(GuildId::new(1), Template::WinMessage, "You won {prize}!")
            .unwrap();
        book.set_emoji(GuildId::new(1), "🎁").unwrap();
        book.set_dm_host(GuildId::new(1), true);

        let settings = book.settings(GuildId::new(1));
        assert_eq!(settings.win_message, "You won {prize}!".to_string());
        assert_eq!(settings.emoji, "🎁".to_string());
        assert_eq!(settings.dm_host, true);
        assert_eq!(
            book.set_template(GuildId::new(1), Template::EndHeader, " ").is_err(),
            true
        );
    }

    #[test]
    fn test_manager_ping_and_default_roles() {
        let book = SettingsBook::new();
        assert_eq!(book.add_manager_role(GuildId::new(1), RoleId::new(3)), true);
        assert_eq!(book.add_manager_role(GuildId::new(1), RoleId::new(3)), false);
        book.set_ping_role(GuildId::new(1), Some(RoleId::new(4)));
        book.set_default_role(GuildId::new(1), Some(RoleId::new(5)));

        let settings = book.settings(GuildId::new(1));
        assert_eq!(settings.is_manager(false, &[RoleId::new(3)]), true);
        assert_eq!(settings.ping_role, Some(RoleId::new(4)));
        assert_eq!(settings.required_role(None), Some(RoleId::new(5)));

        assert_eq!(book.remove_manager_role(GuildId::new(1), RoleId::new(3)), true);
        book.set_default_role(GuildId::new(1), None);
        let settings = book.settings(GuildId::new(1));
        assert_eq!(settings.manager_roles.is_empty(), true);
        assert_eq!(settings.default_role, None);
    }

    #[tokio::test]
    async fn test_settings_survive_reopening() {
        let path = std::env::temp_dir().join(format!("settings-{}.json", uuid::Uuid::new_v4()));
        let book = SettingsBook::open(&path).await.unwrap();
        book.set_multiplier(GuildId::new(1), RoleId::new(2), 3).unwrap();
        book.add_bypass_role(GuildId::new(1), RoleId::new(4));
        book.set_emoji(GuildId::new(2), "🎁").unwrap();
        book.deny_user(UserId::new(9));
        book.save().await.unwrap();

        let reopened = SettingsBook::open(&path).await.unwrap();
        let first = reopened.settings(GuildId::new(1));
        assert_eq!(first.multipliers.get(&RoleId::new(2)), Some(&3));
        assert_eq!(first.bypass_roles.contains(&RoleId::new(4)), true);
        assert_eq!(first.denied_users.contains(&UserId::new(9)), true);
        assert_eq!(reopened.settings(GuildId::new(2)).emoji, "🎁".to_string());
        assert_eq!(reopened.settings(GuildId::new(3)).emoji, "🎉".to_string());

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_save_without_file_does_nothing() {
        let book = SettingsBook::new();
        book.deny_user(UserId::new(9));

        assert_eq!(book.save().await.is_ok(), true);
    }
}
