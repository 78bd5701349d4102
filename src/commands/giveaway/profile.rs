use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serenity::model::id::{GuildId, RoleId, UserId};
use tracing::info;

use crate::commands::giveaway::storage::JsonSnapshot;
use crate::error::{Error, Result};

pub const MAX_NOTE_LENGTH: usize = 512;

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberProfile {
    pub hosted: u64,
    pub donated: u64,
    pub notes: Vec<String>,
}

// Roles to grant and revoke after a donation total changed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DonorRoleChanges {
    pub add: Vec<RoleId>,
    pub remove: Vec<RoleId>,
}

impl DonorRoleChanges {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct StoredProfiles {
    #[serde(default)]
    profiles: Vec<(GuildId, UserId, MemberProfile)>,
    #[serde(default)]
    donor_roles: Vec<(GuildId, RoleId, u64)>,
}

// Hosting and donation history of guild members.
#[derive(Debug, Default)]
pub struct ProfileBook {
    profiles: DashMap<(GuildId, UserId), MemberProfile>,
    donor_roles: DashMap<GuildId, BTreeMap<RoleId, u64>>,
    file: Option<JsonSnapshot>,
}

impl ProfileBook {
    pub fn new() -> Self {
        ProfileBook::default()
    }

    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = JsonSnapshot::new(path);
        let stored = file.load::<StoredProfiles>().await?;
        info!(
            "Loaded {} member profile(s) from {}",
            stored.profiles.len(),
            file.path().display()
        );

        let book = ProfileBook {
            profiles: DashMap::new(),
            donor_roles: DashMap::new(),
            file: Some(file),
        };
        for (guild_id, user_id, profile) in stored.profiles {
            book.profiles.insert((guild_id, user_id), profile);
        }
        for (guild_id, role_id, amount) in stored.donor_roles {
            book.set_donor_role(guild_id, role_id, amount);
        }
        Ok(book)
    }

    pub async fn save(&self) -> Result<()> {
        match &self.file {
            Some(file) => file.save_with(|| self.stored()).await,
            None => Ok(()),
        }
    }

    fn stored(&self) -> StoredProfiles {
        let mut profiles = self
            .profiles
            .iter()
            .map(|pair| (pair.key().0, pair.key().1, pair.value().clone()))
            .collect::<Vec<(GuildId, UserId, MemberProfile)>>();
        profiles.sort_by_key(|(guild_id, user_id, _)| (*guild_id, *user_id));
        let mut donor_roles = Vec::new();
        for pair in self.donor_roles.iter() {
            for (role_id, amount) in pair.value() {
                donor_roles.push((*pair.key(), *role_id, *amount));
            }
        }
        donor_roles.sort();

        StoredProfiles {
            profiles,
            donor_roles,
        }
    }

    pub fn profile(&self, guild_id: GuildId, user_id: UserId) -> MemberProfile {
        self.profiles
            .get(&(guild_id, user_id))
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    // Returns the number of hosted giveaways, this one included.
    pub fn record_hosted(&self, guild_id: GuildId, user_id: UserId) -> u64 {
        let mut entry = self.profiles.entry((guild_id, user_id)).or_default();
        entry.hosted += 1;
        entry.hosted
    }

    // Returns the new donation total.
    pub fn add_donation(&self, guild_id: GuildId, user_id: UserId, amount: u64) -> u64 {
        let mut entry = self.profiles.entry((guild_id, user_id)).or_default();
        entry.donated = entry.donated.saturating_add(amount);
        entry.donated
    }

    pub fn add_note(&self, guild_id: GuildId, user_id: UserId, note: &str) -> Result<usize> {
        let note = note.trim();
        if note.is_empty() {
            return Err(Error::Config("The note can't be empty.".to_string()));
        }
        if note.chars().count() > MAX_NOTE_LENGTH {
            let message = format!(
                "The note can't be longer than {} characters.",
                MAX_NOTE_LENGTH
            );
            return Err(Error::Config(message));
        }

        let mut entry = self.profiles.entry((guild_id, user_id)).or_default();
        entry.notes.push(note.to_string());
        Ok(entry.notes.len())
    }

    // Biggest donors first. Ties are ordered by user id.
    pub fn top_donors(&self, guild_id: GuildId, limit: usize) -> Vec<(UserId, u64)> {
        let mut donors = self
            .profiles
            .iter()
            .filter(|pair| pair.key().0 == guild_id && pair.value().donated > 0)
            .map(|pair| (pair.key().1, pair.value().donated))
            .collect::<Vec<(UserId, u64)>>();
        donors.sort_by(|left, right| right.1.cmp(&left.1).then(left.0.cmp(&right.0)));
        donors.truncate(limit);
        donors
    }

    pub fn set_donor_role(&self, guild_id: GuildId, role_id: RoleId, amount: u64) {
        self.donor_roles
            .entry(guild_id)
            .or_default()
            .insert(role_id, amount);
    }

    pub fn remove_donor_role(&self, guild_id: GuildId, role_id: RoleId) -> bool {
        match self.donor_roles.get_mut(&guild_id) {
            Some(mut roles) => roles.remove(&role_id).is_some(),
            None => false,
        }
    }

    pub fn donor_roles(&self, guild_id: GuildId) -> Vec<(RoleId, u64)> {
        self.donor_roles
            .get(&guild_id)
            .map(|roles| roles.iter().map(|(role_id, amount)| (*role_id, *amount)).collect())
            .unwrap_or_default()
    }

    // Compares the donor roles the member holds with the ones their total earns.
    pub fn donor_role_changes(
        &self,
        guild_id: GuildId,
        donated: u64,
        held: &HashSet<RoleId>,
    ) -> DonorRoleChanges {
        let mut changes = DonorRoleChanges::default();
        for (role_id, required) in self.donor_roles(guild_id) {
            let earned = donated >= required;
            let holds = held.contains(&role_id);
            match (earned, holds) {
                (true, false) => changes.add.push(role_id),
                (false, true) => changes.remove.push(role_id),
                _ => {}
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serenity::model::id::{GuildId, RoleId, UserId};

    use crate::commands::giveaway::profile::{DonorRoleChanges, ProfileBook};

    #[test]
    fn test_read_an_empty_profile() {
        let book = ProfileBook::new();
        let profile = book.profile(GuildId::new(1), UserId::new(2));

        assert_eq!(profile.hosted, 0);
        assert_eq!(profile.donated, 0);
        assert_eq!(profile.notes.is_empty(), true);
    }

    #[test]
    fn test_hosted_and_donated_are_accumulated() {
        let book = ProfileBook::new();
        book.record_hosted(GuildId::new(1), UserId::new(2));
        assert_eq!(book.record_hosted(GuildId::new(1), UserId::new(2)), 2);
        book.add_donation(GuildId::new(1), UserId::new(2), 100);
        assert_eq!(book.add_donation(GuildId::new(1), UserId::new(2), 50), 150);

        let other_guild = book.profile(GuildId::new(3), UserId::new(2));
        assert_eq!(other_guild.hosted, 0);
    }

    #[test]
    fn test_get_error_for_empty_note() {
        let book = ProfileBook::new();

        assert_eq!(book.add_note(GuildId::new(1), UserId::new(2), "  ").is_err(), true);
        assert_eq!(
            book.add_note(GuildId::new(1), UserId::new(2), "Paid 5m").unwrap(),
            1
        );
        assert_eq!(
            book.profile(GuildId::new(1), UserId::new(2)).notes,
            vec!["Paid 5m".to_string()]
        );
    }

    #[test]
    fn test_top_donors() {
        let book = ProfileBook::new();
        book.add_donation(GuildId::new(1), UserId::new(2), 10);
        book.add_donation(GuildId::new(1), UserId::new(3), 30);
        book.add_donation(GuildId::new(1), UserId::new(4), 10);
        book.add_donation(GuildId::new(9), UserId::new(5), 99);

        assert_eq!(
            book.top_donors(GuildId::new(1), 2),
            vec![(UserId::new(3), 30), (UserId::new(2), 10)]
        );
    }

    #[test]
    fn test_donor_role_changes() {
        let book = ProfileBook::new();
        book.set_donor_role(GuildId::new(1), RoleId::new(10), 100);
        book.set_donor_role(GuildId::new(1), RoleId::new(11), 1000);
        let held = [RoleId::new(11)].into_iter().collect::<HashSet<RoleId>>();

        let changes = book.donor_role_changes(GuildId::new(1), 150, &held);
        assert_eq!(
            changes,
            DonorRoleChanges {
                add: vec![RoleId::new(10)],
                remove: vec![RoleId::new(11)],
            }
        );

        assert_eq!(book.remove_donor_role(GuildId::new(1), RoleId::new(11)), true);
        let changes = book.donor_role_changes(GuildId::new(1), 150, &HashSet::new());
        assert_eq!(changes.add, vec![RoleId::new(10)]);
        assert_eq!(changes.remove.is_empty(), true);

        let held = [RoleId::new(10)].into_iter().collect::<HashSet<RoleId>>();
        let changes = book.donor_role_changes(GuildId::new(1), 150, &held);
        assert_eq!(changes.is_empty(), true);
    }

    #[tokio::test]
    async fn test_profiles_survive_reopening() {
        let path = std::env::temp_dir().join(format!("profiles-{}.json", uuid::Uuid::new_v4()));
        let book = ProfileBook::open(&path).await.unwrap();
        book.record_hosted(GuildId::new(1), UserId::new(2));
        book.add_donation(GuildId::new(1), UserId::new(2), 250);
        book.add_note(GuildId::new(1), UserId::new(2), "Paid 5m").unwrap();
        book.set_donor_role(GuildId::new(1), RoleId::new(10), 100);
        book.save().await.unwrap();

        let reopened = ProfileBook::open(&path).await.unwrap();
        let profile = reopened.profile(GuildId::new(1), UserId::new(2));
        assert_eq!(profile.hosted, 1);
        assert_eq!(profile.donated, 250);
        assert_eq!(profile.notes, vec!["Paid 5m".to_string()]);
        assert_eq!(
            reopened.donor_roles(GuildId::new(1)),
            vec![(RoleId::new(10), 100)]
        );

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
