use std::collections::HashSet;

use serenity::model::id::RoleId;

use crate::commands::giveaway::models::GuildSettings;

// Upper bound for a single role's multiplier, enforced when it is configured.
pub const MAX_ROLE_MULTIPLIER: u32 = 500;

// Number of tickets an eligible participant gets: one entry plus the
// multiplier of every role they hold. Multipliers add up, they don't multiply.
pub fn multiplier(roles: &HashSet<RoleId>, settings: &GuildSettings) -> u32 {
    roles
        .iter()
        .filter_map(|role_id| settings.multipliers.get(role_id))
        .fold(1u32, |total, extra| total.saturating_add(*extra))
}
