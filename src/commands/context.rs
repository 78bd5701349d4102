use std::sync::Arc;

use poise::Context as PoiseContext;

use crate::commands::giveaway::manager::GiveawayManager;
use crate::commands::giveaway::metrics::ApiMetrics;
use crate::commands::giveaway::profile::ProfileBook;
use crate::commands::giveaway::settings::SettingsBook;

// User data, which is stored and accessible in all command invocations
pub struct UserData {
    pub manager: GiveawayManager,
    pub settings: Arc<SettingsBook>,
    pub profiles: Arc<ProfileBook>,
    pub metrics: Arc<ApiMetrics>,
}

// Generic context available across Poise commands
pub type Context<'a> = PoiseContext<'a, UserData, crate::error::Error>;
