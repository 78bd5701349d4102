use std::env;
use std::path::PathBuf;

use crate::error::{Error, Result};

pub const DEFAULT_STORE_PATH: &str = "giveaways.json";
pub const DEFAULT_SETTINGS_PATH: &str = "giveaway_settings.json";
pub const DEFAULT_PROFILES_PATH: &str = "giveaway_profiles.json";
pub const DEFAULT_LEDGER_PATH: &str = "giveaway_ledger.json";

// Settings read once from the environment on start-up.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    pub discord_token: String,
    pub store_path: PathBuf,
    pub settings_path: PathBuf,
    pub profiles_path: PathBuf,
    pub ledger_path: PathBuf,
    pub amari_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Config::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let discord_token = read("DISCORD_TOKEN").ok_or_else(|| {
            Error::Config("Expected a DISCORD_TOKEN in the environment".to_string())
        })?;
        let path = |name: &str, default: &str| {
            read(name)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(default))
        };

        Ok(Config {
            discord_token,
            store_path: path("GIVEAWAY_STORE_PATH", DEFAULT_STORE_PATH),
            settings_path: path("GIVEAWAY_SETTINGS_PATH", DEFAULT_SETTINGS_PATH),
            profiles_path: path("GIVEAWAY_PROFILES_PATH", DEFAULT_PROFILES_PATH),
            ledger_path: path("GIVEAWAY_LEDGER_PATH", DEFAULT_LEDGER_PATH),
            amari_token: read("AMARI_API_TOKEN"),
        })
    }
}
