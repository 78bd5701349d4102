pub mod collaborators;
pub mod discord;
pub mod eligibility;
pub mod formatters;
pub mod handlers;
pub mod manager;
pub mod metrics;
pub mod models;
pub mod multiplier;
pub mod profile;
pub mod settings;
pub mod storage;
pub mod strategies;
#[cfg(test)]
pub mod testing;
pub mod util;

pub use crate::commands::giveaway::handlers::{
    // Giveaway management
    giveaway,

    // Server settings
    gset,

    // Member profiles
    gprofile,
};
