pub mod base;
pub mod giveaway;

pub use crate::commands::giveaway::formatters::base::GiveawayFormatter;
pub use crate::commands::giveaway::formatters::giveaway::{
    display_time, fill_template, mention_list, DefaultGiveawayFormatter,
};
