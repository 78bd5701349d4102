pub mod base;
pub mod weighted;

pub use crate::commands::giveaway::strategies::base::{DrawOptions, GiveawayStrategy};
pub use crate::commands::giveaway::strategies::weighted::{
    select_winners, WeightedTicketStrategy, MAX_REDRAW_ATTEMPTS,
};
