use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serenity::model::id::UserId;

use crate::commands::giveaway::models::EntryWeight;
use crate::commands::giveaway::strategies::base::{DrawOptions, GiveawayStrategy};

// How many times a slot is redrawn after hitting an already chosen participant.
pub const MAX_REDRAW_ATTEMPTS: usize = 6;

// Every entry is expanded into `weight` virtual tickets and a ticket is drawn
// uniformly. Tickets of participants that already won are rejected and drawn
// again, so nobody can win twice. When a slot keeps hitting previous winners
// the draw stops early with fewer winners.
pub fn select_winners<R: Rng + ?Sized>(
    pool: &[EntryWeight],
    count: usize,
    rng: &mut R,
) -> Vec<UserId> {
    let mut bounds: Vec<(u64, UserId)> = Vec::with_capacity(pool.len());
    let mut total_tickets: u64 = 0;
    for entry in pool.iter().filter(|entry| entry.weight > 0) {
        total_tickets += u64::from(entry.weight);
        bounds.push((total_tickets, entry.user_id));
    }

    let mut winners = Vec::new();
    if total_tickets == 0 {
        return winners;
    }

    let distinct = bounds
        .iter()
        .map(|(_, user_id)| *user_id)
        .collect::<HashSet<UserId>>()
        .len();
    let mut chosen = HashSet::new();

    while winners.len() < count && chosen.len() < distinct {
        let mut redraws = 0;
        let picked = loop {
            let ticket = rng.random_range(0..total_tickets);
            let index = bounds.partition_point(|(upper, _)| *upper <= ticket);
            let user_id = bounds[index].1;

            if !chosen.contains(&user_id) {
                break Some(user_id);
            }
            if redraws == MAX_REDRAW_ATTEMPTS {
                break None;
            }
            redraws += 1;
        };

        match picked {
            Some(user_id) => {
                chosen.insert(user_id);
                winners.push(user_id);
            }
            None => break,
        }
    }

    winners
}

#[derive(Debug)]
pub struct WeightedTicketStrategy {
    rng: Mutex<StdRng>,
}

impl WeightedTicketStrategy {
    pub fn new() -> Self {
        WeightedTicketStrategy {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    // Reproducible draws, used by tests.
    pub fn seeded(seed: u64) -> Self {
        WeightedTicketStrategy {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl GiveawayStrategy for WeightedTicketStrategy {
    fn draw(&self, options: &DrawOptions) -> Vec<UserId> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        select_winners(options.pool(), options.count(), &mut *rng)
    }
}
