use serenity::model::id::UserId;

use crate::commands::giveaway::models::EntryWeight;

pub struct DrawOptions<'a> {
    pool: &'a [EntryWeight],
    count: usize,
}

impl<'a> DrawOptions<'a> {
    pub fn new(pool: &'a [EntryWeight], count: usize) -> Self {
        DrawOptions { pool, count }
    }

    // Returns the eligible participants together with their ticket counts.
    pub fn pool(&self) -> &'a [EntryWeight] {
        self.pool
    }

    // Returns how many winners are requested.
    pub fn count(&self) -> usize {
        self.count
    }
}

pub trait GiveawayStrategy: Send + Sync {
    // Picks up to `count` distinct winners from the pool. Returns fewer
    // winners (possibly none) when the pool runs dry.
    fn draw(&self, options: &DrawOptions) -> Vec<UserId>;
}
