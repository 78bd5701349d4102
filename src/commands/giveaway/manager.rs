use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serenity::model::id::{GuildId, MessageId, UserId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::commands::giveaway::collaborators::Collaborators;
use crate::commands::giveaway::eligibility::{collect_snapshot, evaluate, Eligibility};
use crate::commands::giveaway::models::{
    EntryWeight, GiveawayKey, GiveawayRecord, GiveawayStatus, GuildSettings, NewGiveaway,
    Urgency,
};
use crate::commands::giveaway::multiplier::multiplier;
use crate::commands::giveaway::storage::GiveawayStore;
use crate::commands::giveaway::strategies::{DrawOptions, GiveawayStrategy};
use crate::error::{Error, Result};
use crate::state::{RunningTask, TaskRegistry, TaskSlot};

// Below this the task sleeps straight until the end instead of a quarter of the time left.
pub const REFRESH_CUTOVER: Duration = Duration::from_secs(60);
// Pause before retrying after the store or the platform failed.
pub const STORE_RETRY_DELAY: Duration = Duration::from_secs(5);

// Time to wait before the next display refresh.
pub fn next_refresh_delay(remaining: Duration) -> Duration {
    match remaining <= REFRESH_CUTOVER {
        true => remaining,
        false => remaining / 4,
    }
}

struct ManagerInner {
    store: Arc<dyn GiveawayStore>,
    collaborators: Collaborators,
    strategy: Arc<dyn GiveawayStrategy>,
    registry: TaskRegistry,
    root_token: CancellationToken,
}

// Runs the lifecycle of every active giveaway: one task per giveaway refreshes
// the display until the end and then draws the winners.
#[derive(Clone)]
pub struct GiveawayManager {
    inner: Arc<ManagerInner>,
}

impl GiveawayManager {
    pub fn new(
        store: Arc<dyn GiveawayStore>,
        collaborators: Collaborators,
        strategy: Arc<dyn GiveawayStrategy>,
    ) -> Self {
        GiveawayManager {
            inner: Arc::new(ManagerInner {
                store,
                collaborators,
                strategy,
                registry: TaskRegistry::new(),
                root_token: CancellationToken::new(),
            }),
        }
    }

    pub async fn get(&self, key: &GiveawayKey) -> Result<GiveawayRecord> {
        self.inner.store.get(key).await?.ok_or(Error::NotFound)
    }

    // Validates and stores a new giveaway, then starts its lifecycle task.
    #[instrument(skip(self, request), fields(guild = request.guild_id.get(), message = request.message_id.get()))]
    pub async fn create(&self, request: NewGiveaway) -> Result<GiveawayRecord> {
        let now = self.inner.collaborators.clock.now();
        let record = GiveawayRecord::create(request, now)?;
        self.inner.store.insert(record.clone()).await?;
        self.start(&record)?;

        info!("Giveaway {} created, ends at {}", record.key(), record.end_at);
        Ok(record)
    }

    // Spawns the lifecycle task of an active giveaway.
    pub fn start(&self, record: &GiveawayRecord) -> Result<()> {
        if !record.is_active() {
            return Err(Error::NotActive);
        }

        let key = record.key();
        let now = self.inner.collaborators.clock.now();
        let token = self.inner.root_token.child_token();
        let slot = self.inner.registry.bind(key, token, now)?;

        let handle = tokio::spawn(self.clone().run(key, slot.clone()));
        self.inner.registry.attach(&slot, handle);
        Ok(())
    }

    #[instrument(skip(self, slot))]
    async fn run(self, key: GiveawayKey, slot: Arc<TaskSlot>) {
        let token = slot.token();

        loop {
            if token.is_cancelled() {
                break;
            }

            let record = match self.inner.store.get(&key).await {
                Ok(Some(record)) if record.is_active() => record,
                // Ended or cancelled elsewhere.
                Ok(_) => break,
                Err(err) => {
                    warn!("Can't read giveaway {}: {}", key, err.to_string());
                    match pause(&token, STORE_RETRY_DELAY).await {
                        true => continue,
                        false => break,
                    }
                }
            };

            let now = self.inner.collaborators.clock.now();
            let remaining = match record.remaining(now) {
                Some(remaining) => remaining,
                None => match self.finalize(&record, record.winner_count).await {
                    Ok(_) => break,
                    // Ended or cancelled by somebody else in the meantime.
                    Err(Error::NotActive) => break,
                    Err(Error::ResourceGone) => {
                        info!("Giveaway {} message is gone, giving up", key);
                        break;
                    }
                    Err(err) => {
                        match err.is_transient() {
                            true => warn!("Can't finalize giveaway {} yet: {}", key, err.to_string()),
                            false => error!("Can't finalize giveaway {}: {}", key, err.to_string()),
                        }
                        match pause(&token, STORE_RETRY_DELAY).await {
                            true => continue,
                            false => break,
                        }
                    }
                },
            };

            let urgency = Urgency::from_remaining(remaining);
            match self
                .inner
                .collaborators
                .display
                .update(&record, remaining, urgency)
                .await
            {
                Ok(()) => slot.observe_refresh(now, urgency),
                Err(Error::ResourceGone) => {
                    info!("Giveaway {} message is gone, giving up", key);
                    break;
                }
                Err(err) => warn!("Can't refresh giveaway {}: {}", key, err.to_string()),
            }

            if !pause(&token, next_refresh_delay(remaining)).await {
                break;
            }
        }

        self.inner.registry.release(&key, slot.generation());
        debug!("Lifecycle task of giveaway {} stopped", key);
    }

    // Draws the winners and moves the giveaway into the ended state. Only one
    // caller can succeed, everybody else gets `Error::NotActive`.
    #[instrument(skip(self, record), fields(key = %record.key()))]
    async fn finalize(&self, record: &GiveawayRecord, count: u32) -> Result<GiveawayRecord> {
        let settings = self
            .inner
            .collaborators
            .settings
            .guild_settings(record.guild_id)
            .await;
        let winners = self.draw(record, count, &settings).await?;

        let now = self.inner.collaborators.clock.now();
        let ended = self
            .inner
            .store
            .settle(&record.key(), GiveawayStatus::Ended, winners, now)
            .await?;
        info!(
            "Giveaway {} ended with {} winner(s)",
            ended.key(),
            ended.winners.len()
        );

        self.announce(&ended, &settings).await;
        Ok(ended)
    }

    // Builds the weighted pool out of the eligible entrants and picks the winners.
    async fn draw(
        &self,
        record: &GiveawayRecord,
        count: u32,
        settings: &GuildSettings,
    ) -> Result<Vec<UserId>> {
        let collaborators = &self.inner.collaborators;
        let entrants = collaborators.entrants.list_entrants(record).await?;
        let now = collaborators.clock.now();

        let mut seen = HashSet::new();
        let mut pool = Vec::new();
        for user_id in entrants {
            if !seen.insert(user_id) {
                continue;
            }

            let member = match collaborators.members.member(record.guild_id, user_id).await {
                Ok(Some(member)) if !member.bot => member,
                Ok(_) => continue,
                Err(err) => {
                    warn!("Can't fetch member {}: {}", user_id.get(), err.to_string());
                    continue;
                }
            };

            let snapshot = collect_snapshot(
                record.guild_id,
                &member,
                &record.requirements,
                settings,
                collaborators.metrics.as_ref(),
                collaborators.members.as_ref(),
                now,
            )
            .await;
            match evaluate(&snapshot, &record.requirements, settings) {
                Eligibility::Eligible => {
                    let weight = multiplier(&snapshot.roles, settings);
                    pool.push(EntryWeight::new(user_id, weight));
                }
                Eligibility::Ineligible(reason) => {
                    debug!("User {} skipped: {:?}", user_id.get(), reason)
                }
            }
        }

        let options = DrawOptions::new(&pool, count as usize);
        Ok(self.inner.strategy.draw(&options))
    }

    // Notification failures never undo the result.
    async fn announce(&self, record: &GiveawayRecord, settings: &GuildSettings) {
        let notifier = &self.inner.collaborators.notifier;

        if let Err(err) = notifier.announce_result(record, &record.winners).await {
            warn!("Can't announce giveaway {}: {}", record.key(), err.to_string());
        }

        if settings.dm_host {
            if let Err(err) = notifier.notify_host(record, &record.winners).await {
                warn!("Can't notify host of {}: {}", record.key(), err.to_string());
            }
        }

        if settings.dm_winners {
            for winner in record.winners.iter() {
                if let Err(err) = notifier.notify_winner(record, *winner).await {
                    warn!("Can't notify winner {}: {}", winner.get(), err.to_string());
                }
            }
        }
    }

    // Stops an active giveaway without drawing any winners.
    #[instrument(skip(self))]
    pub async fn cancel(&self, key: &GiveawayKey, cancelled_by: UserId) -> Result<GiveawayRecord> {
        let now = self.inner.collaborators.clock.now();
        let cancelled = self
            .inner
            .store
            .settle(key, GiveawayStatus::Cancelled, Vec::new(), now)
            .await?;
        self.inner.registry.stop(key);
        info!("Giveaway {} cancelled by {}", key, cancelled_by.get());

        let notifier = &self.inner.collaborators.notifier;
        if let Err(err) = notifier.announce_cancelled(&cancelled, cancelled_by).await {
            warn!("Can't announce cancellation of {}: {}", key, err.to_string());
        }
        Ok(cancelled)
    }

    // Ends an active giveaway right away.
    #[instrument(skip(self))]
    pub async fn end(&self, key: &GiveawayKey) -> Result<GiveawayRecord> {
        let record = self.get(key).await?;
        if !record.is_active() {
            return Err(Error::NotActive);
        }

        let ended = self.finalize(&record, record.winner_count).await?;
        if !self.inner.registry.stop(key) {
            debug!("Giveaway {} had no running task", key);
        }
        Ok(ended)
    }

    // Draws new winners for an ended giveaway.
    #[instrument(skip(self))]
    pub async fn reroll(&self, key: &GiveawayKey, count: u32) -> Result<GiveawayRecord> {
        if count == 0 {
            return Err(Error::Config("Can't have less than 1 winner.".to_string()));
        }

        let record = self.get(key).await?;
        if record.status != GiveawayStatus::Ended {
            return Err(Error::NotEnded);
        }

        let settings = self
            .inner
            .collaborators
            .settings
            .guild_settings(record.guild_id)
            .await;
        let winners = self.draw(&record, count, &settings).await?;
        let now = self.inner.collaborators.clock.now();
        let rerolled = self.inner.store.record_winners(key, winners, now).await?;
        info!(
            "Giveaway {} rerolled with {} winner(s)",
            key,
            rerolled.winners.len()
        );

        self.announce(&rerolled, &settings).await;
        Ok(rerolled)
    }

    // Restarts the lifecycle tasks of every active giveaway in the store.
    pub async fn recover(&self) -> Result<usize> {
        let mut started = 0;
        for guild_id in self.inner.store.guilds().await? {
            for record in self.inner.store.list_active(guild_id).await? {
                match self.start(&record) {
                    Ok(()) => started += 1,
                    Err(Error::AlreadyRunning(_)) => {}
                    Err(err) => warn!("Can't resume giveaway {}: {}", record.key(), err),
                }
            }
        }

        info!("Resumed {} giveaway(s)", started);
        Ok(started)
    }

    // Stops every lifecycle task and waits for them. Records stay as they are.
    pub async fn shutdown(&self) {
        info!("Stopping {} giveaway task(s)", self.inner.registry.len());
        self.inner.root_token.cancel();

        for handle in self.inner.registry.take_handles() {
            if let Err(err) = handle.await {
                error!("Giveaway task failed: {}", err.to_string());
            }
        }
        info!("Giveaway manager stopped");
    }

    // Evaluates a user who just entered the giveaway.
    pub async fn check_entry(&self, key: &GiveawayKey, user_id: UserId) -> Result<Eligibility> {
        let record = self.get(key).await?;
        if !record.is_active() {
            return Err(Error::NotActive);
        }

        let collaborators = &self.inner.collaborators;
        let member = collaborators
            .members
            .member(record.guild_id, user_id)
            .await?
            .ok_or(Error::NotFound)?;
        let settings = collaborators.settings.guild_settings(record.guild_id).await;
        let snapshot = collect_snapshot(
            record.guild_id,
            &member,
            &record.requirements,
            &settings,
            collaborators.metrics.as_ref(),
            collaborators.members.as_ref(),
            collaborators.clock.now(),
        )
        .await;

        Ok(evaluate(&snapshot, &record.requirements, &settings))
    }

    // Active giveaways of the guild. With `joinable_only` only those the user
    // can currently enter are returned.
    pub async fn list_for(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        joinable_only: bool,
    ) -> Result<Vec<GiveawayRecord>> {
        let active = self.inner.store.list_active(guild_id).await?;
        if !joinable_only {
            return Ok(active);
        }

        let mut joinable = Vec::new();
        for record in active {
            match self.check_entry(&record.key(), user_id).await {
                Ok(eligibility) if eligibility.is_eligible() => joinable.push(record),
                Ok(_) | Err(Error::NotFound) | Err(Error::NotActive) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(joinable)
    }

    pub async fn clear_ended(&self, guild_id: GuildId, keep: &[MessageId]) -> Result<usize> {
        let purged = self.inner.store.purge_ended(guild_id, keep).await?;
        info!("Cleared {} giveaway(s) of guild {}", purged, guild_id.get());
        Ok(purged)
    }

    pub fn running(&self) -> Vec<RunningTask> {
        self.inner.registry.running()
    }

    // Waits until the lifecycle task of the giveaway exits.
    #[cfg(test)]
    pub async fn join(&self, key: &GiveawayKey) {
        if let Some(handle) = self.inner.registry.take_handle(key) {
            if let Err(err) = handle.await {
                error!("Giveaway task failed: {}", err.to_string());
            }
        }
    }
}

// Sleeps unless the token gets cancelled first. Returns false when cancelled.
async fn pause(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
