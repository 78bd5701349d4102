use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use crossbeam::atomic::AtomicCell;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::commands::giveaway::models::{GiveawayKey, Urgency};
use crate::error::{Error, Result};

// A lifecycle task bound to a single giveaway.
#[derive(Debug)]
pub struct TaskSlot {
    // Distinguishes this task from a later one bound to the same giveaway.
    generation: Uuid,
    token: CancellationToken,
    started_at: DateTime<Utc>,
    last_refresh: AtomicCell<Option<DateTime<Utc>>>,
    last_urgency: AtomicCell<Option<Urgency>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskSlot {
    pub fn generation(&self) -> Uuid {
        self.generation
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    // Remembers the latest successful display refresh.
    pub fn observe_refresh(&self, at: DateTime<Utc>, urgency: Urgency) {
        self.last_refresh.store(Some(at));
        self.last_urgency.store(Some(urgency));
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunningTask {
    pub key: GiveawayKey,
    pub started_at: DateTime<Utc>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub last_urgency: Option<Urgency>,
}

// Process-local registry of the running lifecycle tasks. It's rebuilt from the
// store on start-up and never shared between bot instances.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct TaskRegistry {
    tasks: DashMap<GiveawayKey, Arc<TaskSlot>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        TaskRegistry {
            tasks: DashMap::new(),
        }
    }

    // Reserves the giveaway for a new task. Only one task per giveaway can
    // be bound at a time.
    pub fn bind(
        &self,
        key: GiveawayKey,
        token: CancellationToken,
        now: DateTime<Utc>,
    ) -> Result<Arc<TaskSlot>> {
        match self.tasks.entry(key) {
            Entry::Occupied(_) => Err(Error::AlreadyRunning(key.message_id.get())),
            Entry::Vacant(entry) => {
                let slot = Arc::new(TaskSlot {
                    generation: Uuid::new_v4(),
                    token,
                    started_at: now,
                    last_refresh: AtomicCell::new(None),
                    last_urgency: AtomicCell::new(None),
                    handle: Mutex::new(None),
                });
                entry.insert(slot.clone());
                Ok(slot)
            }
        }
    }

    // Keeps the join handle around for the shutdown.
    pub fn attach(&self, slot: &TaskSlot, handle: JoinHandle<()>) {
        let mut guard = slot.handle.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(handle);
    }

    // Called by the task itself when it exits.
    pub fn release(&self, key: &GiveawayKey, generation: Uuid) {
        self.tasks
            .remove_if(key, |_, slot| slot.generation == generation);
    }

    // Asks the task to stop at its next suspension point.
    pub fn stop(&self, key: &GiveawayKey) -> bool {
        match self.tasks.get(key) {
            Some(slot) => {
                slot.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn running(&self) -> Vec<RunningTask> {
        let mut running = self
            .tasks
            .iter()
            .map(|pair| RunningTask {
                key: *pair.key(),
                started_at: pair.value().started_at,
                last_refresh: pair.value().last_refresh.load(),
                last_urgency: pair.value().last_urgency.load(),
            })
            .collect::<Vec<RunningTask>>();
        running.sort_by_key(|task| task.key);
        running
    }

    #[cfg(test)]
    pub fn take_handle(&self, key: &GiveawayKey) -> Option<JoinHandle<()>> {
        let slot = self.tasks.get(key)?.value().clone();
        let mut guard = slot.handle.lock().unwrap_or_else(PoisonError::into_inner);
        guard.take()
    }

    // Takes the handles of every task, so they can be awaited.
    pub fn take_handles(&self) -> Vec<JoinHandle<()>> {
        self.tasks
            .iter()
            .filter_map(|pair| {
                let mut guard = pair
                    .value()
                    .handle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                guard.take()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serenity::model::id::{GuildId, MessageId};
    use tokio_util::sync::CancellationToken;

    use crate::commands::giveaway::models::{GiveawayKey, Urgency};
    use crate::error::Error;
    use crate::state::TaskRegistry;

    fn get_key(message_id: u64) -> GiveawayKey {
        GiveawayKey::new(GuildId::new(1), MessageId::new(message_id))
    }

    #[test]
    fn test_read_an_new_state() {
        let registry = TaskRegistry::new();

        assert_eq!(registry.len(), 0);
        assert_eq!(registry.running().is_empty(), true);
    }

    #[test]
    fn test_get_error_for_second_task_on_the_same_giveaway() {
        let registry = TaskRegistry::new();
        registry
            .bind(get_key(1), CancellationToken::new(), Utc::now())
            .unwrap();

        let result = registry.bind(get_key(1), CancellationToken::new(), Utc::now());
        assert_eq!(result.unwrap_err(), Error::AlreadyRunning(1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_release_only_removes_own_generation() {
        let registry = TaskRegistry::new();
        let first = registry
            .bind(get_key(1), CancellationToken::new(), Utc::now())
            .unwrap();
        registry.release(&get_key(1), first.generation());

        let second = registry
            .bind(get_key(1), CancellationToken::new(), Utc::now())
            .unwrap();
        // A late exit of the first task must not unbind the second one.
        registry.release(&get_key(1), first.generation());
        assert_eq!(registry.len(), 1);

        registry.release(&get_key(1), second.generation());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_stop_cancels_the_token() {
        let registry = TaskRegistry::new();
        let token = CancellationToken::new();
        registry.bind(get_key(1), token.clone(), Utc::now()).unwrap();

        assert_eq!(registry.stop(&get_key(1)), true);
        assert_eq!(token.is_cancelled(), true);
        assert_eq!(registry.stop(&get_key(2)), false);
    }

    #[test]
    fn test_running_reports_last_refresh() {
        let registry = TaskRegistry::new();
        let slot = registry
            .bind(get_key(1), CancellationToken::new(), Utc::now())
            .unwrap();
        let at = Utc::now();
        slot.observe_refresh(at, Urgency::Caution);

        let running = registry.running();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].last_refresh, Some(at));
        assert_eq!(running[0].last_urgency, Some(Urgency::Caution));
    }
}
