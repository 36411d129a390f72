use std::collections::{HashMap, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};

use parking_lot::Mutex;

use crate::outcome::TaskOutcome;

/// Sharded outcome cache keyed by task id.
///
/// The shard is chosen by hashing the id, so contention is spread across
/// `shard_count` locks. Each shard holds at most `capacity_per_shard`
/// entries, evicting oldest-inserted first. Reads pop: an outcome is handed
/// out once and then gone.
pub(crate) struct ShardedResultCache {
    shards: Vec<Mutex<Shard>>,
    capacity_per_shard: usize,
}

#[derive(Default)]
struct Shard {
    entries: HashMap<String, TaskOutcome>,
    // Insertion order for eviction. Keys already taken linger here until
    // eviction skips past them.
    order: VecDeque<String>,
}

impl ShardedResultCache {
    pub(crate) fn new(shard_count: usize, capacity_per_shard: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(Shard::default())).collect(),
            capacity_per_shard: capacity_per_shard.max(1),
        }
    }

    fn shard_for(&self, task_id: &str) -> &Mutex<Shard> {
        let mut hasher = DefaultHasher::new();
        task_id.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % self.shards.len()]
    }

    /// Insert an outcome, evicting the shard's oldest entries past capacity.
    pub(crate) fn put(&self, outcome: TaskOutcome) {
        let key = outcome.task_id.clone();
        let mut shard = self.shard_for(&key).lock();
        if shard.entries.insert(key.clone(), outcome).is_none() {
            shard.order.push_back(key);
        }
        while shard.entries.len() > self.capacity_per_shard {
            let Some(oldest) = shard.order.pop_front() else {
                break;
            };
            shard.entries.remove(&oldest);
        }
    }

    /// Remove and return the outcome for `task_id`, if cached.
    pub(crate) fn take(&self, task_id: &str) -> Option<TaskOutcome> {
        self.shard_for(task_id).lock().entries.remove(task_id)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().entries.len()).sum()
    }
}
