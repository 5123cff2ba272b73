use crate::JobId;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory map from job ID to digest bytes, using granular locking to
/// keep contention low.
///
/// Entries are routed to a shard by the little-endian prefix of the ID, the
/// same prefix the worker pool routes on, so a request typically touches
/// one shard. Ideally the shard count matches the hardware concurrency of
/// the machine.
///
/// Entries are never evicted; memory grows linearly with stored jobs.
pub struct Store {
    shards: Vec<Mutex<HashMap<JobId, Bytes>>>,
}

impl Store {
    /// Create a store with `shards` independently locked shards.
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::default()).collect(),
        }
    }

    fn shard(&self, id: &JobId) -> &Mutex<HashMap<JobId, Bytes>> {
        &self.shards[id.route_prefix() as usize % self.shards.len()]
    }

    /// Insert or overwrite the digest for `id`. Within a shard the last
    /// writer wins; writes to different shards never contend.
    pub fn store(&self, id: JobId, digest: Bytes) {
        self.shard(&id).lock().unwrap().insert(id, digest);
    }

    /// Fetch the digest for `id`, or None if it was never stored.
    pub fn load(&self, id: &JobId) -> Option<Bytes> {
        self.shard(id).lock().unwrap().get(id).cloned()
    }
}
