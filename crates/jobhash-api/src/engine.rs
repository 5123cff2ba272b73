use bytes::Bytes;
use jobhash::{Algorithm, JobId, RequestMetrics, Store};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

// Lets HTTP responses already being written flush before worker channels
// close. Correctness does not depend on it.
const GRACE_INTERVAL: Duration = Duration::from_millis(100);

/// One unit of work handed from the dispatcher to a hashing worker.
struct HashRequest {
    id: JobId,
    password: Bytes,
    reply: oneshot::Sender<()>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("server is shutting down")]
    ShuttingDown,
    #[error("could not generate a job ID")]
    IdGeneration(#[source] rand::Error),
    #[error("hashing worker went away before replying")]
    WorkerLost,
}

/// Central dispatch engine.
///
/// Owns a fixed pool of hashing workers fed by bounded per-worker channels
/// with deterministic routing by job ID, the sharded digest store, request
/// metrics, and the accepting -> draining -> stopped lifecycle.
pub struct Engine {
    store: Store,
    metrics: RequestMetrics,
    senders: Mutex<Vec<mpsc::Sender<HashRequest>>>,
    alive: AtomicBool,
    tasks: TaskTracker,
    terminated: CancellationToken,
    delay: Duration,
}

impl Engine {
    /// Build the engine and launch its worker pool.
    ///
    /// `concurrency` fixes both the number of workers and the number of
    /// store shards. `delay` postpones each persistence task, during which
    /// a submitted job's digest is not yet retrievable.
    pub fn start(concurrency: usize, algorithm: Algorithm, delay: Duration) -> Arc<Self> {
        let concurrency = concurrency.max(1);

        let mut senders = Vec::with_capacity(concurrency);
        let mut receivers = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            // Capacity 1: a sender parks until its worker is ready, which
            // serializes competing submissions routed to the same worker.
            let (tx, rx) = mpsc::channel(1);
            senders.push(tx);
            receivers.push(rx);
        }

        let engine = Arc::new(Self {
            store: Store::new(concurrency),
            metrics: RequestMetrics::new(),
            senders: Mutex::new(senders),
            alive: AtomicBool::new(true),
            tasks: TaskTracker::new(),
            terminated: CancellationToken::new(),
            delay,
        });

        // The tracker registers each worker before it is spawned, so a
        // shutdown issued immediately after start() still waits for them.
        for (index, rx) in receivers.into_iter().enumerate() {
            let worker = Arc::clone(&engine);
            engine
                .tasks
                .spawn(async move { worker.run_worker(index, rx, algorithm).await });
        }

        engine
    }

    /// Dispatch one hashing submission and await its worker's reply.
    ///
    /// The returned ID is the handle for later retrieval; the digest itself
    /// becomes visible only once the delayed persistence task runs.
    pub async fn submit(&self, password: Bytes) -> Result<JobId, Error> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let id = JobId::new().map_err(Error::IdGeneration)?;

        let sender = {
            let senders = self.senders.lock().unwrap();
            if senders.is_empty() {
                return Err(Error::ShuttingDown);
            }
            senders[id.route_prefix() as usize % senders.len()].clone()
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(HashRequest {
                id,
                password,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::WorkerLost)?;
        reply_rx.await.map_err(|_| Error::WorkerLost)?;

        Ok(id)
    }

    /// Look up a persisted digest.
    pub fn lookup(&self, id: &JobId) -> Option<Bytes> {
        self.store.load(id)
    }

    pub fn metrics(&self) -> &RequestMetrics {
        &self.metrics
    }

    /// True while new submissions are accepted.
    pub fn is_accepting(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Flip accepting -> draining. Returns false if the engine was already
    /// draining, in which case the caller should reject the request.
    pub fn begin_shutdown(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }

    /// Drain the engine: reject new submissions, let in-flight requests and
    /// their delayed persistence tasks complete, then signal termination.
    /// Idempotent.
    pub async fn stop(&self) {
        self.alive.store(false, Ordering::SeqCst);
        tokio::time::sleep(GRACE_INTERVAL).await;

        // Dropping every sender closes each worker channel; a worker exits
        // its loop after finishing the item it already received.
        self.senders.lock().unwrap().clear();

        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!("all workers and persistence tasks drained");

        self.terminated.cancel();
    }

    /// Token cancelled once the engine has fully stopped, at which point
    /// the listeners should go down too.
    pub fn terminated(&self) -> CancellationToken {
        self.terminated.clone()
    }

    async fn run_worker(
        self: Arc<Self>,
        index: usize,
        mut requests: mpsc::Receiver<HashRequest>,
        algorithm: Algorithm,
    ) {
        let mut digester = algorithm.digester();
        tracing::debug!(worker = index, "hashing worker started");

        while let Some(HashRequest {
            id,
            password,
            reply,
        }) = requests.recv().await
        {
            let digest = digester.digest(&password);

            // Persistence runs detached from the request, but on the tracker
            // so that shutdown waits for outstanding writes.
            let persist = Arc::clone(&self);
            self.tasks
                .spawn(async move { persist.persist(id, digest).await });

            if reply.send(()).is_err() {
                tracing::warn!(worker = index, job = %id, "request abandoned before reply");
            }
        }

        tracing::debug!(worker = index, "hashing worker drained");
    }

    /// Delayed write of a computed digest into the store. By the time this
    /// runs the HTTP response has already been sent, so completion is only
    /// logged.
    async fn persist(&self, id: JobId, digest: Bytes) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.store.store(id, digest);
        tracing::debug!(job = %id, "digest persisted");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;

    async fn await_digest(engine: &Engine, id: &JobId) -> Bytes {
        for _ in 0..500 {
            if let Some(digest) = engine.lookup(id) {
                return digest;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("digest for {id} never persisted");
    }

    #[tokio::test]
    async fn test_submit_hashes_and_persists() {
        let engine = Engine::start(4, Algorithm::Sha512, Duration::ZERO);

        let id = engine.submit(Bytes::from_static(b"angrymonkey")).await.unwrap();
        let digest = await_digest(&engine, &id).await;

        assert_eq!(
            base64::encode(&digest),
            "z6yJ38KDjxDBJvY/AdFslg5esHHYh4/kEYQ80xQnS1aTGesQBjSh61UisP8GIU4Xv6iPKtMS0gbH9KcS5my3MQ==",
        );
    }

    #[tokio::test]
    async fn test_persistence_respects_delay() {
        let engine = Engine::start(2, Algorithm::Sha512, Duration::from_millis(500));

        let id = engine.submit(Bytes::from_static(b"hunter2")).await.unwrap();
        // The reply arrives before persistence; the digest is not yet
        // visible.
        assert_eq!(engine.lookup(&id), None);
        await_digest(&engine, &id).await;
    }

    #[tokio::test]
    async fn test_concurrent_submissions_yield_distinct_ids() {
        let engine = Engine::start(4, Algorithm::Sha512, Duration::ZERO);

        let mut handles = Vec::new();
        for task in 0..32 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for i in 0..8 {
                    let password = Bytes::from(format!("password-{task}-{i}"));
                    ids.push(engine.submit(password).await.unwrap());
                }
                ids
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "collision on {id}");
            }
        }
        assert_eq!(seen.len(), 32 * 8);

        for id in &seen {
            await_digest(&engine, id).await;
        }
    }

    #[tokio::test]
    async fn test_stop_rejects_new_work_and_drains() {
        let engine = Engine::start(2, Algorithm::Sha512, Duration::from_millis(200));

        let id = engine.submit(Bytes::from_static(b"in flight")).await.unwrap();

        assert!(engine.begin_shutdown());
        assert!(!engine.begin_shutdown(), "second shutdown must be rejected");

        let stopper = Arc::clone(&engine);
        tokio::spawn(async move { stopper.stop().await });

        assert!(matches!(
            engine.submit(Bytes::from_static(b"too late")).await,
            Err(Error::ShuttingDown)
        ));

        // stop() waits out the in-flight persistence before terminating.
        tokio::time::timeout(Duration::from_secs(5), engine.terminated().cancelled())
            .await
            .expect("engine failed to drain");
        assert!(engine.lookup(&id).is_some());
    }
}
