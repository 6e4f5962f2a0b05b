//! Pool of idle worker processes
//!
//! Starting a worker is expensive, so finished workers are kept around and
//! handed to the next build that needs exactly the same toolchain: same
//! options string and the very same installation object. Workers are pooled
//! per node; when a node disconnects its pool is dropped with it.
//!
//! A worker is owned by exactly one party at a time. [`ProcessCache::acquire`]
//! removes it from the pool before returning it and
//! [`ProcessCache::release`] takes it back by value.

use crate::channel::{Channel, ChannelId, Node};
use crate::error::MavenResult;
use crate::listener::{BuildListener, OutputRedirector};
use crate::orchestration::MavenInstallation;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default number of idle workers kept per node
pub const DEFAULT_CAPACITY: usize = 1;

/// Default number of reuses before a worker is retired
pub const DEFAULT_MAX_AGE: u32 = 5;

/// How long a liveness check may take before the worker is given up on
const PING_TIMEOUT: Duration = Duration::from_secs(30);

/// Starts new worker processes for the cache
#[async_trait]
pub trait ProcessFactory: Send + Sync {
    /// Toolchain options the worker is started with
    fn options(&self) -> Option<&str>;

    /// Installation the worker runs; compared by identity
    fn installation(&self) -> Option<Arc<MavenInstallation>>;

    /// Launch a fresh worker whose console goes to `out`.
    ///
    /// Configuration problems are reported to `listener`.
    async fn new_process(
        &self,
        listener: &dyn BuildListener,
        out: OutputRedirector,
    ) -> MavenResult<Arc<dyn Channel>>;
}

/// A worker process together with what it was started with
pub struct WorkerProcess {
    channel: Arc<dyn Channel>,
    options: String,
    installation: Option<Arc<MavenInstallation>>,
    output: OutputRedirector,
    age: u32,
    node: ChannelId,
}

impl WorkerProcess {
    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    pub fn options(&self) -> &str {
        &self.options
    }

    pub fn installation(&self) -> Option<&Arc<MavenInstallation>> {
        self.installation.as_ref()
    }

    /// Number of builds this worker was reused for
    pub fn age(&self) -> u32 {
        self.age
    }

    pub fn output(&self) -> &OutputRedirector {
        &self.output
    }

    fn matches(&self, options: &str, installation: Option<&Arc<MavenInstallation>>) -> bool {
        if self.options != options {
            return false;
        }
        match (&self.installation, installation) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Close the worker for good
    pub async fn discard(self) {
        debug!("Discarding worker {}", self.channel.name());
        if let Err(e) = self.channel.close().await {
            warn!("Failed to close worker {}: {}", self.channel.name(), e);
        }
    }
}

impl std::fmt::Debug for WorkerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerProcess")
            .field("channel", &self.channel.name())
            .field("options", &self.options)
            .field("age", &self.age)
            .finish_non_exhaustive()
    }
}

/// Idle workers of one node, oldest first
#[derive(Default)]
struct Partition {
    idle: tokio::sync::Mutex<VecDeque<WorkerProcess>>,
}

struct Inner {
    capacity: usize,
    max_age: u32,
    partitions: Mutex<HashMap<ChannelId, Arc<Partition>>>,
}

impl Inner {
    fn partitions(&self) -> std::sync::MutexGuard<'_, HashMap<ChannelId, Arc<Partition>>> {
        match self.partitions.lock() {
            Ok(p) => p,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Cache of idle worker processes, partitioned by node
#[derive(Clone)]
pub struct ProcessCache {
    inner: Arc<Inner>,
}

impl ProcessCache {
    /// Cache keeping up to `capacity` idle workers per node, each reused at
    /// most `max_age` times
    pub fn new(capacity: usize, max_age: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                max_age,
                partitions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn max_age(&self) -> u32 {
        self.inner.max_age
    }

    /// Partition of `node`, created on first use
    fn partition(&self, node: &Node) -> Arc<Partition> {
        let id = node.id();
        let (partition, created) = {
            let mut partitions = self.inner.partitions();
            match partitions.get(&id) {
                Some(p) => (Arc::clone(p), false),
                None => {
                    let p = Arc::new(Partition::default());
                    partitions.insert(id, Arc::clone(&p));
                    (p, true)
                }
            }
        };

        // registered outside the map lock: a closed node runs the hook right away
        if created {
            let inner: Weak<Inner> = Arc::downgrade(&self.inner);
            node.on_close(Box::new(move |id| {
                if let Some(inner) = inner.upgrade() {
                    if inner.partitions().remove(&id).is_some() {
                        debug!("Dropped worker pool of closed node {}", id);
                    }
                }
            }));
        }
        partition
    }

    /// Get a worker matching `factory`'s toolchain, reusing an idle one when
    /// possible.
    ///
    /// Idle workers that fail the liveness check are discarded and the search
    /// goes on. A fresh worker is not pooled until it is released.
    pub async fn acquire(
        &self,
        node: &Node,
        listener: &dyn BuildListener,
        factory: &dyn ProcessFactory,
    ) -> MavenResult<WorkerProcess> {
        let options = factory.options().unwrap_or_default().to_string();
        let installation = factory.installation();
        let partition = self.partition(node);

        loop {
            let candidate = {
                let mut idle = partition.idle.lock().await;
                idle.iter()
                    .position(|p| p.matches(&options, installation.as_ref()))
                    .and_then(|i| idle.remove(i))
            };
            let Some(mut process) = candidate else {
                break;
            };

            match tokio::time::timeout(PING_TIMEOUT, process.channel.ping()).await {
                Ok(Ok(())) => {
                    process.age += 1;
                    process.output.set(listener.logger());
                    info!(
                        "Reusing worker {} (age {})",
                        process.channel.name(),
                        process.age
                    );
                    return Ok(process);
                }
                Ok(Err(e)) => {
                    warn!("Cached worker {} is dead: {}", process.channel.name(), e);
                    process.discard().await;
                }
                Err(_) => {
                    warn!("Cached worker {} did not answer", process.channel.name());
                    process.discard().await;
                }
            }
        }

        debug!("No cached worker for options {:?}; launching", options);
        let output = OutputRedirector::to(listener.logger());
        let channel = factory.new_process(listener, output.clone()).await?;
        Ok(WorkerProcess {
            channel,
            options,
            installation,
            output,
            age: 0,
            node: node.id(),
        })
    }

    /// Give a worker back after a build.
    ///
    /// Old workers are discarded. Otherwise the worker goes to the back of its
    /// node's pool, evicting the oldest idle worker when the pool is full.
    pub async fn release(&self, process: WorkerProcess) {
        if process.age >= self.inner.max_age || self.inner.capacity == 0 {
            process.discard().await;
            return;
        }
        if process.channel.is_closed() {
            debug!("Worker {} is already closed", process.channel.name());
            return;
        }

        let partition = self.inner.partitions().get(&process.node).cloned();
        let Some(partition) = partition else {
            debug!("Node of worker {} is gone", process.channel.name());
            process.discard().await;
            return;
        };

        process.output.set_null();
        let evicted = {
            let mut idle = partition.idle.lock().await;
            let mut evicted = Vec::new();
            while idle.len() >= self.inner.capacity {
                match idle.pop_front() {
                    Some(old) => evicted.push(old),
                    None => break,
                }
            }
            idle.push_back(process);
            evicted
        };
        for old in evicted {
            info!("Evicting idle worker {}", old.channel.name());
            old.discard().await;
        }
    }

    /// Number of idle workers pooled for `node`
    pub async fn idle_count(&self, node: &Node) -> usize {
        let partition = self.inner.partitions().get(&node.id()).cloned();
        match partition {
            Some(p) => p.idle.lock().await.len(),
            None => 0,
        }
    }

    /// Number of nodes with a pool
    pub fn partition_count(&self) -> usize {
        self.inner.partitions().len()
    }
}

impl Default for ProcessCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_MAX_AGE)
    }
}
