//! Resource Pool Implementation
//!
//! Cap enforcement rides on one tokio semaphore per type key: construction
//! and waiting share the same permit budget, so the check-then-act race
//! between "build a new instance" and "wait for a returned one" cannot
//! overshoot the cap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;

use crate::pool::error::{PoolError, PoolResult};
use crate::pool::statistics::{PoolStatistics, TypePoolStats};

/// Outcome of a bounded acquisition attempt
#[derive(Debug)]
pub enum Acquire<T> {
    /// An instance was obtained within the timeout
    Acquired(PoolEntry<T>),
    /// The cap was reached and nothing was returned in time
    Timeout,
}

/// A pooled instance. Exclusively owned by the acquiring call path until
/// released back to the pool.
#[derive(Debug)]
pub struct PoolEntry<T> {
    id: u64,
    type_key: String,
    resource: T,
}

impl<T> PoolEntry<T> {
    /// Process-lifetime-unique entry id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Type key of the owning pool slot
    pub fn type_key(&self) -> &str {
        &self.type_key
    }

    pub fn resource(&self) -> &T {
        &self.resource
    }

    pub fn resource_mut(&mut self) -> &mut T {
        &mut self.resource
    }
}

struct TypeCounters {
    constructed: AtomicUsize,
    active: AtomicUsize,
    gets: AtomicU64,
    timeouts: AtomicU64,
    wait_ms: AtomicU64,
}

struct PoolType<T> {
    key: String,
    max_instances: usize,
    factory: Box<dyn Fn(u64) -> T + Send + Sync>,
    semaphore: Semaphore,
    idle: Mutex<Vec<PoolEntry<T>>>,
    counters: TypeCounters,
}

/// Bounded pool of typed, reusable resource instances
pub struct ResourcePool<T> {
    types: RwLock<HashMap<String, Arc<PoolType<T>>>>,
    next_entry_id: AtomicU64,
}

impl<T> Default for ResourcePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResourcePool<T> {
    pub fn new() -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
            next_entry_id: AtomicU64::new(1),
        }
    }

    /// Register a type key with an instance cap and a factory used for
    /// grow-on-demand construction. Fails if the key is already configured.
    pub fn configure<F>(&self, key: &str, max_instances: usize, factory: F) -> PoolResult<()>
    where
        F: Fn(u64) -> T + Send + Sync + 'static,
    {
        if max_instances == 0 {
            return Err(PoolError::InvalidCapacity(key.to_string()));
        }

        let mut types = self.types.write();
        if types.contains_key(key) {
            return Err(PoolError::AlreadyRegistered(key.to_string()));
        }

        types.insert(
            key.to_string(),
            Arc::new(PoolType {
                key: key.to_string(),
                max_instances,
                factory: Box::new(factory),
                semaphore: Semaphore::new(max_instances),
                idle: Mutex::new(Vec::with_capacity(max_instances)),
                counters: TypeCounters {
                    constructed: AtomicUsize::new(0),
                    active: AtomicUsize::new(0),
                    gets: AtomicU64::new(0),
                    timeouts: AtomicU64::new(0),
                    wait_ms: AtomicU64::new(0),
                },
            }),
        );

        log::debug!("Configured pool type '{}' with cap {}", key, max_instances);
        Ok(())
    }

    /// Acquire an instance of the given type, waiting up to `timeout` when
    /// the cap is reached. Timeout is a value, not an error; unknown type
    /// keys are errors.
    pub async fn acquire(&self, key: &str, timeout: Duration) -> PoolResult<Acquire<T>> {
        let pool_type = self
            .types
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| PoolError::UnknownType(key.to_string()))?;

        let start = Instant::now();
        let permit = match tokio::time::timeout(timeout, pool_type.semaphore.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                // Semaphore closed; only happens during teardown
                pool_type.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                return Ok(Acquire::Timeout);
            }
            Err(_) => {
                pool_type.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                log::trace!("Pool '{}' acquire timed out after {:?}", key, timeout);
                return Ok(Acquire::Timeout);
            }
        };
        // Permit is restored by release(), not by drop
        permit.forget();

        let entry = {
            let mut idle = pool_type.idle.lock();
            idle.pop()
        };

        let entry = match entry {
            Some(entry) => entry,
            None => {
                // Holding a permit guarantees constructed < max here
                let id = self.next_entry_id.fetch_add(1, Ordering::Relaxed);
                pool_type.counters.constructed.fetch_add(1, Ordering::Relaxed);
                log::debug!("Pool '{}' constructing instance {}", key, id);
                PoolEntry {
                    id,
                    type_key: pool_type.key.clone(),
                    resource: (pool_type.factory)(id),
                }
            }
        };

        pool_type.counters.active.fetch_add(1, Ordering::Relaxed);
        pool_type.counters.gets.fetch_add(1, Ordering::Relaxed);
        pool_type
            .counters
            .wait_ms
            .fetch_add(start.elapsed().as_millis() as u64, Ordering::Relaxed);

        Ok(Acquire::Acquired(entry))
    }

    /// Return an instance to its type's idle set. Releasing an entry whose
    /// type was never registered is a logged no-op; it can legitimately
    /// happen during pool reconfiguration.
    pub fn release(&self, entry: PoolEntry<T>) {
        let pool_type = self.types.read().get(entry.type_key()).cloned();

        match pool_type {
            Some(pool_type) => {
                pool_type.counters.active.fetch_sub(1, Ordering::Relaxed);
                pool_type.idle.lock().push(entry);
                pool_type.semaphore.add_permits(1);
            }
            None => {
                log::warn!(
                    "Released pool entry {} for unregistered type '{}'; discarding",
                    entry.id(),
                    entry.type_key()
                );
            }
        }
    }

    /// Instances of one type currently acquired
    pub fn active_count(&self, key: &str) -> usize {
        self.types
            .read()
            .get(key)
            .map(|t| t.counters.active.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Instances currently acquired across all types
    pub fn total_active(&self) -> usize {
        self.types
            .read()
            .values()
            .map(|t| t.counters.active.load(Ordering::Relaxed))
            .sum()
    }

    /// Snapshot of per-type and aggregate load figures
    pub fn statistics(&self) -> PoolStatistics {
        let per_type = self
            .types
            .read()
            .values()
            .map(|t| TypePoolStats {
                type_key: t.key.clone(),
                max_instances: t.max_instances,
                constructed: t.counters.constructed.load(Ordering::Relaxed),
                active: t.counters.active.load(Ordering::Relaxed),
                idle: t.idle.lock().len(),
                total_gets: t.counters.gets.load(Ordering::Relaxed),
                total_timeouts: t.counters.timeouts.load(Ordering::Relaxed),
                total_wait_ms: t.counters.wait_ms.load(Ordering::Relaxed),
            })
            .collect();
        PoolStatistics::aggregate(per_type)
    }
}
