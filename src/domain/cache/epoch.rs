//! Invalidation epoch folded into every normalized key

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use super::clock::Clock;
use crate::domain::DomainError;

/// Where a shared backend records its current generation.
///
/// Drivers over a backend that several processes reach (memcached, Redis,
/// SQL tables) implement this on a borrowed connection so that every
/// driver instance agrees on the generation before touching a key.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EpochStore: Send {
    /// The recorded generation. An absent or unreadable record is `None`.
    async fn load(&mut self) -> Result<Option<u64>, DomainError>;

    /// Records `value` unless something is already recorded. Returns
    /// whether the write happened.
    async fn store_if_absent(&mut self, value: u64) -> Result<bool, DomainError>;

    /// Records `value` unconditionally
    async fn store(&mut self, value: u64) -> Result<(), DomainError>;

    /// Atomically advances the recorded generation and returns it. `None`
    /// when nothing is recorded.
    async fn increment(&mut self) -> Result<Option<u64>, DomainError>;
}

/// Generation marker folded into every key a driver writes.
///
/// Bumping the epoch changes every normalized key, so entries written under
/// an older epoch can no longer be reached and are left for the backend to
/// evict. Seeds come from wall-clock milliseconds, which keeps a fresh
/// generation above anything handed out in an earlier second.
///
/// In-process drivers own their epoch outright. Drivers over a shared
/// backend treat the local value as a cache of the one in their
/// [`EpochStore`] and [`sync`](Self::sync) it before each operation.
#[derive(Debug, Clone)]
pub struct InvalidationEpoch {
    current: Arc<AtomicU64>,
}

impl InvalidationEpoch {
    pub fn new(clock: &dyn Clock) -> Self {
        Self::starting_at(seed(clock))
    }

    pub fn starting_at(value: u64) -> Self {
        Self {
            current: Arc::new(AtomicU64::new(value)),
        }
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Moves to a new local generation and returns it
    pub fn bump(&self) -> u64 {
        let next = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(epoch = next, "Invalidation epoch bumped");
        next
    }

    /// Takes over the generation recorded by a shared backend
    pub fn adopt(&self, value: u64) {
        self.current.store(value, Ordering::SeqCst);
    }

    /// A generation above this instance's and above every earlier seed
    fn fresh(&self, clock: &dyn Clock) -> u64 {
        (self.current() + 1).max(seed(clock))
    }

    /// Adopts the generation recorded in `store`, recording a fresh one
    /// when the record is missing or unreadable.
    ///
    /// A lost record never brings an older generation back: the
    /// replacement is newer than anything seeded before it.
    pub async fn sync<S>(&self, store: &mut S, clock: &dyn Clock) -> Result<u64, DomainError>
    where
        S: EpochStore + ?Sized,
    {
        if let Some(stored) = store.load().await? {
            self.adopt(stored);
            return Ok(stored);
        }

        let fresh = self.fresh(clock);
        if !store.store_if_absent(fresh).await? {
            // lost a race to another driver, or the record is garbage
            if let Some(stored) = store.load().await? {
                self.adopt(stored);
                return Ok(stored);
            }
            store.store(fresh).await?;
        }

        debug!(epoch = fresh, "Recorded new invalidation epoch");
        self.adopt(fresh);
        Ok(fresh)
    }

    /// Bumps the generation recorded in `store` for every driver sharing it
    pub async fn advance<S>(&self, store: &mut S, clock: &dyn Clock) -> Result<u64, DomainError>
    where
        S: EpochStore + ?Sized,
    {
        match store.increment().await? {
            Some(next) => {
                debug!(epoch = next, "Shared invalidation epoch bumped");
                self.adopt(next);
                Ok(next)
            }
            // a fresh record is itself newer than the lost one
            None => self.sync(store, clock).await,
        }
    }
}

fn seed(clock: &dyn Clock) -> u64 {
    clock.now().max(0) as u64 * 1_000
}

/// Parses a recorded generation. Anything else reads as absent.
pub fn parse_epoch(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|value| *value > 0)
}
