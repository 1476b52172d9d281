// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::{Future, FutureExt};
use tracing::debug;

use crate::instant::{get_now, Instant};

type Flight<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

struct InFlight<V, E> {
    id: u64,
    started: Instant,
    flight: Flight<V, E>,
}

/// A keyed cache whose misses are populated at most once at a time per key.
///
/// Populated values are served under a read lock. On a miss (no value, or a
/// value the caller's `accept` rejects) the first caller starts `populate` and
/// registers it as the key's in-flight population; everyone else arriving
/// for that key before it finishes awaits the same shared future and gets
/// the same result, error included.
///
/// The populated value is stored by the shared future itself, so it lands in
/// the cache even if the caller who started it has since gone away, as long
/// as someone is still waiting. Locks are never held across an `.await`.
///
/// A flight whose waiters all went away stays registered and is resumed by
/// the next caller. With `with_flight_deadline`, a flight registered longer
/// ago than the deadline is replaced by a fresh one instead, since whatever
/// timeout it carried has already run out.
pub struct SingleFlightCache<K, V, E> {
    inner: Arc<Inner<K, V, E>>,
    flight_deadline: Option<Duration>,
}

struct Inner<K, V, E> {
    values: RwLock<HashMap<K, V>>,
    in_flight: Mutex<HashMap<K, InFlight<V, E>>>,
    next_flight_id: AtomicU64,
}

impl<K, V, E> Default for SingleFlightCache<K, V, E> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                values: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                next_flight_id: AtomicU64::new(0),
            }),
            flight_deadline: None,
        }
    }
}

impl<K, V, E> SingleFlightCache<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Don't join flights registered more than `deadline` ago.
    pub fn with_flight_deadline(mut self, deadline: Duration) -> Self {
        self.flight_deadline = Some(deadline);
        self
    }

    /// The cached value for `key`, acceptable or not.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.inner
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Drop the cached value for `key`, so the next `get_or_populate` repopulates it.
    /// A population already in flight is left alone.
    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.inner
            .values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Whether a population for `key` is currently running.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Return the cached value for `key` if `accept` likes it, otherwise join
    /// (or start) the single in-flight population for `key`.
    ///
    /// `populate` is only called when this caller starts a new flight. A value
    /// produced by a flight is returned to its waiters without consulting
    /// `accept` again.
    pub async fn get_or_populate<F, Fut>(
        &self,
        key: K,
        accept: impl Fn(&V) -> bool,
        populate: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if let Some(value) = self.peek(&key).filter(|v| accept(v)) {
            return Ok(value);
        }

        let flight = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            // A flight may have landed between the check above and taking the lock.
            // Flights store their value before deregistering, so checking again
            // under the lock can't miss one.
            if let Some(value) = self.peek(&key).filter(|v| accept(v)) {
                return Ok(value);
            }

            match in_flight.get(&key) {
                Some(entry) if !self.is_overdue(entry) => entry.flight.clone(),
                existing => {
                    if existing.is_some() {
                        debug!("single_flight: replacing an overdue flight");
                    }
                    let id = self.inner.next_flight_id.fetch_add(1, Ordering::Relaxed);
                    let flight =
                        Self::start_flight(Arc::downgrade(&self.inner), key.clone(), id, populate());
                    in_flight.insert(
                        key,
                        InFlight {
                            id,
                            started: get_now(),
                            flight: flight.clone(),
                        },
                    );
                    flight
                }
            }
        };

        flight.await
    }

    fn is_overdue(&self, entry: &InFlight<V, E>) -> bool {
        self.flight_deadline
            .is_some_and(|deadline| get_now().duration_since(entry.started) >= deadline)
    }

    fn start_flight<Fut>(inner: Weak<Inner<K, V, E>>, key: K, id: u64, populate: Fut) -> Flight<V, E>
    where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        async move {
            let result = populate.await;
            if let Some(inner) = inner.upgrade() {
                if let Ok(value) = &result {
                    inner
                        .values
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(key.clone(), value.clone());
                }
                let mut in_flight = inner
                    .in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                // a replacement flight may own the slot by now
                if in_flight.get(&key).is_some_and(|entry| entry.id == id) {
                    in_flight.remove(&key);
                }
            }
            result
        }
        .boxed()
        .shared()
    }
}
