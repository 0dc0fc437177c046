//! Single-flight registry for evaluations.
//!
//! The first caller for a fingerprint becomes the leader: its computation is
//! spawned onto the runtime and registered as in flight. Callers arriving
//! while it runs attach to the same completion slot instead of computing
//! again. The computation runs detached from every caller, so a caller that
//! is cancelled or times out only stops waiting; the others still get the
//! result. Once the computation finishes (or panics) the registry entry is
//! removed and the next call computes afresh.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use super::Fingerprint;

type Slot<T> = watch::Receiver<Option<T>>;

/// The computing task ended without producing a value.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("coalesced computation ended without a result")]
pub struct ComputationAbandoned;

pub struct Coalescer<T> {
    in_flight: Arc<DashMap<Fingerprint, Slot<T>>>,
}

impl<T> Clone for Coalescer<T> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<T> Default for Coalescer<T> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
        }
    }
}

impl<T> Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `compute` for `fingerprint` unless a run is already in flight, in
    /// which case wait for that run's value instead.
    pub async fn run<F, Fut>(&self, fingerprint: Fingerprint, compute: F) -> Result<T, ComputationAbandoned>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send + 'static,
    {
        // Check-and-register happens under the shard lock of the map entry.
        let (mut slot, sender) = match self.in_flight.entry(fingerprint.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), None),
            Entry::Vacant(entry) => {
                let (sender, slot) = watch::channel(None);
                entry.insert(slot.clone());
                (slot, Some(sender))
            }
        };

        match sender {
            Some(sender) => {
                debug!(fingerprint = %fingerprint, "starting evaluation");
                let guard = InFlightGuard {
                    fingerprint,
                    in_flight: Arc::clone(&self.in_flight),
                };
                let work = compute();
                tokio::spawn(async move {
                    let value = work.await;
                    // Deregister before publishing so later callers recompute
                    drop(guard);
                    let _ = sender.send(Some(value));
                });
            }
            None => debug!(fingerprint = %fingerprint, "joining in-flight evaluation"),
        }

        let value = slot
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|value| (*value).clone());

        value.ok_or(ComputationAbandoned)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

// Removes the registry entry when the computing task finishes or unwinds.
struct InFlightGuard<T> {
    fingerprint: Fingerprint,
    in_flight: Arc<DashMap<Fingerprint, Slot<T>>>,
}

impl<T> Drop for InFlightGuard<T> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.fingerprint);
    }
}
