//! Expiry index for GTT orders.
//!
//! Buckets are keyed by expiry timestamp in a `BTreeMap`, so an expiry sweep
//! only visits the buckets that are due. Within a bucket IDs are kept sorted,
//! which makes sweep output independent of insertion history.

use std::collections::{BTreeMap, BTreeSet};

use tickbook_types::{OrderId, Timestamp};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiringOrders {
    buckets: BTreeMap<Timestamp, BTreeSet<OrderId>>,
    len: usize,
}

impl ExpiringOrders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: OrderId, expires_at: Timestamp) {
        if self.buckets.entry(expires_at).or_default().insert(id) {
            self.len += 1;
        }
    }

    /// Returns `false` if the order was not indexed under `expires_at`.
    pub fn remove(&mut self, id: &OrderId, expires_at: Timestamp) -> bool {
        let Some(bucket) = self.buckets.get_mut(&expires_at) else {
            return false;
        };
        let removed = bucket.remove(id);
        if bucket.is_empty() {
            self.buckets.remove(&expires_at);
        }
        if removed {
            self.len -= 1;
        }
        removed
    }

    /// Remove and return every order with `expires_at <= now`, in ascending
    /// expiry order.
    pub fn expire(&mut self, now: Timestamp) -> Vec<OrderId> {
        let due = match now.0.checked_add(1) {
            Some(next) => {
                let later = self.buckets.split_off(&Timestamp(next));
                std::mem::replace(&mut self.buckets, later)
            }
            None => std::mem::take(&mut self.buckets),
        };

        let ids: Vec<OrderId> = due.into_values().flatten().collect();
        self.len -= ids.len();
        ids
    }

    #[must_use]
    pub fn contains(&self, id: &OrderId, expires_at: Timestamp) -> bool {
        self.buckets
            .get(&expires_at)
            .is_some_and(|bucket| bucket.contains(id))
    }

    /// Earliest pending expiry.
    #[must_use]
    pub fn next_expiry(&self) -> Option<Timestamp> {
        self.buckets.keys().next().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
