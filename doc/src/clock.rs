//! Logical clocks and last-writer-wins registers.
//!
//! DESIGN
//! ======
//! Every replicated field in the shared document is an [`Lww`] register
//! stamped with a Lamport clock value plus the writing client id. Stamps
//! order deterministically: higher clock wins, client id breaks ties.
//! Wall time is never consulted, so all replicas resolve a conflicting
//! write to the same winner regardless of delivery order.

use serde::{Deserialize, Serialize};

use crate::presence::ClientId;

// =============================================================================
// STAMP
// =============================================================================

/// Logical timestamp of a single replicated write.
///
/// Derived `Ord` compares `clock` first, then `client` — exactly the
/// merge order the document relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Stamp {
    /// Lamport clock value at the time of the write.
    pub clock: u64,
    /// Writing client id, used as a deterministic tiebreak.
    pub client: ClientId,
}

// =============================================================================
// LWW REGISTER
// =============================================================================

/// Last-writer-wins register: a value plus the stamp that wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lww<T> {
    pub value: T,
    pub stamp: Stamp,
}

impl<T> Lww<T> {
    #[must_use]
    pub fn new(value: T, stamp: Stamp) -> Self {
        Self { value, stamp }
    }

    /// Overwrite in place if `stamp` wins over the current one.
    /// Returns whether the register changed. Equal stamps keep the
    /// current value (an equal stamp is the same write replayed).
    pub fn merge(&mut self, value: T, stamp: Stamp) -> bool {
        if stamp > self.stamp {
            self.value = value;
            self.stamp = stamp;
            true
        } else {
            false
        }
    }
}

impl<T: Clone> Lww<T> {
    /// Merge two registers into the winner. Commutative, associative,
    /// idempotent.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        if self.stamp >= other.stamp {
            self.clone()
        } else {
            other.clone()
        }
    }
}

// =============================================================================
// LAMPORT CLOCK
// =============================================================================

/// Monotonic Lamport clock owned by one client.
#[derive(Debug, Clone)]
pub struct LamportClock {
    client: ClientId,
    next: u64,
}

impl LamportClock {
    #[must_use]
    pub fn new(client: ClientId) -> Self {
        Self { client, next: 1 }
    }

    /// Issue a fresh stamp for a local write.
    pub fn tick(&mut self) -> Stamp {
        let stamp = Stamp { clock: self.next, client: self.client };
        self.next += 1;
        stamp
    }

    /// Fold a remote stamp into the clock so later local writes order
    /// after everything this replica has seen.
    pub fn observe(&mut self, stamp: Stamp) {
        if stamp.clock >= self.next {
            self.next = stamp.clock + 1;
        }
    }

    #[must_use]
    pub fn client(&self) -> ClientId {
        self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_order_by_clock_then_client() {
        let a = Stamp { clock: 1, client: 9 };
        let b = Stamp { clock: 2, client: 1 };
        let c = Stamp { clock: 2, client: 2 };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn lww_merge_keeps_winner() {
        let mut reg = Lww::new("old", Stamp { clock: 5, client: 1 });
        assert!(!reg.merge("stale", Stamp { clock: 4, client: 2 }));
        assert_eq!(reg.value, "old");
        assert!(reg.merge("fresh", Stamp { clock: 6, client: 2 }));
        assert_eq!(reg.value, "fresh");
    }

    #[test]
    fn lww_join_laws() {
        let a = Lww::new(1, Stamp { clock: 1, client: 1 });
        let b = Lww::new(2, Stamp { clock: 2, client: 1 });
        let c = Lww::new(3, Stamp { clock: 2, client: 2 });

        // Idempotence, commutativity, associativity.
        assert_eq!(a.join(&a), a);
        assert_eq!(a.join(&b), b.join(&a));
        assert_eq!(a.join(&b).join(&c), a.join(&b.join(&c)));
    }

    #[test]
    fn clock_observe_advances() {
        let mut clock = LamportClock::new(1);
        let first = clock.tick();
        clock.observe(Stamp { clock: 10, client: 2 });
        let next = clock.tick();
        assert!(next.clock > 10);
        assert!(next > first);
    }

    #[test]
    fn equal_clock_writes_resolve_identically_everywhere() {
        // Two replicas apply the same pair of concurrent writes in
        // opposite orders and converge.
        let w1 = (serde_json::json!("left"), Stamp { clock: 7, client: 1 });
        let w2 = (serde_json::json!("right"), Stamp { clock: 7, client: 2 });

        let mut replica_a = Lww::new(serde_json::Value::Null, Stamp { clock: 0, client: 0 });
        let mut replica_b = replica_a.clone();

        replica_a.merge(w1.0.clone(), w1.1);
        replica_a.merge(w2.0.clone(), w2.1);
        replica_b.merge(w2.0.clone(), w2.1);
        replica_b.merge(w1.0.clone(), w1.1);

        assert_eq!(replica_a, replica_b);
        assert_eq!(replica_a.value, serde_json::json!("right"));
    }
}
