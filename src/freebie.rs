//! Free-quota tracking for limited-free services.
//!
//! A `freebie N` service grants each client identity (remote IP) N requests
//! before a credential is required. The gateway consults [`FreebieDb`] in two
//! steps - `can_pass` then `tally` - which are **not** atomic as a pair:
//! concurrent requests from one identity near the budget boundary can all
//! observe "allowed" before any tally lands. The budget is an approximate
//! limit unless the tracker implementation serializes the pair itself.

use std::net::IpAddr;

use dashmap::DashMap;

use crate::{Error, Result};

/// Free-quota tracker capability, keyed by remote client identity.
#[async_trait::async_trait]
pub trait FreebieDb: Send + Sync {
    /// Whether `identity` still has free quota left. Read-only.
    async fn can_pass(&self, identity: IpAddr) -> Result<bool>;

    /// Record one consumed freebie for `identity` and return the new tally.
    async fn tally(&self, identity: IpAddr) -> Result<u64>;
}

/// In-memory freebie tracker with a fixed per-identity budget.
///
/// Suitable for single-node deployments and tests; state does not survive a
/// restart. Each call updates its map entry atomically, so the tracker itself
/// never loses a count - the check-then-tally race described on [`FreebieDb`]
/// still applies at the gateway level.
pub struct MemFreebieDb {
    budget: u64,
    counts: DashMap<IpAddr, u64>,
}

impl MemFreebieDb {
    /// Create a tracker granting `budget` free requests per identity.
    #[must_use]
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            counts: DashMap::new(),
        }
    }

    /// Current tally for `identity` (0 if never seen).
    #[must_use]
    pub fn count(&self, identity: IpAddr) -> u64 {
        self.counts.get(&identity).map_or(0, |c| *c)
    }
}

#[async_trait::async_trait]
impl FreebieDb for MemFreebieDb {
    async fn can_pass(&self, identity: IpAddr) -> Result<bool> {
        Ok(self.count(identity) < self.budget)
    }

    async fn tally(&self, identity: IpAddr) -> Result<u64> {
        let mut entry = self.counts.entry(identity).or_insert(0);
        *entry = entry
            .checked_add(1)
            .ok_or_else(|| Error::Freebie("tally overflow".to_string()))?;
        Ok(*entry)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[tokio::test]
    async fn budget_exhausts_after_n_tallies() {
        let db = MemFreebieDb::new(3);

        for i in 1..=3 {
            assert!(db.can_pass(ip(1)).await.unwrap());
            assert_eq!(db.tally(ip(1)).await.unwrap(), i);
        }

        assert!(!db.can_pass(ip(1)).await.unwrap());
    }

    #[tokio::test]
    async fn identities_are_tracked_independently() {
        let db = MemFreebieDb::new(1);

        db.tally(ip(1)).await.unwrap();
        assert!(!db.can_pass(ip(1)).await.unwrap());
        assert!(db.can_pass(ip(2)).await.unwrap());
    }

    #[tokio::test]
    async fn zero_budget_never_passes() {
        let db = MemFreebieDb::new(0);
        assert!(!db.can_pass(ip(9)).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_tallies_are_not_lost() {
        use std::sync::Arc;

        let db = Arc::new(MemFreebieDb::new(1000));
        let mut handles = Vec::new();
        for _ in 0..100 {
            let db = Arc::clone(&db);
            handles.push(tokio::spawn(async move {
                db.tally(ip(7)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(db.count(ip(7)), 100);
    }
}
