//! Per-tenant classification lease. Caps concurrency at one run per tenant:
//! a tick that finds the lease held simply skips. The lease expires after a
//! fixed duration so a crashed worker cannot wedge its tenant forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crowdecho_common::TenantRef;

/// Long enough to cover slow batches, short enough to recover from a crash.
pub const CLASSIFY_LEASE_DURATION: Duration = Duration::from_secs(10 * 60);

struct Lease {
    token: Uuid,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct LeaseMap {
    inner: Arc<Mutex<HashMap<TenantRef, Lease>>>,
    duration: Duration,
}

impl LeaseMap {
    pub fn new(duration: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            duration,
        }
    }

    /// Try to take the tenant's lease. Returns None while a live lease is
    /// held by someone else; an expired lease is taken over.
    pub fn acquire(&self, tenant: TenantRef) -> Option<LeaseGuard> {
        let mut leases = self.inner.lock().expect("lease lock");
        let now = Instant::now();

        if let Some(existing) = leases.get(&tenant) {
            if existing.expires_at > now {
                return None;
            }
        }

        let token = Uuid::new_v4();
        leases.insert(
            tenant,
            Lease {
                token,
                expires_at: now + self.duration,
            },
        );
        Some(LeaseGuard {
            map: self.inner.clone(),
            tenant,
            token,
        })
    }
}

/// Releases the lease on drop, but only if it still owns it, so a guard
/// outliving its expiry never releases a successor's lease.
pub struct LeaseGuard {
    map: Arc<Mutex<HashMap<TenantRef, Lease>>>,
    tenant: TenantRef,
    token: Uuid,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let mut leases = self.map.lock().expect("lease lock");
        if leases.get(&self.tenant).map(|l| l.token) == Some(self.token) {
            leases.remove(&self.tenant);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_lease_blocks_second_acquire() {
        let leases = LeaseMap::new(Duration::from_secs(60));
        let tenant = TenantRef::User(Uuid::new_v4());

        let guard = leases.acquire(tenant).expect("first acquire succeeds");
        assert!(leases.acquire(tenant).is_none());

        drop(guard);
        assert!(leases.acquire(tenant).is_some());
    }

    #[test]
    fn leases_are_independent_across_tenants() {
        let leases = LeaseMap::new(Duration::from_secs(60));
        let a = TenantRef::User(Uuid::new_v4());
        let b = TenantRef::Org(Uuid::new_v4());

        let _guard_a = leases.acquire(a).unwrap();
        assert!(leases.acquire(b).is_some());
    }

    #[test]
    fn expired_lease_is_taken_over() {
        let leases = LeaseMap::new(Duration::from_millis(0));
        let tenant = TenantRef::User(Uuid::new_v4());

        let stale = leases.acquire(tenant).expect("first acquire");
        // Zero duration: already expired, a new worker can take over.
        let fresh = leases.acquire(tenant).expect("takeover succeeds");

        // The stale guard must not release the fresh lease on drop.
        drop(stale);
        assert!(leases.acquire(tenant).is_none());
        drop(fresh);
    }
}
