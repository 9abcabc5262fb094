//! Floating IP pool bookkeeping as a pure state transition.
//!
//! The pool reconciler observes the provider and the IPAddress records, then feeds
//! what it saw through [`PoolState::apply`]. Nothing in here talks to the provider,
//! which keeps the set invariants checkable in isolation:
//!
//! - `available` and `claimed` never overlap
//! - after [`PoolState::normalized`], `available = ((available ∪ preallocated) \ claimed) \ failed`

use crds::FloatingIPPoolStatus;

/// Address sets of one pool. Order is preserved so that allocation is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PoolState {
    pub available: Vec<String>,
    pub claimed: Vec<String>,
    pub failed: Vec<String>,
}

/// Something the pool reconciler observed or did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// Provider addresses carrying the pool tag
    Discovered(Vec<String>),
    /// Address handed to a claim (popped from available or freshly created)
    Claimed(String),
    /// Address no longer exists at the provider
    Failed(String),
    /// Claim went away; `keep` returns the address to `available`
    Released { address: String, keep: bool },
}

/// What the next allocation has to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allocation {
    /// Reuse an address from `available` (must be re-validated at the provider)
    Reuse(String),
    /// Allocate a new address at the provider
    Create,
    /// `claimed` reached `maxIps`
    Exhausted,
}

fn insert(set: &mut Vec<String>, address: &str) {
    if !set.iter().any(|a| a == address) {
        set.push(address.to_string());
    }
}

fn remove(set: &mut Vec<String>, address: &str) {
    set.retain(|a| a != address);
}

impl PoolState {
    pub fn from_status(status: Option<&FloatingIPPoolStatus>) -> Self {
        status
            .map(|s| Self {
                available: s.available_ips.clone(),
                claimed: s.claimed_ips.clone(),
                failed: s.failed_ips.clone(),
            })
            .unwrap_or_default()
    }

    pub fn write_to(&self, status: &mut FloatingIPPoolStatus) {
        status.available_ips.clone_from(&self.available);
        status.claimed_ips.clone_from(&self.claimed);
        status.failed_ips.clone_from(&self.failed);
    }

    /// Apply one event and return the resulting state
    #[must_use]
    pub fn apply(&self, event: &PoolEvent) -> PoolState {
        let mut next = self.clone();
        match event {
            PoolEvent::Discovered(addresses) => {
                for address in addresses {
                    let tracked = next.claimed.contains(address)
                        || next.available.contains(address)
                        || next.failed.contains(address);
                    if !tracked {
                        next.available.push(address.clone());
                    }
                }
            }
            PoolEvent::Claimed(address) => {
                remove(&mut next.available, address);
                insert(&mut next.claimed, address);
            }
            PoolEvent::Failed(address) => {
                remove(&mut next.available, address);
                remove(&mut next.claimed, address);
                insert(&mut next.failed, address);
            }
            PoolEvent::Released { address, keep } => {
                remove(&mut next.claimed, address);
                if *keep {
                    insert(&mut next.available, address);
                } else {
                    remove(&mut next.available, address);
                }
            }
        }
        next
    }

    /// Take `claimed` from the live IPAddress records of the pool.
    ///
    /// Records are the durable side of a claim: an address recorded as claimed by a
    /// pass that died before creating its record is dropped here, and one whose
    /// record exists but never made it into status is picked up.
    #[must_use]
    pub fn with_claimed(&self, in_use: &[String]) -> PoolState {
        let mut next = self.clone();
        next.claimed.clear();
        for address in in_use {
            insert(&mut next.claimed, address);
        }
        for address in in_use {
            remove(&mut next.available, address);
            remove(&mut next.failed, address);
        }
        next
    }

    /// Restore `available = ((available ∪ preallocated) \ claimed) \ failed`
    #[must_use]
    pub fn normalized(&self, preallocated: &[String]) -> PoolState {
        let mut next = self.clone();
        for address in preallocated {
            insert(&mut next.available, address);
        }
        let claimed = next.claimed.clone();
        let failed = next.failed.clone();
        next.available
            .retain(|a| !claimed.contains(a) && !failed.contains(a));
        next
    }

    pub fn is_full(&self, max_ips: Option<u32>) -> bool {
        max_ips.is_some_and(|max| self.claimed.len() >= max as usize)
    }

    /// Decide the next allocation step (before any provider lookup)
    pub fn next_allocation(&self, max_ips: Option<u32>) -> Allocation {
        if self.is_full(max_ips) {
            return Allocation::Exhausted;
        }
        match self.available.first() {
            Some(address) => Allocation::Reuse(address.clone()),
            None => Allocation::Create,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|a| (*a).to_string()).collect()
    }

    fn assert_conserved(state: &PoolState) {
        for address in &state.available {
            assert!(!state.claimed.contains(address), "{address} both available and claimed");
        }
    }

    #[test]
    fn test_normalize_adds_preallocated_and_drops_claimed() {
        let state = PoolState {
            available: s(&["10.0.0.1"]),
            claimed: s(&["1.1.1.1"]),
            failed: s(&["10.0.0.9"]),
        };
        let next = state.normalized(&s(&["1.1.1.1", "2.2.2.2", "10.0.0.9"]));
        assert_eq!(next.available, s(&["10.0.0.1", "2.2.2.2"]));
        assert_eq!(next.claimed, s(&["1.1.1.1"]));
        assert_conserved(&next);
    }

    #[test]
    fn test_claimed_follows_live_records() {
        let state = PoolState {
            available: s(&["3.3.3.3"]),
            claimed: s(&["4.4.4.4"]),
            ..Default::default()
        };
        let next = state.with_claimed(&s(&["3.3.3.3"]));
        assert!(next.available.is_empty());
        assert_eq!(next.claimed, s(&["3.3.3.3"]));

        // a preallocated address whose record never got written returns to available
        let state = PoolState {
            claimed: s(&["1.1.1.1"]),
            ..Default::default()
        };
        let next = state.with_claimed(&[]).normalized(&s(&["1.1.1.1"]));
        assert_eq!(next.available, s(&["1.1.1.1"]));
        assert!(next.claimed.is_empty());
    }

    #[test]
    fn test_claim_moves_address() {
        let state = PoolState {
            available: s(&["1.1.1.1", "2.2.2.2"]),
            ..Default::default()
        };
        let next = state.apply(&PoolEvent::Claimed("1.1.1.1".to_string()));
        assert_eq!(next.available, s(&["2.2.2.2"]));
        assert_eq!(next.claimed, s(&["1.1.1.1"]));
        assert_conserved(&next);
    }

    #[test]
    fn test_failed_address_leaves_claimed() {
        let state = PoolState {
            claimed: s(&["1.1.1.1"]),
            ..Default::default()
        };
        let next = state.apply(&PoolEvent::Failed("1.1.1.1".to_string()));
        assert!(next.claimed.is_empty());
        assert_eq!(next.failed, s(&["1.1.1.1"]));
    }

    #[test]
    fn test_discovered_ignores_tracked_addresses() {
        let state = PoolState {
            available: s(&["1.1.1.1"]),
            claimed: s(&["2.2.2.2"]),
            failed: s(&["3.3.3.3"]),
        };
        let next = state.apply(&PoolEvent::Discovered(s(&["1.1.1.1", "2.2.2.2", "3.3.3.3", "4.4.4.4"])));
        assert_eq!(next.available, s(&["1.1.1.1", "4.4.4.4"]));
    }

    #[test]
    fn test_release_keep_and_drop() {
        let state = PoolState {
            claimed: s(&["1.1.1.1", "5.5.5.5"]),
            ..Default::default()
        };
        let kept = state.apply(&PoolEvent::Released {
            address: "1.1.1.1".to_string(),
            keep: true,
        });
        assert_eq!(kept.available, s(&["1.1.1.1"]));
        let dropped = kept.apply(&PoolEvent::Released {
            address: "5.5.5.5".to_string(),
            keep: false,
        });
        assert!(dropped.claimed.is_empty());
        assert_eq!(dropped.available, s(&["1.1.1.1"]));
    }

    #[test]
    fn test_next_allocation_checks_max_first() {
        let state = PoolState {
            available: s(&["1.1.1.1"]),
            claimed: s(&["2.2.2.2", "3.3.3.3"]),
            ..Default::default()
        };
        assert_eq!(state.next_allocation(Some(2)), Allocation::Exhausted);
        assert_eq!(state.next_allocation(Some(3)), Allocation::Reuse("1.1.1.1".to_string()));
        assert_eq!(PoolState::default().next_allocation(None), Allocation::Create);
    }
}
