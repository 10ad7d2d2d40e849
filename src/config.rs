use std::sync::Arc;

use crossbeam_utils::atomic::AtomicCell;

use crate::{
    error::{PolicyError, SourceError},
    policy::Policy,
    signal::PendingSignal,
};

/// Where the pacer gets its policy from.
pub trait ConfigSource: Send + Sync {
    /// Current policy snapshot.
    fn policy(&self) -> Result<Policy, SourceError>;

    /// Raised whenever the policy may have changed; the pacer then calls
    /// [`policy`](Self::policy) again rather than trusting the notification.
    /// `None` means the source never changes.
    fn updates(&self) -> Option<Arc<PendingSignal>> {
        None
    }
}

/// Hot reloadable policy store.
pub struct DynamicConfig {
    policy: AtomicCell<Policy>,
    updates: Arc<PendingSignal>,
}

impl DynamicConfig {
    pub fn new(policy: Policy) -> Result<Self, PolicyError> {
        policy.check_valid()?;
        Ok(Self {
            policy: AtomicCell::new(policy),
            updates: Arc::new(PendingSignal::new()),
        })
    }

    pub fn get(&self) -> Policy {
        self.policy.load()
    }

    /// Replaces the policy and notifies the pacer. Invalid policies are rejected
    /// and leave the stored one in place.
    pub fn set(&self, policy: Policy) -> Result<(), PolicyError> {
        policy.check_valid()?;
        self.policy.store(policy);
        if self.updates.raise() {
            tracing::debug!(target: "comet_pacer", ?policy, "gc config update event dispatched");
        } else {
            tracing::debug!(
                target: "comet_pacer",
                ?policy,
                "gc config update event coalesced with a pending one"
            );
        }
        Ok(())
    }
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            policy: AtomicCell::new(Policy::default()),
            updates: Arc::new(PendingSignal::new()),
        }
    }
}

impl ConfigSource for DynamicConfig {
    fn policy(&self) -> Result<Policy, SourceError> {
        Ok(self.get())
    }

    fn updates(&self) -> Option<Arc<PendingSignal>> {
        Some(self.updates.clone())
    }
}

/// Policy fixed at construction time.
#[derive(Clone, Copy, Debug)]
pub struct StaticConfig(pub Policy);

impl ConfigSource for StaticConfig {
    fn policy(&self) -> Result<Policy, SourceError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_rejects_out_of_range() {
        let store = DynamicConfig::new(Policy::budget(50.0)).unwrap();
        for bad in [-1.0, 101.0, f64::NAN] {
            assert!(store.set(Policy::budget(bad)).is_err());
            assert_eq!(store.get(), Policy::budget(50.0));
        }
        assert!(!store.updates().unwrap().is_pending());
        for good in [0.0, 90.0, 100.0] {
            store.set(Policy::budget(good)).unwrap();
            assert_eq!(store.get(), Policy::budget(good));
        }
    }

    #[test]
    fn new_rejects_out_of_range() {
        assert_eq!(
            DynamicConfig::new(Policy::budget(101.0)).err(),
            Some(PolicyError::MaxRamPercentage(101.0))
        );
    }

    #[test]
    fn updates_coalesce() {
        let store = DynamicConfig::default();
        let updates = store.updates().unwrap();
        store.set(Policy::ratio(200)).unwrap();
        store.set(Policy::ratio(300)).unwrap();
        assert!(updates.take());
        assert!(!updates.take());
        // Only the latest value is observable.
        assert_eq!(store.policy().unwrap(), Policy::ratio(300));
    }

    #[test]
    fn static_config_has_no_updates() {
        let source = StaticConfig(Policy::ratio(150));
        assert!(source.updates().is_none());
        assert_eq!(source.policy().unwrap().gc_percent, 150);
    }
}
