//! Process-local advisory lock over trigger messages
//!
//! Cuts down on wasted claim attempts when the same trigger is hit twice in
//! quick succession. It is never the source of truth: the atomic claim in
//! the ledger decides which attempt wins.
use dashmap::DashSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TriggerKey {
    group_ref: String,
    trigger_ref: String,
}

impl TriggerKey {
    fn new(group_ref: &str, trigger_ref: &str) -> Self {
        Self {
            group_ref: group_ref.to_owned(),
            trigger_ref: trigger_ref.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TriggerLock {
    held: Arc<DashSet<TriggerKey>>,
}

impl TriggerLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking test-and-set. False if another attempt holds the key.
    pub fn acquire(&self, group_ref: &str, trigger_ref: &str) -> bool {
        self.held.insert(TriggerKey::new(group_ref, trigger_ref))
    }

    /// Safe to call for keys that were never acquired.
    pub fn release(&self, group_ref: &str, trigger_ref: &str) {
        self.held.remove(&TriggerKey::new(group_ref, trigger_ref));
    }

    /// Acquire and hand back a guard that releases on drop.
    pub fn try_guard(&self, group_ref: &str, trigger_ref: &str) -> Option<TriggerGuard> {
        let key = TriggerKey::new(group_ref, trigger_ref);
        if self.held.insert(key.clone()) {
            Some(TriggerGuard {
                held: Arc::clone(&self.held),
                key,
            })
        } else {
            None
        }
    }

    pub fn is_held(&self, group_ref: &str, trigger_ref: &str) -> bool {
        self.held.contains(&TriggerKey::new(group_ref, trigger_ref))
    }
}

#[derive(Debug)]
pub struct TriggerGuard {
    held: Arc<DashSet<TriggerKey>>,
    key: TriggerKey,
}

impl Drop for TriggerGuard {
    fn drop(&mut self) {
        self.held.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let lock = TriggerLock::new();
        assert!(lock.acquire("g", "t"));
        assert!(!lock.acquire("g", "t"));

        lock.release("g", "t");
        assert!(lock.acquire("g", "t"));
    }

    #[test]
    fn keys_are_scoped_by_group() {
        let lock = TriggerLock::new();
        assert!(lock.acquire("g1", "t"));
        assert!(lock.acquire("g2", "t"));
    }

    #[test]
    fn release_is_idempotent() {
        let lock = TriggerLock::new();
        lock.release("g", "never");
        lock.release("g", "never");
        assert!(!lock.is_held("g", "never"));
    }

    #[test]
    fn guard_releases_on_drop() {
        let lock = TriggerLock::new();
        {
            let _guard = lock.try_guard("g", "t").unwrap();
            assert!(lock.try_guard("g", "t").is_none());
            assert!(lock.is_held("g", "t"));
        }
        assert!(!lock.is_held("g", "t"));
    }
}
