//! Single-active-game guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::EngineError;

/// Shared flag marking whether a game is live.
///
/// Clones share the same flag. An engine over process-global state hands the
/// same lock to every instance; an engine with instance-owned state can give
/// each instance a fresh one.
#[derive(Clone, Debug, Default)]
pub struct GameLock {
    active: Arc<AtomicBool>,
}

impl GameLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the lock, failing fast if a game is already active.
    pub fn try_acquire(&self) -> Result<GameLease, EngineError> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::AlreadyActive)?;
        Ok(GameLease { lock: self.clone() })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Proof of holding a `GameLock`; released on drop.
#[derive(Debug)]
pub struct GameLease {
    lock: GameLock,
}

impl Drop for GameLease {
    fn drop(&mut self) {
        self.lock.active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let lock = GameLock::new();
        let lease = lock.try_acquire().unwrap();
        assert!(lock.is_active());

        let shared = lock.clone();
        assert_eq!(shared.try_acquire().unwrap_err(), EngineError::AlreadyActive);

        drop(lease);
        assert!(!lock.is_active());
        assert!(shared.try_acquire().is_ok());
    }

    #[test]
    fn test_independent_locks_do_not_interfere() {
        let a = GameLock::new();
        let b = GameLock::new();
        let _la = a.try_acquire().unwrap();
        assert!(b.try_acquire().is_ok());
    }
}
