use std::sync::Mutex;

use common::{DbError, DbResult, LockMode, OwnerId};

/// Advisory per-object lock with thread-identity ownership.
///
/// The lock lives inside the cached object's in-memory handle and is
/// never persisted. It is strictly non-blocking: `try_lock` either
/// acquires or fails with [`DbError::Busy`]. Re-locking by the current
/// owner succeeds idempotently.
///
/// In [`LockMode::Disabled`] every acquisition succeeds and the lock
/// never reports held; this is the single-threaded configuration.
#[derive(Debug)]
pub struct ObjectLock {
    mode: LockMode,
    owner: Mutex<Option<OwnerId>>,
}

impl ObjectLock {
    pub fn new(mode: LockMode) -> Self {
        Self {
            mode,
            owner: Mutex::new(None),
        }
    }

    /// Acquire on behalf of `owner`, failing with `Busy` when another
    /// owner holds the lock.
    pub fn try_lock(&self, owner: OwnerId) -> DbResult<()> {
        self.lock_internal(owner).map(|_| ())
    }

    /// Like [`Self::try_lock`], but the returned guard releases on drop
    /// only if this call actually acquired the lock, so re-entrant
    /// callers keep their outer hold.
    pub fn acquire(&self, owner: OwnerId) -> DbResult<LockGuard<'_>> {
        let fresh = self.lock_internal(owner)?;
        Ok(LockGuard {
            lock: self,
            owner,
            release: fresh,
        })
    }

    fn lock_internal(&self, owner: OwnerId) -> DbResult<bool> {
        if self.mode == LockMode::Disabled {
            return Ok(false);
        }
        let mut held = self.owner.lock().unwrap();
        match *held {
            None => {
                *held = Some(owner);
                Ok(true)
            }
            Some(current) if current == owner => Ok(false),
            Some(_) => Err(DbError::Busy),
        }
    }

    /// Release `owner`'s hold. Unlocking an unheld lock is a no-op;
    /// unlocking somebody else's hold fails with `Busy`.
    pub fn unlock(&self, owner: OwnerId) -> DbResult<()> {
        if self.mode == LockMode::Disabled {
            return Ok(());
        }
        let mut held = self.owner.lock().unwrap();
        match *held {
            None => Ok(()),
            Some(current) if current == owner => {
                *held = None;
                Ok(())
            }
            Some(_) => Err(DbError::Busy),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.mode == LockMode::Advisory && self.owner.lock().unwrap().is_some()
    }

    pub fn holder(&self) -> Option<OwnerId> {
        if self.mode == LockMode::Disabled {
            return None;
        }
        *self.owner.lock().unwrap()
    }
}

/// Scoped hold on an [`ObjectLock`]; releases on drop unless the owner
/// already held the lock when it was taken.
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a ObjectLock,
    owner: OwnerId,
    release: bool,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.release {
            let _ = self.lock.unlock(self.owner);
        }
    }
}
