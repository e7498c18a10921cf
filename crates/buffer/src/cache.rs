use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use common::{DbError, DbResult, LockMode, ObjectName, OwnerId};
use tracing::debug;

use crate::lock::ObjectLock;

/// In-memory handle to one cached object: the record body behind a
/// read-write lock, plus the advisory lock arbitrating logical ownership.
///
/// The descriptor table owns the canonical `Arc<Handle<T>>`; callers get
/// clones of it, so two loads of the same name without an intervening
/// eviction observe the same allocation. Callers must hold the advisory
/// lock across mutations of the body.
#[derive(Debug)]
pub struct Handle<T> {
    name: ObjectName,
    lock: ObjectLock,
    body: RwLock<T>,
}

impl<T> Handle<T> {
    pub fn new(name: ObjectName, mode: LockMode, body: T) -> Self {
        Self {
            name,
            lock: ObjectLock::new(mode),
            body: RwLock::new(body),
        }
    }

    pub fn name(&self) -> ObjectName {
        self.name
    }

    pub fn lock(&self) -> &ObjectLock {
        &self.lock
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.body.read().unwrap()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.body.write().unwrap()
    }
}

/// Write-back and reload hooks the descriptor table calls on eviction and
/// sync. Implemented by the manager facades over codec plus store.
pub trait Backing<T> {
    fn write_back(&self, handle: &Handle<T>) -> DbResult<()>;
    fn reload(&self, name: ObjectName) -> DbResult<Arc<Handle<T>>>;
}

/// Bounded in-memory cache of named objects with flush-on-replace.
///
/// Admission is first-empty-slot, then first-unlocked-slot; when every
/// slot is advisory-locked by other owners the add is rejected and the
/// caller retries. The policy trades access-recency optimality for
/// deadlock freedom: progress is guaranteed whenever any slot is
/// unlocked.
///
/// The slot array sits behind one short-lived mutex (the slot-map lock);
/// the advisory lock inside each handle still arbitrates who may mutate
/// or evict an object. When `enabled` is false the table is a
/// pass-through: finds miss, adds hand the object back uncached.
#[derive(Debug)]
pub struct DescriptorTable<T> {
    slots: Mutex<Vec<Option<Arc<Handle<T>>>>>,
    enabled: bool,
}

impl<T> DescriptorTable<T> {
    pub fn new(capacity: usize, enabled: bool) -> Self {
        assert!(capacity > 0, "descriptor table capacity must be > 0");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots: Mutex::new(slots),
            enabled,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    /// Whether the table caches at all, or passes objects through.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lookup by name. Takes no advisory lock; the caller locks before
    /// mutating the returned object.
    pub fn find(&self, name: ObjectName) -> Option<Arc<Handle<T>>> {
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .flatten()
            .find(|handle| handle.name() == name)
            .cloned()
    }

    /// Admit `incoming`, returning the canonical cached handle.
    ///
    /// If an entry with the same name is already cached, the incoming
    /// object is discarded and the cached copy wins, its lock state
    /// untouched. Otherwise the first empty slot is used, or the first
    /// slot whose occupant is unlocked is flushed and replaced. When
    /// every slot is held by another owner the add fails with
    /// [`DbError::Rejected`].
    pub fn add(
        &self,
        incoming: Arc<Handle<T>>,
        owner: OwnerId,
        backing: &impl Backing<T>,
    ) -> DbResult<Arc<Handle<T>>> {
        if !self.enabled {
            return Ok(incoming);
        }
        let mut slots = self.slots.lock().unwrap();

        // Name identity first: the cache may hold at most one entry per
        // name, and the cached copy is canonical.
        if let Some(existing) = slots
            .iter()
            .flatten()
            .find(|handle| handle.name() == incoming.name())
        {
            return Ok(existing.clone());
        }

        let target = slots
            .iter()
            .position(Option::is_none)
            .or_else(|| {
                slots
                    .iter()
                    .position(|slot| slot.as_ref().is_some_and(|h| !h.lock().is_locked()))
            })
            .ok_or(DbError::Rejected)?;

        if let Some(occupant) = &slots[target] {
            // The occupant may have been locked between the scan and
            // here; a failed acquisition surfaces as contention.
            occupant.lock().try_lock(owner).map_err(|_| DbError::Rejected)?;
            debug!(evicted = %occupant.name(), admitted = %incoming.name(), slot = target, "evicting cache slot");
            Self::flush_slot(&mut slots, target, backing)?;
        }
        slots[target] = Some(incoming.clone());
        Ok(incoming)
    }

    /// Write back and clear slot `index`. Returns whether the slot held
    /// anything. On a write error the slot is left intact, its object
    /// still resident and dirty, so a later sync can retry.
    fn flush_slot(
        slots: &mut [Option<Arc<Handle<T>>>],
        index: usize,
        backing: &impl Backing<T>,
    ) -> DbResult<bool> {
        let Some(handle) = &slots[index] else {
            return Ok(false);
        };
        backing.write_back(handle)?;
        slots[index] = None;
        Ok(true)
    }

    /// Write back and evict the entry holding exactly this handle
    /// (allocation identity, not name). A handle that was never cached is
    /// simply dropped, with no write.
    pub fn flush_object(&self, handle: &Arc<Handle<T>>, backing: &impl Backing<T>) -> DbResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut slots = self.slots.lock().unwrap();
        let found = slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|h| Arc::ptr_eq(h, handle)));
        match found {
            Some(index) => Self::flush_slot(&mut slots, index, backing).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Drop the entry for `name` without writing it back. Used when the
    /// backing file is being unlinked.
    pub fn discard(&self, name: ObjectName, owner: OwnerId) -> DbResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut slots = self.slots.lock().unwrap();
        if let Some(index) = slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|h| h.name() == name))
        {
            slots[index]
                .as_ref()
                .map(|h| h.lock().try_lock(owner))
                .transpose()?;
            slots[index] = None;
        }
        Ok(())
    }

    /// Flush every occupied slot and reload it from disk in place: the
    /// durability barrier.
    ///
    /// Slots are processed in order and the first one locked by another
    /// owner aborts with `Busy`. Slots already processed stay flushed and
    /// reloaded; the operation is deliberately not atomic.
    pub fn sync(&self, owner: OwnerId, backing: &impl Backing<T>) -> DbResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut slots = self.slots.lock().unwrap();
        for index in 0..slots.len() {
            let Some(handle) = slots[index].clone() else {
                continue;
            };
            handle.lock().try_lock(owner)?;
            Self::flush_slot(&mut slots, index, backing)?;
            slots[index] = Some(backing.reload(handle.name())?);
        }
        debug!("descriptor table synced");
        Ok(())
    }

    /// Flush every occupied slot without reloading. Same contention and
    /// partial-effect behavior as [`Self::sync`].
    pub fn clear(&self, owner: OwnerId, backing: &impl Backing<T>) -> DbResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut slots = self.slots.lock().unwrap();
        for index in 0..slots.len() {
            let Some(handle) = &slots[index] else {
                continue;
            };
            handle.lock().try_lock(owner)?;
            Self::flush_slot(&mut slots, index, backing)?;
        }
        Ok(())
    }
}
