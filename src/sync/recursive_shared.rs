use std::fmt;

use lock_api::RawRwLock;
use log::trace;

use super::{
    lock_table::{self, fatal, Count, Entry, LockState, MutexId},
    ExclusiveGuard, SharedGuard, SharedMutex,
};

/// A reader-writer lock that the holding thread may acquire again, in either mode.
///
/// Each thread tracks its hold on each mutex with one signed counter in a
/// thread-local table: positive for shared depth, negative for exclusive depth.
/// Only the first acquisition and the last release reach the underlying `R`.
///
/// - Shared acquisitions while holding exclusive are pure bookkeeping.
/// - `lock` while holding shared upgrades: the real shared hold is dropped and
///   exclusive access is acquired for real. The shared depth is folded into the
///   exclusive one, so every earlier acquisition still needs its own release.
///   Two threads upgrading at once contend exactly as they would on `R`.
/// - `try_lock` while holding shared always fails; it never upgrades.
/// - Releasing a mutex the thread does not hold aborts the process.
///
/// Every acquisition must be released by the same thread before it exits.
pub struct RecursiveSharedMutex<R: RawRwLock = parking_lot::RawRwLock> {
    id: MutexId,
    raw: R,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Mode {
    Shared,
    Exclusive,
}

/// Outcome of one operation, acted on after the lock table is released.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Transition {
    /// Only the thread's counter moved.
    Recursed,
    /// `try_lock` while holding shared.
    Refused,
    Contended,
    Acquired(Mode),
    Upgraded { from_depth: Count },
    Released(Mode),
    NotHeld,
    Overflow,
}

impl Transition {
    fn acquired(self) -> bool {
        matches!(
            self,
            Transition::Recursed | Transition::Acquired(_) | Transition::Upgraded { .. }
        )
    }
}

/// Moves the counter one level further from zero, in the direction of `by`.
fn deepen(entry: &mut Entry, by: Count) -> Transition {
    match entry.counter.checked_add(by) {
        Some(counter) => {
            entry.counter = counter;
            Transition::Recursed
        }
        None => Transition::Overflow,
    }
}

impl<R: RawRwLock> RecursiveSharedMutex<R> {
    pub fn new() -> Self {
        Self {
            id: MutexId::next(),
            raw: R::INIT,
        }
    }

    pub fn id(&self) -> MutexId {
        self.id
    }

    /// How the calling thread currently holds this mutex.
    pub fn state(&self) -> LockState {
        LockState::from_count(lock_table::with(|table| table.count(self.id)))
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.state() != LockState::Unheld
    }

    /// Underlying lock.
    ///
    /// # Safety
    ///
    /// Acquiring or releasing the raw lock directly bypasses the per-thread
    /// bookkeeping; the caller must leave it in the state the table expects.
    pub unsafe fn raw(&self) -> &R {
        &self.raw
    }

    /// Acquires exclusive access, blocking if another thread holds the lock.
    pub fn lock(&self) {
        let transition = lock_table::with(|table| {
            let entry = table.entry_for(self.id);
            let c = entry.counter;
            if c < 0 {
                return deepen(entry, -1);
            }
            let Some(depth) = c.checked_add(1) else {
                return Transition::Overflow;
            };
            if c > 0 {
                // SAFETY: a positive counter means this thread holds the real shared lock.
                unsafe { self.raw.unlock_shared() };
            }
            self.raw.lock_exclusive();
            entry.counter = -depth;
            if c > 0 {
                Transition::Upgraded { from_depth: c }
            } else {
                Transition::Acquired(Mode::Exclusive)
            }
        });
        self.report(transition);
    }

    /// Attempts exclusive access without blocking. Never upgrades a shared hold.
    pub fn try_lock(&self) -> bool {
        let transition = lock_table::with(|table| {
            let entry = table.entry_for(self.id);
            let transition = match entry.counter {
                c if c < 0 => deepen(entry, -1),
                0 => {
                    if self.raw.try_lock_exclusive() {
                        entry.counter = -1;
                        Transition::Acquired(Mode::Exclusive)
                    } else {
                        Transition::Contended
                    }
                }
                _ => Transition::Refused,
            };
            table.prune(self.id);
            transition
        });
        self.report(transition);
        transition.acquired()
    }

    /// Releases one level of whichever mode the calling thread holds.
    pub fn unlock(&self) {
        self.release();
    }

    /// Acquires shared access, blocking while another thread holds exclusive.
    pub fn lock_shared(&self) {
        let transition = lock_table::with(|table| {
            let entry = table.entry_for(self.id);
            match entry.counter {
                c if c < 0 => deepen(entry, -1),
                0 => {
                    self.raw.lock_shared();
                    entry.counter = 1;
                    Transition::Acquired(Mode::Shared)
                }
                _ => deepen(entry, 1),
            }
        });
        self.report(transition);
    }

    pub fn try_lock_shared(&self) -> bool {
        let transition = lock_table::with(|table| {
            let entry = table.entry_for(self.id);
            let transition = match entry.counter {
                c if c < 0 => deepen(entry, -1),
                0 => {
                    if self.raw.try_lock_shared() {
                        entry.counter = 1;
                        Transition::Acquired(Mode::Shared)
                    } else {
                        Transition::Contended
                    }
                }
                _ => deepen(entry, 1),
            };
            table.prune(self.id);
            transition
        });
        self.report(transition);
        transition.acquired()
    }

    /// Same as [`unlock`](Self::unlock): the stored mode decides what is released.
    pub fn unlock_shared(&self) {
        self.release();
    }

    pub fn write(&self) -> ExclusiveGuard<'_, Self> {
        ExclusiveGuard::new(self)
    }

    pub fn try_write(&self) -> Option<ExclusiveGuard<'_, Self>> {
        ExclusiveGuard::try_new(self)
    }

    pub fn read(&self) -> SharedGuard<'_, Self> {
        SharedGuard::new(self)
    }

    pub fn try_read(&self) -> Option<SharedGuard<'_, Self>> {
        SharedGuard::try_new(self)
    }

    fn release(&self) {
        let transition = lock_table::with(|table| {
            let Some(entry) = table.get_mut(self.id) else {
                return Transition::NotHeld;
            };
            let transition = if entry.counter > 0 {
                entry.counter -= 1;
                if entry.counter == 0 {
                    // SAFETY: the counter just left shared depth 1, the real shared hold.
                    unsafe { self.raw.unlock_shared() };
                    Transition::Released(Mode::Shared)
                } else {
                    Transition::Recursed
                }
            } else {
                entry.counter += 1;
                if entry.counter == 0 {
                    // SAFETY: the counter just left exclusive depth 1, the real exclusive hold.
                    unsafe { self.raw.unlock_exclusive() };
                    Transition::Released(Mode::Exclusive)
                } else {
                    Transition::Recursed
                }
            };
            table.prune(self.id);
            transition
        });
        self.report(transition);
    }

    // Logs can reach a logger that takes a recursive mutex itself, so this
    // only runs with the lock table released.
    fn report(&self, transition: Transition) {
        match transition {
            Transition::Recursed | Transition::Refused => {}
            Transition::Contended => trace!("mutex {:?}: contended", self.id),
            Transition::Acquired(mode) => trace!("mutex {:?}: {mode:?} acquired", self.id),
            Transition::Upgraded { from_depth } => {
                trace!("mutex {:?}: upgraded from shared depth {from_depth}", self.id)
            }
            Transition::Released(mode) => trace!("mutex {:?}: {mode:?} released", self.id),
            Transition::NotHeld => {
                fatal("unlock of a recursive shared mutex not held by the calling thread")
            }
            Transition::Overflow => fatal("recursive shared mutex recursion counter overflow"),
        }
    }
}

impl<R: RawRwLock> SharedMutex for RecursiveSharedMutex<R> {
    fn lock(&self) {
        RecursiveSharedMutex::lock(self)
    }
    fn try_lock(&self) -> bool {
        RecursiveSharedMutex::try_lock(self)
    }
    fn unlock(&self) {
        self.release()
    }
    fn lock_shared(&self) {
        RecursiveSharedMutex::lock_shared(self)
    }
    fn try_lock_shared(&self) -> bool {
        RecursiveSharedMutex::try_lock_shared(self)
    }
    fn unlock_shared(&self) {
        self.release()
    }
}

impl<R: RawRwLock> Default for RecursiveSharedMutex<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RawRwLock> fmt::Debug for RecursiveSharedMutex<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecursiveSharedMutex")
            .field("id", &self.id)
            .field("state", &LockState::from_count(lock_table::current_count(self.id)))
            .finish()
    }
}

impl<R: RawRwLock> Drop for RecursiveSharedMutex<R> {
    fn drop(&mut self) {
        // A second panic during unwinding would abort and bury the first
        if !std::thread::panicking() {
            debug_assert_eq!(
                lock_table::current_count(self.id),
                0,
                "recursive shared mutex dropped while held by the dropping thread"
            );
        }
    }
}
