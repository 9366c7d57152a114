use std::{
    cell::{Cell, RefCell},
    sync::atomic::{AtomicUsize, Ordering},
};

/// Signed recursion counter: `> 0` is shared depth, `< 0` is exclusive depth.
pub type Count = isize;

/// Process-unique identity of a recursive mutex instance.
///
/// Ids are handed out from a global counter and never reused, so an entry left
/// behind by a dropped mutex can never be mistaken for a live one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MutexId(usize);

impl MutexId {
    pub fn next() -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Mode and depth in which the calling thread holds a mutex.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LockState {
    Unheld,
    Shared(usize),
    Exclusive(usize),
}

impl LockState {
    pub fn from_count(count: Count) -> Self {
        match count {
            0 => LockState::Unheld,
            c if c > 0 => LockState::Shared(c.unsigned_abs()),
            c => LockState::Exclusive(c.unsigned_abs()),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Entry {
    pub owner: MutexId,
    pub counter: Count,
}

/// Per-thread list of the recursive mutexes the thread currently holds.
///
/// Entries are appended and looked up from the back, since the mutex touched
/// most recently is the one most likely to be touched next. A zero counter is
/// never left behind: callers remove an entry as soon as it drops to zero.
#[derive(Default, Debug)]
pub struct LockTable {
    entries: Vec<Entry>,
}

impl LockTable {
    fn position(&self, owner: MutexId) -> Option<usize> {
        self.entries.iter().rposition(|e| e.owner == owner)
    }

    /// Returns the entry for `owner`, creating a zero-valued one if absent.
    pub fn entry_for(&mut self, owner: MutexId) -> &mut Entry {
        let i = match self.position(owner) {
            Some(i) => i,
            None => {
                self.entries.push(Entry { owner, counter: 0 });
                self.entries.len() - 1
            }
        };
        &mut self.entries[i]
    }

    pub fn get_mut(&mut self, owner: MutexId) -> Option<&mut Entry> {
        let i = self.position(owner)?;
        Some(&mut self.entries[i])
    }

    pub fn count(&self, owner: MutexId) -> Count {
        self.position(owner).map_or(0, |i| self.entries[i].counter)
    }

    pub fn remove(&mut self, owner: MutexId) {
        if let Some(i) = self.position(owner) {
            debug_assert_eq!(self.entries[i].counter, 0, "removing a held entry");
            self.entries.remove(i);
        }
    }

    /// Drops the entry for `owner` if its counter is back at zero.
    pub fn prune(&mut self, owner: MutexId) {
        if self.count(owner) == 0 {
            self.remove(owner);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for LockTable {
    fn drop(&mut self) {
        if !self.is_empty() {
            log::error!(
                "thread exiting while holding {} recursive shared mutex(es): {:?}",
                self.entries.len(),
                self.entries
            );
        }
        debug_assert!(
            self.is_empty(),
            "recursive shared mutex still held at thread exit"
        );
    }
}

thread_local! {
    static LOCK_TABLE: RefCell<LockTable> = RefCell::new(LockTable::default());
}

/// Logs and aborts. Misuse of a lock is not recoverable and must not unwind.
///
/// Never call this while the lock table is borrowed: a logger that takes a
/// recursive mutex needs the table.
#[cold]
pub(crate) fn fatal(msg: &str) -> ! {
    thread_local! {
        static ABORTING: Cell<bool> = const { Cell::new(false) };
    }
    // A logger that fails the same way lands back here; abort without logging twice
    let first = ABORTING.try_with(|a| !a.replace(true)).unwrap_or(false);
    if first {
        log::error!("{msg}");
    }
    std::process::abort()
}

/// Runs `f` against the calling thread's lock table.
///
/// `f` must not log or call back into a recursive mutex; it reports what
/// happened and the caller acts on that once the table is released.
pub(crate) fn with<F, T>(f: F) -> T
where
    F: FnOnce(&mut LockTable) -> T,
{
    let result = LOCK_TABLE.try_with(|table| match table.try_borrow_mut() {
        Ok(mut table) => Ok(f(&mut *table)),
        Err(_) => Err("recursive shared mutex lock table re-entered"),
    });
    match result {
        Ok(Ok(value)) => value,
        Ok(Err(msg)) => fatal(msg),
        Err(_) => fatal("recursive shared mutex used after its thread's lock table was destroyed"),
    }
}

/// Counter of `owner` in the calling thread's table, or zero once the table is
/// gone (thread teardown) or busy.
pub(crate) fn current_count(owner: MutexId) -> Count {
    LOCK_TABLE
        .try_with(|table| table.try_borrow().map_or(0, |t| t.count(owner)))
        .unwrap_or(0)
}

/// Number of mutexes the calling thread currently holds; zero once the
/// thread's table has been torn down.
pub fn held_count() -> usize {
    LOCK_TABLE
        .try_with(|table| table.try_borrow().map_or(0, |t| t.len()))
        .unwrap_or(0)
}
