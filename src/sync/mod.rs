pub mod lock_table;
pub mod recursive_shared;

use std::marker::PhantomData;

use lock_api::GuardNoSend;

/// The exclusive/shared locking surface expected by scope guards.
///
/// Release goes through `unlock` or `unlock_shared`; for recursive
/// implementations both may resolve to the same routine, since the lock
/// itself knows which mode the calling thread holds.
pub trait SharedMutex {
    fn lock(&self);
    fn try_lock(&self) -> bool;
    fn unlock(&self);
    fn lock_shared(&self);
    fn try_lock_shared(&self) -> bool;
    fn unlock_shared(&self);
}

/// Holds exclusive access until dropped.
///
/// Not `Send`: the release has to run on the thread that acquired.
#[must_use = "if unused the lock is released immediately"]
pub struct ExclusiveGuard<'a, M: SharedMutex + ?Sized> {
    mutex: &'a M,
    _marker: PhantomData<GuardNoSend>,
}

impl<'a, M: SharedMutex + ?Sized> ExclusiveGuard<'a, M> {
    pub fn new(mutex: &'a M) -> Self {
        mutex.lock();
        Self {
            mutex,
            _marker: PhantomData,
        }
    }

    pub fn try_new(mutex: &'a M) -> Option<Self> {
        mutex.try_lock().then(|| Self {
            mutex,
            _marker: PhantomData,
        })
    }

    pub fn mutex(&self) -> &'a M {
        self.mutex
    }
}

impl<M: SharedMutex + ?Sized> Drop for ExclusiveGuard<'_, M> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

/// Holds shared access until dropped.
#[must_use = "if unused the lock is released immediately"]
pub struct SharedGuard<'a, M: SharedMutex + ?Sized> {
    mutex: &'a M,
    _marker: PhantomData<GuardNoSend>,
}

impl<'a, M: SharedMutex + ?Sized> SharedGuard<'a, M> {
    pub fn new(mutex: &'a M) -> Self {
        mutex.lock_shared();
        Self {
            mutex,
            _marker: PhantomData,
        }
    }

    pub fn try_new(mutex: &'a M) -> Option<Self> {
        mutex.try_lock_shared().then(|| Self {
            mutex,
            _marker: PhantomData,
        })
    }

    pub fn mutex(&self) -> &'a M {
        self.mutex
    }
}

impl<M: SharedMutex + ?Sized> Drop for SharedGuard<'_, M> {
    fn drop(&mut self) {
        self.mutex.unlock_shared();
    }
}

#[cfg(test)]
mod tests {
    use crate::sync::{ExclusiveGuard, SharedGuard, SharedMutex};
    use std::cell::{Cell, RefCell};

    // Records calls, lets the test decide whether try_* succeed
    #[derive(Default)]
    struct CallLog {
        calls: RefCell<Vec<&'static str>>,
        refuse: Cell<bool>,
    }
    impl SharedMutex for CallLog {
        fn lock(&self) {
            self.calls.borrow_mut().push("lock");
        }
        fn try_lock(&self) -> bool {
            self.calls.borrow_mut().push("try_lock");
            !self.refuse.get()
        }
        fn unlock(&self) {
            self.calls.borrow_mut().push("unlock");
        }
        fn lock_shared(&self) {
            self.calls.borrow_mut().push("lock_shared");
        }
        fn try_lock_shared(&self) -> bool {
            self.calls.borrow_mut().push("try_lock_shared");
            !self.refuse.get()
        }
        fn unlock_shared(&self) {
            self.calls.borrow_mut().push("unlock_shared");
        }
    }

    #[test]
    fn guards_pair_acquire_with_release() {
        let mu = CallLog::default();
        {
            let _shared = SharedGuard::new(&mu);
            let _exclusive = ExclusiveGuard::new(&mu);
        }
        // Dropped in reverse order of declaration
        assert_eq!(
            *mu.calls.borrow(),
            ["lock_shared", "lock", "unlock", "unlock_shared"]
        );
    }

    #[test]
    fn failed_try_releases_nothing() {
        let mu = CallLog::default();
        mu.refuse.set(true);
        assert!(ExclusiveGuard::try_new(&mu).is_none());
        assert!(SharedGuard::try_new(&mu).is_none());
        assert_eq!(*mu.calls.borrow(), ["try_lock", "try_lock_shared"]);

        mu.refuse.set(false);
        mu.calls.borrow_mut().clear();
        drop(ExclusiveGuard::try_new(&mu).unwrap());
        drop(SharedGuard::try_new(&mu).unwrap());
        assert_eq!(
            *mu.calls.borrow(),
            ["try_lock", "unlock", "try_lock_shared", "unlock_shared"]
        );
    }

    #[test]
    fn guard_over_trait_object() {
        let mu = CallLog::default();
        let dyn_mu: &dyn SharedMutex = &mu;
        let guard = SharedGuard::new(dyn_mu);
        guard.mutex().lock_shared();
        guard.mutex().unlock_shared();
        drop(guard);
        assert_eq!(mu.calls.borrow().len(), 4);
    }
}
