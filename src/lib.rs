//! A reader-writer lock that the holding thread can acquire again, in either
//! mode, on top of any [`lock_api::RawRwLock`].
//!
//! ```
//! use recursive_shared_mutex::{LockState, RecursiveSharedMutex};
//!
//! let mu: RecursiveSharedMutex = RecursiveSharedMutex::new();
//! let _read = mu.read();
//! {
//!     // Upgrade while reading, then read again while writing
//!     let _write = mu.write();
//!     let _nested = mu.read();
//!     assert_eq!(mu.state(), LockState::Exclusive(3));
//! }
//! assert_eq!(mu.state(), LockState::Exclusive(1));
//! ```

pub mod sync;

pub use sync::{
    lock_table::{held_count, LockState, MutexId},
    recursive_shared::RecursiveSharedMutex,
    ExclusiveGuard, SharedGuard, SharedMutex,
};
