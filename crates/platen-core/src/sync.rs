// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Lock acquisition that survives poisoning.
//
// A poisoned `RwLock` only records that some thread panicked while
// holding the guard. Object state is kept structurally valid under the
// single-writer discipline, so the server keeps serving with the
// recovered data instead of cascading the panic through every other
// connection task.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Poison-recovering accessors used everywhere a registry or object
/// lock is taken.
pub trait LockExt<T> {
    fn read_lock(&self) -> RwLockReadGuard<'_, T>;
    fn write_lock(&self) -> RwLockWriteGuard<'_, T>;
}

impl<T> LockExt<T> for RwLock<T> {
    fn read_lock(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn read_and_write_pass_through() {
        let lock = RwLock::new(5);
        assert_eq!(*lock.read_lock(), 5);
        *lock.write_lock() = 7;
        assert_eq!(*lock.read_lock(), 7);
    }

    #[test]
    fn poisoned_lock_still_yields_the_data() {
        let lock = Arc::new(RwLock::new(1));
        let poisoner = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.write_lock();
            panic!("poison the lock");
        })
        .join();

        assert!(lock.is_poisoned());
        assert_eq!(*lock.read_lock(), 1);
        *lock.write_lock() = 2;
        assert_eq!(*lock.read_lock(), 2);
    }
}
