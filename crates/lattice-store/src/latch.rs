//! The coarse exclusive store latch.

use parking_lot::{Condvar, Mutex};

/// A manual lock/unlock latch usable through `&self`.
///
/// The latch may be released by a different call site than the one that
/// acquired it (the `Store` trait exposes lock/unlock rather than a guard),
/// so this is a condvar-backed flag rather than a `MutexGuard`.
#[derive(Debug)]
pub(crate) struct Latch {
    locked: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    pub(crate) const fn new() -> Self {
        Self {
            locked: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) {
        let mut locked = self.locked.lock();
        while *locked {
            self.cv.wait(&mut locked);
        }
        *locked = true;
    }

    pub(crate) fn unlock(&self) {
        let mut locked = self.locked.lock();
        *locked = false;
        self.cv.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_latch_excludes_across_threads() {
        let latch = Arc::new(Latch::new());
        let shared = Arc::new(Mutex::new(0_u32));

        latch.lock();
        let l2 = Arc::clone(&latch);
        let s2 = Arc::clone(&shared);
        let handle = std::thread::spawn(move || {
            l2.lock();
            *s2.lock() = 2;
            l2.unlock();
        });

        // The spawned thread must not get in while we hold the latch.
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(*shared.lock(), 0);
        latch.unlock();
        handle.join().unwrap();
        assert_eq!(*shared.lock(), 2);
    }
}
