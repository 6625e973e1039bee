//! This module contains `SuspendibleThreadSet`.  Its purposes include:
//!
//! -   letting concurrent threads (refinement workers, the young RSet sampler) declare the
//!     stretches of work during which they must not run at the same time as a pause,
//! -   letting such threads check whether a pause is waiting for them, and
//! -   letting the pause wait until every joined thread has either left the set or parked
//!     at a yield point.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::util::lock_rank::{LeafRank, RankedCondvar, RankedMutex};

/// The synchronized part of `SuspendibleThreadSet`.
#[derive(Default)]
struct SuspendibleThreadSetSync {
    /// Threads currently joined.
    nthreads: usize,
    /// Joined threads parked in `yield_now`.
    nthreads_stopped: usize,
    /// A pause is synchronizing or synchronized.
    suspend_all: bool,
}

#[derive(Default)]
pub struct SuspendibleThreadSet {
    sync: RankedMutex<SuspendibleThreadSetSync, LeafRank>,
    /// Mirrors `sync.suspend_all` so that `should_yield` does not take the lock.
    suspend_all: AtomicBool,
    /// Notified whenever any of the counters or `suspend_all` changes.
    changed: RankedCondvar,
}

impl SuspendibleThreadSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the set, waiting first if a pause is in progress.
    pub fn join(&self) -> SuspendibleThreadSetJoiner<'_> {
        let mut sync = self.sync.lock();
        while sync.suspend_all {
            sync = self.changed.wait(sync);
        }
        sync.nthreads += 1;
        SuspendibleThreadSetJoiner { sts: self }
    }

    fn leave(&self) {
        let mut sync = self.sync.lock();
        debug_assert!(sync.nthreads > 0);
        sync.nthreads -= 1;
        if sync.suspend_all {
            self.changed.notify_all();
        }
    }

    /// Is a pause waiting for joined threads to yield?
    #[inline]
    pub fn should_yield(&self) -> bool {
        self.suspend_all.load(Ordering::Relaxed)
    }

    fn yield_now(&self) {
        if !self.should_yield() {
            return;
        }
        let mut sync = self.sync.lock();
        if !sync.suspend_all {
            return;
        }
        sync.nthreads_stopped += 1;
        trace!(
            "Thread yielded. stopped/joined: {}/{}",
            sync.nthreads_stopped,
            sync.nthreads
        );
        self.changed.notify_all();
        while sync.suspend_all {
            sync = self.changed.wait(sync);
        }
        debug_assert!(sync.nthreads_stopped > 0);
        sync.nthreads_stopped -= 1;
        self.changed.notify_all();
    }

    /// Stop the set: block until every joined thread has left or yielded. New joiners wait
    /// until `desynchronize`.
    pub fn synchronize(&self) {
        let mut sync = self.sync.lock();
        debug_assert!(!sync.suspend_all, "Only one synchronizer at a time");
        sync.suspend_all = true;
        self.suspend_all.store(true, Ordering::Relaxed);
        while sync.nthreads_stopped < sync.nthreads {
            sync = self.changed.wait(sync);
        }
        trace!("Suspendible thread set synchronized, {} yielded", sync.nthreads_stopped);
    }

    pub fn desynchronize(&self) {
        let mut sync = self.sync.lock();
        debug_assert!(sync.suspend_all, "Not synchronized");
        debug_assert_eq!(sync.nthreads_stopped, sync.nthreads);
        sync.suspend_all = false;
        self.suspend_all.store(false, Ordering::Relaxed);
        self.changed.notify_all();
    }

    pub fn is_synchronized(&self) -> bool {
        let sync = self.sync.lock();
        sync.suspend_all && sync.nthreads_stopped == sync.nthreads
    }
}

/// Membership in a `SuspendibleThreadSet`. Leaves the set when dropped.
pub struct SuspendibleThreadSetJoiner<'a> {
    sts: &'a SuspendibleThreadSet,
}

impl SuspendibleThreadSetJoiner<'_> {
    pub fn should_yield(&self) -> bool {
        self.sts.should_yield()
    }

    /// Park until the pause is over, if one is waiting.
    pub fn yield_now(&self) {
        self.sts.yield_now()
    }
}

impl Drop for SuspendibleThreadSetJoiner<'_> {
    fn drop(&mut self) {
        self.sts.leave()
    }
}
