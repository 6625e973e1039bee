//! Rank-checked locks.
//!
//! Every lock in the refinement subsystem carries its rank as a type parameter. A thread may
//! only acquire a lock whose rank is strictly higher than every rank it already holds. Debug
//! builds check this on every acquisition; release builds compile the check away.
//!
//! The order, from outermost to innermost, is:
//!
//! 1.  [`WorkerMonitorRank`]: the private monitor of a refinement worker,
//! 2.  [`CompletedBufferListRank`]: the monitor of the dirty card queue set,
//! 3.  [`SharedQueueRank`]: the lock of the shared dirty card queue,
//! 4.  [`FreeListRank`]: the buffer free list,
//! 5.  [`LeafRank`]: locks that never have anything acquired under them.

use std::cell::Cell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard, WaitTimeoutResult};
use std::time::Duration;

/// A compile-time lock rank.
pub trait LockRank: 'static + Send + Sync {
    const RANK: u32;
    const NAME: &'static str;
}

macro_rules! define_rank {
    ($name:ident, $rank:expr) => {
        pub struct $name;
        impl LockRank for $name {
            const RANK: u32 = $rank;
            const NAME: &'static str = stringify!($name);
        }
    };
}

define_rank!(WorkerMonitorRank, 1);
define_rank!(CompletedBufferListRank, 2);
define_rank!(SharedQueueRank, 3);
define_rank!(FreeListRank, 4);
define_rank!(LeafRank, 5);

thread_local! {
    /// Bit `r` is set while this thread holds a lock of rank `r`.
    static HELD_RANKS: Cell<u32> = const { Cell::new(0) };
}

fn highest_held_rank() -> u32 {
    HELD_RANKS.with(|held| 32 - held.get().leading_zeros())
}

fn on_acquire<R: LockRank>() {
    if cfg!(debug_assertions) {
        let highest = highest_held_rank();
        assert!(
            R::RANK > highest,
            "Lock rank violation: acquiring {} (rank {}) while holding rank {}",
            R::NAME,
            R::RANK,
            highest
        );
        HELD_RANKS.with(|held| held.set(held.get() | (1 << R::RANK)));
    }
}

fn on_release<R: LockRank>() {
    if cfg!(debug_assertions) {
        HELD_RANKS.with(|held| held.set(held.get() & !(1 << R::RANK)));
    }
}

/// A mutex tagged with a lock rank.
pub struct RankedMutex<T, R: LockRank> {
    inner: Mutex<T>,
    _rank: PhantomData<R>,
}

impl<T, R: LockRank> RankedMutex<T, R> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            _rank: PhantomData,
        }
    }

    pub fn lock(&self) -> RankedMutexGuard<'_, T, R> {
        on_acquire::<R>();
        RankedMutexGuard {
            guard: Some(self.inner.lock().unwrap()),
            _rank: PhantomData,
        }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner().unwrap()
    }
}

impl<T: Default, R: LockRank> Default for RankedMutex<T, R> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct RankedMutexGuard<'a, T, R: LockRank> {
    // Only `None` while the guard is handed to a condition variable.
    guard: Option<MutexGuard<'a, T>>,
    _rank: PhantomData<R>,
}

impl<T, R: LockRank> Deref for RankedMutexGuard<'_, T, R> {
    type Target = T;
    fn deref(&self) -> &T {
        self.guard.as_deref().unwrap()
    }
}

impl<T, R: LockRank> DerefMut for RankedMutexGuard<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_deref_mut().unwrap()
    }
}

impl<T, R: LockRank> Drop for RankedMutexGuard<'_, T, R> {
    fn drop(&mut self) {
        if self.guard.take().is_some() {
            on_release::<R>();
        }
    }
}

/// A condition variable used together with a [`RankedMutex`]. The rank stays recorded as held
/// while the thread is blocked, since the thread cannot acquire anything else meanwhile.
#[derive(Default)]
pub struct RankedCondvar {
    inner: Condvar,
}

impl RankedCondvar {
    pub const fn new() -> Self {
        Self {
            inner: Condvar::new(),
        }
    }

    pub fn wait<'a, T, R: LockRank>(
        &self,
        mut guard: RankedMutexGuard<'a, T, R>,
    ) -> RankedMutexGuard<'a, T, R> {
        let inner = guard.guard.take().unwrap();
        guard.guard = Some(self.inner.wait(inner).unwrap());
        guard
    }

    pub fn wait_timeout<'a, T, R: LockRank>(
        &self,
        mut guard: RankedMutexGuard<'a, T, R>,
        timeout: Duration,
    ) -> (RankedMutexGuard<'a, T, R>, WaitTimeoutResult) {
        let inner = guard.guard.take().unwrap();
        let (inner, result) = self.inner.wait_timeout(inner, timeout).unwrap();
        guard.guard = Some(inner);
        (guard, result)
    }

    pub fn notify_one(&self) {
        self.inner.notify_one();
    }

    pub fn notify_all(&self) {
        self.inner.notify_all();
    }
}
