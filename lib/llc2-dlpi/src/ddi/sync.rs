// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Safe abstractions for synchronization primitives.
//!
//! The engine's locks form a fixed hierarchy: the global link lock,
//! then a per-adapter lock, then a per-link lock, with the adapter's
//! own state as a leaf below them all. A [`KMutex`] may be created
//! with a [`LockTier`], in which case every acquisition checks that
//! the calling thread holds no lock of the same or a lower-ranked
//! (later) tier.
use core::ops::Deref;
use core::ops::DerefMut;
use std::cell::Cell;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Duration;

/// A rank in the lock hierarchy. Locks must be taken in ascending
/// order.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[repr(u8)]
pub enum LockTier {
    Global = 1,
    Ppa = 2,
    Link = 3,
    Mac = 4,
}

const TIERS: usize = 5;

std::thread_local! {
    static HELD: Cell<[u8; TIERS]> = const { Cell::new([0; TIERS]) };
}

/// Record that the current thread holds a lock of some tier. The
/// count is released on drop.
struct TierHeld {
    tier: LockTier,
}

impl TierHeld {
    fn acquire(tier: LockTier) -> Self {
        HELD.with(|held| {
            let mut counts = held.get();
            debug_assert!(
                counts[tier as usize..].iter().all(|c| *c == 0),
                "lock order violation: acquiring {tier:?} while holding \
                 {counts:?}"
            );
            counts[tier as usize] += 1;
            held.set(counts);
        });
        Self { tier }
    }
}

impl Drop for TierHeld {
    fn drop(&mut self) {
        HELD.with(|held| {
            let mut counts = held.get();
            counts[self.tier as usize] =
                counts[self.tier as usize].saturating_sub(1);
            held.set(counts);
        });
    }
}

/// Is the calling thread holding any lock of `tier`?
pub fn tier_held(tier: LockTier) -> bool {
    HELD.with(|held| held.get()[tier as usize] != 0)
}

/// Exposes a mutex(9F)-like API in a safe manner.
///
/// We name it `KMutex` (Kernel Mutex) on purpose. The API for a kernel
/// mutex isn't quite the same as a userland `Mutex`, and there's no
/// reason that we have to use that exact name. Using `KMutex` makes it
/// obvious that we are using a mutex, but not the one that comes from
/// std.
///
/// A poisoned lock is treated as still usable.
pub struct KMutex<T> {
    inner: Mutex<T>,
    tier: Option<LockTier>,
}

pub struct KMutexGuard<'a, T: 'a> {
    guard: MutexGuard<'a, T>,
    tier: Option<TierHeld>,
}

impl<T> Deref for KMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> DerefMut for KMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

pub struct LockTaken;

impl<T> KMutex<T> {
    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn new(val: T) -> Self {
        KMutex { inner: Mutex::new(val), tier: None }
    }

    /// Create a mutex which takes part in the lock hierarchy at `tier`.
    pub fn with_tier(val: T, tier: LockTier) -> Self {
        KMutex { inner: Mutex::new(val), tier: Some(tier) }
    }

    pub fn lock(&self) -> KMutexGuard<'_, T> {
        let tier = self.tier.map(TierHeld::acquire);
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        KMutexGuard { guard, tier }
    }

    pub fn try_lock(&self) -> Result<KMutexGuard<'_, T>, LockTaken> {
        match self.inner.try_lock() {
            Ok(guard) => {
                let tier = self.tier.map(TierHeld::acquire);
                Ok(KMutexGuard { guard, tier })
            }
            Err(std::sync::TryLockError::Poisoned(p)) => {
                let tier = self.tier.map(TierHeld::acquire);
                Ok(KMutexGuard { guard: p.into_inner(), tier })
            }
            Err(std::sync::TryLockError::WouldBlock) => Err(LockTaken),
        }
    }
}

/// A wrapper around a reader/writer lock, in the manner of
/// rwlock(9F). These do not take part in the tier check: they guard
/// the adapter table, which is read from every tier.
pub struct KRwLock<T> {
    inner: RwLock<T>,
}

pub struct KRwLockReadGuard<'a, T: 'a> {
    guard: std::sync::RwLockReadGuard<'a, T>,
}

pub struct KRwLockWriteGuard<'a, T: 'a> {
    guard: std::sync::RwLockWriteGuard<'a, T>,
}

impl<T> Deref for KRwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> Deref for KRwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> DerefMut for KRwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

impl<T> KRwLock<T> {
    pub fn new(val: T) -> Self {
        KRwLock { inner: RwLock::new(val) }
    }

    pub fn read(&self) -> KRwLockReadGuard<'_, T> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        KRwLockReadGuard { guard }
    }

    pub fn write(&self) -> KRwLockWriteGuard<'_, T> {
        let guard =
            self.inner.write().unwrap_or_else(PoisonError::into_inner);
        KRwLockWriteGuard { guard }
    }
}

/// A condition variable paired with a [`KMutex`], in the manner of
/// condvar(9F).
pub struct KCondvar {
    cv: Condvar,
}

impl KCondvar {
    pub fn new() -> Self {
        Self { cv: Condvar::new() }
    }

    pub fn notify_one(&self) {
        self.cv.notify_one();
    }

    pub fn notify_all(&self) {
        self.cv.notify_all();
    }

    /// Release the lock held by `guard`, block until woken, and
    /// reacquire it.
    pub fn wait<'a, T: 'a>(
        &self,
        guard: KMutexGuard<'a, T>,
    ) -> KMutexGuard<'a, T> {
        let KMutexGuard { guard, tier } = guard;
        let guard = self.cv.wait(guard).unwrap_or_else(PoisonError::into_inner);
        KMutexGuard { guard, tier }
    }

    /// As [`KCondvar::wait`], but give up after `timeout`. The second
    /// value is `true` when the wait timed out.
    pub fn wait_timeout<'a, T: 'a>(
        &self,
        guard: KMutexGuard<'a, T>,
        timeout: Duration,
    ) -> (KMutexGuard<'a, T>, bool) {
        let KMutexGuard { guard, tier } = guard;
        let (guard, res) = self
            .cv
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        (KMutexGuard { guard, tier }, res.timed_out())
    }
}

impl Default for KCondvar {
    fn default() -> Self {
        Self::new()
    }
}
