use super::{TryLockError, TryLockResult};
use crate::kernel::exception::RuntimeError;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use kestrel_khal::InterruptController;

const NO_OWNER: usize = usize::MAX;

/// Local interrupt state to restore when a spinlock is released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub struct IrqKey {
    enabled: bool,
}

impl IrqKey {
    /// Interrupts were enabled before the lock was taken, so no other lock
    /// was held on this core.
    pub const fn interrupts_enabled(self) -> bool {
        self.enabled
    }
}

/// Spinlock that disables local interrupts while it is held.
///
/// Taking the lock again on the core that holds it is a fatal error.
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    owner: AtomicUsize,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> SpinLock<T> {
        SpinLock {
            locked: AtomicBool::new(false),
            owner: AtomicUsize::new(NO_OWNER),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    #[track_caller]
    pub fn lock<'a>(&'a self, irq: &'a dyn InterruptController) -> SpinLockGuard<'a, T> {
        let key = IrqKey {
            enabled: irq.acquire(),
        };
        let cpu = irq.current_cpu();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            if self.owner.load(Ordering::Relaxed) == cpu {
                irq.restore(key.enabled);
                runtime_error!(RuntimeError::RecursiveLock);
            }
            core::hint::spin_loop();
        }
        self.owner.store(cpu, Ordering::Relaxed);
        SpinLockGuard {
            lock: self,
            irq,
            key: Some(key),
        }
    }

    pub fn try_lock<'a>(&'a self, irq: &'a dyn InterruptController) -> TryLockResult<SpinLockGuard<'a, T>> {
        let key = IrqKey {
            enabled: irq.acquire(),
        };
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            irq.restore(key.enabled);
            return Err(TryLockError::WouldBlock);
        }
        self.owner.store(irq.current_cpu(), Ordering::Relaxed);
        Ok(SpinLockGuard {
            lock: self,
            irq,
            key: Some(key),
        })
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn release(&self) {
        self.owner.store(NO_OWNER, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
    }
}

pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
    irq: &'a dyn InterruptController,
    key: Option<IrqKey>,
}

impl<'a, T: ?Sized> SpinLockGuard<'a, T> {
    pub fn irq_key(&self) -> IrqKey {
        self.key.unwrap_or(IrqKey { enabled: false })
    }

    /// Release the lock without restoring interrupts. The caller becomes
    /// responsible for the returned key.
    pub fn unlock_keeping_irq(mut self) -> IrqKey {
        let key = self.irq_key();
        self.key = None;
        key
    }

    /// Take over the interrupt state of a lock released with
    /// [`SpinLockGuard::unlock_keeping_irq`]. The key this guard acquired
    /// is discarded; it saw interrupts already masked.
    pub(crate) fn replace_irq_key(&mut self, key: IrqKey) {
        self.key = Some(key);
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release();
        if let Some(key) = self.key {
            self.irq.restore(key.enabled);
        }
    }
}
