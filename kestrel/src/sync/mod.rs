//! Locking primitives and the kernel synchronization objects built on wait
//! queues.
//!
//! - `SpinLock`: multi-core spinlock that masks local interrupts while held.
//!   The scheduler state is protected by one of these; kernel objects use
//!   their own and hand it over to the scheduler when they block.
//! - `Semaphore`: counting semaphore with priority-ordered waiters.
pub mod semaphore;
pub mod spinlock;

pub use semaphore::{Semaphore, TakeError};
pub use spinlock::{IrqKey, SpinLock, SpinLockGuard};

pub use ::core::sync::atomic;

pub type TryLockResult<Guard> = Result<Guard, TryLockError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryLockError {
    WouldBlock,
}
