//! Counting semaphore.
use super::SpinLock;
use crate::kernel::Kernel;
use crate::kernel::wait_queue::{Blockable, WaitQueue, WaitQueueError, WaitResult};
use crate::time::Timeout;
use kestrel_khal::HardwareAbstractionLayer;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TakeError {
    /// No count available and the caller did not want to wait.
    #[error("Semaphore is not available")]
    Busy,
    #[error("Timed out waiting on semaphore")]
    TimedOut,
    /// The semaphore was reset while waiting.
    #[error("Semaphore was reset")]
    Reset,
    /// The wait was cancelled by other means, such as suspending the waiter.
    #[error("Wait on semaphore was cancelled")]
    Cancelled,
}

struct Count {
    count: u32,
    limit: u32,
    resets: u32,
}

/// Semaphore with a count limit. Waiters are woken most urgent first.
pub struct Semaphore {
    queue: WaitQueue,
    count: SpinLock<Count>,
}

impl Blockable for Semaphore {
    fn wait_queue(&self) -> &WaitQueue {
        &self.queue
    }
}

impl Semaphore {
    pub fn new<H: HardwareAbstractionLayer>(
        kernel: &Kernel<H>,
        initial: u32,
        limit: u32,
    ) -> Result<Semaphore, WaitQueueError> {
        let queue = kernel.wait_queue_create()?;
        Ok(Semaphore {
            queue,
            count: SpinLock::new(Count {
                count: initial.min(limit),
                limit,
                resets: 0,
            }),
        })
    }

    /// Hand a count to the first waiter, or increment the count up to the
    /// limit if nobody is waiting.
    pub fn give<H: HardwareAbstractionLayer>(&self, kernel: &Kernel<H>) {
        let mut count = self.count.lock(kernel.hal());
        if kernel.unpend_first(self).is_none() && count.count < count.limit {
            count.count += 1;
        }
        kernel.reschedule_locked(count);
    }

    #[track_caller]
    pub fn take<H: HardwareAbstractionLayer>(
        &self,
        kernel: &Kernel<H>,
        timeout: Timeout,
    ) -> Result<(), TakeError> {
        let mut count = self.count.lock(kernel.hal());
        if count.count > 0 {
            count.count -= 1;
            return Ok(());
        }
        if timeout.is_no_wait() {
            return Err(TakeError::Busy);
        }
        let resets = count.resets;
        match kernel.pend_locked(count, self, timeout) {
            WaitResult::Success(_) => Ok(()),
            WaitResult::TimedOut => Err(TakeError::TimedOut),
            WaitResult::Cancelled if self.count.lock(kernel.hal()).resets != resets => {
                Err(TakeError::Reset)
            }
            WaitResult::Cancelled => Err(TakeError::Cancelled),
        }
    }

    pub fn try_take<H: HardwareAbstractionLayer>(&self, kernel: &Kernel<H>) -> Result<(), TakeError> {
        self.take(kernel, Timeout::NoWait)
    }

    /// Zero the count and fail every waiter with [`TakeError::Reset`].
    pub fn reset<H: HardwareAbstractionLayer>(&self, kernel: &Kernel<H>) {
        let mut count = self.count.lock(kernel.hal());
        count.count = 0;
        count.resets = count.resets.wrapping_add(1);
        kernel.wait_queue_cancel(self);
        kernel.reschedule_locked(count);
    }

    pub fn count<H: HardwareAbstractionLayer>(&self, kernel: &Kernel<H>) -> u32 {
        self.count.lock(kernel.hal()).count
    }

    /// Release the wait queue. Fatal if threads are still waiting.
    #[track_caller]
    pub fn destroy<H: HardwareAbstractionLayer>(self, kernel: &Kernel<H>) {
        kernel.wait_queue_destroy(self.queue);
    }
}
