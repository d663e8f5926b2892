//! Scheduler trace points.
//!
//! With the `tracing` feature enabled every hook emits a `log` record under
//! the `kestrel::trace` target. Without it the hooks compile to nothing.
use kestrel_khal::CpuId;

const TARGET: &str = "kestrel::trace";

#[allow(unused)]
#[inline(always)]
pub(crate) fn thread_new(thread: usize, name: &'static str) {
    #[cfg(feature = "tracing")]
    log::trace!(target: TARGET, "thread_new {} {}", thread, name);
}

#[allow(unused)]
#[inline(always)]
pub(crate) fn thread_exec_begin(cpu: CpuId, name: &'static str) {
    #[cfg(feature = "tracing")]
    log::trace!(target: TARGET, "cpu{} exec_begin {}", cpu, name);
}

#[allow(unused)]
#[inline(always)]
pub(crate) fn thread_exec_end(cpu: CpuId, name: &'static str) {
    #[cfg(feature = "tracing")]
    log::trace!(target: TARGET, "cpu{} exec_end {}", cpu, name);
}

#[allow(unused)]
#[inline(always)]
pub(crate) fn thread_ready_begin(name: &'static str) {
    #[cfg(feature = "tracing")]
    log::trace!(target: TARGET, "ready_begin {}", name);
}

#[allow(unused)]
#[inline(always)]
pub(crate) fn thread_ready_end(name: &'static str) {
    #[cfg(feature = "tracing")]
    log::trace!(target: TARGET, "ready_end {}", name);
}

#[allow(unused)]
#[inline(always)]
pub(crate) fn slice_expired(cpu: CpuId, name: &'static str) {
    #[cfg(feature = "tracing")]
    log::trace!(target: TARGET, "cpu{} slice_expired {}", cpu, name);
}

#[allow(unused)]
#[inline(always)]
pub(crate) fn system_idle(cpu: CpuId) {
    #[cfg(feature = "tracing")]
    log::trace!(target: TARGET, "cpu{} system_idle", cpu);
}

#[allow(unused)]
#[inline(always)]
pub(crate) fn isr_enter(cpu: CpuId) {
    #[cfg(feature = "tracing")]
    log::trace!(target: TARGET, "cpu{} isr_enter", cpu);
}

#[allow(unused)]
#[inline(always)]
pub(crate) fn isr_exit(cpu: CpuId) {
    #[cfg(feature = "tracing")]
    log::trace!(target: TARGET, "cpu{} isr_exit", cpu);
}

#[allow(unused)]
#[inline(always)]
pub(crate) fn isr_exit_to_scheduler(cpu: CpuId) {
    #[cfg(feature = "tracing")]
    log::trace!(target: TARGET, "cpu{} isr_exit_to_scheduler", cpu);
}
