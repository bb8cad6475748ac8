//! Synchronization primitives.
//!
//! On a single CPU with preemptive timer interrupts, the critical-section
//! primitive for core data structures is "interrupts off for the duration"
//! ([`InterruptGuard`]). Spin locks come from the `spin` crate; the
//! counting [`Semaphore`] parks long waiters through the scheduler like
//! any blocking syscall.

use spin::Mutex;

use crate::process::pcb::ProcessState;
use crate::sched::{self, SwitchAction};

/// RAII interrupt-disable guard. Nesting-safe: only the outermost guard
/// that actually disabled interrupts re-enables them.
pub struct InterruptGuard {
    was_enabled: bool,
}

impl InterruptGuard {
    pub fn new() -> Self {
        let was_enabled = crate::arch::interrupts_enabled();
        crate::arch::disable_interrupts();
        Self { was_enabled }
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            crate::arch::enable_interrupts();
        }
    }
}

/// A spin mutex that also masks interrupts while held, for state shared
/// with interrupt context.
pub struct IrqSafeMutex<T> {
    inner: Mutex<T>,
}

pub struct IrqSafeGuard<'a, T> {
    guard: spin::MutexGuard<'a, T>,
    _irq: InterruptGuard,
}

impl<T> IrqSafeMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> IrqSafeGuard<'_, T> {
        let irq = InterruptGuard::new();
        IrqSafeGuard {
            guard: self.inner.lock(),
            _irq: irq,
        }
    }
}

impl<T> core::ops::Deref for IrqSafeGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> core::ops::DerefMut for IrqSafeGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Outcome of a semaphore acquire attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// A permit was available; the caller holds it.
    Acquired,
    /// The caller parked; the action hands the CPU onward and the permit
    /// is granted on wake.
    Parked(SwitchAction),
}

/// Counting semaphore whose waiters park in the scheduler (WAITING state)
/// and wake FIFO on release.
pub struct Semaphore {
    state: Mutex<SemState>,
}

struct SemState {
    permits: u32,
    waiters: crate::sched::queue::SlotQueue,
}

impl Semaphore {
    pub const fn new(permits: u32) -> Self {
        Self {
            state: Mutex::new(SemState {
                permits,
                waiters: crate::sched::queue::SlotQueue::new(),
            }),
        }
    }

    /// Take a permit or park the current process until one is released.
    pub fn acquire(&self) -> AcquireOutcome {
        let mut state = self.state.lock();
        if state.permits > 0 {
            state.permits -= 1;
            return AcquireOutcome::Acquired;
        }
        let Some(slot) = sched::current_slot() else {
            // No process context (early boot): busy permits only.
            return AcquireOutcome::Acquired;
        };
        state.waiters.enqueue(slot);
        drop(state);
        AcquireOutcome::Parked(sched::block_current(ProcessState::Waiting))
    }

    /// Take a permit only if one is immediately available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.permits > 0 {
            state.permits -= 1;
            true
        } else {
            false
        }
    }

    /// Release a permit, handing it directly to the oldest waiter if one
    /// is parked.
    pub fn release(&self) {
        let mut state = self.state.lock();
        if let Some(slot) = state.waiters.dequeue() {
            drop(state);
            sched::wake(slot);
        } else {
            state.permits += 1;
        }
    }

    pub fn available_permits(&self) -> u32 {
        self.state.lock().permits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_guard_restores_state() {
        crate::arch::enable_interrupts();
        {
            let _g = InterruptGuard::new();
            assert!(!crate::arch::interrupts_enabled());
            {
                let _inner = InterruptGuard::new();
                assert!(!crate::arch::interrupts_enabled());
            }
            // Inner guard must not re-enable early.
            assert!(!crate::arch::interrupts_enabled());
        }
        assert!(crate::arch::interrupts_enabled());
    }

    #[test]
    fn irq_safe_mutex_masks_interrupts_while_held() {
        crate::arch::enable_interrupts();
        let m = IrqSafeMutex::new(5);
        {
            let mut guard = m.lock();
            *guard += 1;
            assert!(!crate::arch::interrupts_enabled());
        }
        assert!(crate::arch::interrupts_enabled());
        assert_eq!(*m.lock(), 6);
    }

    #[test]
    fn semaphore_counts_permits() {
        let sem = Semaphore::new(2);
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.release();
        assert!(sem.try_acquire());
        sem.release();
        sem.release();
        assert_eq!(sem.available_permits(), 2);
    }
}
