//! Core scheduler: priority queues, sleep/input queues, aging, and the
//! context hand-off.
//!
//! Decisions are separated from mechanics. Every path first updates PCB
//! states and the queue structures under the scheduler lock and produces a
//! [`SwitchAction`]; the architecture hand-off (`dispatch`) then acts on
//! it. The timer IRQ applies its action on return from the interrupt;
//! blocking syscalls apply theirs immediately and never return through the
//! normal path.

use spin::Mutex;

use super::queue::{SleepQueue, SlotQueue};
use crate::process::{pcb::ProcessState, table, MAX_PRIORITY};

/// Ticks between aging passes.
pub const AGING_INTERVAL: u64 = 100;

/// Queue age beyond which a waiter is promoted one priority level.
pub const AGING_THRESHOLD: u32 = 50;

/// Outcome of a scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchAction {
    /// Keep running whatever runs now (possibly nothing).
    None,
    /// Hand the CPU to `next`; `prev` is the preempted process needing a
    /// context save, if any.
    Switch {
        next: usize,
        prev: Option<usize>,
    },
}

pub struct Scheduler {
    ready: [SlotQueue; (MAX_PRIORITY + 1) as usize],
    sleep: SleepQueue,
    input_wait: SlotQueue,
    current: Option<usize>,
    ticks: u64,
    last_aging: u64,
    /// Set while a syscall is mid-block-transition; the timer observes it
    /// and suppresses its own switch.
    defer_switch: bool,
    enabled: bool,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            ready: [const { SlotQueue::new() }; (MAX_PRIORITY + 1) as usize],
            sleep: SleepQueue::new(),
            input_wait: SlotQueue::new(),
            current: None,
            ticks: 0,
            last_aging: 0,
            defer_switch: false,
            enabled: true,
        }
    }

    fn enqueue_ready(&mut self, slot: usize, priority: u32) {
        let level = priority.min(MAX_PRIORITY) as usize;
        self.ready[level].enqueue(slot);
    }

    /// Pop the best ready slot, dropping stale entries whose process is no
    /// longer READY (killed while queued).
    fn pop_best_ready(&mut self) -> Option<usize> {
        for level in 0..self.ready.len() {
            while let Some(slot) = self.ready[level].dequeue() {
                match table::process_mut(slot) {
                    Some(p) if p.state == ProcessState::Ready => return Some(slot),
                    _ => continue,
                }
            }
        }
        None
    }

    fn wake_sleepers(&mut self) {
        while let Some(entry) = self.sleep.pop_due(self.ticks) {
            if let Some(p) = table::process_mut(entry.slot) {
                if p.state == ProcessState::Sleeping {
                    p.state = ProcessState::Ready;
                    let priority = p.priority;
                    self.enqueue_ready(entry.slot, priority);
                }
            }
        }
    }

    fn perform_aging(&mut self) {
        if self.ticks - self.last_aging < AGING_INTERVAL {
            return;
        }
        self.last_aging = self.ticks;

        for level in 1..self.ready.len() {
            let count = self.ready[level].len();
            for _ in 0..count {
                let Some(slot) = self.ready[level].dequeue() else {
                    break;
                };
                let Some(p) = table::process_mut(slot) else {
                    continue;
                };
                if p.state != ProcessState::Ready {
                    continue;
                }
                p.age += 1;
                if p.age > AGING_THRESHOLD {
                    p.priority = (level - 1) as u32;
                    p.age = 0;
                    self.ready[level - 1].enqueue(slot);
                } else {
                    self.ready[level].enqueue(slot);
                }
            }
        }
    }

    /// Mark `slot` running and account the hand-off.
    fn make_current(&mut self, slot: usize) {
        if let Some(p) = table::process_mut(slot) {
            p.state = ProcessState::Running;
            p.time_used = 0;
            p.age = 0;
            p.last_run_time = self.ticks;
        }
        self.current = Some(slot);
    }

    fn pick_and_switch(&mut self, prev: Option<usize>) -> SwitchAction {
        match self.pop_best_ready() {
            Some(next) => {
                self.make_current(next);
                SwitchAction::Switch { next, prev }
            }
            None => {
                self.current = None;
                SwitchAction::None
            }
        }
    }
}

static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());

/// One timer tick. Runs in interrupt context; the returned action is
/// applied on return from the IRQ.
pub fn tick() -> SwitchAction {
    if !SCHEDULER.lock().enabled {
        return SwitchAction::None;
    }

    // Collect orphaned zombies before queue maintenance (the trivial
    // kernel reaper). Runs unlocked: teardown re-enters the scheduler to
    // drop queue entries.
    crate::process::wait::reap_orphans();

    let mut s = SCHEDULER.lock();
    s.ticks += 1;
    s.wake_sleepers();
    s.perform_aging();

    if s.defer_switch {
        // A syscall is mid-transition; charge nothing and stay put.
        return SwitchAction::None;
    }

    match s.current {
        Some(slot) => {
            let Some(p) = table::process_mut(slot) else {
                s.current = None;
                return s.pick_and_switch(None);
            };
            if p.state != ProcessState::Running {
                // The current process blocked or was killed out from under
                // the tick; replace it without charging.
                s.current = None;
                return s.pick_and_switch(None);
            }
            p.time_used += 1;
            p.total_cpu_time += 1;
            if p.time_used >= p.time_slice {
                p.time_used = 0;
                p.state = ProcessState::Ready;
                let priority = p.priority;
                s.enqueue_ready(slot, priority);
                s.current = None;
                s.pick_and_switch(Some(slot))
            } else {
                SwitchAction::None
            }
        }
        None => s.pick_and_switch(None),
    }
}

/// Cooperative yield from process context.
pub fn yield_now() -> SwitchAction {
    let mut s = SCHEDULER.lock();
    let Some(slot) = s.current else {
        return SwitchAction::None;
    };
    if let Some(p) = table::process_mut(slot) {
        p.time_used = 0;
        p.state = ProcessState::Ready;
        let priority = p.priority;
        s.enqueue_ready(slot, priority);
    }
    s.current = None;
    s.pick_and_switch(Some(slot))
}

/// Put the current process to sleep until `ticks_from_now` ticks pass.
pub fn sleep_current(ticks_from_now: u64) -> SwitchAction {
    let mut s = SCHEDULER.lock();
    let Some(slot) = s.current else {
        return SwitchAction::None;
    };
    if let Some(p) = table::process_mut(slot) {
        p.state = ProcessState::Sleeping;
        p.sleep_until = s.ticks + ticks_from_now;
        let wake = p.sleep_until;
        s.sleep.insert(slot, wake);
    }
    s.current = None;
    s.pick_and_switch(None)
}

/// Block the current process (event wait). The caller chooses BLOCKED or
/// WAITING; the wake path is responsible for re-queueing.
pub fn block_current(state: ProcessState) -> SwitchAction {
    debug_assert!(matches!(
        state,
        ProcessState::Blocked | ProcessState::Waiting
    ));
    let mut s = SCHEDULER.lock();
    let Some(slot) = s.current else {
        return SwitchAction::None;
    };
    if let Some(p) = table::process_mut(slot) {
        p.state = state;
    }
    s.current = None;
    s.pick_and_switch(None)
}

/// Block the current process on keyboard input (FIFO wake order).
pub fn block_current_for_input() -> SwitchAction {
    let mut s = SCHEDULER.lock();
    let Some(slot) = s.current else {
        return SwitchAction::None;
    };
    if let Some(p) = table::process_mut(slot) {
        p.state = ProcessState::Blocked;
    }
    s.input_wait.enqueue(slot);
    s.current = None;
    s.pick_and_switch(None)
}

/// Retire the current process (exit path): drop it from current without
/// re-queueing and pick the next runnable process.
pub fn retire_current() -> SwitchAction {
    let mut s = SCHEDULER.lock();
    s.current = None;
    s.pick_and_switch(None)
}

/// Make a blocked or waiting process runnable again. Wakes from interrupt
/// context only enqueue; the switch happens on the next tick.
pub fn wake(slot: usize) {
    let mut s = SCHEDULER.lock();
    if let Some(p) = table::process_mut(slot) {
        if matches!(p.state, ProcessState::Blocked | ProcessState::Waiting) {
            p.state = ProcessState::Ready;
            let priority = p.priority;
            s.enqueue_ready(slot, priority);
        }
    }
}

/// Enqueue a freshly created READY process.
pub fn admit(slot: usize) {
    let mut s = SCHEDULER.lock();
    if let Some(p) = table::process_mut(slot) {
        if p.state == ProcessState::Ready {
            let priority = p.priority;
            s.enqueue_ready(slot, priority);
        }
    }
}

/// Deliver one input character: wake exactly one input-blocked process
/// (FIFO) with the character as its pending syscall return. Returns false
/// when nobody was waiting.
pub fn deliver_input(ch: u8) -> bool {
    let mut s = SCHEDULER.lock();
    while let Some(slot) = s.input_wait.dequeue() {
        let Some(p) = table::process_mut(slot) else {
            continue;
        };
        if p.state != ProcessState::Blocked {
            continue;
        }
        p.pending_syscall_return = ch as u32;
        p.state = ProcessState::Ready;
        let priority = p.priority;
        s.enqueue_ready(slot, priority);
        return true;
    }
    false
}

/// Drop every queue entry referencing `slot` (KILL sweep).
pub fn remove_from_all_queues(slot: usize) {
    let mut s = SCHEDULER.lock();
    for level in 0..s.ready.len() {
        s.ready[level].remove(slot);
    }
    s.sleep.remove(slot);
    s.input_wait.remove(slot);
    if s.current == Some(slot) {
        s.current = None;
    }
}

/// Slot of the RUNNING process, if any.
pub fn current_slot() -> Option<usize> {
    SCHEDULER.lock().current
}

/// Global tick counter.
pub fn ticks() -> u64 {
    SCHEDULER.lock().ticks
}

/// Suppress or re-allow timer-driven switches (blocking-transition guard).
pub fn set_defer_switch(defer: bool) {
    SCHEDULER.lock().defer_switch = defer;
}

pub fn is_switch_deferred() -> bool {
    SCHEDULER.lock().defer_switch
}

/// Enable or disable scheduling entirely (used by tests and early boot).
pub fn set_enabled(enabled: bool) {
    SCHEDULER.lock().enabled = enabled;
}

/// Change a process's priority. A READY process is moved to its new
/// level immediately (re-queued at the tail).
pub fn set_priority(pid: u32, priority: u32) -> Result<(), crate::error::SchedError> {
    if priority > MAX_PRIORITY {
        return Err(crate::error::SchedError::InvalidPriority { priority });
    }
    let (slot, p) =
        table::process_by_pid(pid).ok_or(crate::error::SchedError::NoSuchProcess { pid })?;
    let mut s = SCHEDULER.lock();
    if p.state == ProcessState::Ready {
        for level in 0..s.ready.len() {
            s.ready[level].remove(slot);
        }
        p.priority = priority;
        s.enqueue_ready(slot, priority);
    } else {
        p.priority = priority;
    }
    Ok(())
}

/// A process's priority, if it exists.
pub fn get_priority(pid: u32) -> Option<u32> {
    table::process_by_pid(pid).map(|(_, p)| p.priority)
}

/// Counts of queued slots per structure, for invariant checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    pub current: Option<usize>,
    pub ticks: u64,
    pub ready_total: usize,
    pub sleeping: usize,
    pub input_waiting: usize,
}

pub fn snapshot() -> SchedulerSnapshot {
    let s = SCHEDULER.lock();
    SchedulerSnapshot {
        current: s.current,
        ticks: s.ticks,
        ready_total: s.ready.iter().map(|q| q.len()).sum(),
        sleeping: s.sleep.len(),
        input_waiting: s.input_wait.len(),
    }
}

/// Whether `slot` appears in any scheduler structure.
pub fn is_queued(slot: usize) -> bool {
    let s = SCHEDULER.lock();
    s.ready.iter().any(|q| q.contains(slot)) || s.sleep.contains(slot) || s.input_wait.contains(slot)
}

/// Apply a switch decision: load the next process's address space, point
/// the TSS at its kernel stack, and resume it by whichever mechanism its
/// PCB records. On the host target this only runs the bookkeeping so the
/// state machine stays observable.
pub fn dispatch(action: SwitchAction) {
    let SwitchAction::Switch { next, prev } = action else {
        return;
    };
    let Some(p) = table::process_mut(next) else {
        return;
    };

    let kernel_stack_top = crate::mm::KERNEL_SPACE_START
        .wrapping_add(p.kernel_stack_frame)
        .wrapping_add(crate::mm::PAGE_SIZE as u32);

    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        crate::arch::x86::gdt::set_kernel_stack(kernel_stack_top);
        if let Some(space) = p.address_space.as_ref() {
            space.switch_to();
        }

        if !p.has_started {
            p.has_started = true;
            // SAFETY: the context was prepared by process creation with
            // ring-3 selectors and a mapped user stack.
            unsafe {
                crate::arch::context::enter_user_mode(p.context.eip, p.context.user_esp);
            }
        } else if p.saved_syscall_esp != 0 {
            let esp = p.saved_syscall_esp;
            p.saved_syscall_esp = 0;
            let value = p.pending_syscall_return;
            // SAFETY: the parked ESP was captured by the syscall stub on
            // this process's own kernel stack and the frame is intact.
            unsafe {
                crate::arch::context::resume_from_syscall_stack(esp, value);
            }
        } else {
            static SCRATCH: spin::Mutex<crate::arch::context::Context> =
                spin::Mutex::new(crate::arch::context::Context {
                    eax: 0, ebx: 0, ecx: 0, edx: 0, esi: 0, edi: 0, esp: 0, ebp: 0,
                    ds: 0, es: 0, fs: 0, gs: 0, eip: 0, eflags: 0, kernel_esp: 0, user_esp: 0,
                });
            let prev_ctx = match prev.and_then(table::process_mut) {
                Some(prev_p) => &mut prev_p.context as *mut _,
                None => &mut *SCRATCH.lock() as *mut _,
            };
            // SAFETY: both context pointers reference live PCBs (or the
            // scratch anchor); the switch assembly only touches the fixed
            // field offsets asserted in arch::context.
            unsafe {
                crate::arch::context::context_switch(prev_ctx, &p.context);
            }
        }
    }

    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    {
        let _ = prev;
        if let Some(space) = p.address_space.as_ref() {
            space.switch_to();
        }
        if !p.has_started {
            p.has_started = true;
            crate::arch::context::enter_user_mode_recorded(p.context.eip, p.context.user_esp);
        } else if p.saved_syscall_esp != 0 {
            let esp = p.saved_syscall_esp;
            p.saved_syscall_esp = 0;
            crate::arch::context::resume_recorded(esp, p.pending_syscall_return);
        }
        let _ = kernel_stack_top;
    }
}

/// Reset all scheduler state. Test-only.
#[cfg(not(target_os = "none"))]
pub fn reset_for_tests() {
    let mut s = SCHEDULER.lock();
    *s = Scheduler::new();
}

/// Force a slot to be the RUNNING process. Test/boot helper; the slot is
/// pulled out of any queue first so membership stays exclusive.
pub fn force_current(slot: Option<usize>) {
    if let Some(slot) = slot {
        remove_from_all_queues(slot);
        let mut s = SCHEDULER.lock();
        s.make_current(slot);
    } else {
        SCHEDULER.lock().current = None;
    }
}
