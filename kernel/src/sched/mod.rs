//! Preemptive priority scheduler.

pub mod queue;
pub mod scheduler;

pub use scheduler::{
    admit, block_current, block_current_for_input, current_slot, deliver_input, dispatch,
    get_priority, is_queued, is_switch_deferred, remove_from_all_queues, retire_current,
    set_defer_switch, set_enabled, set_priority, sleep_current, snapshot, tick, ticks, wake,
    yield_now, SwitchAction, AGING_INTERVAL, AGING_THRESHOLD,
};

#[cfg(not(target_os = "none"))]
pub use scheduler::{force_current, reset_for_tests};

#[cfg(target_os = "none")]
pub use scheduler::force_current;

/// Kick off scheduling on bare metal: admit nothing new, just pick the
/// best ready process and enter it. Falls into the idle loop when nothing
/// is runnable yet.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn start() -> ! {
    crate::println!("[SCHED] starting, {} live processes", crate::process::table::live_count());
    loop {
        let action = tick();
        dispatch(action);
        crate::arch::enable_interrupts();
        crate::arch::halt();
    }
}
