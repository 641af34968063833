// Trap glue: timer ticks, the system call entry point, and the killed check
// every context passes on its way back to user mode
use crate::kernel::{Kernel, KERNEL};
use crate::process::scheduler::Dispatch;
use crate::syscalls::{self, SyscallArgs, SyscallResult};

/// Timer interrupt: advance the clock and preempt the running context once
/// its quantum is used up. A killed context exits instead.
pub fn timer_interrupt(kernel: &Kernel) {
    kernel.tick();
    return_to_user(kernel);
    if kernel.current().is_some() && kernel.slice_expired() {
        kernel.yield_cpu();
    }
}

/// Keyboard interrupt: one byte of console input
pub fn keyboard_interrupt(kernel: &Kernel, byte: u8) {
    kernel.console().push_input(byte);
}

/// System call trap: run the call, then take the return-to-user path.
pub fn syscall_entry(kernel: &Kernel, syscall_num: u64, args: SyscallArgs) -> SyscallResult {
    let result = syscalls::handle_syscall(kernel, syscall_num, args);
    return_to_user(kernel);
    result
}

/// A killed context never gets back to user mode.
pub fn return_to_user(kernel: &Kernel) {
    if kernel.current_killed() {
        log::debug!("[TRAP] pid {:?} killed, exiting", kernel.current_pid());
        kernel.exit();
    }
}

/// Scheduler loop body as seen from the trap path: dispatch the next
/// context, exiting any that were killed while they were away.
pub fn run_scheduler(kernel: &Kernel) -> Option<Dispatch> {
    loop {
        let dispatch = kernel.schedule()?;
        if kernel.current_killed() {
            return_to_user(kernel);
            continue;
        }
        return Some(dispatch);
    }
}

/// Entry used by the low-level trap stub for `int 0x80`.
#[no_mangle]
pub extern "C" fn syscall_dispatch(
    syscall_num: u64,
    arg0: u64,
    arg1: u64,
    arg2: u64,
    arg3: u64,
    arg4: u64,
    arg5: u64,
) -> i64 {
    let args = SyscallArgs {
        arg0,
        arg1,
        arg2,
        arg3,
        arg4,
        arg5,
    };

    syscall_entry(&KERNEL, syscall_num, args)
        .return_value()
        .unwrap_or(0)
}
