//! Process and thread lifecycle core of a small teaching kernel.
//!
//! One process table holds every process and, inside each process, a fixed
//! array of threads. Both kinds of context are scheduled round-robin on a
//! single simulated CPU; blocking calls park the caller on a channel and
//! finish when the scheduler dispatches it again.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod console;
pub mod error;
pub mod interrupts;
pub mod kernel;
pub mod logger;
pub mod param;
pub mod process;
pub mod services;
pub mod shell;
pub mod syscalls;
pub mod userspace;

pub use error::{KResult, KernelError};
pub use kernel::{Kernel, KERNEL};
pub use param::KernelConfig;
pub use process::{ExecId, Pid, ProcStat, ProcState, Tid};

/// Bring up the global kernel: install the logger and create init.
pub fn init() -> KResult<Pid> {
    logger::init_logger(log::LevelFilter::Info);
    let pid = KERNEL.userinit()?;
    log::info!("[PROC] init is pid {}", pid);
    Ok(pid)
}
