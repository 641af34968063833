//! Kernel configuration.
//!
//! Compile-time limits shared by every table, and the runtime `KernelConfig`
//! handed to `Kernel::new`.

use x86_64::structures::paging::{PageSize, Size4KiB};

/// Maximum number of processes.
pub const NPROC: usize = 64;

/// Maximum number of threads per process.
pub const NTHREAD: usize = 16;

/// Open files per process (and per thread).
pub const NOFILE: usize = 16;

/// Page size (4 KB).
pub const PGSIZE: usize = Size4KiB::SIZE as usize;

/// Size of every per-context kernel stack.
pub const KSTACKSIZE: usize = PGSIZE;

/// User images must stay below this address.
pub const USERTOP: usize = 0x8000_0000;

/// Maximum number of exec arguments.
pub const MAXARG: usize = 32;

/// Length of the process name field, NUL included.
pub const NAME_LEN: usize = 16;

/// Stack pages used by plain `exec`.
pub const DEFAULT_STACK_PAGES: usize = 1;

/// Bounds for the `stacksize` argument of `exec2`.
pub const MIN_STACK_PAGES: usize = 1;
pub const MAX_STACK_PAGES: usize = 100;

/// Shell input line buffer.
pub const MAX_COMMAND_LENGTH: usize = 128;

/// Physical frames available to the frame allocator (16 MB).
pub const DEFAULT_PHYS_FRAMES: usize = 4096;

/// Timer ticks a context may run before it is asked to yield.
pub const TIME_SLICE: u64 = 1;

/// Runtime configuration for a `Kernel` instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Number of 4 KiB frames backing kernel stacks and user memory.
    pub phys_frames: usize,
    /// Size in bytes of the init process image.
    pub init_memory: usize,
    /// Ticks per scheduling quantum.
    pub time_slice: u64,
    /// Capacity of the console input queue.
    pub console_capacity: usize,
}

impl KernelConfig {
    pub const fn new() -> Self {
        Self {
            phys_frames: DEFAULT_PHYS_FRAMES,
            init_memory: PGSIZE,
            time_slice: TIME_SLICE,
            console_capacity: 512,
        }
    }

    pub const fn with_phys_frames(mut self, frames: usize) -> Self {
        self.phys_frames = frames;
        self
    }

    pub const fn with_init_memory(mut self, bytes: usize) -> Self {
        self.init_memory = bytes;
        self
    }

    pub const fn with_time_slice(mut self, ticks: u64) -> Self {
        self.time_slice = ticks;
        self
    }

    pub const fn with_console_capacity(mut self, bytes: usize) -> Self {
        self.console_capacity = bytes;
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Round `sz` up to a page boundary.
pub const fn pg_round_up(sz: usize) -> usize {
    (sz + PGSIZE - 1) & !(PGSIZE - 1)
}

/// Round `sz` down to a page boundary.
pub const fn pg_round_down(sz: usize) -> usize {
    sz & !(PGSIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_rounding() {
        assert_eq!(pg_round_up(0), 0);
        assert_eq!(pg_round_up(1), PGSIZE);
        assert_eq!(pg_round_up(PGSIZE), PGSIZE);
        assert_eq!(pg_round_down(PGSIZE + 7), PGSIZE);
    }

    #[test]
    fn test_config_builders() {
        let config = KernelConfig::default()
            .with_phys_frames(8)
            .with_init_memory(0)
            .with_time_slice(3);
        assert_eq!(config.phys_frames, 8);
        assert_eq!(config.init_memory, 0);
        assert_eq!(config.time_slice, 3);
        assert_eq!(config.console_capacity, 512);
    }
}
