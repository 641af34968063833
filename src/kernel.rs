// Kernel instance: the process table lock, the frame allocator, the tick
// counter and the collaborators every subsystem shares
use core::sync::atomic::AtomicI32;
use lazy_static::lazy_static;
use spin::Mutex;

use crate::console::Console;
use crate::error::{KResult, KernelError};
use crate::param::KernelConfig;
use crate::process::context::TrapFrame;
use crate::process::pcb::{Pid, ProcState};
use crate::process::scheduler::{Chan, ExecId};
use crate::process::table::ProcessTable;
use crate::process::thread::Tid;
use crate::services::file_system_service::Vfs;
use crate::services::memory_service::{AddressSpace, FrameAllocator};

pub struct Kernel {
    config: KernelConfig,
    /// Table lock. Always taken first; `kmem` comes before any thread lock.
    pub(crate) ptable: Mutex<ProcessTable>,
    pub(crate) kmem: Mutex<FrameAllocator>,
    pub(crate) ticks: Mutex<u64>,
    pub(crate) next_tid: AtomicI32,
    vfs: Vfs,
    console: Console,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        let kernel = Self {
            config,
            ptable: Mutex::new(ProcessTable::new(config.time_slice)),
            kmem: Mutex::new(FrameAllocator::new(config.phys_frames)),
            ticks: Mutex::new(0),
            next_tid: AtomicI32::new(1),
            vfs: Vfs::new(),
            console: Console::new(config.console_capacity),
        };
        kernel.console.attach();
        kernel
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    /// The running context, if any
    pub fn current(&self) -> Option<ExecId> {
        self.ptable.lock().current()
    }

    pub fn current_pid(&self) -> Option<Pid> {
        self.current().map(|exec| exec.pid())
    }

    /// Ticks since boot
    pub fn uptime(&self) -> u64 {
        *self.ticks.lock()
    }

    /// Advance the clock one tick and wake sleepers waiting on it
    pub fn tick(&self) {
        *self.ticks.lock() += 1;
        self.ptable.lock().wakeup(Chan::Ticks);
    }

    pub fn free_frames(&self) -> usize {
        self.kmem.lock().free_count()
    }

    pub fn process_state(&self, pid: Pid) -> Option<ProcState> {
        self.ptable.lock().get(pid).map(|p| p.state)
    }

    pub fn thread_state(&self, pid: Pid, tid: Tid) -> Option<ProcState> {
        let table = self.ptable.lock();
        let p = table.get(pid)?;
        let slot = p.thread_slot(tid)?;
        let state = p.threads[slot].lock().state;
        Some(state)
    }

    pub fn trap_frame(&self, exec: ExecId) -> Option<TrapFrame> {
        self.ptable.lock().with_exec(exec, |ctx| *ctx.trap_frame())
    }

    /// Whether the running context must not return to user mode
    pub fn current_killed(&self) -> bool {
        let mut table = self.ptable.lock();
        match table.current() {
            Some(exec) => table.is_killed(exec),
            None => false,
        }
    }

    /// Run `f` on the calling process's user memory
    pub fn with_user_memory<R>(
        &self,
        f: impl FnOnce(&mut AddressSpace) -> KResult<R>,
    ) -> KResult<R> {
        let mut table = self.ptable.lock();
        let idx = table.current_slot().ok_or(KernelError::StateViolation)?;
        f(&mut table.slot_mut(idx).memory)
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

lazy_static! {
    /// The kernel behind the trap entry points
    pub static ref KERNEL: Kernel = Kernel::new(KernelConfig::default());
}
