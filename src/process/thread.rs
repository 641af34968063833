// Thread control block
use x86_64::VirtAddr;

use crate::param::NOFILE;
use crate::process::context::{Context, TrapFrame};
use crate::process::pcb::{Pid, ProcName, ProcState};
use crate::process::scheduler::{Chan, PendingCall};
use crate::services::file_system_service::{close_all, FileRef, InodeRef};
use crate::services::memory_service::{FrameAllocator, KernelStack};

/// Thread ID type; 0 marks a free slot
pub type Tid = i32;

/// User routine a new thread starts in, and its single argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadEntry {
    pub start_routine: VirtAddr,
    pub arg: u64,
}

/// One slot of a process's thread table.
pub struct Thread {
    pub tid: Tid,
    pub state: ProcState,
    /// Owning process
    pub parent: Option<Pid>,
    pub kstack: Option<KernelStack>,
    pub tf: TrapFrame,
    pub context: Context,
    /// Taken by the trampoline on first dispatch
    pub entry: Option<ThreadEntry>,
    pub retval: u64,
    pub chan: Option<Chan>,
    pub pending: Option<PendingCall>,
    pub killed: bool,
    pub ofile: [Option<FileRef>; NOFILE],
    pub cwd: Option<InodeRef>,
    pub name: ProcName,
}

impl Thread {
    pub fn unused() -> Self {
        Self {
            tid: 0,
            state: ProcState::Unused,
            parent: None,
            kstack: None,
            tf: TrapFrame::default(),
            context: Context::default(),
            entry: None,
            retval: 0,
            chan: None,
            pending: None,
            killed: false,
            ofile: Default::default(),
            cwd: None,
            name: ProcName::empty(),
        }
    }

    pub fn is_used(&self) -> bool {
        self.tid != 0
    }

    /// Drop every file and directory reference the thread holds
    pub fn close_files(&mut self) -> usize {
        self.cwd = None;
        close_all(&mut self.ofile)
    }

    /// Free the kernel stack and return the slot to UNUSED
    pub fn release(&mut self, kmem: &mut FrameAllocator) {
        self.close_files();
        if let Some(kstack) = self.kstack.take() {
            kstack.release(kmem);
        }
        *self = Self::unused();
    }
}
