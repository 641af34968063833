// Process Control Block (PCB)
use core::fmt;
use spin::Mutex;

use crate::param::{NAME_LEN, NOFILE, NTHREAD, PGSIZE};
use crate::process::context::{Context, TrapFrame};
use crate::process::scheduler::{Chan, PendingCall};
use crate::process::thread::{Thread, Tid};
use crate::services::file_system_service::{close_all, FileRef, InodeRef};
use crate::services::memory_service::{AddressSpace, FrameAllocator, KernelStack};

/// Process ID type
pub type Pid = i32;

/// Scheduling state of a process or thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Unused,
    Embryo,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

/// Fixed 16-byte, NUL-padded name
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcName([u8; NAME_LEN]);

impl ProcName {
    pub const fn empty() -> Self {
        Self([0; NAME_LEN])
    }

    /// Copy at most 15 bytes of `name`, never splitting a character
    pub fn new(name: &str) -> Self {
        let mut len = name.len().min(NAME_LEN - 1);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        let mut bytes = [0; NAME_LEN];
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NAME_LEN] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        core::str::from_utf8(&self.0[..len]).unwrap_or("")
    }
}

impl fmt::Debug for ProcName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for ProcName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process Control Block
pub struct Proc {
    pub pid: Pid,
    pub state: ProcState,
    pub parent: Option<Pid>,
    pub memory: AddressSpace,
    /// Ceiling on `memory.size()` in bytes; 0 means unlimited
    pub memory_limit: usize,
    /// Stack pages requested by the last exec
    pub stacksize: usize,
    pub kstack: Option<KernelStack>,
    pub tf: TrapFrame,
    pub context: Context,
    pub chan: Option<Chan>,
    pub pending: Option<PendingCall>,
    pub killed: bool,
    pub ofile: [Option<FileRef>; NOFILE],
    pub cwd: Option<InodeRef>,
    pub name: ProcName,
    pub threads: [Mutex<Thread>; NTHREAD],
}

impl Proc {
    pub fn unused() -> Self {
        Self {
            pid: 0,
            state: ProcState::Unused,
            parent: None,
            memory: AddressSpace::new(),
            memory_limit: 0,
            stacksize: 0,
            kstack: None,
            tf: TrapFrame::default(),
            context: Context::default(),
            chan: None,
            pending: None,
            killed: false,
            ofile: Default::default(),
            cwd: None,
            name: ProcName::empty(),
            threads: core::array::from_fn(|_| Mutex::new(Thread::unused())),
        }
    }

    pub fn is_used(&self) -> bool {
        self.state != ProcState::Unused
    }

    pub fn memory_size(&self) -> usize {
        self.memory.size()
    }

    /// Slot index of the live thread `tid`
    pub fn thread_slot(&self, tid: Tid) -> Option<usize> {
        if tid == 0 {
            return None;
        }
        self.threads.iter().position(|slot| {
            let thread = slot.lock();
            thread.is_used() && thread.tid == tid
        })
    }

    pub fn live_threads(&self) -> usize {
        self.threads
            .iter()
            .filter(|slot| slot.lock().is_used())
            .count()
    }

    /// Reclaim every thread slot, returning how many were in use
    pub fn release_threads(&self, kmem: &mut FrameAllocator) -> usize {
        let mut released = 0;
        for slot in self.threads.iter() {
            let mut thread = slot.lock();
            if thread.is_used() {
                thread.release(kmem);
                released += 1;
            }
        }
        released
    }

    /// Free everything the slot owns and return it to UNUSED
    pub fn release(&mut self, kmem: &mut FrameAllocator) {
        self.release_threads(kmem);
        if let Some(kstack) = self.kstack.take() {
            kstack.release(kmem);
        }
        self.memory.free(kmem);
        close_all(&mut self.ofile);
        *self = Self::unused();
    }

    pub fn stat(&self) -> ProcStat {
        ProcStat {
            pid: self.pid,
            name: self.name,
            num_pages: ((self.memory_size() + PGSIZE - 1) / PGSIZE) as i32,
            memsize: self.memory_size() as i32,
            memlimit: self.memory_limit as i32,
        }
    }
}

/// One `ps` record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcStat {
    pub pid: Pid,
    pub name: ProcName,
    pub num_pages: i32,
    pub memsize: i32,
    pub memlimit: i32,
}

impl ProcStat {
    /// Size of the user-memory layout
    pub const SIZE: usize = 32;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.pid.to_le_bytes());
        out[4..20].copy_from_slice(self.name.as_bytes());
        out[20..24].copy_from_slice(&self.num_pages.to_le_bytes());
        out[24..28].copy_from_slice(&self.memsize.to_le_bytes());
        out[28..32].copy_from_slice(&self.memlimit.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let int = |at: usize| i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&bytes[4..20]);
        Self {
            pid: int(0),
            name: ProcName(name),
            num_pages: int(20),
            memsize: int(24),
            memlimit: int(28),
        }
    }
}
