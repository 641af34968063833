// Saved register state for processes and threads
use x86_64::registers::rflags::RFlags;
use x86_64::structures::gdt::SegmentSelector;
use x86_64::{PrivilegeLevel, VirtAddr};

/// Kernel address where a freshly forked process first resumes.
pub const FORKRET: u64 = 0xFFFF_FFFF_8010_0000;

/// Kernel address where a new thread first resumes; it returns to user mode
/// at the thread's start routine.
pub const THREAD_TRAMPOLINE: u64 = 0xFFFF_FFFF_8010_0040;

pub const USER_CS: SegmentSelector = SegmentSelector::new(3, PrivilegeLevel::Ring3);
pub const USER_DS: SegmentSelector = SegmentSelector::new(4, PrivilegeLevel::Ring3);

/// User registers saved on entry to the kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub rax: u64, // Syscall number in, return value out
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub rip: u64,
    pub rflags: u64,
    pub cs: u64,
    pub ss: u64,
    pub ds: u64,
    pub es: u64,
}

impl TrapFrame {
    /// Frame that enters user mode at `entry` with interrupts enabled
    pub fn user(entry: VirtAddr, stack_pointer: VirtAddr) -> Self {
        let data = u64::from(USER_DS.0);
        Self {
            rip: entry.as_u64(),
            rsp: stack_pointer.as_u64(),
            rflags: RFlags::INTERRUPT_FLAG.bits(),
            cs: u64::from(USER_CS.0),
            ss: data,
            ds: data,
            es: data,
            ..Self::default()
        }
    }

    pub fn set_return(&mut self, value: i64) {
        self.rax = value as u64;
    }

    pub fn return_value(&self) -> i64 {
        self.rax as i64
    }
}

/// Callee-saved registers of a context switched out inside the kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rsp: u64,
    pub rip: u64,
}

impl Context {
    /// Context that starts at `entry` on the given kernel stack
    pub fn new(entry: VirtAddr, kstack_top: VirtAddr) -> Self {
        Self {
            rip: entry.as_u64(),
            rsp: kstack_top.as_u64(),
            ..Self::default()
        }
    }
}
