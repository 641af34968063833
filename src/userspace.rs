// User library: the system calls as a user program sees them, marshalled
// through the calling process's own memory
use alloc::collections::BTreeMap;
use core::task::Poll;

use crate::console::STDOUT;
use crate::error::KResult;
use crate::kernel::Kernel;
use crate::param::{MAXARG, NPROC, NTHREAD, PGSIZE};
use crate::process::pcb::{Pid, ProcStat};
use crate::process::scheduler::ExecId;
use crate::process::thread::{ThreadEntry, Tid};
use crate::interrupts;
use crate::services::memory_service::AddressSpace;
use crate::syscalls::{SyscallArgs, SyscallNumber};

/// Bytes of user memory the library keeps for passing arguments.
pub const SCRATCH_SIZE: usize = PGSIZE;

/// Offset of the out-parameter word inside the scratch area.
const OUT_WORD: usize = 0;
/// Start of argument marshalling space.
const ARGS_BASE: usize = 8;

/// The calls the process manager shell needs. Results follow the C
/// convention: -1 on failure.
pub trait SystemCalls {
    fn fork(&mut self) -> i32;
    fn exit(&mut self);
    fn getpid(&mut self) -> i32;
    /// Give the CPU away until process `pid` runs. Used after `fork` to
    /// carry on as the child, and afterwards to get back to the parent.
    /// Returns false if `pid` never got the CPU.
    fn switch_to(&mut self, pid: i32) -> bool;
    fn kill(&mut self, pid: i32) -> i32;
    fn exec(&mut self, path: &str, argv: &[&str]) -> i32;
    fn sbrk(&mut self, n: i32) -> i32;
    fn setmemorylimit(&mut self, pid: i32, limit: i32) -> i32;
    fn ps(&mut self, stats: &mut [ProcStat]) -> i32;
    /// Read one line of console input, returning its length (0 at end of input)
    fn gets(&mut self, buf: &mut [u8]) -> usize;
    fn write(&mut self, fd: i32, text: &str);
}

/// A user program running on `kernel` as whatever context is current.
pub struct KernelUser<'k> {
    kernel: &'k Kernel,
    /// Scratch area base per process this library has run as
    scratch: BTreeMap<Pid, usize>,
}

impl<'k> KernelUser<'k> {
    pub fn new(kernel: &'k Kernel) -> Self {
        Self {
            kernel,
            scratch: BTreeMap::new(),
        }
    }

    pub fn kernel(&self) -> &'k Kernel {
        self.kernel
    }

    fn syscall(&mut self, num: SyscallNumber, args: &[u64]) -> Poll<i32> {
        let result = interrupts::syscall_entry(self.kernel, num as u64, SyscallArgs::new(args));
        match result.return_value() {
            Some(value) => Poll::Ready(value as i32),
            None => Poll::Pending,
        }
    }

    fn call(&mut self, num: SyscallNumber, args: &[u64]) -> i32 {
        match self.syscall(num, args) {
            Poll::Ready(value) => value,
            Poll::Pending => -1,
        }
    }

    /// Base of this process's scratch area, growing the heap on first use
    fn scratch(&mut self) -> Option<usize> {
        let pid = self.kernel.current_pid()?;
        if let Some(&base) = self.scratch.get(&pid) {
            return Some(base);
        }
        let base = self.call(SyscallNumber::Sbrk, &[SCRATCH_SIZE as u64]);
        if base < 0 {
            return None;
        }
        self.scratch.insert(pid, base as usize);
        Some(base as usize)
    }

    /// Copy `path` and `argv` into scratch memory. Returns the user
    /// addresses of the path string and of the argv array.
    fn marshal_exec(&mut self, path: &str, argv: &[&str]) -> Option<(usize, usize)> {
        if argv.len() > MAXARG {
            return None;
        }
        let strings_len: usize = core::iter::once(path)
            .chain(argv.iter().copied())
            .map(|s| s.len() + 1)
            .sum();
        let array_offset = (ARGS_BASE + strings_len + 3) & !3;
        if array_offset + 4 * (argv.len() + 1) > SCRATCH_SIZE {
            return None;
        }
        let base = self.scratch()?;

        self.kernel
            .with_user_memory(|m| {
                let mut at = base + ARGS_BASE;
                let path_addr = push_cstr(m, &mut at, path)?;
                let array = base + array_offset;
                for (i, arg) in argv.iter().enumerate() {
                    let addr = push_cstr(m, &mut at, arg)?;
                    m.write_u32(array + 4 * i, addr as u32)?;
                }
                m.write_u32(array + 4 * argv.len(), 0)?;
                Ok((path_addr, array))
            })
            .ok()
    }

    fn finish_exec(&mut self, result: i32) -> i32 {
        if result >= 0 {
            // The old image and its scratch area are gone
            if let Some(pid) = self.kernel.current_pid() {
                self.scratch.remove(&pid);
            }
        }
        result
    }

    pub fn wait(&mut self) -> Poll<i32> {
        self.syscall(SyscallNumber::Wait, &[])
    }

    pub fn exec2(&mut self, path: &str, argv: &[&str], stacksize: i32) -> i32 {
        let (path_addr, argv_addr) = match self.marshal_exec(path, argv) {
            Some(addrs) => addrs,
            None => return -1,
        };
        let result = self.call(
            SyscallNumber::Exec2,
            &[path_addr as u64, argv_addr as u64, stacksize as u64],
        );
        self.finish_exec(result)
    }

    pub fn sleep(&mut self, ticks: i32) -> Poll<i32> {
        self.syscall(SyscallNumber::Sleep, &[ticks as u64])
    }

    pub fn uptime(&mut self) -> i32 {
        self.call(SyscallNumber::Uptime, &[])
    }

    /// Start a thread at `start_routine` (a user address); its tid is
    /// stored in `thread`.
    pub fn thread_create(&mut self, thread: &mut Tid, start_routine: u64, arg: u64) -> i32 {
        let out = match self.scratch() {
            Some(base) => base + OUT_WORD,
            None => return -1,
        };
        let result = self.call(SyscallNumber::ThreadCreate, &[out as u64, start_routine, arg]);
        if result == 0 {
            if let Ok(tid) = self.kernel.with_user_memory(|m| m.read_u32(out)) {
                *thread = tid as Tid;
            }
        }
        result
    }

    pub fn thread_exit(&mut self, retval: u64) {
        let _ = self.syscall(SyscallNumber::ThreadExit, &[retval]);
    }

    /// Join `tid`. Once the call completes, `join_retval` has the value the
    /// thread exited with.
    pub fn thread_join(&mut self, tid: Tid) -> Poll<i32> {
        let out = match self.scratch() {
            Some(base) => base + OUT_WORD,
            None => return Poll::Ready(-1),
        };
        self.syscall(SyscallNumber::ThreadJoin, &[tid as u64, out as u64])
    }

    pub fn join_retval(&mut self) -> Option<u32> {
        let pid = self.kernel.current_pid()?;
        let base = *self.scratch.get(&pid)?;
        self.kernel
            .with_user_memory(|m| m.read_u32(base + OUT_WORD))
            .ok()
    }

    /// Thread trampoline: run the start routine, then exit the thread with
    /// whatever it returned.
    pub fn run_thread(&mut self, entry: ThreadEntry, routine: impl FnOnce(&mut Self, u64) -> u64) {
        let retval = routine(self, entry.arg);
        self.thread_exit(retval);
    }
}

impl SystemCalls for KernelUser<'_> {
    fn fork(&mut self) -> i32 {
        self.call(SyscallNumber::Fork, &[])
    }

    fn exit(&mut self) {
        let pid = self.kernel.current_pid();
        let _ = self.syscall(SyscallNumber::Exit, &[]);
        if let Some(pid) = pid {
            self.scratch.remove(&pid);
        }
    }

    fn getpid(&mut self) -> i32 {
        self.call(SyscallNumber::GetPid, &[])
    }

    fn switch_to(&mut self, pid: i32) -> bool {
        let target = ExecId::Process(pid);
        if self.kernel.current() == Some(target) {
            return true;
        }
        // Every other context gets at most a couple of turns first
        for _ in 0..2 * NPROC * (NTHREAD + 1) {
            self.kernel.yield_cpu();
            if let Some(dispatch) = self.kernel.schedule() {
                if dispatch.exec == target {
                    return true;
                }
            }
        }
        false
    }

    fn kill(&mut self, pid: i32) -> i32 {
        self.call(SyscallNumber::Kill, &[pid as u64])
    }

    fn exec(&mut self, path: &str, argv: &[&str]) -> i32 {
        let (path_addr, argv_addr) = match self.marshal_exec(path, argv) {
            Some(addrs) => addrs,
            None => return -1,
        };
        let result = self.call(SyscallNumber::Exec, &[path_addr as u64, argv_addr as u64]);
        self.finish_exec(result)
    }

    fn sbrk(&mut self, n: i32) -> i32 {
        self.call(SyscallNumber::Sbrk, &[n as u64])
    }

    fn setmemorylimit(&mut self, pid: i32, limit: i32) -> i32 {
        self.call(SyscallNumber::SetMemoryLimit, &[pid as u64, limit as u64])
    }

    fn ps(&mut self, stats: &mut [ProcStat]) -> i32 {
        let base = match self.scratch() {
            Some(base) => base + ARGS_BASE,
            None => return -1,
        };
        let size = stats.len().min(NPROC);
        let count = self.call(SyscallNumber::Ps, &[base as u64, size as u64]);
        if count <= 0 {
            return count;
        }

        let read = self.kernel.with_user_memory(|m| {
            for (i, stat) in stats[..count as usize].iter_mut().enumerate() {
                let mut record = [0u8; ProcStat::SIZE];
                record.copy_from_slice(m.read(base + i * ProcStat::SIZE, ProcStat::SIZE)?);
                *stat = ProcStat::from_bytes(&record);
            }
            Ok(())
        });
        match read {
            Ok(()) => count,
            Err(_) => -1,
        }
    }

    fn gets(&mut self, buf: &mut [u8]) -> usize {
        self.kernel.console().read_line(buf)
    }

    fn write(&mut self, fd: i32, text: &str) {
        self.kernel.console().write(fd, text);
    }
}

fn push_cstr(m: &mut AddressSpace, at: &mut usize, s: &str) -> KResult<usize> {
    let addr = *at;
    m.write(addr, s.as_bytes())?;
    m.write(addr + s.len(), &[0])?;
    *at += s.len() + 1;
    Ok(addr)
}

/// `printf(1, ...)` for user programs
pub fn print(sys: &mut impl SystemCalls, text: &str) {
    sys.write(STDOUT, text);
}
