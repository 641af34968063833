// System call layer: decode arguments from registers and user memory, run
// the kernel operation, and encode its result for the caller
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::task::Poll;
use x86_64::VirtAddr;

use crate::error::{KResult, KernelError};
use crate::kernel::Kernel;
use crate::param::{DEFAULT_STACK_PAGES, MAXARG, MAX_STACK_PAGES, MIN_STACK_PAGES, NPROC};
use crate::process::pcb::ProcStat;

/// System call numbers
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallNumber {
    Fork = 1,
    Exit = 2,
    Wait = 3,
    Kill = 6,
    Exec = 7,
    GetPid = 11,
    Sbrk = 12,
    Sleep = 13,
    Uptime = 14,
    Exec2 = 22,
    SetMemoryLimit = 23,
    Ps = 24,
    ThreadCreate = 25,
    ThreadExit = 26,
    ThreadJoin = 27,
}

impl SyscallNumber {
    pub fn from_u64(num: u64) -> Option<Self> {
        use SyscallNumber::*;
        Some(match num {
            1 => Fork,
            2 => Exit,
            3 => Wait,
            6 => Kill,
            7 => Exec,
            11 => GetPid,
            12 => Sbrk,
            13 => Sleep,
            14 => Uptime,
            22 => Exec2,
            23 => SetMemoryLimit,
            24 => Ps,
            25 => ThreadCreate,
            26 => ThreadExit,
            27 => ThreadJoin,
            _ => return None,
        })
    }
}

/// System call arguments (up to 6 arguments in x86_64)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyscallArgs {
    pub arg0: u64, // rdi
    pub arg1: u64, // rsi
    pub arg2: u64, // rdx
    pub arg3: u64, // r10
    pub arg4: u64, // r8
    pub arg5: u64, // r9
}

impl SyscallArgs {
    /// Arguments from a slice, missing ones zero
    pub fn new(args: &[u64]) -> Self {
        let arg = |i: usize| args.get(i).copied().unwrap_or(0);
        Self {
            arg0: arg(0),
            arg1: arg(1),
            arg2: arg(2),
            arg3: arg(3),
            arg4: arg(4),
            arg5: arg(5),
        }
    }

    fn get(&self, n: usize) -> u64 {
        match n {
            0 => self.arg0,
            1 => self.arg1,
            2 => self.arg2,
            3 => self.arg3,
            4 => self.arg4,
            _ => self.arg5,
        }
    }

    /// Argument `n` as a C int
    pub fn int(&self, n: usize) -> i32 {
        self.get(n) as i32
    }
}

/// System call result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallResult {
    Success(u64),
    Error(KernelError),
    /// The caller went to sleep; the result is delivered when it resumes
    Blocked,
    /// The caller is gone
    NoReturn,
}

impl SyscallResult {
    /// Value for the return register, if the caller returns now
    pub fn return_value(&self) -> Option<i64> {
        match *self {
            SyscallResult::Success(value) => Some(value as i64),
            SyscallResult::Error(_) => Some(-1),
            SyscallResult::Blocked | SyscallResult::NoReturn => None,
        }
    }
}

impl From<KResult<u64>> for SyscallResult {
    fn from(result: KResult<u64>) -> Self {
        match result {
            Ok(value) => SyscallResult::Success(value),
            Err(e) => SyscallResult::Error(e),
        }
    }
}

impl From<Poll<KResult<u64>>> for SyscallResult {
    fn from(poll: Poll<KResult<u64>>) -> Self {
        match poll {
            Poll::Ready(result) => result.into(),
            Poll::Pending => SyscallResult::Blocked,
        }
    }
}

impl fmt::Display for SyscallResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyscallResult::Success(value) => write!(f, "{}", value),
            SyscallResult::Error(e) => write!(f, "-1 ({})", e),
            SyscallResult::Blocked => write!(f, "blocked"),
            SyscallResult::NoReturn => write!(f, "no return"),
        }
    }
}

// ============================================================
// ARGUMENT FETCHING
// ============================================================

/// Check that `[addr, addr + size)` is caller memory and return `addr`
pub fn argptr(kernel: &Kernel, addr: u64, size: usize) -> KResult<usize> {
    let addr = usize::try_from(addr).map_err(|_| KernelError::InvalidArgument)?;
    kernel.with_user_memory(|m| m.check_range(addr, size))?;
    Ok(addr)
}

/// Fetch a 32-bit word from caller memory
pub fn fetchint(kernel: &Kernel, addr: usize) -> KResult<u32> {
    kernel.with_user_memory(|m| m.read_u32(addr))
}

/// Fetch a NUL-terminated string from caller memory
pub fn fetchstr(kernel: &Kernel, addr: u64) -> KResult<String> {
    let addr = usize::try_from(addr).map_err(|_| KernelError::InvalidArgument)?;
    kernel.with_user_memory(|m| m.read_cstr(addr).map(String::from))
}

/// Fetch an argv array: 32-bit string pointers ended by 0
pub fn fetch_argv(kernel: &Kernel, uargv: u64) -> KResult<Vec<String>> {
    let base = usize::try_from(uargv).map_err(|_| KernelError::InvalidArgument)?;
    let mut argv = Vec::new();
    for i in 0.. {
        if i >= MAXARG {
            return Err(KernelError::InvalidArgument);
        }
        let uarg = fetchint(kernel, base + 4 * i)?;
        if uarg == 0 {
            break;
        }
        argv.push(fetchstr(kernel, u64::from(uarg))?);
    }
    Ok(argv)
}

fn copyout(kernel: &Kernel, addr: usize, bytes: &[u8]) -> KResult<()> {
    kernel.with_user_memory(|m| m.write(addr, bytes))
}

/// Handle a system call
pub fn handle_syscall(kernel: &Kernel, syscall_num: u64, args: SyscallArgs) -> SyscallResult {
    let result = match SyscallNumber::from_u64(syscall_num) {
        Some(num) => dispatch(kernel, num, args),
        None => {
            log::warn!(
                "[SYSCALL] pid {:?}: unknown sys call {}",
                kernel.current_pid(),
                syscall_num
            );
            SyscallResult::Error(KernelError::InvalidArgument)
        }
    };

    if let Some(value) = result.return_value() {
        if let Some(exec) = kernel.current() {
            kernel.set_return(exec, value);
        }
    }
    log::trace!("[SYSCALL] {} -> {}", syscall_num, result);
    result
}

fn dispatch(kernel: &Kernel, num: SyscallNumber, args: SyscallArgs) -> SyscallResult {
    match num {
        SyscallNumber::Fork => sys_fork(kernel),
        SyscallNumber::Exit => sys_exit(kernel),
        SyscallNumber::Wait => sys_wait(kernel),
        SyscallNumber::Kill => sys_kill(kernel, args),
        SyscallNumber::Exec => sys_exec(kernel, args),
        SyscallNumber::GetPid => sys_getpid(kernel),
        SyscallNumber::Sbrk => sys_sbrk(kernel, args),
        SyscallNumber::Sleep => sys_sleep(kernel, args),
        SyscallNumber::Uptime => SyscallResult::Success(kernel.uptime()),
        SyscallNumber::Exec2 => sys_exec2(kernel, args),
        SyscallNumber::SetMemoryLimit => sys_setmemorylimit(kernel, args),
        SyscallNumber::Ps => sys_ps(kernel, args),
        SyscallNumber::ThreadCreate => sys_thread_create(kernel, args),
        SyscallNumber::ThreadExit => sys_thread_exit(kernel, args),
        SyscallNumber::ThreadJoin => sys_thread_join(kernel, args),
    }
}

// Individual syscall implementations
pub fn sys_fork(kernel: &Kernel) -> SyscallResult {
    kernel.fork().map(|pid| pid as u64).into()
}

pub fn sys_exit(kernel: &Kernel) -> SyscallResult {
    kernel.exit();
    SyscallResult::NoReturn
}

pub fn sys_wait(kernel: &Kernel) -> SyscallResult {
    kernel.wait().map(|r| r.map(|pid| pid as u64)).into()
}

pub fn sys_kill(kernel: &Kernel, args: SyscallArgs) -> SyscallResult {
    kernel.kill(args.int(0)).map(|()| 0).into()
}

pub fn sys_getpid(kernel: &Kernel) -> SyscallResult {
    kernel.getpid().map(|pid| pid as u64).into()
}

pub fn sys_sbrk(kernel: &Kernel, args: SyscallArgs) -> SyscallResult {
    kernel
        .sbrk(args.int(0) as isize)
        .map(|old| old as u64)
        .into()
}

pub fn sys_sleep(kernel: &Kernel, args: SyscallArgs) -> SyscallResult {
    let n = args.int(0);
    if n < 0 {
        return SyscallResult::Error(KernelError::InvalidArgument);
    }
    kernel.sleep(n as u64).map(|r| r.map(|()| 0)).into()
}

fn exec_common(kernel: &Kernel, args: SyscallArgs, stack_pages: usize) -> KResult<u64> {
    let path = fetchstr(kernel, args.arg0)?;
    let argv = fetch_argv(kernel, args.arg1)?;
    let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
    kernel.exec(&path, &argv, stack_pages).map(|argc| argc as u64)
}

pub fn sys_exec(kernel: &Kernel, args: SyscallArgs) -> SyscallResult {
    exec_common(kernel, args, DEFAULT_STACK_PAGES).into()
}

pub fn sys_exec2(kernel: &Kernel, args: SyscallArgs) -> SyscallResult {
    let stacksize = args.int(2);
    if stacksize < MIN_STACK_PAGES as i32 || stacksize > MAX_STACK_PAGES as i32 {
        return SyscallResult::Error(KernelError::InvalidArgument);
    }
    exec_common(kernel, args, stacksize as usize).into()
}

pub fn sys_setmemorylimit(kernel: &Kernel, args: SyscallArgs) -> SyscallResult {
    kernel
        .set_memory_limit(args.int(0), i64::from(args.int(1)))
        .map(|()| 0)
        .into()
}

pub fn sys_ps(kernel: &Kernel, args: SyscallArgs) -> SyscallResult {
    let size = args.int(1);
    if size < 0 {
        return SyscallResult::Error(KernelError::InvalidArgument);
    }
    let size = size as usize;
    let run = || -> KResult<u64> {
        let addr = argptr(kernel, args.arg0, size * ProcStat::SIZE)?;
        let mut stats = vec![ProcStat::default(); size.min(NPROC)];
        let count = kernel.list_processes(&mut stats);
        for (i, stat) in stats[..count].iter().enumerate() {
            copyout(kernel, addr + i * ProcStat::SIZE, &stat.to_bytes())?;
        }
        Ok(count as u64)
    };
    run().into()
}

pub fn sys_thread_create(kernel: &Kernel, args: SyscallArgs) -> SyscallResult {
    let run = || -> KResult<u64> {
        let out_tid = argptr(kernel, args.arg0, 4)?;
        let start_routine = argptr(kernel, args.arg1, 4)?;
        let tid = kernel.thread_create(VirtAddr::new(start_routine as u64), args.arg2)?;
        copyout(kernel, out_tid, &tid.to_le_bytes())?;
        Ok(0)
    };
    run().into()
}

pub fn sys_thread_exit(kernel: &Kernel, args: SyscallArgs) -> SyscallResult {
    kernel.thread_exit(args.arg0);
    SyscallResult::NoReturn
}

pub fn sys_thread_join(kernel: &Kernel, args: SyscallArgs) -> SyscallResult {
    let tid = args.int(0);
    let out_retval = match argptr(kernel, args.arg1, 4) {
        Ok(addr) => addr,
        Err(e) => return SyscallResult::Error(e),
    };
    kernel
        .join(tid, Some(out_retval))
        .map(|r| r.map(|_| 0))
        .into()
}
