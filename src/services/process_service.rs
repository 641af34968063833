// Process Management Service: fork, exit, wait, kill, exec, heap growth and
// the memory limit, plus the ps snapshot
use core::task::Poll;
use x86_64::VirtAddr;

use crate::error::{KResult, KernelError};
use crate::kernel::Kernel;
use crate::param::{MAXARG, MAX_STACK_PAGES, MIN_STACK_PAGES};
use crate::process::context::{Context, TrapFrame, FORKRET};
use crate::process::pcb::{Pid, ProcName, ProcStat, ProcState};
use crate::process::scheduler::{Chan, ExecId, PendingCall, Schedulable};
use crate::process::table::ProcessTable;
use crate::services::file_system_service::{basename, close_all, dup_table, idup};
use crate::services::memory_service::{self, FrameAllocator, KernelStack};

/// Detailed view of one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStats {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub name: ProcName,
    pub state: ProcState,
    pub killed: bool,
    pub memory_size: usize,
    pub memory_limit: usize,
    pub stacksize: usize,
    pub threads: usize,
    pub open_files: usize,
}

/// Claim a process slot and give it a kernel stack whose first context
/// returns through `FORKRET`.
fn allocproc(table: &mut ProcessTable, kmem: &mut FrameAllocator) -> KResult<usize> {
    let idx = table.alloc_slot()?;
    match KernelStack::allocate(kmem) {
        Ok(kstack) => {
            let p = table.slot_mut(idx);
            p.context = Context::new(VirtAddr::new(FORKRET), kstack.top());
            p.kstack = Some(kstack);
            Ok(idx)
        }
        Err(e) => {
            table.slot_mut(idx).release(kmem);
            Err(e)
        }
    }
}

impl Kernel {
    /// Set up the first user process
    pub fn userinit(&self) -> KResult<Pid> {
        let mut table = self.ptable.lock();
        if table.init_pid().is_some() {
            return Err(KernelError::StateViolation);
        }

        let mut kmem = self.kmem.lock();
        let idx = allocproc(&mut table, &mut kmem)?;
        let init_memory = self.config().init_memory;
        let p = table.slot_mut(idx);
        if let Err(e) = p.memory.resize(&mut kmem, init_memory) {
            p.release(&mut kmem);
            return Err(e);
        }

        p.tf = TrapFrame::user(VirtAddr::new(0), VirtAddr::new(init_memory as u64));
        p.name = ProcName::new("initcode");
        p.cwd = Some(self.vfs().root());
        for fd in 0..3 {
            p.ofile[fd] = Some(self.vfs().console());
        }
        p.state = ProcState::Runnable;
        let pid = p.pid;
        table.set_init_pid(pid);

        log::info!("[PROC] init process started (pid {})", pid);
        Ok(pid)
    }

    /// Create a copy of the calling process. Returns the child's pid; the
    /// child resumes with 0 in its return register.
    pub fn fork(&self) -> KResult<Pid> {
        let mut table = self.ptable.lock();
        let exec = table.current().ok_or(KernelError::StateViolation)?;
        let parent_idx = table.find(exec.pid()).ok_or(KernelError::StateViolation)?;
        // A thread forks with its own user registers
        let tf = table
            .with_exec(exec, |ctx| *ctx.trap_frame())
            .ok_or(KernelError::StateViolation)?;

        let mut kmem = self.kmem.lock();
        let child_idx = allocproc(&mut table, &mut kmem)?;
        let memory = match table.slot(parent_idx).memory.try_clone(&mut kmem) {
            Ok(memory) => memory,
            Err(e) => {
                table.slot_mut(child_idx).release(&mut kmem);
                log::debug!("[PROC] fork by pid {} failed: {}", exec.pid(), e);
                return Err(e);
            }
        };
        drop(kmem);

        let parent = table.slot(parent_idx);
        let (parent_pid, memory_limit, stacksize, name) =
            (parent.pid, parent.memory_limit, parent.stacksize, parent.name);
        let ofile = dup_table(&parent.ofile);
        let cwd = parent.cwd.as_ref().map(idup);

        let child = table.slot_mut(child_idx);
        child.memory = memory;
        child.memory_limit = memory_limit;
        child.stacksize = stacksize;
        child.parent = Some(parent_pid);
        child.tf = tf;
        child.tf.set_return(0);
        child.ofile = ofile;
        child.cwd = cwd;
        child.name = name;
        child.state = ProcState::Runnable;

        log::debug!("[PROC] pid {} forked pid {}", parent_pid, child.pid);
        Ok(child.pid)
    }

    /// Terminate the calling process. Every thread of the process goes with
    /// it; the process stays ZOMBIE until its parent waits for it.
    pub fn exit(&self) {
        let mut table = self.ptable.lock();
        let exec = match table.current() {
            Some(exec) => exec,
            None => panic!("exit: no current process"),
        };
        let pid = exec.pid();
        if table.init_pid() == Some(pid) {
            panic!("init exiting");
        }
        let idx = match table.find(pid) {
            Some(idx) => idx,
            None => panic!("exit: current process {} not in table", pid),
        };

        let mut kmem = self.kmem.lock();
        let p = table.slot_mut(idx);
        let threads = p.release_threads(&mut kmem);
        drop(kmem);
        close_all(&mut p.ofile);
        p.cwd = None;
        let parent = p.parent;

        // Parent might be sleeping in wait()
        if let Some(parent) = parent {
            table.wakeup(Chan::Process(parent));
        }

        // Pass abandoned children to init
        let init = table.init_pid();
        let mut zombie_orphan = false;
        for child in table.iter_mut() {
            if child.is_used() && child.parent == Some(pid) {
                child.parent = init;
                zombie_orphan |= child.state == ProcState::Zombie;
            }
        }
        if let (true, Some(init)) = (zombie_orphan, init) {
            table.wakeup(Chan::Process(init));
        }

        let p = table.slot_mut(idx);
        p.state = ProcState::Zombie;
        p.chan = None;
        p.pending = None;
        table.cpu.current = None;

        log::debug!("[PROC] pid {} exited ({} threads torn down)", pid, threads);
    }

    /// Reap one ZOMBIE child of the caller, sleeping until one exists.
    pub fn wait(&self) -> Poll<KResult<Pid>> {
        let mut table = self.ptable.lock();
        let exec = match table.current() {
            Some(exec) => exec,
            None => return Poll::Ready(Err(KernelError::StateViolation)),
        };
        let pid = exec.pid();

        let mut havekids = false;
        let mut zombie = None;
        for (idx, child) in table.iter().enumerate() {
            if !child.is_used() || child.parent != Some(pid) {
                continue;
            }
            havekids = true;
            if child.state == ProcState::Zombie {
                zombie = Some(idx);
                break;
            }
        }

        if let Some(idx) = zombie {
            let mut kmem = self.kmem.lock();
            let child = table.slot_mut(idx);
            let child_pid = child.pid;
            child.release(&mut kmem);
            log::debug!("[PROC] pid {} reaped pid {}", pid, child_pid);
            return Poll::Ready(Ok(child_pid));
        }

        if !havekids {
            return Poll::Ready(Err(KernelError::NoChildren));
        }
        if table.is_killed(exec) {
            return Poll::Ready(Err(KernelError::Killed));
        }

        table.sleep_current(Chan::Process(pid), PendingCall::Wait);
        Poll::Pending
    }

    /// Mark a process and all its threads killed. Sleeping contexts are made
    /// RUNNABLE so they notice on their way back to user mode.
    pub fn kill(&self, pid: Pid) -> KResult<()> {
        let mut table = self.ptable.lock();
        let idx = table.find(pid).ok_or(KernelError::InvalidArgument)?;
        let p = table.slot_mut(idx);
        p.killed = true;
        if p.state == ProcState::Sleeping {
            p.state = ProcState::Runnable;
        }
        for slot in p.threads.iter() {
            let mut thread = slot.lock();
            if thread.is_used() {
                thread.killed = true;
                if thread.state == ProcState::Sleeping {
                    thread.state = ProcState::Runnable;
                }
            }
        }

        log::debug!("[PROC] pid {} killed", pid);
        Ok(())
    }

    /// Replace the caller's image with the program at `path`, giving it
    /// `stack_pages` pages of stack. Returns argc.
    pub fn exec(&self, path: &str, argv: &[&str], stack_pages: usize) -> KResult<usize> {
        if !(MIN_STACK_PAGES..=MAX_STACK_PAGES).contains(&stack_pages) || argv.len() > MAXARG {
            return Err(KernelError::InvalidArgument);
        }
        let program = self.vfs().lookup(path)?;

        let mut table = self.ptable.lock();
        let exec = table.current().ok_or(KernelError::StateViolation)?;
        if exec.is_thread() {
            return Err(KernelError::StateViolation);
        }
        let idx = table.find(exec.pid()).ok_or(KernelError::StateViolation)?;
        let memory_limit = table.slot(idx).memory_limit;

        let mut kmem = self.kmem.lock();
        let image = memory_service::load_image(
            &mut kmem,
            &program.text,
            argv,
            stack_pages,
            memory_limit,
        )?;

        // Commit
        let p = table.slot_mut(idx);
        p.release_threads(&mut kmem);
        let mut old = core::mem::replace(&mut p.memory, image.memory);
        old.free(&mut kmem);
        p.name = ProcName::new(basename(path));
        p.stacksize = stack_pages;
        p.tf.rip = program.entry.as_u64();
        p.tf.rsp = image.stack_pointer as u64;
        p.tf.rdi = image.argc as u64;
        p.tf.rsi = image.argv as u64;

        log::debug!("[PROC] pid {} exec {} ({} stack pages)", p.pid, path, stack_pages);
        Ok(image.argc)
    }

    pub fn getpid(&self) -> KResult<Pid> {
        self.current_pid().ok_or(KernelError::StateViolation)
    }

    /// Grow or shrink the caller's memory by `n` bytes, returning the old
    /// size. Refused before any allocation when it would pass the memory
    /// limit.
    pub fn sbrk(&self, n: isize) -> KResult<usize> {
        let mut table = self.ptable.lock();
        let idx = table.current_slot().ok_or(KernelError::StateViolation)?;
        let p = table.slot_mut(idx);
        let old = p.memory_size();
        let new_size = match memory_service::checked_growth(old, n, p.memory_limit) {
            Ok(size) => size,
            Err(e) => {
                log::debug!("[MEM] pid {} sbrk({}) refused: {}", p.pid, n, e);
                return Err(e);
            }
        };

        let mut kmem = self.kmem.lock();
        p.memory.resize(&mut kmem, new_size)?;
        Ok(old)
    }

    /// Sleep for `n` ticks
    pub fn sleep(&self, n: u64) -> Poll<KResult<()>> {
        let deadline = self.uptime().saturating_add(n);
        self.sleep_until(deadline)
    }

    pub(crate) fn sleep_until(&self, deadline: u64) -> Poll<KResult<()>> {
        let mut table = self.ptable.lock();
        let exec = match table.current() {
            Some(exec) => exec,
            None => return Poll::Ready(Err(KernelError::StateViolation)),
        };
        if self.uptime() >= deadline {
            return Poll::Ready(Ok(()));
        }
        if table.is_killed(exec) {
            return Poll::Ready(Err(KernelError::Killed));
        }
        table.sleep_current(Chan::Ticks, PendingCall::Sleep { deadline });
        Poll::Pending
    }

    /// Set the memory ceiling of `pid` in bytes; 0 removes it.
    pub fn set_memory_limit(&self, pid: Pid, limit: i64) -> KResult<()> {
        let mut table = self.ptable.lock();
        let idx = table.find(pid).ok_or(KernelError::InvalidArgument)?;
        let p = table.slot_mut(idx);
        if limit < 0 || p.state == ProcState::Zombie {
            return Err(KernelError::InvalidArgument);
        }
        let limit = limit as usize;
        if limit > 0 && limit < p.memory_size() {
            return Err(KernelError::InvalidArgument);
        }
        p.memory_limit = limit;

        log::debug!("[MEM] pid {} memory limit {}", pid, limit);
        Ok(())
    }

    /// Fill `out` with a record for each process in use, in slot order.
    /// Returns how many records were written.
    pub fn list_processes(&self, out: &mut [ProcStat]) -> usize {
        let table = self.ptable.lock();
        let mut count = 0;
        for (slot, p) in out.iter_mut().zip(table.iter().filter(|p| p.is_used())) {
            *slot = p.stat();
            count += 1;
        }
        count
    }

    pub fn process_stats(&self, pid: Pid) -> Option<ProcessStats> {
        let table = self.ptable.lock();
        let p = table.get(pid)?;
        Some(ProcessStats {
            pid: p.pid,
            parent: p.parent,
            name: p.name,
            state: p.state,
            killed: p.killed,
            memory_size: p.memory_size(),
            memory_limit: p.memory_limit,
            stacksize: p.stacksize,
            threads: p.live_threads(),
            open_files: p.ofile.iter().filter(|f| f.is_some()).count(),
        })
    }
}
