// Thread Service: create, exit and join threads inside the calling process
use core::sync::atomic::Ordering;
use core::task::Poll;
use x86_64::VirtAddr;

use crate::error::{KResult, KernelError};
use crate::kernel::Kernel;
use crate::process::context::{Context, TrapFrame, THREAD_TRAMPOLINE};
use crate::process::pcb::ProcState;
use crate::process::scheduler::{Chan, ExecId, PendingCall};
use crate::process::thread::{ThreadEntry, Tid};
use crate::services::file_system_service::{dup_table, idup};
use crate::services::memory_service::KernelStack;

impl Kernel {
    /// Start a new thread in the caller's process at `start_routine(arg)`.
    ///
    /// The thread shares the process's memory and gets its own kernel stack,
    /// a copy of the open file table and a reference to the current
    /// directory. Nothing is published unless every step succeeds.
    pub fn thread_create(&self, start_routine: VirtAddr, arg: u64) -> KResult<Tid> {
        let table = self.ptable.lock();
        let exec = table.current().ok_or(KernelError::StateViolation)?;
        let p = table
            .get(exec.pid())
            .ok_or(KernelError::StateViolation)?;

        let slot = p
            .threads
            .iter()
            .position(|t| !t.lock().is_used())
            .ok_or(KernelError::OutOfThreadSlots)?;

        // The table lock keeps the slot free while the stack is allocated
        let kstack = match KernelStack::allocate(&mut self.kmem.lock()) {
            Ok(kstack) => kstack,
            Err(e) => {
                log::debug!("[THREAD] pid {}: no kernel stack for new thread", p.pid);
                return Err(e);
            }
        };

        let mut thread = p.threads[slot].lock();
        thread.tid = self.alloc_tid();
        thread.state = ProcState::Embryo;

        let entry = ThreadEntry { start_routine, arg };
        thread.context = Context::new(VirtAddr::new(THREAD_TRAMPOLINE), kstack.top());
        thread.kstack = Some(kstack);
        thread.tf = TrapFrame::user(start_routine, VirtAddr::new(p.memory_size() as u64));
        thread.tf.rdi = arg;
        thread.entry = Some(entry);
        thread.retval = 0;
        thread.killed = false;
        thread.parent = Some(p.pid);
        thread.name = p.name;
        thread.ofile = dup_table(&p.ofile);
        thread.cwd = p.cwd.as_ref().map(idup);
        thread.state = ProcState::Runnable;

        log::debug!(
            "[THREAD] pid {} created tid {} at {:#x}",
            p.pid,
            thread.tid,
            start_routine.as_u64()
        );
        Ok(thread.tid)
    }

    /// Next tid from the kernel-wide counter. Wraps back to 1, so 0 (the
    /// free-slot tid) and negative values are never handed out.
    pub(crate) fn alloc_tid(&self) -> Tid {
        let next = |tid: Tid| Some(if tid >= Tid::MAX { 1 } else { tid + 1 });
        match self
            .next_tid
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, next)
        {
            Ok(tid) | Err(tid) => tid,
        }
    }

    /// Terminate the calling thread with `retval`. Its joiner collects the
    /// value; the slot stays ZOMBIE until then.
    pub fn thread_exit(&self, retval: u64) {
        let mut table = self.ptable.lock();
        let (pid, tid) = match table.current() {
            Some(ExecId::Thread { pid, tid }) => (pid, tid),
            Some(ExecId::Process(pid)) => panic!("thread_exit: pid {} is not a thread", pid),
            None => panic!("thread_exit: no current thread"),
        };
        let p = match table.get(pid) {
            Some(p) => p,
            None => panic!("thread_exit: process {} not in table", pid),
        };
        let slot = match p.thread_slot(tid) {
            Some(slot) => slot,
            None => panic!("thread_exit: tid {} not in pid {}", tid, pid),
        };

        {
            let mut thread = p.threads[slot].lock();
            let closed = thread.close_files();
            thread.retval = retval;
            thread.chan = None;
            thread.pending = None;
            thread.state = ProcState::Zombie;
            log::debug!(
                "[THREAD] pid {} tid {} exited ({} files closed)",
                pid,
                tid,
                closed
            );
        }

        // Joiner might be sleeping in thread_join()
        table.wakeup(Chan::Thread(pid, tid));
        table.cpu.current = None;
    }

    /// Wait for thread `tid` of the caller's process to exit, reap it and
    /// return its exit value.
    pub fn thread_join(&self, tid: Tid) -> Poll<KResult<u64>> {
        self.join(tid, None)
    }

    /// Join that also stores the exit value at `retval_addr` in user memory.
    /// The address is checked before the thread is reaped.
    pub(crate) fn join(&self, tid: Tid, retval_addr: Option<usize>) -> Poll<KResult<u64>> {
        let mut table = self.ptable.lock();
        let exec = match table.current() {
            Some(exec) => exec,
            None => return Poll::Ready(Err(KernelError::StateViolation)),
        };
        let pid = exec.pid();
        if exec == (ExecId::Thread { pid, tid }) {
            return Poll::Ready(Err(KernelError::StateViolation));
        }

        let idx = match table.find(pid) {
            Some(idx) => idx,
            None => return Poll::Ready(Err(KernelError::StateViolation)),
        };
        let slot = match table.slot(idx).thread_slot(tid) {
            Some(slot) => slot,
            None => return Poll::Ready(Err(KernelError::NoSuchThread)),
        };

        let (state, retval) = {
            let thread = table.slot(idx).threads[slot].lock();
            (thread.state, thread.retval)
        };
        if state != ProcState::Zombie {
            if table.is_killed(exec) {
                return Poll::Ready(Err(KernelError::Killed));
            }
            table.sleep_current(Chan::Thread(pid, tid), PendingCall::Join { tid, retval_addr });
            return Poll::Pending;
        }

        let p = table.slot_mut(idx);
        if let Some(addr) = retval_addr {
            if let Err(e) = p.memory.write_u32(addr, retval as u32) {
                return Poll::Ready(Err(e));
            }
        }
        let mut kmem = self.kmem.lock();
        p.threads[slot].lock().release(&mut kmem);

        log::debug!("[THREAD] pid {} joined tid {}", pid, tid);
        Poll::Ready(Ok(retval))
    }
}
