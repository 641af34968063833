// Process Scheduler: round-robin over every process and thread context,
// sleep/wakeup on channels, and restart of suspended system calls
use core::task::Poll;

use crate::error::KResult;
use crate::kernel::Kernel;
use crate::param::NTHREAD;
use crate::process::context::TrapFrame;
use crate::process::pcb::{Pid, Proc, ProcState};
use crate::process::table::ProcessTable;
use crate::process::thread::{Thread, ThreadEntry, Tid};

/// An execution context: a process's main context or one of its threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecId {
    Process(Pid),
    Thread { pid: Pid, tid: Tid },
}

impl ExecId {
    pub fn pid(&self) -> Pid {
        match *self {
            ExecId::Process(pid) => pid,
            ExecId::Thread { pid, .. } => pid,
        }
    }

    pub fn is_thread(&self) -> bool {
        matches!(self, ExecId::Thread { .. })
    }
}

/// What a sleeping context is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chan {
    /// A child of this process changed state
    Process(Pid),
    /// This thread exited
    Thread(Pid, Tid),
    /// The clock ticked
    Ticks,
}

/// A system call suspended at a sleep point. It runs again from the top
/// each time its context is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingCall {
    Wait,
    Sleep { deadline: u64 },
    Join { tid: Tid, retval_addr: Option<usize> },
}

/// The context picked by one scheduler pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub exec: ExecId,
    /// Result of the suspended call that completed on this dispatch
    pub resumed: Option<KResult<u64>>,
    /// Set on a thread's first dispatch
    pub entry: Option<ThreadEntry>,
}

/// Scheduling view shared by process and thread records.
pub trait Schedulable {
    fn state(&self) -> ProcState;
    fn set_state(&mut self, state: ProcState);
    fn chan(&self) -> Option<Chan>;
    fn set_chan(&mut self, chan: Option<Chan>);
    fn set_pending(&mut self, call: Option<PendingCall>);
    fn take_pending(&mut self) -> Option<PendingCall>;
    fn killed(&self) -> bool;
    fn trap_frame(&mut self) -> &mut TrapFrame;

    fn take_entry(&mut self) -> Option<ThreadEntry> {
        None
    }

    /// Wake this context if it sleeps on `chan`
    fn wakeup(&mut self, chan: Chan) -> bool {
        if self.state() == ProcState::Sleeping && self.chan() == Some(chan) {
            self.set_state(ProcState::Runnable);
            true
        } else {
            false
        }
    }
}

impl Schedulable for Proc {
    fn state(&self) -> ProcState {
        self.state
    }
    fn set_state(&mut self, state: ProcState) {
        self.state = state;
    }
    fn chan(&self) -> Option<Chan> {
        self.chan
    }
    fn set_chan(&mut self, chan: Option<Chan>) {
        self.chan = chan;
    }
    fn set_pending(&mut self, call: Option<PendingCall>) {
        self.pending = call;
    }
    fn take_pending(&mut self) -> Option<PendingCall> {
        self.pending.take()
    }
    fn killed(&self) -> bool {
        self.killed
    }
    fn trap_frame(&mut self) -> &mut TrapFrame {
        &mut self.tf
    }
}

impl Schedulable for Thread {
    fn state(&self) -> ProcState {
        self.state
    }
    fn set_state(&mut self, state: ProcState) {
        self.state = state;
    }
    fn chan(&self) -> Option<Chan> {
        self.chan
    }
    fn set_chan(&mut self, chan: Option<Chan>) {
        self.chan = chan;
    }
    fn set_pending(&mut self, call: Option<PendingCall>) {
        self.pending = call;
    }
    fn take_pending(&mut self) -> Option<PendingCall> {
        self.pending.take()
    }
    fn killed(&self) -> bool {
        self.killed
    }
    fn trap_frame(&mut self) -> &mut TrapFrame {
        &mut self.tf
    }
    fn take_entry(&mut self) -> Option<ThreadEntry> {
        self.entry.take()
    }
}

/// Per-CPU scheduling state
#[derive(Debug)]
pub struct Cpu {
    pub(crate) current: Option<ExecId>,
    cursor: usize,
    time_slice: u64,
    time_slice_remaining: u64,
    total_switches: u64,
}

impl Cpu {
    pub const fn new(time_slice: u64) -> Self {
        Self {
            current: None,
            // Start so that the first pass begins at slot 0
            cursor: usize::MAX,
            time_slice,
            time_slice_remaining: time_slice,
            total_switches: 0,
        }
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub current: Option<ExecId>,
    pub time_slice_remaining: u64,
    pub total_switches: u64,
    pub runnable: usize,
}

/// Positions per process in the round-robin order: the main context, then
/// each thread slot.
const SLOTS_PER_PROC: usize = NTHREAD + 1;

impl ProcessTable {
    /// Context at round-robin position `pos` if it is RUNNABLE
    fn runnable_at(&self, pos: usize) -> Option<ExecId> {
        let p = self.slot(pos / SLOTS_PER_PROC);
        match pos % SLOTS_PER_PROC {
            0 => (p.state == ProcState::Runnable).then(|| ExecId::Process(p.pid)),
            k => {
                if matches!(
                    p.state,
                    ProcState::Unused | ProcState::Embryo | ProcState::Zombie
                ) {
                    return None;
                }
                let thread = p.threads[k - 1].lock();
                (thread.is_used() && thread.state == ProcState::Runnable).then(|| {
                    ExecId::Thread {
                        pid: p.pid,
                        tid: thread.tid,
                    }
                })
            }
        }
    }

    /// Round-robin pick of the next RUNNABLE context after the cursor
    pub(crate) fn pick_next(&mut self) -> Option<ExecId> {
        let total = self.iter().count() * SLOTS_PER_PROC;
        let start = self.cpu.cursor.wrapping_add(1);
        for step in 0..total {
            let pos = start.wrapping_add(step) % total;
            if let Some(exec) = self.runnable_at(pos) {
                self.cpu.cursor = pos;
                return Some(exec);
            }
        }
        None
    }

    /// Put the current context to sleep on `chan` with `call` to re-execute
    /// when it is next dispatched, and give up the CPU.
    pub(crate) fn sleep_current(&mut self, chan: Chan, call: PendingCall) {
        let exec = match self.cpu.current.take() {
            Some(exec) => exec,
            None => panic!("sleep: no current context"),
        };
        self.with_exec(exec, |ctx| {
            ctx.set_chan(Some(chan));
            ctx.set_pending(Some(call));
            ctx.set_state(ProcState::Sleeping);
        });
        log::trace!("[SCHED] {:?} sleeps on {:?}", exec, chan);
    }

    /// Make every context sleeping on `chan` RUNNABLE
    pub(crate) fn wakeup(&mut self, chan: Chan) -> usize {
        let mut woken = 0;
        for p in self.iter_mut() {
            if !p.is_used() {
                continue;
            }
            if p.wakeup(chan) {
                woken += 1;
            }
            for slot in p.threads.iter() {
                let mut thread = slot.lock();
                if thread.is_used() && thread.wakeup(chan) {
                    woken += 1;
                }
            }
        }
        woken
    }

    /// Count one tick against the running context's quantum. True when the
    /// quantum is used up.
    pub(crate) fn consume_slice(&mut self) -> bool {
        if self.cpu.current.is_none() {
            return false;
        }
        self.cpu.time_slice_remaining = self.cpu.time_slice_remaining.saturating_sub(1);
        self.cpu.time_slice_remaining == 0
    }

    fn runnable_count(&self) -> usize {
        let per_proc = |p: &Proc| {
            let main = (p.state == ProcState::Runnable) as usize;
            let threads = p
                .threads
                .iter()
                .filter(|slot| {
                    let t = slot.lock();
                    t.is_used() && t.state == ProcState::Runnable
                })
                .count();
            main + threads
        };
        self.iter().filter(|p| p.is_used()).map(per_proc).sum()
    }
}

impl Kernel {
    /// One pass of the scheduler loop.
    ///
    /// Picks the next RUNNABLE context and makes it current. A context that
    /// went to sleep inside a system call re-executes that call first; if it
    /// has to sleep again the pass moves on. Returns `None` when the CPU is
    /// busy or nothing can run.
    pub fn schedule(&self) -> Option<Dispatch> {
        loop {
            let (exec, pending, entry) = {
                let mut table = self.ptable.lock();
                if table.cpu.current.is_some() {
                    return None;
                }
                let exec = table.pick_next()?;
                table.cpu.current = Some(exec);
                table.cpu.time_slice_remaining = table.cpu.time_slice;
                table.cpu.total_switches += 1;
                let (pending, entry) = table.with_exec(exec, |ctx| {
                    ctx.set_state(ProcState::Running);
                    ctx.set_chan(None);
                    (ctx.take_pending(), ctx.take_entry())
                })?;
                (exec, pending, entry)
            };

            let resumed = match pending {
                None => None,
                Some(call) => match self.restart(call) {
                    Poll::Ready(result) => Some(result),
                    Poll::Pending => continue,
                },
            };
            if let Some(result) = resumed {
                self.deliver(exec, result);
            }

            log::trace!("[SCHED] dispatch {:?}", exec);
            return Some(Dispatch {
                exec,
                resumed,
                entry,
            });
        }
    }

    fn restart(&self, call: PendingCall) -> Poll<KResult<u64>> {
        match call {
            PendingCall::Wait => self.wait().map(|r| r.map(|pid| pid as u64)),
            PendingCall::Sleep { deadline } => self.sleep_until(deadline).map(|r| r.map(|()| 0)),
            PendingCall::Join { tid, retval_addr } => self
                .join(tid, retval_addr)
                // The syscall form reports success as 0, the value went to user memory
                .map(|r| r.map(|retval| if retval_addr.is_some() { 0 } else { retval })),
        }
    }

    /// Write a completed call's result into the context's return register
    pub(crate) fn deliver(&self, exec: ExecId, result: KResult<u64>) {
        let value = match result {
            Ok(v) => v as i64,
            Err(_) => -1,
        };
        self.set_return(exec, value);
    }

    pub(crate) fn set_return(&self, exec: ExecId, value: i64) {
        self.ptable
            .lock()
            .with_exec(exec, |ctx| ctx.trap_frame().set_return(value));
    }

    /// Give up the CPU for one scheduling round
    pub fn yield_cpu(&self) {
        let mut table = self.ptable.lock();
        if let Some(exec) = table.cpu.current.take() {
            table.with_exec(exec, |ctx| ctx.set_state(ProcState::Runnable));
        }
    }

    /// Timer tick bookkeeping; true when the running context should yield
    pub(crate) fn slice_expired(&self) -> bool {
        self.ptable.lock().consume_slice()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        let table = self.ptable.lock();
        SchedulerStats {
            current: table.cpu.current,
            time_slice_remaining: table.cpu.time_slice_remaining,
            total_switches: table.cpu.total_switches,
            runnable: table.runnable_count(),
        }
    }
}
