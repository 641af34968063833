// Process table: the fixed arena of process slots and the CPU state that the
// table lock also protects
use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::error::{KResult, KernelError};
use crate::param::NPROC;
use crate::process::pcb::{Pid, Proc, ProcState};
use crate::process::scheduler::{Cpu, ExecId, Schedulable};

/// Every process slot plus the per-CPU scheduling state.
///
/// Lives behind the kernel's table lock. Each thread slot inside a `Proc`
/// has its own lock, always taken after this one.
pub struct ProcessTable {
    procs: Box<[Proc]>,
    next_pid: Pid,
    init_pid: Option<Pid>,
    pub(crate) cpu: Cpu,
}

impl ProcessTable {
    pub fn new(time_slice: u64) -> Self {
        let procs: Vec<Proc> = (0..NPROC).map(|_| Proc::unused()).collect();
        Self {
            procs: procs.into_boxed_slice(),
            next_pid: 1,
            init_pid: None,
            cpu: Cpu::new(time_slice),
        }
    }

    /// Claim an UNUSED slot: EMBRYO with a fresh pid
    pub fn alloc_slot(&mut self) -> KResult<usize> {
        let idx = self
            .procs
            .iter()
            .position(|p| p.state == ProcState::Unused)
            .ok_or(KernelError::OutOfMemory)?;

        let pid = self.next_pid;
        self.next_pid += 1;

        let p = &mut self.procs[idx];
        p.pid = pid;
        p.state = ProcState::Embryo;
        Ok(idx)
    }

    /// Slot index of the non-UNUSED process `pid`
    pub fn find(&self, pid: Pid) -> Option<usize> {
        if pid <= 0 {
            return None;
        }
        self.procs.iter().position(|p| p.is_used() && p.pid == pid)
    }

    pub fn slot(&self, idx: usize) -> &Proc {
        &self.procs[idx]
    }

    pub fn slot_mut(&mut self, idx: usize) -> &mut Proc {
        &mut self.procs[idx]
    }

    pub fn get(&self, pid: Pid) -> Option<&Proc> {
        self.find(pid).map(|idx| &self.procs[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Proc> {
        self.procs.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Proc> {
        self.procs.iter_mut()
    }

    pub fn init_pid(&self) -> Option<Pid> {
        self.init_pid
    }

    pub(crate) fn set_init_pid(&mut self, pid: Pid) {
        self.init_pid = Some(pid);
    }

    pub fn current(&self) -> Option<ExecId> {
        self.cpu.current
    }

    /// Slot of the process the current context belongs to
    pub fn current_slot(&self) -> Option<usize> {
        self.cpu.current.and_then(|exec| self.find(exec.pid()))
    }

    /// Run `f` on the process or thread record behind `exec`, holding the
    /// thread's lock for the duration when it is a thread.
    pub fn with_exec<R>(
        &mut self,
        exec: ExecId,
        f: impl FnOnce(&mut dyn Schedulable) -> R,
    ) -> Option<R> {
        let idx = self.find(exec.pid())?;
        let p = &mut self.procs[idx];
        match exec {
            ExecId::Process(_) => Some(f(p as &mut dyn Schedulable)),
            ExecId::Thread { tid, .. } => {
                let slot = p.thread_slot(tid)?;
                let mut thread = p.threads[slot].lock();
                Some(f(&mut *thread))
            }
        }
    }

    /// Whether `exec` or its process has been killed
    pub fn is_killed(&mut self, exec: ExecId) -> bool {
        let process_killed = self.get(exec.pid()).map_or(false, |p| p.killed);
        process_killed || self.with_exec(exec, |ctx| ctx.killed()).unwrap_or(false)
    }

    pub fn used_count(&self) -> usize {
        self.procs.iter().filter(|p| p.is_used()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pids_are_monotonic() {
        let mut table = ProcessTable::new(1);
        let a = table.alloc_slot().unwrap();
        let b = table.alloc_slot().unwrap();
        assert_eq!(table.slot(a).pid, 1);
        assert_eq!(table.slot(b).pid, 2);
        assert_eq!(table.slot(a).state, ProcState::Embryo);

        // A released slot is reused, its pid is not
        *table.slot_mut(a) = Proc::unused();
        let c = table.alloc_slot().unwrap();
        assert_eq!(c, a);
        assert_eq!(table.slot(c).pid, 3);
        assert_eq!(table.find(1), None);
        assert_eq!(table.find(3), Some(a));
    }

    #[test]
    fn test_table_full() {
        let mut table = ProcessTable::new(1);
        for _ in 0..NPROC {
            table.alloc_slot().unwrap();
        }
        assert_eq!(table.alloc_slot(), Err(KernelError::OutOfMemory));
        assert_eq!(table.used_count(), NPROC);
    }

    #[test]
    fn test_with_exec_resolves_threads() {
        let mut table = ProcessTable::new(1);
        let idx = table.alloc_slot().unwrap();
        table.slot(idx).threads[3].lock().tid = 9;

        let pid = table.slot(idx).pid;
        let state = table.with_exec(ExecId::Thread { pid, tid: 9 }, |ctx| ctx.state());
        assert_eq!(state, Some(ProcState::Unused));
        assert_eq!(
            table.with_exec(ExecId::Thread { pid, tid: 10 }, |ctx| ctx.state()),
            None
        );
        assert_eq!(
            table.with_exec(ExecId::Process(pid), |ctx| ctx.state()),
            Some(ProcState::Embryo)
        );
    }
}
