// Process and thread management
pub mod context;
pub mod pcb;
pub mod scheduler;
pub mod table;
pub mod thread;

pub use context::{Context, TrapFrame};
pub use pcb::{Pid, Proc, ProcName, ProcStat, ProcState};
pub use scheduler::{Chan, Dispatch, ExecId, PendingCall, SchedulerStats};
pub use table::ProcessTable;
pub use thread::{Thread, ThreadEntry, Tid};
