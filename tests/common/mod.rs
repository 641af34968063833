#![allow(dead_code)]

use procos::process::Dispatch;
use procos::{ExecId, Kernel, KernelConfig, Pid};

/// A kernel with init created and running
pub fn boot(config: KernelConfig) -> (Kernel, Pid) {
    let kernel = Kernel::new(config);
    let init = kernel.userinit().unwrap();
    kernel.schedule().unwrap();
    (kernel, init)
}

/// Keep switching until `exec` is dispatched
pub fn switch_to(kernel: &Kernel, exec: ExecId) -> Dispatch {
    for _ in 0..1000 {
        kernel.yield_cpu();
        if let Some(dispatch) = kernel.schedule() {
            if dispatch.exec == exec {
                return dispatch;
            }
        }
    }
    panic!("{:?} never dispatched", exec);
}
