mod common;

use common::{boot, switch_to};
use procos::param::PGSIZE;
use procos::services::file_system_service::Program;
use procos::{ExecId, KernelConfig, KernelError};

#[test]
fn limit_then_lift() {
    let (kernel, init) = boot(KernelConfig::default().with_init_memory(0));

    kernel.set_memory_limit(init, 4096).unwrap();
    assert_eq!(kernel.sbrk(2048), Ok(0));
    assert_eq!(kernel.sbrk(4096), Err(KernelError::MemoryLimitExceeded));
    assert_eq!(kernel.sbrk(0), Ok(2048));

    kernel.set_memory_limit(init, 0).unwrap();
    assert_eq!(kernel.sbrk(4096), Ok(2048));
    assert_eq!(kernel.sbrk(0), Ok(6144));
}

#[test]
fn limit_below_current_size_is_refused() {
    let (kernel, init) = boot(KernelConfig::default());
    assert_eq!(
        kernel.set_memory_limit(init, (PGSIZE - 1) as i64),
        Err(KernelError::InvalidArgument)
    );
    assert_eq!(
        kernel.set_memory_limit(init, -1),
        Err(KernelError::InvalidArgument)
    );
    assert_eq!(kernel.set_memory_limit(init, PGSIZE as i64), Ok(()));
    assert_eq!(kernel.process_stats(init).unwrap().memory_limit, PGSIZE);
}

#[test]
fn unknown_or_dead_pids_have_no_limit() {
    let (kernel, init) = boot(KernelConfig::default());
    assert_eq!(
        kernel.set_memory_limit(42, 0),
        Err(KernelError::InvalidArgument)
    );

    let child = kernel.fork().unwrap();
    switch_to(&kernel, ExecId::Process(child));
    kernel.exit();
    switch_to(&kernel, ExecId::Process(init));
    assert_eq!(
        kernel.set_memory_limit(child, 1 << 20),
        Err(KernelError::InvalidArgument)
    );
}

#[test]
fn shrinking_below_zero_fails() {
    let (kernel, _) = boot(KernelConfig::default());
    assert_eq!(
        kernel.sbrk(-(2 * PGSIZE as isize)),
        Err(KernelError::InvalidArgument)
    );
    assert_eq!(kernel.sbrk(0), Ok(PGSIZE));
    assert_eq!(kernel.sbrk(-(PGSIZE as isize)), Ok(PGSIZE));
    assert_eq!(kernel.sbrk(0), Ok(0));
}

#[test]
fn limit_is_inherited_and_checked_by_exec() {
    let (kernel, init) = boot(KernelConfig::default());
    kernel
        .vfs()
        .install("/bin/big", Program::new(0, &[0; PGSIZE]))
        .unwrap();
    kernel.set_memory_limit(init, 2 * PGSIZE as i64).unwrap();

    let child = kernel.fork().unwrap();
    assert_eq!(
        kernel.process_stats(child).unwrap().memory_limit,
        2 * PGSIZE
    );

    // text + guard + one stack page
    assert_eq!(
        kernel.exec("/bin/big", &["big"], 1),
        Err(KernelError::MemoryLimitExceeded)
    );
    kernel.set_memory_limit(init, 3 * PGSIZE as i64).unwrap();
    assert_eq!(kernel.exec("/bin/big", &["big"], 1), Ok(1));
    assert_eq!(kernel.process_stats(init).unwrap().memory_size, 3 * PGSIZE);
}
