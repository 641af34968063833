mod common;

use core::task::Poll;

use common::{boot, switch_to};
use procos::param::NTHREAD;
use procos::{ExecId, KernelConfig, KernelError, ProcState};
use x86_64::VirtAddr;

const START: u64 = 0x100;

#[test]
fn join_waits_for_a_sleeping_thread() {
    let (kernel, init) = boot(KernelConfig::default().with_time_slice(100));
    let tid = kernel.thread_create(VirtAddr::new(START), 0).unwrap();

    assert!(kernel.thread_join(tid).is_pending());
    assert_eq!(kernel.process_state(init), Some(ProcState::Sleeping));

    let dispatch = kernel.schedule().unwrap();
    assert_eq!(dispatch.exec, ExecId::Thread { pid: init, tid });
    assert!(dispatch.entry.is_some());
    assert_eq!(kernel.sleep(3), Poll::Pending);

    for _ in 0..2 {
        kernel.tick();
        assert_eq!(kernel.schedule(), None);
        assert_eq!(kernel.process_state(init), Some(ProcState::Sleeping));
    }
    kernel.tick();
    let dispatch = kernel.schedule().unwrap();
    assert_eq!(dispatch.exec, ExecId::Thread { pid: init, tid });
    assert_eq!(dispatch.resumed, Some(Ok(0)));

    kernel.thread_exit(77);
    let dispatch = kernel.schedule().unwrap();
    assert_eq!(dispatch.exec, ExecId::Process(init));
    assert_eq!(dispatch.resumed, Some(Ok(77)));
    assert_eq!(kernel.uptime(), 3);
    assert_eq!(kernel.thread_state(init, tid), None);
}

#[test]
fn second_join_finds_nothing() {
    let (kernel, init) = boot(KernelConfig::default());
    let tid = kernel.thread_create(VirtAddr::new(START), 5).unwrap();

    switch_to(&kernel, ExecId::Thread { pid: init, tid });
    kernel.thread_exit(5);
    switch_to(&kernel, ExecId::Process(init));

    assert_eq!(kernel.thread_join(tid), Poll::Ready(Ok(5)));
    assert_eq!(
        kernel.thread_join(tid),
        Poll::Ready(Err(KernelError::NoSuchThread))
    );
}

#[test]
fn slots_are_reused_after_join() {
    let (kernel, init) = boot(KernelConfig::default());
    let free = kernel.free_frames();

    let tids: Vec<_> = (0..NTHREAD)
        .map(|i| kernel.thread_create(VirtAddr::new(START), i as u64).unwrap())
        .collect();
    assert_eq!(
        kernel.thread_create(VirtAddr::new(START), 0),
        Err(KernelError::OutOfThreadSlots)
    );

    for &tid in &tids {
        switch_to(&kernel, ExecId::Thread { pid: init, tid });
        kernel.thread_exit(0);
    }
    switch_to(&kernel, ExecId::Process(init));
    for &tid in &tids {
        assert_eq!(kernel.thread_join(tid), Poll::Ready(Ok(0)));
    }
    assert_eq!(kernel.free_frames(), free);

    let tid = kernel.thread_create(VirtAddr::new(START), 0).unwrap();
    assert!(!tids.contains(&tid));
}

#[test]
fn process_exit_takes_its_threads() {
    let (kernel, init) = boot(KernelConfig::default());
    let free = kernel.free_frames();

    let child = kernel.fork().unwrap();
    switch_to(&kernel, ExecId::Process(child));
    let tid = kernel.thread_create(VirtAddr::new(START), 0).unwrap();
    kernel.thread_create(VirtAddr::new(START), 1).unwrap();
    assert_eq!(kernel.process_stats(child).unwrap().threads, 2);

    kernel.exit();
    let stats = kernel.process_stats(child).unwrap();
    assert_eq!(stats.state, ProcState::Zombie);
    assert_eq!(stats.threads, 0);
    assert_eq!(stats.open_files, 0);
    assert_eq!(kernel.thread_state(child, tid), None);

    switch_to(&kernel, ExecId::Process(init));
    assert_eq!(kernel.wait(), Poll::Ready(Ok(child)));
    assert_eq!(kernel.process_state(child), None);
    assert_eq!(kernel.free_frames(), free);
}

#[test]
fn killed_joiner_gives_up() {
    let (kernel, init) = boot(KernelConfig::default());
    let child = kernel.fork().unwrap();
    switch_to(&kernel, ExecId::Process(child));

    let tid = kernel.thread_create(VirtAddr::new(START), 0).unwrap();
    assert!(kernel.thread_join(tid).is_pending());

    switch_to(&kernel, ExecId::Process(init));
    kernel.kill(child).unwrap();
    assert_eq!(kernel.thread_state(child, tid), Some(ProcState::Runnable));

    let dispatch = switch_to(&kernel, ExecId::Process(child));
    assert_eq!(dispatch.resumed, Some(Err(KernelError::Killed)));
    assert!(kernel.current_killed());
}

#[test]
fn threads_fork_with_their_own_registers() {
    let (kernel, init) = boot(KernelConfig::default());
    let tid = kernel.thread_create(VirtAddr::new(START), 9).unwrap();
    switch_to(&kernel, ExecId::Thread { pid: init, tid });

    let child = kernel.fork().unwrap();
    let tf = kernel.trap_frame(ExecId::Process(child)).unwrap();
    assert_eq!(tf.rip, START);
    assert_eq!(tf.rdi, 9);
    assert_eq!(tf.return_value(), 0);
    assert_eq!(kernel.process_stats(child).unwrap().threads, 0);
}

#[test]
fn only_one_of_two_joiners_reaps() {
    let (kernel, init) = boot(KernelConfig::default());
    let a = kernel.thread_create(VirtAddr::new(START), 0).unwrap();
    let b = kernel.thread_create(VirtAddr::new(START), 0).unwrap();

    assert!(kernel.thread_join(a).is_pending());
    switch_to(&kernel, ExecId::Thread { pid: init, tid: b });
    assert!(kernel.thread_join(a).is_pending());

    switch_to(&kernel, ExecId::Thread { pid: init, tid: a });
    kernel.thread_exit(9);

    let mut results = Vec::new();
    while results.len() < 2 {
        kernel.yield_cpu();
        if let Some(dispatch) = kernel.schedule() {
            if let Some(result) = dispatch.resumed {
                results.push((dispatch.exec, result));
            }
        }
    }
    assert_ne!(results[0].0, results[1].0);
    assert_eq!(results[0].1, Ok(9));
    assert_eq!(results[1].1, Err(KernelError::NoSuchThread));
    assert_eq!(kernel.thread_state(init, a), None);
}
