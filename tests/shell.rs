mod common;

use core::task::Poll;

use common::{boot, switch_to};
use procos::param::PGSIZE;
use procos::services::file_system_service::Program;
use procos::shell::{Control, Shell, PROMPT};
use procos::userspace::KernelUser;
use procos::{ExecId, KernelConfig, ProcState};

#[test]
fn exec_of_missing_program_only_ends_the_child() {
    let (kernel, init) = boot(KernelConfig::default());
    let parent_size = kernel.process_stats(init).unwrap().memory_size;
    let mut shell = Shell::new(KernelUser::new(&kernel));

    assert_eq!(shell.execute("exec /bin/echo 10"), Control::Continue);
    let child = 2;
    assert_eq!(kernel.current_pid(), Some(init));

    let stats = kernel.process_stats(child).unwrap();
    assert_eq!(stats.state, ProcState::Zombie);
    // pre-expanded pages plus the argument scratch page
    assert_eq!(stats.memory_size, parent_size + 11 * PGSIZE);
    assert_eq!(
        kernel.console().take_stdout(),
        "Failed to execute /bin/echo\n"
    );

    assert_eq!(kernel.process_stats(init).unwrap().memory_size, parent_size);
    assert_eq!(kernel.wait(), Poll::Ready(Ok(child)));
}

#[test]
fn exec_replaces_the_child_image() {
    let (kernel, init) = boot(KernelConfig::default());
    kernel
        .vfs()
        .install("/bin/echo", Program::new(0, &[0x90; 64]))
        .unwrap();
    let mut shell = Shell::new(KernelUser::new(&kernel));

    assert_eq!(shell.execute_process("/bin/echo", 10), 2);
    assert_eq!(kernel.current_pid(), Some(init));

    let stats = kernel.process_stats(2).unwrap();
    assert_eq!(stats.state, ProcState::Runnable);
    assert_eq!(stats.name.as_str(), "echo");
    assert_eq!(stats.memory_size, 3 * PGSIZE);
    assert!(kernel.console().take_stdout().is_empty());
}

#[test]
fn session_exec_runs_the_program() {
    let (kernel, init) = boot(KernelConfig::default());
    kernel
        .vfs()
        .install("/bin/echo", Program::new(0, &[0x90; 64]))
        .unwrap();
    kernel.console().push_str("exec /bin/echo 3\nexec /bin/none 2\n");

    let mut shell = Shell::new(KernelUser::new(&kernel));
    shell.run();

    assert_eq!(kernel.current_pid(), Some(init));
    let echo = kernel.process_stats(2).unwrap();
    assert_eq!(echo.name.as_str(), "echo");
    assert_eq!(echo.state, ProcState::Runnable);
    let none = kernel.process_stats(3).unwrap();
    assert_eq!(none.state, ProcState::Zombie);
    assert_eq!(none.memory_size, PGSIZE + 3 * PGSIZE);

    assert_eq!(
        kernel.console().take_stdout(),
        format!("{}{}Failed to execute /bin/none\n{}", PROMPT, PROMPT, PROMPT)
    );
    assert_eq!(kernel.process_stats(init).unwrap().memory_size, PGSIZE);
}

#[test]
fn list_shows_every_process() {
    let (kernel, _) = boot(KernelConfig::default());
    kernel
        .vfs()
        .install("/bin/echo", Program::new(0, &[0x90; 64]))
        .unwrap();
    let mut shell = Shell::new(KernelUser::new(&kernel));
    shell.execute("exec /bin/echo 1");
    shell.execute("list");

    let out = kernel.console().take_stdout();
    let lines: Vec<&str> = out.lines().collect();
    // init grew one page for the shell's scratch area
    assert_eq!(
        lines,
        [
            "pid: 1, name: initcode, pages: 2, memsize: 8192, memlimit: 0",
            "pid: 2, name: echo, pages: 3, memsize: 12288, memlimit: 0",
        ]
    );
}

#[test]
fn failures_and_bad_input() {
    let (kernel, _) = boot(KernelConfig::default());
    let mut shell = Shell::new(KernelUser::new(&kernel));

    shell.execute("kill 40");
    shell.execute("memlim 1 100");
    shell.execute("memlim 40 0");
    shell.execute("exec");
    shell.execute("dance");
    assert_eq!(
        kernel.console().take_stdout(),
        "Failed to kill process 40\n\
         Failed to set memory limit for process 1\n\
         Failed to set memory limit for process 40\n"
    );
    assert_eq!(
        kernel.console().take_stderr(),
        "Invalid command\nInvalid command\n"
    );
}

#[test]
fn session_reads_until_quit() {
    let (kernel, _) = boot(KernelConfig::default());
    let child = kernel.fork().unwrap();
    switch_to(&kernel, ExecId::Process(child));

    kernel.console().push_str("memlim 2 65536\nquit\nlist\n");
    let mut shell = Shell::new(KernelUser::new(&kernel));
    shell.run();

    assert_eq!(kernel.process_state(child), Some(ProcState::Zombie));
    assert_eq!(
        kernel.process_stats(child).unwrap().memory_limit,
        65536
    );
    assert_eq!(kernel.console().take_stdout(), PROMPT.repeat(2));

    // The rest of the input is still queued
    let mut buf = [0u8; 16];
    assert_eq!(kernel.console().read_line(&mut buf), 5);
}
