//! Process manager shell (`pmanager`).
//!
//! Reads commands from the console and drives the process subsystem through
//! the user library:
//!
//! ```text
//! list                        one line per process
//! kill <pid>                  kill a process
//! exec <path> <stacksize>     run a program with extra stack pages
//! memlim <pid> <limit>        set a memory limit in bytes (0 = none)
//! quit                        leave the shell
//! ```

use alloc::format;

use crate::console::{STDERR, STDOUT};
use crate::param::{MAX_COMMAND_LENGTH, NPROC, PGSIZE};
use crate::process::pcb::ProcStat;
use crate::userspace::SystemCalls;

pub const PROMPT: &str = "pmanager> ";

/// What the read loop does after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
}

pub struct Shell<S: SystemCalls> {
    sys: S,
}

impl<S: SystemCalls> Shell<S> {
    pub fn new(sys: S) -> Self {
        Self { sys }
    }

    pub fn sys(&mut self) -> &mut S {
        &mut self.sys
    }

    pub fn into_inner(self) -> S {
        self.sys
    }

    /// Prompt, read and execute until `quit` or the input runs out
    pub fn run(&mut self) {
        loop {
            self.sys.write(STDOUT, PROMPT);

            let mut buf = [0u8; MAX_COMMAND_LENGTH];
            let n = self.sys.gets(&mut buf);
            if n == 0 {
                break;
            }
            let line = core::str::from_utf8(&buf[..n]).unwrap_or("");
            let command = line.trim_end_matches(['\n', '\r']);

            if self.execute(command) == Control::Quit {
                break;
            }
        }
    }

    /// Execute one command line (without its newline)
    pub fn execute(&mut self, command: &str) -> Control {
        if command == "list" {
            self.list_processes();
        } else if let Some(rest) = command.strip_prefix("kill ") {
            self.kill_process(atoi(rest));
        } else if let Some(rest) = command.strip_prefix("exec ") {
            if let Some((path, stacksize)) = rest.split_once(' ') {
                self.execute_process(path, atoi(stacksize));
            }
        } else if let Some(rest) = command.strip_prefix("memlim ") {
            if let Some((pid, limit)) = rest.split_once(' ') {
                self.set_memory_limit(atoi(pid), atoi(limit));
            }
        } else if command == "quit" {
            self.sys.exit();
            return Control::Quit;
        } else {
            self.sys.write(STDERR, "Invalid command\n");
        }
        Control::Continue
    }

    fn list_processes(&mut self) {
        let mut stats = [ProcStat::default(); NPROC];
        let count = self.sys.ps(&mut stats);
        if count <= 0 {
            return;
        }
        for stat in &stats[..count as usize] {
            let line = format!(
                "pid: {}, name: {}, pages: {}, memsize: {}, memlimit: {}\n",
                stat.pid, stat.name, stat.num_pages, stat.memsize, stat.memlimit
            );
            self.sys.write(STDOUT, &line);
        }
    }

    fn kill_process(&mut self, pid: i32) {
        if self.sys.kill(pid) < 0 {
            self.sys
                .write(STDOUT, &format!("Failed to kill process {}\n", pid));
        }
    }

    /// Fork a child that runs `path` with `stacksize` extra pages. The
    /// child side runs `launch`; the shell then carries on as the parent.
    /// Returns the child's pid, or -1 if the fork failed.
    pub fn execute_process(&mut self, path: &str, stacksize: i32) -> i32 {
        let parent = self.sys.getpid();
        let pid = self.sys.fork();
        if pid < 0 {
            self.sys.write(STDOUT, "Failed to fork process\n");
            return pid;
        }
        log::debug!("[PMANAGER] {} ({} stack pages) -> pid {}", path, stacksize, pid);

        if self.sys.switch_to(pid) {
            self.launch(path, stacksize);
        }
        self.sys.switch_to(parent);
        pid
    }

    /// Child side of `exec`: grow the stack area, then replace the image.
    /// Exits if the program cannot be started.
    pub fn launch(&mut self, path: &str, stacksize: i32) {
        self.sys.sbrk(stacksize.saturating_mul(PGSIZE as i32));
        if self.sys.exec(path, &[path]) < 0 {
            self.sys
                .write(STDOUT, &format!("Failed to execute {}\n", path));
            self.sys.exit();
        }
    }

    fn set_memory_limit(&mut self, pid: i32, limit: i32) {
        if self.sys.setmemorylimit(pid, limit) < 0 {
            self.sys.write(
                STDOUT,
                &format!("Failed to set memory limit for process {}\n", pid),
            );
        }
    }
}

/// C `atoi`: optional sign and leading digits, 0 when there are none
pub fn atoi(s: &str) -> i32 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let value = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i32, |n, d| n.wrapping_mul(10).wrapping_add(i32::from(d - b'0')));
    if negative {
        value.wrapping_neg()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use alloc::vec::Vec;

    /// Records every call and answers from canned values
    #[derive(Default)]
    struct FakeSys {
        calls: Vec<String>,
        out: String,
        err: String,
        input: Vec<&'static str>,
        fail: bool,
    }

    impl SystemCalls for FakeSys {
        fn fork(&mut self) -> i32 {
            self.calls.push(String::from("fork"));
            if self.fail { -1 } else { 5 }
        }
        fn exit(&mut self) {
            self.calls.push(String::from("exit"));
        }
        fn getpid(&mut self) -> i32 {
            1
        }
        fn switch_to(&mut self, pid: i32) -> bool {
            self.calls.push(format!("switch {}", pid));
            true
        }
        fn kill(&mut self, pid: i32) -> i32 {
            self.calls.push(format!("kill {}", pid));
            if self.fail { -1 } else { 0 }
        }
        fn exec(&mut self, path: &str, argv: &[&str]) -> i32 {
            self.calls.push(format!("exec {} {:?}", path, argv));
            if path.contains("missing") { -1 } else { argv.len() as i32 }
        }
        fn sbrk(&mut self, n: i32) -> i32 {
            self.calls.push(format!("sbrk {}", n));
            0
        }
        fn setmemorylimit(&mut self, pid: i32, limit: i32) -> i32 {
            self.calls.push(format!("memlim {} {}", pid, limit));
            if self.fail { -1 } else { 0 }
        }
        fn ps(&mut self, stats: &mut [ProcStat]) -> i32 {
            stats[0] = ProcStat {
                pid: 1,
                name: crate::process::pcb::ProcName::new("init"),
                num_pages: 1,
                memsize: 4096,
                memlimit: 0,
            };
            1
        }
        fn gets(&mut self, buf: &mut [u8]) -> usize {
            if self.input.is_empty() {
                return 0;
            }
            let line = self.input.remove(0).as_bytes();
            buf[..line.len()].copy_from_slice(line);
            line.len()
        }
        fn write(&mut self, fd: i32, text: &str) {
            if fd == STDERR {
                self.err.push_str(text);
            } else {
                self.out.push_str(text);
            }
        }
    }

    #[test]
    fn test_atoi() {
        assert_eq!(atoi("42"), 42);
        assert_eq!(atoi("12abc"), 12);
        assert_eq!(atoi("abc"), 0);
        assert_eq!(atoi(""), 0);
        assert_eq!(atoi("-7"), -7);
        assert_eq!(atoi("  3"), 3);
    }

    #[test]
    fn test_list_format() {
        let mut shell = Shell::new(FakeSys::default());
        shell.execute("list");
        assert_eq!(
            shell.sys().out,
            "pid: 1, name: init, pages: 1, memsize: 4096, memlimit: 0\n"
        );
    }

    #[test]
    fn test_commands_dispatch() {
        let mut shell = Shell::new(FakeSys::default());
        shell.execute("kill 3");
        shell.execute("memlim 2 8192");
        shell.execute("exec /bin/echo 10");
        assert_eq!(
            shell.sys().calls[..4],
            ["kill 3", "memlim 2 8192", "fork", "switch 5"]
        );
        assert!(shell.sys().out.is_empty());
    }

    #[test]
    fn test_exec_runs_child_side() {
        let mut shell = Shell::new(FakeSys::default());
        assert_eq!(shell.execute_process("/bin/echo", 10), 5);
        assert_eq!(
            shell.sys().calls,
            [
                String::from("fork"),
                String::from("switch 5"),
                format!("sbrk {}", 10 * PGSIZE),
                String::from("exec /bin/echo [\"/bin/echo\"]"),
                String::from("switch 1"),
            ]
        );
    }

    #[test]
    fn test_failures_are_reported() {
        let mut shell = Shell::new(FakeSys {
            fail: true,
            ..FakeSys::default()
        });
        shell.execute("kill 9");
        shell.execute("memlim 4 100");
        assert_eq!(shell.execute("exec /bin/ls 1"), Control::Continue);
        assert_eq!(
            shell.sys().out,
            "Failed to kill process 9\n\
             Failed to set memory limit for process 4\n\
             Failed to fork process\n"
        );
    }

    #[test]
    fn test_malformed_commands() {
        let mut shell = Shell::new(FakeSys::default());
        shell.execute("exec /bin/echo");
        shell.execute("memlim 3");
        assert!(shell.sys().calls.is_empty());

        shell.execute("frobnicate");
        shell.execute("");
        assert_eq!(shell.sys().err, "Invalid command\nInvalid command\n");
    }

    #[test]
    fn test_launch_failure_exits() {
        let mut shell = Shell::new(FakeSys::default());
        shell.launch("/bin/missing", 3);
        assert_eq!(
            shell.sys().calls,
            [
                format!("sbrk {}", 3 * PGSIZE),
                String::from("exec /bin/missing [\"/bin/missing\"]"),
                String::from("exit"),
            ]
        );
        assert_eq!(shell.sys().out, "Failed to execute /bin/missing\n");
    }

    #[test]
    fn test_run_until_quit() {
        let mut shell = Shell::new(FakeSys {
            input: alloc::vec!["list\n", "quit\n", "list\n"],
            ..FakeSys::default()
        });
        shell.run();
        let sys = shell.into_inner();
        assert_eq!(sys.calls, ["exit"]);
        assert_eq!(sys.out.matches(PROMPT).count(), 2);
        assert_eq!(sys.out.matches("pid: 1").count(), 1);
    }
}
