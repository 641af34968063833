// Console device: a lock-free input queue fed by the keyboard side and
// captured output streams for fds 1 and 2
use alloc::string::String;
use conquer_once::spin::OnceCell;
use crossbeam_queue::ArrayQueue;
use spin::Mutex;

pub const STDOUT: i32 = 1;
pub const STDERR: i32 = 2;

pub struct Console {
    input: OnceCell<ArrayQueue<u8>>,
    capacity: usize,
    stdout: Mutex<String>,
    stderr: Mutex<String>,
}

impl Console {
    pub const fn new(capacity: usize) -> Self {
        Self {
            input: OnceCell::uninit(),
            capacity,
            stdout: Mutex::new(String::new()),
            stderr: Mutex::new(String::new()),
        }
    }

    /// Set up the input queue. Only the first call has any effect.
    pub fn attach(&self) {
        let capacity = self.capacity;
        if self
            .input
            .try_init_once(|| ArrayQueue::new(capacity))
            .is_err()
        {
            log::warn!("console input already attached");
        }
    }

    /// Called by the keyboard side for every byte typed.
    pub fn push_input(&self, byte: u8) {
        if let Ok(queue) = self.input.try_get() {
            if queue.push(byte).is_err() {
                log::warn!("console input queue full; dropping input");
            }
        } else {
            log::warn!("console input queue uninitialized");
        }
    }

    pub fn push_str(&self, input: &str) {
        for byte in input.bytes() {
            self.push_input(byte);
        }
    }

    /// Read one line into `buf`, keeping the newline, NUL-terminated.
    ///
    /// Stops at a newline or when `buf` has one byte left. Returns the number
    /// of bytes read; 0 means no input is pending.
    pub fn read_line(&self, buf: &mut [u8]) -> usize {
        let queue = match self.input.try_get() {
            Ok(queue) => queue,
            Err(_) => return 0,
        };

        let mut n = 0;
        while n + 1 < buf.len() {
            match queue.pop() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                    if byte == b'\n' || byte == b'\r' {
                        break;
                    }
                }
                None => break,
            }
        }
        if n < buf.len() {
            buf[n] = 0;
        }
        n
    }

    pub fn write(&self, fd: i32, text: &str) {
        match fd {
            STDERR => self.stderr.lock().push_str(text),
            _ => self.stdout.lock().push_str(text),
        }
    }

    /// Take everything written to stdout so far
    pub fn take_stdout(&self) -> String {
        core::mem::take(&mut *self.stdout.lock())
    }

    pub fn take_stderr(&self) -> String {
        core::mem::take(&mut *self.stderr.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_line_splits_on_newline() {
        let console = Console::new(64);
        console.attach();
        console.push_str("list\nquit\n");

        let mut buf = [0u8; 16];
        let n = console.read_line(&mut buf);
        assert_eq!(&buf[..n], b"list\n");
        assert_eq!(buf[n], 0);

        let n = console.read_line(&mut buf);
        assert_eq!(&buf[..n], b"quit\n");
        assert_eq!(console.read_line(&mut buf), 0);
    }

    #[test]
    fn test_read_line_truncates_to_buffer() {
        let console = Console::new(64);
        console.attach();
        console.push_str("abcdefgh\n");

        let mut buf = [0u8; 4];
        assert_eq!(console.read_line(&mut buf), 3);
        assert_eq!(&buf, b"abc\0");
    }

    #[test]
    fn test_input_before_attach_is_dropped() {
        let console = Console::new(4);
        console.push_input(b'x');
        console.attach();
        let mut buf = [0u8; 4];
        assert_eq!(console.read_line(&mut buf), 0);
    }

    #[test]
    fn test_output_capture() {
        let console = Console::new(4);
        console.write(STDOUT, "hello ");
        console.write(STDOUT, "world\n");
        console.write(STDERR, "oops\n");
        assert_eq!(console.take_stdout(), "hello world\n");
        assert_eq!(console.take_stdout(), "");
        assert_eq!(console.take_stderr(), "oops\n");
    }
}
