//! Kernel log backend.
//!
//! Records go into a bounded ring (the kernel message buffer). When the ring
//! is full the oldest record is dropped.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use conquer_once::spin::OnceCell;
use crossbeam_queue::ArrayQueue;

/// Records kept in the message buffer.
pub const LOG_CAPACITY: usize = 256;

/// Logger implementation for the log crate
pub struct KernelLogger {
    ring: OnceCell<ArrayQueue<String>>,
}

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Ok(ring) = self.ring.try_get() {
            ring.force_push(format!(
                "[{:5}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}

/// Global logger instance
static LOGGER: KernelLogger = KernelLogger {
    ring: OnceCell::uninit(),
};

/// Install the kernel logger. Later calls only adjust the level.
pub fn init_logger(level: log::LevelFilter) {
    let _ = LOGGER.ring.try_init_once(|| ArrayQueue::new(LOG_CAPACITY));
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// Remove and return every buffered record, oldest first
pub fn drain() -> Vec<String> {
    let mut records = Vec::new();
    if let Ok(ring) = LOGGER.ring.try_get() {
        while let Some(record) = ring.pop() {
            records.push(record);
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_reach_the_ring() {
        init_logger(log::LevelFilter::Trace);
        log::info!("[TEST] hello {}", 42);

        let records = drain();
        assert!(records
            .iter()
            .any(|r| r.starts_with("[INFO ]") && r.ends_with("[TEST] hello 42")));
    }
}
