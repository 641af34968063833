// Kernel services layered over the process table
pub mod file_system_service;
pub mod memory_service;
pub mod process_service;
pub mod thread_service;

pub use process_service::ProcessStats;
