pub mod supervisor;
pub mod config;
pub mod runtime;  // 런타임/의존성 전제 조건
pub mod log_file;
pub mod process_monitor;
pub mod utils;
