//! 通用模块 - 错误类型、日志

pub mod error;
pub mod logger;

pub use error::{EngineError, EngineResult};
pub use logger::{cleanup_old_logs, init_logger, init_logger_with_file};
