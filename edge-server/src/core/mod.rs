//! 核心模块 - 配置、状态、后台任务
//!
//! - [`Config`] - 引擎配置
//! - [`EngineState`] - 服务装配
//! - [`BackgroundTasks`] - 后台任务管理

pub mod config;
pub mod state;
pub mod tasks;

pub use config::Config;
pub use state::EngineState;
pub use tasks::{BackgroundTasks, TaskKind};
