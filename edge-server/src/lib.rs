//! Vaccine Edge - 疫苗自动发苗机的分配与调度引擎
//!
//! # 架构概述
//!
//! - **订单** (`orders`): 受理、状态机、取消与重试
//! - **调度** (`dispatch`): FEFO 计划逐件出库, 机械臂租约串行化
//! - **库存** (`inventory`): FEFO 计划、疫苗目录、货道、出入库、效期巡检
//! - **锁** (`lock`): 带 TTL 与所有权令牌的机器级租约
//! - **温度** (`temperature`): 去抖超温告警、实时读数
//! - **追溯** (`trace`): 只追加的出入库记录
//! - **告警** (`alarms`): 告警台账
//! - **存储** (`storage`): 嵌入式 redb
//! - **消息** (`message`): 事件广播与帧编解码
//!
//! # 模块结构
//!
//! ```text
//! edge-server/src/
//! ├── core/          # 配置、状态装配、后台任务
//! ├── common/        # 错误、日志
//! ├── storage/       # redb 表与读写
//! ├── lock/          # DistributedLock + ChannelLockManager
//! ├── inventory/     # 计划、库存服务、效期
//! ├── dispatch/      # 协调器、设备、worker
//! ├── orders/        # 订单服务、状态机
//! ├── temperature/   # 温度监控
//! ├── trace/         # 追溯
//! ├── alarms/        # 告警
//! ├── message/       # 事件总线
//! └── statistics.rs  # 概览统计
//! ```

pub mod alarms;
pub mod common;
pub mod core;
pub mod dispatch;
pub mod inventory;
pub mod lock;
pub mod message;
pub mod orders;
pub mod statistics;
pub mod storage;
pub mod temperature;
pub mod trace;

// Re-export 公共类型
pub use common::{EngineError, EngineResult};
pub use core::{BackgroundTasks, Config, EngineState, TaskKind};
pub use message::{BusMessage, EngineEvent, EventBus, EventType};
pub use orders::{CancelOutcome, OrderService};
pub use storage::RackStorage;

pub use shared::{ErrorCategory, ErrorCode};

// Re-export logger functions
pub use common::logger::{cleanup_old_logs, init_logger, init_logger_with_file};

pub fn print_banner() {
    println!(
        r#"
 _    __                _
| |  / /___ ___________(_)___  ___
| | / / __ `/ ___/ ___/ / __ \/ _ \
| |/ / /_/ / /__/ /__/ / / / /  __/
|___/\__,_/\___/\___/_/_/ /_/\___/
    ______    __
   / ____/___/ /___ ____
  / __/ / __  / __ `/ _ \
 / /___/ /_/ / /_/ /  __/
/_____/\__,_/\__, /\___/
            /____/
    "#
    );
}
