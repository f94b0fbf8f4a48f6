use std::path::PathBuf;
use std::time::Duration;

use crate::common::EngineError;
use crate::lock::BackoffPolicy;

/// 引擎配置 - 单台发苗机的所有配置项
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | /var/lib/vaccine/edge | 工作目录 (数据库、日志) |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_JSON | false | JSON 日志格式 |
/// | MACHINE_ID | rack-01 | 机器标识 (锁持有者前缀) |
/// | LOCK_TTL_MS | 30000 | 通道锁租约时长 |
/// | LOCK_MAX_ATTEMPTS | 20 | 通道锁最大尝试次数 |
/// | LOCK_BACKOFF_INITIAL_MS | 50 | 退避初始间隔 |
/// | LOCK_BACKOFF_MAX_MS | 2000 | 退避最大间隔 |
/// | HARDWARE_TIMEOUT_MS | 10000 | 单件出库硬件超时 |
/// | HARDWARE_ADDR | (空) | 货架控制器地址, 为空时使用模拟货架 |
/// | CONFLICT_RETRIES | 3 | 并发修改冲突重试次数 |
/// | WORKER_COUNT | 2 | 调度 worker 数 |
/// | MAX_PENDING_ORDERS | 64 | 待调度队列上限 |
/// | TEMP_DEBOUNCE_SAMPLES | 3 | 温度去抖连续样本数 |
/// | TEMP_WARN_MARGIN | 0.5 | 预警余量 (°C) |
/// | TEMP_CRITICAL_BREACH_SECS | 1800 | 超温持续升级为危急的秒数 |
/// | SENSORS_PER_ROW | 2 | 每行传感器数量 |
/// | EXPIRY_WARN_DAYS | 30 | 近效期天数 |
/// | EXPIRY_SCAN_INTERVAL_SECS | 3600 | 效期巡检间隔 |
/// | EVENT_CHANNEL_CAPACITY | 1024 | 事件广播容量 |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/vaccine HARDWARE_ADDR=192.168.1.50:9000 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录
    pub work_dir: String,
    pub log_level: String,
    pub log_json: bool,
    pub machine_id: String,

    // === 通道锁 ===
    pub lock_ttl_ms: u64,
    pub lock_max_attempts: u32,
    pub lock_backoff_initial_ms: u64,
    pub lock_backoff_max_ms: u64,

    // === 调度 ===
    pub hardware_timeout_ms: u64,
    pub hardware_addr: Option<String>,
    pub conflict_retries: u32,
    pub worker_count: usize,
    pub max_pending_orders: usize,

    // === 监控 ===
    pub temp_debounce_samples: u32,
    pub temp_warn_margin: f64,
    pub temp_critical_breach_secs: u64,
    pub sensors_per_row: u16,
    pub expiry_warn_days: i64,
    pub expiry_scan_interval_secs: u64,
    pub event_channel_capacity: usize,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置或无法解析，使用默认值
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/vaccine/edge".into()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_json: env_or("LOG_JSON", false),
            machine_id: std::env::var("MACHINE_ID").unwrap_or_else(|_| "rack-01".into()),
            lock_ttl_ms: env_or("LOCK_TTL_MS", 30_000),
            lock_max_attempts: env_or("LOCK_MAX_ATTEMPTS", 20),
            lock_backoff_initial_ms: env_or("LOCK_BACKOFF_INITIAL_MS", 50),
            lock_backoff_max_ms: env_or("LOCK_BACKOFF_MAX_MS", 2_000),
            hardware_timeout_ms: env_or("HARDWARE_TIMEOUT_MS", 10_000),
            hardware_addr: std::env::var("HARDWARE_ADDR").ok().filter(|s| !s.is_empty()),
            conflict_retries: env_or("CONFLICT_RETRIES", 3),
            worker_count: env_or("WORKER_COUNT", 2),
            max_pending_orders: env_or("MAX_PENDING_ORDERS", 64),
            temp_debounce_samples: env_or("TEMP_DEBOUNCE_SAMPLES", 3),
            temp_warn_margin: env_or("TEMP_WARN_MARGIN", 0.5),
            temp_critical_breach_secs: env_or("TEMP_CRITICAL_BREACH_SECS", 1_800),
            sensors_per_row: env_or("SENSORS_PER_ROW", 2),
            expiry_warn_days: env_or("EXPIRY_WARN_DAYS", 30),
            expiry_scan_interval_secs: env_or("EXPIRY_SCAN_INTERVAL_SECS", 3_600),
            event_channel_capacity: env_or("EVENT_CHANNEL_CAPACITY", 1_024),
        }
    }

    /// 使用自定义工作目录覆盖配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(work_dir: impl Into<String>) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config
    }

    /// 启动前校验
    ///
    /// 硬件超时必须小于锁租约, 否则租约可能在设备动作期间过期
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.hardware_timeout_ms >= self.lock_ttl_ms {
            return Err(EngineError::Config(format!(
                "HARDWARE_TIMEOUT_MS ({}) must be less than LOCK_TTL_MS ({})",
                self.hardware_timeout_ms, self.lock_ttl_ms
            )));
        }
        if self.worker_count == 0 || self.max_pending_orders == 0 {
            return Err(EngineError::Config(
                "WORKER_COUNT and MAX_PENDING_ORDERS must be non-zero".into(),
            ));
        }
        if self.lock_max_attempts == 0 || self.temp_debounce_samples == 0 {
            return Err(EngineError::Config(
                "LOCK_MAX_ATTEMPTS and TEMP_DEBOUNCE_SAMPLES must be non-zero".into(),
            ));
        }
        if self.sensors_per_row == 0 || self.event_channel_capacity == 0 {
            return Err(EngineError::Config(
                "SENSORS_PER_ROW and EVENT_CHANNEL_CAPACITY must be non-zero".into(),
            ));
        }
        if self.lock_backoff_initial_ms > self.lock_backoff_max_ms {
            return Err(EngineError::Config(
                "LOCK_BACKOFF_INITIAL_MS must not exceed LOCK_BACKOFF_MAX_MS".into(),
            ));
        }
        // a lease left by a stalled dispense elsewhere outlives a shorter budget
        let budget = BackoffPolicy::from_config(self).total_budget();
        if budget < self.hardware_timeout() {
            return Err(EngineError::Config(format!(
                "lock backoff budget ({} ms from LOCK_MAX_ATTEMPTS/LOCK_BACKOFF_*) must cover HARDWARE_TIMEOUT_MS ({})",
                budget.as_millis(),
                self.hardware_timeout_ms
            )));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("rack.redb")
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("logs")
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn hardware_timeout(&self) -> Duration {
        Duration::from_millis(self.hardware_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
impl Config {
    /// Fast timings for unit tests
    pub(crate) fn for_tests() -> Self {
        let mut c = Self::with_overrides(std::env::temp_dir().join("vaccine-edge-test").to_string_lossy());
        c.machine_id = "rack-test".into();
        c.lock_ttl_ms = 2_000;
        c.lock_max_attempts = 50;
        c.lock_backoff_initial_ms = 5;
        c.lock_backoff_max_ms = 50;
        c.hardware_timeout_ms = 500;
        c.hardware_addr = None;
        c.conflict_retries = 3;
        c.worker_count = 2;
        c.max_pending_orders = 16;
        c.temp_debounce_samples = 3;
        c.temp_warn_margin = 0.5;
        c.sensors_per_row = 2;
        c.expiry_warn_days = 30;
        c.event_channel_capacity = 256;
        c
    }
}
