use std::sync::Arc;
use std::time::Duration;
use shared::models::TemperatureSample;
use tokio::sync::mpsc;

use crate::alarms::{AlarmService, AlarmSink};
use crate::common::{EngineError, EngineResult};
use crate::core::{BackgroundTasks, Config, TaskKind};
use crate::dispatch::{
    CancelRequests, DispatchCoordinator, DispatchQueue, DispatchSettings, DispenseDevice,
    SimulatedRack, TcpRackDevice, run_dispatch_worker,
};
use crate::inventory::{AllocationPlanner, ExpiryScanner, InventoryService};
use crate::lock::{BackoffPolicy, ChannelLockManager, DistributedLock, StoreLock};
use crate::message::EventBus;
use crate::orders::OrderService;
use crate::statistics::StatisticsService;
use crate::storage::RackStorage;
use crate::temperature::{LiveReadings, MonitorSettings, TemperatureMonitor};
use crate::trace::TraceRecorder;

/// Simulated rack round trip when no controller is attached
const SIMULATED_LATENCY: Duration = Duration::from_millis(300);
const SENSOR_FEED_CAPACITY: usize = 256;

/// 引擎状态 - 持有所有服务的共享引用
///
/// Clone 为浅拷贝。
///
/// | 字段 | 说明 |
/// |------|------|
/// | config | 配置项 (不可变) |
/// | storage | redb 存储 |
/// | bus | 事件广播 (订单状态、告警、温度) |
/// | locks | 机械臂租约 |
/// | orders | 订单受理与调度 |
/// | inventory | 疫苗目录、货道、出入库 |
/// | alarms | 告警台账 |
/// | traces | 追溯记录 |
/// | monitor | 温度监控 |
/// | expiry | 效期巡检 |
#[derive(Clone)]
pub struct EngineState {
    pub config: Config,
    pub storage: RackStorage,
    pub bus: EventBus,
    pub readings: LiveReadings,
    pub locks: ChannelLockManager,
    pub queue: DispatchQueue,
    pub orders: Arc<OrderService>,
    pub inventory: InventoryService,
    pub alarms: Arc<AlarmService>,
    pub traces: TraceRecorder,
    pub statistics: StatisticsService,
    pub monitor: Arc<TemperatureMonitor>,
    pub expiry: Arc<ExpiryScanner>,
}

impl EngineState {
    /// 按配置初始化
    ///
    /// 1. 工作目录
    /// 2. 数据库 (work_dir/rack.redb), 锁后端与数据库共用
    /// 3. 货架设备: `HARDWARE_ADDR` 为空时使用模拟货架
    pub fn initialize(config: &Config) -> EngineResult<Self> {
        std::fs::create_dir_all(&config.work_dir).map_err(|e| {
            EngineError::Config(format!("cannot create work dir {}: {}", config.work_dir, e))
        })?;
        let storage = RackStorage::open(config.database_path())?;
        let lock: Arc<dyn DistributedLock> = Arc::new(StoreLock::new(storage.clone()));
        let device: Arc<dyn DispenseDevice> = match &config.hardware_addr {
            Some(addr) => {
                tracing::info!(addr = %addr, "Using rack controller");
                Arc::new(TcpRackDevice::new(addr.clone()))
            }
            None => {
                tracing::warn!("HARDWARE_ADDR not set, using simulated rack");
                Arc::new(SimulatedRack::new(SIMULATED_LATENCY))
            }
        };
        Ok(Self::with_components(config.clone(), storage, lock, device))
    }

    /// 由外部提供存储、锁后端和设备 (测试使用内存实现)
    pub fn with_components(
        config: Config,
        storage: RackStorage,
        lock: Arc<dyn DistributedLock>,
        device: Arc<dyn DispenseDevice>,
    ) -> Self {
        let bus = EventBus::new(config.event_channel_capacity);
        let readings = LiveReadings::new();
        let locks = ChannelLockManager::new(
            lock,
            &config.machine_id,
            config.lock_ttl(),
            BackoffPolicy::from_config(&config),
        );
        let alarms = Arc::new(AlarmService::new(storage.clone(), bus.clone()));
        let sink: Arc<dyn AlarmSink> = alarms.clone();
        let traces = TraceRecorder::new(storage.clone());
        let planner = AllocationPlanner::new(storage.clone());
        let queue = DispatchQueue::new(config.max_pending_orders);
        let cancels = CancelRequests::default();

        let coordinator = Arc::new(DispatchCoordinator::new(
            storage.clone(),
            planner.clone(),
            traces.clone(),
            locks.clone(),
            device,
            sink.clone(),
            bus.clone(),
            readings.clone(),
            cancels.clone(),
            DispatchSettings::from_config(&config),
        ));
        let orders = Arc::new(OrderService::new(
            storage.clone(),
            planner,
            coordinator,
            queue.clone(),
            cancels,
            sink.clone(),
            bus.clone(),
        ));
        let inventory = InventoryService::new(
            storage.clone(),
            traces.clone(),
            locks.clone(),
            readings.clone(),
            &config.machine_id,
            config.expiry_warn_days,
        );
        let monitor = Arc::new(TemperatureMonitor::new(
            storage.clone(),
            sink.clone(),
            bus.clone(),
            readings.clone(),
            MonitorSettings::from_config(&config),
        ));
        let expiry = Arc::new(ExpiryScanner::new(
            storage.clone(),
            sink,
            config.expiry_warn_days,
        ));

        Self {
            statistics: StatisticsService::new(storage.clone()),
            config,
            storage,
            bus,
            readings,
            locks,
            queue,
            orders,
            inventory,
            alarms,
            traces,
            monitor,
            expiry,
        }
    }

    /// 启动后台任务
    ///
    /// - `WORKER_COUNT` 个调度 worker
    /// - 温度监控 (返回传感器数据入口)
    /// - 效期巡检
    ///
    /// 之后重新排队上次未完成的订单。
    pub async fn start_background_tasks(
        &self,
        tasks: &mut BackgroundTasks,
    ) -> EngineResult<mpsc::Sender<TemperatureSample>> {
        for worker_id in 0..self.config.worker_count {
            tasks.spawn(
                format!("dispatch_worker_{}", worker_id),
                TaskKind::Worker,
                run_dispatch_worker(
                    worker_id,
                    self.queue.clone(),
                    self.orders.clone(),
                    tasks.shutdown_token(),
                ),
            );
        }

        let (feed_tx, feed_rx) = mpsc::channel(SENSOR_FEED_CAPACITY);
        tasks.spawn(
            "temperature_monitor",
            TaskKind::Listener,
            self.monitor.clone().run(feed_rx, tasks.shutdown_token()),
        );
        tasks.spawn(
            "expiry_scanner",
            TaskKind::Periodic,
            self.expiry.clone().run(
                Duration::from_secs(self.config.expiry_scan_interval_secs.max(1)),
                tasks.shutdown_token(),
            ),
        );

        self.orders.recover_unfinished().await?;
        Ok(feed_tx)
    }
}
