use std::time::Duration;

use anyhow::Context;
use vaccine_edge::{BackgroundTasks, Config, EngineState, TaskKind, init_logger_with_file, print_banner};
use vaccine_edge::temperature::simulate_sensors;

const SIMULATED_SENSOR_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 环境变量 (.env 可选)
    dotenv::dotenv().ok();

    // 2. 配置与日志
    let config = Config::from_env();
    std::fs::create_dir_all(config.log_dir()).context("create log directory")?;
    init_logger_with_file(&config.log_level, config.log_json, Some(&config.log_dir()))?;
    config.validate()?;

    print_banner();
    tracing::info!(machine_id = %config.machine_id, work_dir = %config.work_dir, "Vaccine edge starting...");

    // 3. 引擎装配
    let state = EngineState::initialize(&config)?;

    // 4. 后台任务
    let mut tasks = BackgroundTasks::new();
    let sensor_feed = state.start_background_tasks(&mut tasks).await?;
    let _sensor_bus = match config.hardware_addr {
        None => {
            let rows = state.inventory.channel_matrix()?.len().max(1) as u16;
            tasks.spawn(
                "sensor_simulator",
                TaskKind::Worker,
                simulate_sensors(
                    sensor_feed,
                    rows * config.sensors_per_row,
                    SIMULATED_SENSOR_INTERVAL,
                    tasks.shutdown_token(),
                ),
            );
            None
        }
        // the controller link pushes samples through this sender
        Some(_) => Some(sensor_feed),
    };
    tasks.log_summary();

    // 5. 等待退出信号
    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    tracing::info!("Shutdown signal received");
    tasks.shutdown().await;

    Ok(())
}
