//! 演示入口：在Mock夹具链路上跑一块2×2面板的完整验收测试

use std::collections::HashMap;
use std::sync::Arc;

use led_fat::models::{
    FunctionTestStep, Limits, PanelGeometry, ProductConfig, Range, RelayGroupConfig,
};
use led_fat::services::application::TestCoordinationService;
use led_fat::services::infrastructure::MockDeviceLink;
use led_fat::services::traits::LogProgressSink;
use led_fat::utils::config::FixtureConfig;
use log::info;

fn demo_config() -> ProductConfig {
    let limits = Limits {
        current_a: Range::new(0.1, 0.5),
        voltage_v: Range::new(11.0, 13.0),
    };

    let mut relay_table = HashMap::new();
    relay_table.insert(
        "1".to_string(),
        RelayGroupConfig { board: 1, function: "mainbeam".to_string() },
    );
    relay_table.insert(
        "2".to_string(),
        RelayGroupConfig { board: 2, function: "mainbeam".to_string() },
    );
    relay_table.insert(
        "3".to_string(),
        RelayGroupConfig { board: 3, function: "mainbeam".to_string() },
    );
    relay_table.insert(
        "4".to_string(),
        RelayGroupConfig { board: 4, function: "mainbeam".to_string() },
    );

    ProductConfig {
        product_id: "LED-PANEL-DEMO".to_string(),
        channel_count: 8,
        panel: PanelGeometry { rows: 2, cols: 2 },
        relay_table,
        test_sequence: vec![FunctionTestStep {
            function: "mainbeam".to_string(),
            duration_ms: 200,
            limits,
            collect_color_samples: false,
        }],
        power_stabilization_ms: 500,
        programming: None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let link = Arc::new(MockDeviceLink::with_jitter(8, 0.02));
    link.set_all_readings(12.0, 0.3);

    let service = TestCoordinationService::new(
        link,
        FixtureConfig::default(),
        Arc::new(LogProgressSink),
    );

    service.start_panel_test(demo_config()).await?;
    let outcome = service.wait_for_result().await?;

    info!(
        "演示测试完成: {} 结果={} 测量{}条 失败{}条 耗时{}ms",
        outcome.result.test_name,
        if outcome.result.passed { "通过" } else { "失败" },
        outcome.result.measurements.len(),
        outcome.result.failures.len(),
        outcome.result.duration_ms
    );
    for failure in &outcome.result.failures {
        info!("失败: {}", failure);
    }

    Ok(())
}
