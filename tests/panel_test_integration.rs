//! 面板测试集成测试
//!
//! 在Mock夹具链路上走完整的生命周期：通道配置、上电稳定、功能测试、
//! 颜色采样与安全清理，验证指令序列与结果判定的端到端行为

use std::collections::HashMap;
use std::sync::Arc;

use led_fat::models::{
    FunctionTestStep, Limits, PanelGeometry, ProductConfig, Range, RelayGroupConfig,
};
use led_fat::services::domain::test_lifecycle::{ITestLifecycle, PanelTestLifecycle};
use led_fat::services::infrastructure::MockDeviceLink;
use led_fat::services::traits::LogProgressSink;
use led_fat::utils::config::FixtureConfig;

fn limits() -> Limits {
    Limits {
        current_a: Range::new(0.1, 0.5),
        voltage_v: Range::new(11.0, 13.0),
    }
}

/// 2×2面板、4块板、两个功能的典型产品配置
fn panel_config() -> ProductConfig {
    let mut relay_table = HashMap::new();
    for (relays, board, function) in [
        ("1", 1u32, "mainbeam"),
        ("2", 2u32, "mainbeam"),
        ("3", 3u32, "mainbeam"),
        ("4", 4u32, "mainbeam"),
        ("5", 1u32, "position"),
        ("6", 2u32, "position"),
        ("7", 3u32, "position"),
        ("8", 4u32, "position"),
    ] {
        relay_table.insert(
            relays.to_string(),
            RelayGroupConfig {
                board,
                function: function.to_string(),
            },
        );
    }

    ProductConfig {
        product_id: "LED-PANEL-2X2".to_string(),
        channel_count: 8,
        panel: PanelGeometry { rows: 2, cols: 2 },
        relay_table,
        test_sequence: vec![
            FunctionTestStep {
                function: "mainbeam".to_string(),
                duration_ms: 1,
                limits: limits(),
                collect_color_samples: false,
            },
            FunctionTestStep {
                function: "position".to_string(),
                duration_ms: 1,
                limits: limits(),
                collect_color_samples: false,
            },
        ],
        power_stabilization_ms: 1,
        programming: None,
    }
}

fn lifecycle(link: Arc<MockDeviceLink>, config: ProductConfig) -> PanelTestLifecycle {
    PanelTestLifecycle::new(
        link,
        FixtureConfig::default(),
        config,
        Arc::new(LogProgressSink),
    )
}

/// 全部板卡在限时整个面板通过，每板每功能各有电流/电压两条测量
#[tokio::test]
async fn test_full_panel_passes_with_all_boards_in_range() {
    let link = Arc::new(MockDeviceLink::new_for_testing(8));
    link.set_all_readings(12.0, 0.3);

    let mut lifecycle = lifecycle(link.clone(), panel_config());
    let result = lifecycle.execute().await;

    assert!(result.passed, "失败列表: {:?}", result.failures);
    // 2个功能 × 4块板 × (电流+电压)
    assert_eq!(result.measurements.len(), 16);
    for board in 1..=4u32 {
        for function in ["mainbeam", "position"] {
            let name = format!("{}_Board {}_current", function, board);
            assert!(result.measurement(&name).is_some(), "缺少测量 {}", name);
        }
    }
}

/// 通道配置在任何继电器指令之前恰好下发一次
#[tokio::test]
async fn test_channel_config_sent_once_before_relays() {
    let link = Arc::new(MockDeviceLink::new_for_testing(8));
    link.set_all_readings(12.0, 0.3);

    let mut lifecycle = lifecycle(link.clone(), panel_config());
    let _ = lifecycle.execute().await;

    let log = link.command_log();
    let config_positions: Vec<usize> = log
        .iter()
        .enumerate()
        .filter(|(_, c)| c.starts_with("CONFIG:CHANNELS:"))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(config_positions, vec![0]);
    assert_eq!(log[0], "CONFIG:CHANNELS:8");
}

/// 单块板超限只判失败该板，面板其余板卡测量照常且在限
#[tokio::test]
async fn test_single_failing_board_does_not_taint_others() {
    let link = Arc::new(MockDeviceLink::new_for_testing(8));
    link.set_all_readings(12.0, 0.3);
    // 板2的mainbeam通道电流超限
    link.set_reading(2, 12.0, 0.9);

    let mut lifecycle = lifecycle(link.clone(), panel_config());
    let result = lifecycle.execute().await;

    assert!(!result.passed);
    assert!(result.failures.iter().any(|f| f.contains("Board 2")));
    assert!(!result.failures.iter().any(|f| f.contains("Board 1 功能")));
    // 其余板卡保持通过的测量
    assert!(result.measurement("mainbeam_Board 1_current").unwrap().passed);
    assert!(result.measurement("mainbeam_Board 3_current").unwrap().passed);
    assert!(!result.measurement("mainbeam_Board 2_current").unwrap().passed);
}

/// 清理指令在通过与失败路径上都下发，且二次清理安全
#[tokio::test]
async fn test_cleanup_runs_on_failure_and_is_idempotent() {
    let link = Arc::new(MockDeviceLink::new_for_testing(8));
    // 无任何预置读数：测量按夹具通信失败处理

    let mut lifecycle = lifecycle(link.clone(), panel_config());
    let result = lifecycle.execute().await;

    assert!(!result.passed);
    assert!(link.was_command_sent("OUTPUTS:OFF"));
    assert!(link.was_command_sent("SELECT:NONE"));
    assert!(link.was_command_sent("PROG:POWER:OFF"));

    // 显式的第二次清理是安全空操作
    lifecycle.cleanup_hardware().await.unwrap();
    assert!(link.commands_matching("OUTPUTS:OFF") >= 2);
}

/// 链路未连接时测试序列不执行，但结果仍然良构
#[tokio::test]
async fn test_disconnected_link_fails_cleanly() {
    let link = Arc::new(MockDeviceLink::new_for_testing(8));
    link.set_connected(false);

    let mut lifecycle = lifecycle(link.clone(), panel_config());
    let result = lifecycle.execute().await;

    assert!(!result.passed);
    assert!(result.failures.iter().any(|f| f.contains("硬件准备失败")));
    // 未连接时没有任何夹具指令（清理指令允许尽力下发）
    assert!(!link.was_command_sent("CONFIG:CHANNELS:8"));
}

/// 颜色采样步骤在覆盖全部板位后把照度记入测量
#[tokio::test]
async fn test_color_sampling_step_records_lux() {
    let link = Arc::new(MockDeviceLink::new_for_testing(8));
    link.set_all_readings(12.0, 0.3);

    let mut config = panel_config();
    config.test_sequence.truncate(1);
    config.test_sequence[0].collect_color_samples = true;

    // 模拟夹具在色彩循环启动后上报各板位采样（事件订阅先于指令下发）
    let emitter_link = link.clone();
    let emitter = tokio::spawn(async move {
        while !emitter_link.was_command_sent("TEST:COLOR_CYCLE") {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        emitter_link.emit_samples_for_boards(&[1, 2, 3, 4]);
    });

    let mut lifecycle = lifecycle(link.clone(), config);
    let result = lifecycle.execute().await;
    emitter.await.unwrap();

    assert!(result.passed, "失败列表: {:?}", result.failures);
    assert!(link.was_command_sent("TEST:COLOR_CYCLE"));
    for board in 1..=4u32 {
        let name = format!("mainbeam_Board {}_lux", board);
        assert!(result.measurement(&name).is_some(), "缺少测量 {}", name);
    }
}

/// 部分功能继电器组是全通道集合的子集时走单通道寻址路径
#[tokio::test]
async fn test_partial_function_uses_individual_measurements() {
    let link = Arc::new(MockDeviceLink::new_for_testing(8));
    link.set_all_readings(12.0, 0.3);

    let mut lifecycle = lifecycle(link.clone(), panel_config());
    let _ = lifecycle.execute().await;

    // 两个功能各覆盖4个继电器，都不是全部8个通道：全部走单通道寻址
    assert_eq!(link.commands_matching("MEASURE:PANEL"), 0);
    assert_eq!(link.commands_matching("MEASURE:"), 8);
}
