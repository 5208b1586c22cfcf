/// 基础设施层服务模块
/// 负责与外部系统的交互，如夹具链路通信

/// 夹具链路契约与事件等待原语
pub mod device_link;

/// Mock夹具链路（测试与演示）
pub mod mock_device_link;

// 重新导出常用接口和实现
pub use device_link::{
    await_result_event, check_device_response, cmd, collect_samples_covering, DeviceEvent,
    IDeviceLink, RgbwSample, ERROR_TOKEN,
};
pub use mock_device_link::MockDeviceLink;
