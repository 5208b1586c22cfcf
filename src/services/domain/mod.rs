/// 领域服务层模块
/// 包含核心业务逻辑和领域对象

/// 继电器映射器 - 把继电器表解析为功能/板卡到物理继电器的映射
pub mod relay_mapper;

/// 测量协议 - 整板批量与单通道寻址两种测量路径
pub mod measurement_protocol;

/// 烧录流水线 - 多编程器板卡烧录与安全状态恢复
pub mod programming_pipeline;

/// 测试阶段执行器 - 构建并按序执行阶段计划
pub mod test_phase_executor;

/// 测试生命周期 - execute模板方法与SMT面板测试装配
pub mod test_lifecycle;

// 重新导出常用类型
pub use relay_mapper::{RelayGroup, RelayMapper};
pub use measurement_protocol::MeasurementProtocol;
pub use programming_pipeline::{
    CliFirmwareProgrammer, IFirmwareProgrammer, ProgrammerOutcome, ProgrammerSlot,
    ProgrammingPipeline, ProgrammingSummary,
};
pub use test_phase_executor::TestPhaseExecutor;
pub use test_lifecycle::{ITestLifecycle, PanelTestLifecycle};
