/// 核心枚举定义模块
pub mod enums;
/// 核心结构体定义模块
pub mod structs;
/// 产品测试配置模型模块
pub mod product_config;

// 重新导出所有类型，方便其他模块使用
pub use enums::*;
pub use product_config::*;
pub use structs::*;
