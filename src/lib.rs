/// LED面板工厂验收测试系统 - 核心库
pub mod models;
pub mod services;
pub mod utils;

// 重新导出常用类型，方便使用
pub use models::*;
pub use services::*;
pub use utils::{AppConfig, AppError, AppResult};
