/// 服务层基础trait定义
/// 提供各层服务的接口规范，支持依赖注入和测试

use crate::utils::error::AppResult;
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

/// 基础服务trait，所有服务都应实现
#[async_trait]
pub trait BaseService: Send + Sync {
    /// 服务名称
    fn service_name(&self) -> &'static str;

    /// 初始化服务
    async fn initialize(&mut self) -> AppResult<()>;

    /// 关闭服务
    async fn shutdown(&mut self) -> AppResult<()>;

    /// 健康检查
    async fn health_check(&self) -> AppResult<()>;
}

/// 进度汇报接收端trait
///
/// 接收 `(消息, 百分比 0..100)` 回调；实现方必须容忍来自非UI线程的调用。
/// 核心在每个阶段边界调用一次，调用频率不高
pub trait IProgressSink: Send + Sync {
    /// 汇报一次进度
    fn report(&self, message: &str, percent: u8);
}

/// 只写日志的进度接收端，用于无前端的场景与测试
pub struct LogProgressSink;

impl IProgressSink for LogProgressSink {
    fn report(&self, message: &str, percent: u8) {
        debug!("[Progress] {}% - {}", percent, message);
    }
}

/// 进度接收端的共享句柄类型
pub type ProgressSinkRef = Arc<dyn IProgressSink>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// 记录所有进度回调的测试用接收端
    pub struct RecordingSink {
        pub calls: Mutex<Vec<(String, u8)>>,
    }

    impl IProgressSink for RecordingSink {
        fn report(&self, message: &str, percent: u8) {
            self.calls
                .lock()
                .unwrap()
                .push((message.to_string(), percent));
        }
    }

    /// 测试进度接收端可以跨线程调用
    #[test]
    fn test_progress_sink_cross_thread() {
        let sink = Arc::new(RecordingSink {
            calls: Mutex::new(Vec::new()),
        });
        let sink2: ProgressSinkRef = sink.clone();

        let handle = std::thread::spawn(move || {
            sink2.report("上电稳定", 40);
        });
        handle.join().unwrap();

        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("上电稳定".to_string(), 40));
    }
}
