use reqwest_middleware::Error as ReqwestMiddlewareError;
use std::io;
use thiserror::Error;

/// 应用错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP客户端错误
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// HTTP中间件错误
    #[error("HTTP middleware error: {0}")]
    HttpMiddlewareError(#[from] ReqwestMiddlewareError),

    /// 上游错误
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// 无可用上游
    #[error("No upstream available")]
    NoUpstreamAvailable,

    /// 无健康上游
    #[error("No healthy upstream available")]
    NoHealthyUpstreamAvailable,

    /// 中间件未注册
    #[error("Middleware not found: {0}")]
    MiddlewareNotFound(String),

    /// 中间件构建错误
    #[error("Middleware error: {0}")]
    Middleware(String),

    /// 路由错误
    #[error("Routing error: {0}")]
    Routing(String),

    /// 整体或单次尝试超时
    #[error("context deadline exceeded")]
    Timeout,

    /// 请求被取消
    #[error("context canceled")]
    Canceled,

    /// 客户端提前断开，由传输层上报
    #[error("client disconnected")]
    ClientDisconnected,

    /// 响应断言命中重试条件
    #[error("assertion failed")]
    AssertionFailed,

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),

    /// 序列化/反序列化错误
    #[error("Serialization/deserialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// 无效的HTTP头
    #[error("Invalid HTTP header: {0}")]
    InvalidHeader(String),
}

impl AppError {
    /// 是否为客户端主动取消（不计入重试失败指标）
    #[inline(always)]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AppError::Canceled | AppError::ClientDisconnected)
    }
}
