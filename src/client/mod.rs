pub mod http_client;
pub use http_client::{HttpClient, HttpClientFactory};

use crate::config::EndpointConfig;
use crate::error::AppError;
use async_trait::async_trait;
use axum::body::Body;
use http::{Request, Response};
use std::sync::Arc;

/// 上游传输抽象：给定出站请求，产生响应
///
/// 实现必须可被并发使用；错误对核心不透明，任何 Err 都使本次尝试失败
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Body>, AppError>;
}

/// 可关闭的上游客户端
///
/// 路由表退役时关闭，以释放连接池
pub trait Client: Transport {
    fn close(&self);
}

/// 客户端工厂，按端点构建客户端
pub trait ClientFactory: Send + Sync {
    fn build(&self, endpoint: &Arc<EndpointConfig>) -> Result<Arc<dyn Client>, AppError>;
}

// 客户端到传输的桥接，供中间件链包装
pub(crate) struct ClientTransport(pub(crate) Arc<dyn Client>);

#[async_trait]
impl Transport for ClientTransport {
    #[inline]
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Body>, AppError> {
        self.0.round_trip(req).await
    }
}
