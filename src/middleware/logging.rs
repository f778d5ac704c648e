use super::{Middleware, RequestOptions};
use crate::client::Transport;
use crate::config::MiddlewareConfig;
use crate::error::AppError;
use async_trait::async_trait;
use axum::body::Body;
use http::{Request, Response};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

// 访问日志中间件
//
// 记录每次上游调用的方法、路径、状态码与耗时
pub fn middleware(_config: &MiddlewareConfig) -> Result<Middleware, AppError> {
    Ok(Middleware::new(|next| Arc::new(LoggingTransport { next })))
}

struct LoggingTransport {
    next: Arc<dyn Transport>,
}

#[async_trait]
impl Transport for LoggingTransport {
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Body>, AppError> {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let last_attempt = RequestOptions::from_request(&req)
            .map(|opts| opts.last_attempt())
            .unwrap_or(false);
        let start_time = Instant::now();

        let result = self.next.round_trip(req).await;
        let elapsed_ms = start_time.elapsed().as_millis();

        match &result {
            Ok(response) => {
                info!(
                    "Upstream call: {} {} status: {} time: {}ms last_attempt: {}",
                    method,
                    uri,
                    response.status(),
                    elapsed_ms,
                    last_attempt
                );
            }
            Err(err) => {
                error!(
                    "Upstream call failed: {} {} error: {} time: {}ms last_attempt: {}",
                    method, uri, err, elapsed_ms, last_attempt
                );
            }
        }

        result
    }
}
