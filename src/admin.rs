use crate::config::AdminConfig;
use crate::error::AppError;
use crate::metrics::METRICS;
use crate::proxy::Proxy;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_graceful_shutdown::{IntoSubsystem, SubsystemHandle};
use tracing::{error, info};

// 管理服务请求超时（秒）
const ADMIN_REQUEST_TIMEOUT: u64 = 10;

// 管理服务
pub struct AdminServer {
    // 监听地址
    addr: SocketAddr,
    // 代理门面，供诊断端点读取路由表
    proxy: Arc<Proxy>,
}

impl AdminServer {
    // 创建新的管理服务
    pub fn new(config: &AdminConfig, proxy: Arc<Proxy>) -> Result<Self, AppError> {
        let addr = format!("{}:{}", config.address, config.port)
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid admin server address: {:?}", e)))?;

        Ok(Self { addr, proxy })
    }
}

#[async_trait::async_trait]
impl IntoSubsystem<AppError> for AdminServer {
    async fn run(self, subsys: SubsystemHandle) -> Result<(), AppError> {
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/debug/proxy/router/inspect", get(inspect_handler))
            .with_state(self.proxy.clone())
            .layer(tower_http::timeout::TimeoutLayer::new(Duration::from_secs(
                ADMIN_REQUEST_TIMEOUT,
            )));

        let listener = match TcpListener::bind(self.addr).await {
            Ok(listener) => {
                info!("Admin service listening on {}", self.addr);
                listener
            }
            Err(e) => {
                error!("Failed to bind admin service: {}", e);
                return Err(AppError::Io(e));
            }
        };

        tokio::select! {
            result = axum::serve(listener, app) => {
                if let Err(e) = result {
                    error!("Admin service error: {}", e);
                } else {
                    info!("Admin service completed normally");
                }
                Ok(())
            }
            _ = subsys.on_shutdown_requested() => {
                info!("Shutdown requested, stopping admin service");
                Ok(())
            }
        }
    }
}

// 健康检查处理程序
async fn health_handler() -> &'static str {
    "OK"
}

// 指标导出处理程序
async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = METRICS.registry().gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            [(axum::http::header::CONTENT_TYPE, encoder.format_type())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// 路由表诊断处理程序
async fn inspect_handler(State(proxy): State<Arc<Proxy>>) -> Json<serde_json::Value> {
    Json(proxy.inspect())
}
