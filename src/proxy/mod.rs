pub mod endpoint;
pub mod error_handler;
pub mod observer;
pub mod router;

pub use observer::{MetricsObservable, Observable, Observer};

use crate::client::ClientFactory;
use crate::config::GatewayConfig;
use crate::error::AppError;
use crate::proxy::endpoint::EndpointHandler;
use crate::proxy::router::{RouteMatch, RouteTable};
use crate::r#const::{panic_limits, router_drain};
use axum::body::Body;
use bytes::Bytes;
use futures::FutureExt;
use http::{header, Request, Response, StatusCode};
use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info};

/// 处理器中止信号
///
/// 以该值恐慌表示客户端已经消失，外层屏障静默丢弃，不写 502、不留堆栈
pub struct AbortHandler;

// 可插拔的终端处理器（404 / 405）
pub type TerminalHandler = Arc<dyn Fn(Request<Body>) -> Response<Body> + Send + Sync>;

/// 网关代理门面
///
/// 持有当前路由表；Update 原子替换路由表并在宽限期后关闭旧表，
/// 在途请求在旧表上自然走完
pub struct Proxy {
    router: RwLock<Arc<RouteTable>>,
    client_factory: Arc<dyn ClientFactory>,
    observable: Arc<dyn Observable>,
    not_found: TerminalHandler,
    method_not_allowed: TerminalHandler,
    drain_grace: Duration,
}

impl Proxy {
    /// 创建网关代理
    pub fn new(client_factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            router: RwLock::new(Arc::new(RouteTable::new())),
            client_factory,
            observable: Arc::new(MetricsObservable),
            not_found: Arc::new(error_handler::not_found_handler),
            method_not_allowed: Arc::new(error_handler::method_not_allowed_handler),
            drain_grace: Duration::from_secs(router_drain::GRACE_PERIOD_SECS),
        }
    }

    // 替换观察者工厂
    pub fn with_observable(mut self, observable: Arc<dyn Observable>) -> Self {
        self.observable = observable;
        self
    }

    // 替换 404 处理器
    pub fn with_not_found_handler(mut self, handler: TerminalHandler) -> Self {
        self.not_found = handler;
        self
    }

    // 替换 405 处理器
    pub fn with_method_not_allowed_handler(mut self, handler: TerminalHandler) -> Self {
        self.method_not_allowed = handler;
        self
    }

    // 调整旧路由表的关闭宽限期
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// 应用一份新的网关配置
    ///
    /// 任一端点构建失败则整体拒绝，已建的客户端全部释放，旧表保持在线
    pub fn update(&self, config: &GatewayConfig) -> Result<(), AppError> {
        let mut table = RouteTable::new();

        for endpoint_config in &config.endpoints {
            let endpoint = Arc::new(endpoint_config.clone());
            let handler = match EndpointHandler::build(
                &endpoint,
                &config.middlewares,
                self.client_factory.as_ref(),
                self.observable.as_ref(),
            ) {
                Ok(handler) => handler,
                Err(err) => {
                    table.close();
                    return Err(err);
                }
            };

            if let Err(err) = table.handle(
                &endpoint.path,
                &endpoint.method,
                endpoint.host.as_deref(),
                handler.clone(),
            ) {
                handler.close();
                table.close();
                return Err(err);
            }

            info!(
                "build endpoint: [{}] {} {}",
                endpoint.protocol.as_str(),
                endpoint.method,
                endpoint.path
            );
        }

        // 原子替换路由表，旧表在宽限期后于后台关闭
        let old = {
            let mut guard = self.router.write().unwrap();
            std::mem::replace(&mut *guard, Arc::new(table))
        };
        self.schedule_close(old);

        Ok(())
    }

    // 调度旧路由表的延迟关闭
    fn schedule_close(&self, old: Arc<RouteTable>) {
        let grace = self.drain_grace;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    old.close();
                });
            }
            // 运行时外只能同步关闭
            Err(_) => old.close(),
        }
    }

    /// 处理一个入站请求
    ///
    /// 恐慌屏障覆盖路由查找与端点处理
    pub async fn serve(&self, req: Request<Body>) -> Response<Body> {
        match AssertUnwindSafe(self.dispatch(req)).catch_unwind().await {
            Ok(response) => response,
            Err(payload) => handle_panic(payload),
        }
    }

    // 路由分发
    async fn dispatch(&self, req: Request<Body>) -> Response<Body> {
        let table = self.router.read().unwrap().clone();

        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| req.uri().host())
            .map(|h| h.split(':').next().unwrap_or(h).to_string());

        match table.match_route(req.method(), req.uri().path(), host.as_deref()) {
            RouteMatch::Found(handler) => handler.handle(req).await,
            RouteMatch::MethodNotAllowed => (self.method_not_allowed)(req),
            RouteMatch::NotFound => (self.not_found)(req),
        }
    }

    /// 当前路由表的诊断视图
    pub fn inspect(&self) -> serde_json::Value {
        self.router.read().unwrap().inspect()
    }
}

// 恐慌处理
//
// 中止信号静默返回，其余写 502 并截取堆栈落日志，同时兜底写入 stderr
fn handle_panic(payload: Box<dyn Any + Send>) -> Response<Body> {
    if payload.is::<AbortHandler>() {
        return aborted_response();
    }

    let message = panic_message(payload.as_ref());
    let mut stack = Backtrace::force_capture().to_string();
    stack.truncate(panic_limits::MAX_STACK_BYTES);

    error!("panic recovered: {}\n{}", message, stack);
    eprintln!("panic recovered: {}\n{}", message, stack);

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response
}

// 提取恐慌载荷中的文本
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// 客户端已消失时的占位响应：响应体立即以错误终止，连接被复位
fn aborted_response() -> Response<Body> {
    let stream = futures::stream::once(async {
        Err::<Bytes, std::io::Error>(std::io::Error::new(
            std::io::ErrorKind::ConnectionAborted,
            "handler aborted",
        ))
    });
    Response::new(Body::from_stream(stream))
}
