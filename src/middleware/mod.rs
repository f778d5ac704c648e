pub mod logging;
pub mod stream;

use crate::client::Transport;
use crate::config::{EndpointConfig, MiddlewareConfig};
use crate::error::AppError;
use crate::selector::{DoneFunc, DoneInfo};
use axum::body::Body;
use http::Request;
use once_cell::sync::Lazy;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::warn;

/// 中间件：接收下游传输并返回包装后的传输
pub struct Middleware {
    wrap: Box<dyn Fn(Arc<dyn Transport>) -> Arc<dyn Transport> + Send + Sync>,
}

impl Middleware {
    // 由包装函数构造中间件
    pub fn new(
        wrap: impl Fn(Arc<dyn Transport>) -> Arc<dyn Transport> + Send + Sync + 'static,
    ) -> Self {
        Self {
            wrap: Box::new(wrap),
        }
    }

    // 包装下游传输
    #[inline(always)]
    pub fn process(&self, next: Arc<dyn Transport>) -> Arc<dyn Transport> {
        (self.wrap)(next)
    }
}

// 中间件工厂
pub type MiddlewareFactory = fn(&MiddlewareConfig) -> Result<Middleware, AppError>;

// 全局中间件注册表，内置中间件在初始化时注册
static REGISTRY: Lazy<RwLock<HashMap<String, MiddlewareFactory>>> = Lazy::new(|| {
    let mut registry: HashMap<String, MiddlewareFactory> = HashMap::new();
    registry.insert("logging".to_string(), logging::middleware);
    RwLock::new(registry)
});

// 注册自定义中间件工厂
pub fn register(name: impl Into<String>, factory: MiddlewareFactory) {
    REGISTRY.write().unwrap().insert(name.into(), factory);
}

// 按名称解析中间件工厂
fn resolve(name: &str) -> Option<MiddlewareFactory> {
    REGISTRY.read().unwrap().get(name).copied()
}

/// 将中间件列表折叠到传输上
///
/// 按声明逆序应用，列表首项成为请求经过的最外层包装。
/// 未注册的名称告警后跳过，其余工厂错误中止端点构建。
pub fn build_middleware(
    configs: &[MiddlewareConfig],
    mut next: Arc<dyn Transport>,
) -> Result<Arc<dyn Transport>, AppError> {
    for config in configs.iter().rev() {
        let Some(factory) = resolve(&config.name) else {
            warn!("Skip does not exist middleware: {}", config.name);
            continue;
        };
        next = factory(config)?.process(next);
    }
    Ok(next)
}

/// 类型化键值包
///
/// 以值类型的 TypeId 为键，避免中间件之间的字符串键冲突
#[derive(Default)]
pub struct ValueBag {
    values: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ValueBag {
    // 写入一个值，同类型覆盖
    pub fn set<T: Any + Send + Sync>(&self, value: Arc<T>) {
        self.values
            .write()
            .unwrap()
            .insert(TypeId::of::<T>(), value);
    }

    // 按类型读取
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.values
            .read()
            .unwrap()
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }
}

/// 单个请求的可变上下文
///
/// 随请求扩展传递，响应完全送出后随请求一同销毁
pub struct RequestOptions {
    // 所属端点
    endpoint: Arc<EndpointConfig>,
    // 各次尝试观察到的上游状态码
    upstream_status_codes: Mutex<Vec<u16>>,
    // 当前是否为最后一次尝试
    last_attempt: AtomicBool,
    // 终态回调，最多回报一次
    done: Mutex<Option<DoneFunc>>,
    // 中间件键值包
    values: ValueBag,
}

impl RequestOptions {
    // 创建绑定到端点的请求上下文
    pub fn new(endpoint: Arc<EndpointConfig>) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            upstream_status_codes: Mutex::new(Vec::new()),
            last_attempt: AtomicBool::new(false),
            done: Mutex::new(None),
            values: ValueBag::default(),
        })
    }

    // 从请求扩展中取出上下文
    pub fn from_request(req: &Request<Body>) -> Option<Arc<Self>> {
        req.extensions().get::<Arc<RequestOptions>>().cloned()
    }

    // 所属端点
    #[inline(always)]
    pub fn endpoint(&self) -> &Arc<EndpointConfig> {
        &self.endpoint
    }

    // 记录一次上游状态码
    pub fn push_upstream_status(&self, code: u16) {
        self.upstream_status_codes.lock().unwrap().push(code);
    }

    // 已观察到的上游状态码
    pub fn upstream_status_codes(&self) -> Vec<u16> {
        self.upstream_status_codes.lock().unwrap().clone()
    }

    // 标记最后一次尝试
    pub fn set_last_attempt(&self, last: bool) {
        self.last_attempt.store(last, Ordering::Release);
    }

    // 当前是否为最后一次尝试
    #[inline(always)]
    pub fn last_attempt(&self) -> bool {
        self.last_attempt.load(Ordering::Acquire)
    }

    // 安装终态回调，后写覆盖前写
    pub fn set_done_func(&self, done: DoneFunc) {
        *self.done.lock().unwrap() = Some(done);
    }

    // 回报终态，一次性护栏保证重复调用为空操作
    pub fn done(&self, info: DoneInfo) {
        if let Some(done) = self.done.lock().unwrap().take() {
            done(info);
        }
    }

    // 键值包
    #[inline(always)]
    pub fn values(&self) -> &ValueBag {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Transport;
    use async_trait::async_trait;
    use http::Response;
    use std::sync::atomic::AtomicUsize;

    struct NopTransport;

    #[async_trait]
    impl Transport for NopTransport {
        async fn round_trip(&self, _req: Request<Body>) -> Result<Response<Body>, AppError> {
            Ok(Response::new(Body::empty()))
        }
    }

    fn test_endpoint() -> Arc<EndpointConfig> {
        Arc::new(EndpointConfig {
            path: "/api".to_string(),
            method: "GET".to_string(),
            host: None,
            protocol: Default::default(),
            stream: false,
            middlewares: Vec::new(),
            retry: None,
            backends: Vec::new(),
            balance: Default::default(),
            service: String::new(),
            base_path: String::new(),
            http_client: Default::default(),
        })
    }

    /// 未注册的中间件名称被跳过而不是报错
    #[test]
    fn test_build_middleware_skips_unknown() {
        let configs = vec![
            MiddlewareConfig::named("does-not-exist"),
            MiddlewareConfig::named("logging"),
        ];
        let result = build_middleware(&configs, Arc::new(NopTransport));
        assert!(result.is_ok());
    }

    /// 键值包按类型读写
    #[test]
    fn test_value_bag() {
        struct Marker(u32);

        let bag = ValueBag::default();
        assert!(bag.get::<Marker>().is_none());

        bag.set(Arc::new(Marker(7)));
        assert_eq!(bag.get::<Marker>().unwrap().0, 7);

        bag.set(Arc::new(Marker(9)));
        assert_eq!(bag.get::<Marker>().unwrap().0, 9);
    }

    /// 终态回调只触发一次
    #[test]
    fn test_done_func_is_one_shot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let opts = RequestOptions::new(test_endpoint());

        let counter = calls.clone();
        opts.set_done_func(Box::new(move |_info| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        opts.done(DoneInfo::default());
        opts.done(DoneInfo::default());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// 上游状态码按尝试顺序累积
    #[test]
    fn test_upstream_status_codes() {
        let opts = RequestOptions::new(test_endpoint());
        opts.push_upstream_status(500);
        opts.push_upstream_status(200);
        assert_eq!(opts.upstream_status_codes(), vec![500, 200]);
    }
}
