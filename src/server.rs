use crate::config::ServerConfig;
use crate::error::AppError;
use crate::proxy::Proxy;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{Error, ErrorKind};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_graceful_shutdown::{IntoSubsystem, SubsystemHandle};
use tracing::{error, info};

// 网关服务
pub struct GatewayServer {
    // 监听地址
    addr: SocketAddr,
    // 代理门面
    proxy: Arc<Proxy>,
}

impl GatewayServer {
    // 创建新的网关服务
    pub fn new(config: &ServerConfig, proxy: Arc<Proxy>) -> Result<Self, AppError> {
        let addr = format!("{}:{}", config.address, config.port)
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid listening address: {:?}", e)))?;

        Ok(Self { addr, proxy })
    }

    // 获取服务器监听地址
    #[inline(always)]
    pub fn get_addr(&self) -> &SocketAddr {
        &self.addr
    }
}

// 全量请求交给代理门面分发
async fn dispatch(State(proxy): State<Arc<Proxy>>, req: Request<Body>) -> Response<Body> {
    proxy.serve(req).await
}

#[async_trait::async_trait]
impl IntoSubsystem<AppError> for GatewayServer {
    async fn run(self, subsys: SubsystemHandle) -> Result<(), AppError> {
        // 单条全捕获路由，匹配逻辑在路由表内完成
        let app = Router::new()
            .route("/", axum::routing::any(dispatch))
            .route("/{*path}", axum::routing::any(dispatch))
            .with_state(self.proxy.clone());

        let listener = create_tcp_listener(self.addr, u16::MAX.into())?;
        info!("Gateway listening on {:?}", self.addr);

        tokio::select! {
            result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            ) => {
                if let Err(e) = result {
                    error!("Gateway service error: {}", e);
                } else {
                    info!("Gateway service completed normally");
                }
                Ok(())
            }
            _ = subsys.on_shutdown_requested() => {
                info!("Shutdown requested, stopping gateway service");
                Ok(())
            }
        }
    }
}

/// 创建 TCP 监听器
/// 根据提供的地址和监听队列大小创建一个非阻塞的 TCP 监听器。
pub fn create_tcp_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener, AppError> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| AppError::Io(Error::new(ErrorKind::Other, e)))?;

    // 平滑重启要求端口可复用
    socket
        .set_reuse_address(true)
        .map_err(|e| AppError::Io(Error::new(ErrorKind::Other, e)))?;

    #[cfg(target_os = "linux")]
    socket
        .set_reuse_port(true)
        .map_err(|e| AppError::Io(Error::new(ErrorKind::Other, e)))?;

    let addr = addr.into();
    socket
        .bind(&addr)
        .map_err(|e| AppError::Io(Error::new(ErrorKind::Other, e)))?;

    socket
        .listen(backlog)
        .map_err(|e| AppError::Io(Error::new(ErrorKind::Other, e)))?;

    socket
        .set_nonblocking(true)
        .map_err(|e| AppError::Io(Error::new(ErrorKind::Other, e)))?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(AppError::Io)
}
