// 配置默认值

use crate::r#const::{http_client_limits, retry_limits};

// 默认监听地址
pub fn listen_address() -> String {
    "0.0.0.0".to_string()
}

// 默认网关端口
pub fn listen_port() -> u16 {
    8080
}

// 默认管理端口
pub fn admin_port() -> u16 {
    9000
}

// 默认尝试次数
pub fn retry_attempts() -> u32 {
    retry_limits::DEFAULT_ATTEMPTS
}

// 默认节点权重
pub fn backend_weight() -> u32 {
    1
}

// 默认 keepalive（秒）
pub fn client_keepalive() -> u32 {
    http_client_limits::DEFAULT_KEEPALIVE
}

// 默认连接超时（秒）
pub fn client_connect_timeout() -> u64 {
    http_client_limits::DEFAULT_CONNECT_TIMEOUT
}

// 默认请求超时（秒）
pub fn client_request_timeout() -> u64 {
    http_client_limits::DEFAULT_REQUEST_TIMEOUT
}

// 默认空闲超时（秒）
pub fn client_idle_timeout() -> u64 {
    http_client_limits::DEFAULT_IDLE_TIMEOUT
}
