use super::defaults;
use serde::{Deserialize, Serialize};

// 上游 HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpClientConfig {
    // TCP keepalive（秒）
    #[serde(default = "defaults::client_keepalive")]
    pub keepalive: u32,
    // 超时配置
    #[serde(default)]
    pub timeout: HttpClientTimeoutConfig,
    // 可选的出站代理 URL
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            keepalive: defaults::client_keepalive(),
            timeout: HttpClientTimeoutConfig::default(),
            proxy: None,
        }
    }
}

// 上游 HTTP 客户端超时配置（秒）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpClientTimeoutConfig {
    // 连接超时
    #[serde(default = "defaults::client_connect_timeout")]
    pub connect: u64,
    // 请求超时，流式端点不生效
    #[serde(default = "defaults::client_request_timeout")]
    pub request: u64,
    // 连接池空闲超时
    #[serde(default = "defaults::client_idle_timeout")]
    pub idle: u64,
}

impl Default for HttpClientTimeoutConfig {
    fn default() -> Self {
        Self {
            connect: defaults::client_connect_timeout(),
            request: defaults::client_request_timeout(),
            idle: defaults::client_idle_timeout(),
        }
    }
}
