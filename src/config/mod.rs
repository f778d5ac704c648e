// 导出子模块
pub mod defaults;
pub mod endpoint;
pub mod http_client;
pub mod validation;

// 重新导出常用类型
pub use self::endpoint::{
    BackendConfig, BalanceStrategy, EndpointConfig, MiddlewareConfig, Protocol, RetryConditionConfig,
    RetryConfig,
};
pub use self::http_client::{HttpClientConfig, HttpClientTimeoutConfig};

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

// 配置文件结构
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    // 网关监听配置
    #[serde(default)]
    pub server: ServerConfig,
    // 管理服务配置
    #[serde(default)]
    pub admin: AdminConfig,
    // 网关路由配置
    #[serde(default)]
    pub gateway: GatewayConfig,
}

// 网关监听配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    // 监听地址
    #[serde(default = "defaults::listen_address")]
    pub address: String,
    // 监听端口
    #[serde(default = "defaults::listen_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: defaults::listen_address(),
            port: defaults::listen_port(),
        }
    }
}

// 管理服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminConfig {
    // 监听地址
    #[serde(default = "defaults::listen_address")]
    pub address: String,
    // 监听端口
    #[serde(default = "defaults::admin_port")]
    pub port: u16,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            address: defaults::listen_address(),
            port: defaults::admin_port(),
        }
    }
}

// 网关路由配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    // 网关名称
    #[serde(default)]
    pub name: String,
    // 全局中间件列表，对所有端点生效，位于端点自身中间件之外
    #[serde(default)]
    pub middlewares: Vec<MiddlewareConfig>,
    // 端点列表
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

impl Config {
    // 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref();
        debug!("Attempting to load configuration from file: {:?}", path);

        // 打开并读取文件
        let mut file = File::open(path).map_err(|e| {
            AppError::Config(format!(
                "Unable to open configuration file {:?}: {}",
                path, e
            ))
        })?;

        let mut content = String::new();
        file.read_to_string(&mut content).map_err(|e| {
            AppError::Config(format!(
                "Unable to read configuration file {:?}: {}",
                path, e
            ))
        })?;

        // 解析YAML
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Configuration file parsing error: {}", e)))?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }
}
