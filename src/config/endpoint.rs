use super::defaults;
use super::http_client::HttpClientConfig;
use crate::r#const::protocol_labels;
use serde::{Deserialize, Serialize};

// 端点协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    // 普通 HTTP 转发
    #[default]
    Http,
    // gRPC over HTTP/2 转发
    Grpc,
}

impl Protocol {
    // 获取协议的指标标签
    #[inline(always)]
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => protocol_labels::HTTP,
            Protocol::Grpc => protocol_labels::GRPC,
        }
    }
}

// 端点配置
//
// 路由表构建后不可变，处理器持有其只读引用直到所属路由表退役
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    // 匹配路径，以 '/' 开头，支持尾部 '*' 前缀匹配
    pub path: String,
    // 匹配的 HTTP 方法
    pub method: String,
    // 可选的 Host 匹配
    #[serde(default)]
    pub host: Option<String>,
    // 端点协议
    #[serde(default)]
    pub protocol: Protocol,
    // 是否为长连接流式端点（gRPC streaming / WebSocket / SSE 源）
    #[serde(default)]
    pub stream: bool,
    // 端点自身的中间件列表
    #[serde(default)]
    pub middlewares: Vec<MiddlewareConfig>,
    // 重试策略
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    // 后端节点列表
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    // 负载均衡策略
    #[serde(default)]
    pub balance: BalanceStrategy,
    // 所属服务名，用于指标标签
    #[serde(default)]
    pub service: String,
    // 服务基础路径，用于指标标签
    #[serde(default)]
    pub base_path: String,
    // 上游 HTTP 客户端配置
    #[serde(default)]
    pub http_client: HttpClientConfig,
}

// 中间件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewareConfig {
    // 注册表中的中间件名称
    pub name: String,
    // 中间件自定义选项
    #[serde(default)]
    pub options: Option<serde_yaml::Value>,
}

impl MiddlewareConfig {
    // 按名称构造无选项的中间件配置
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: None,
        }
    }
}

// 重试策略配置
//
// attempts 为总尝试次数，1 表示不重试
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    // 总尝试次数
    #[serde(default = "defaults::retry_attempts")]
    pub attempts: u32,
    // 单次尝试超时（毫秒）
    #[serde(default)]
    pub per_try_timeout: Option<u64>,
    // 整体超时（毫秒）
    #[serde(default)]
    pub timeout: Option<u64>,
    // 重试条件，按声明顺序求值，任一命中即重试
    #[serde(default)]
    pub conditions: Vec<RetryConditionConfig>,
}

// 重试条件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RetryConditionConfig {
    // 状态码区间（"500-504"）或单个状态码（"500"）
    ByStatusCode(String),
    // 响应头存在性或等值判断
    ByHeader {
        name: String,
        #[serde(default)]
        value: Option<String>,
    },
}

// 后端节点配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    // 节点基础 URL
    pub url: String,
    // 节点权重
    #[serde(default = "defaults::backend_weight")]
    pub weight: u32,
}

// 负载均衡策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BalanceStrategy {
    // 轮询
    #[default]
    RoundRobin,
    // 加权轮询
    WeightedRoundRobin,
    // 随机
    Random,
}
