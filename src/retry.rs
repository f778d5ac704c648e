use crate::config::{EndpointConfig, RetryConditionConfig};
use crate::error::AppError;
use crate::r#const::retry_limits;
use axum::body::Body;
use http::Response;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

// 进程级重试特性开关，由控制面同步，默认开启
static RETRY_FEATURE: AtomicBool = AtomicBool::new(true);

// 重试特性是否开启
#[inline(always)]
pub fn retry_feature_enabled() -> bool {
    RETRY_FEATURE.load(Ordering::Relaxed)
}

// 显式覆盖重试特性开关
pub fn set_retry_feature(enabled: bool) {
    RETRY_FEATURE.store(enabled, Ordering::Relaxed);
}

// 编译后的重试条件
#[derive(Debug, Clone)]
pub enum RetryCondition {
    // 闭区间状态码匹配
    StatusCode { min: u16, max: u16 },
    // 响应头存在性（value 为 None）或等值判断
    Header { name: String, value: Option<String> },
}

impl RetryCondition {
    // 判断响应是否命中该条件
    pub fn matches(&self, response: &Response<Body>) -> bool {
        match self {
            RetryCondition::StatusCode { min, max } => {
                let code = response.status().as_u16();
                code >= *min && code <= *max
            }
            RetryCondition::Header { name, value } => match response.headers().get(name) {
                Some(actual) => match value {
                    Some(expected) => actual.to_str().map(|v| v == expected).unwrap_or(false),
                    None => true,
                },
                None => false,
            },
        }
    }
}

// 端点重试策略
//
// 由端点配置编译，空策略退化为单次尝试加默认整体超时
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    // 总尝试次数
    pub attempts: u32,
    // 单次尝试超时
    pub per_try_timeout: Duration,
    // 整体超时
    pub timeout: Duration,
    // 重试条件
    pub conditions: Vec<RetryCondition>,
}

impl RetryStrategy {
    // 编译端点的重试策略
    pub fn prepare(endpoint: &EndpointConfig) -> Result<Self, AppError> {
        let Some(retry) = &endpoint.retry else {
            let timeout = Duration::from_millis(retry_limits::DEFAULT_TIMEOUT_MS);
            return Ok(Self {
                attempts: retry_limits::DEFAULT_ATTEMPTS,
                per_try_timeout: timeout,
                timeout,
                conditions: Vec::new(),
            });
        };

        let attempts = retry.attempts.max(retry_limits::MIN_ATTEMPTS);
        let timeout = Duration::from_millis(
            retry.timeout.unwrap_or(retry_limits::DEFAULT_TIMEOUT_MS),
        );
        // 两者都设置时，单次超时不得超过整体超时
        let per_try_timeout = retry
            .per_try_timeout
            .map(Duration::from_millis)
            .unwrap_or(timeout)
            .min(timeout);

        let mut conditions = Vec::with_capacity(retry.conditions.len());
        for condition in &retry.conditions {
            conditions.push(compile_condition(condition)?);
        }

        Ok(Self {
            attempts,
            per_try_timeout,
            timeout,
            conditions,
        })
    }
}

// 编译单个重试条件
fn compile_condition(condition: &RetryConditionConfig) -> Result<RetryCondition, AppError> {
    match condition {
        RetryConditionConfig::ByStatusCode(expr) => {
            let (min, max) = match expr.split_once('-') {
                Some((lo, hi)) => (parse_status(lo)?, parse_status(hi)?),
                None => {
                    let code = parse_status(expr)?;
                    (code, code)
                }
            };
            if min > max {
                return Err(AppError::Config(format!(
                    "Invalid status code range: {:?}",
                    expr
                )));
            }
            Ok(RetryCondition::StatusCode { min, max })
        }
        RetryConditionConfig::ByHeader { name, value } => {
            if name.is_empty() {
                return Err(AppError::Config(
                    "Retry condition header name must not be empty".to_string(),
                ));
            }
            Ok(RetryCondition::Header {
                name: name.to_lowercase(),
                value: value.clone(),
            })
        }
    }
}

// 解析单个状态码
fn parse_status(raw: &str) -> Result<u16, AppError> {
    let code: u16 = raw
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("Invalid status code: {:?}", raw)))?;
    if !(100..=599).contains(&code) {
        return Err(AppError::Config(format!("Invalid status code: {:?}", raw)));
    }
    Ok(code)
}

// 判断响应是否需要重试，任一条件命中即重试
#[inline]
pub fn judge_retry_required(conditions: &[RetryCondition], response: &Response<Body>) -> bool {
    conditions.iter().any(|c| c.matches(response))
}
