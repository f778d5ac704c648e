use super::{Config, EndpointConfig};
use crate::error::AppError;
use crate::r#const::{retry_limits, weight_limits};
use crate::retry::RetryStrategy;
use http::Method;
use std::collections::HashSet;

impl Config {
    // 验证配置
    pub fn validate(&self) -> Result<(), AppError> {
        let mut seen = HashSet::new();

        for endpoint in &self.gateway.endpoints {
            validate_endpoint(endpoint)?;

            // 匹配键必须唯一
            let key = (
                endpoint.path.clone(),
                endpoint.method.to_uppercase(),
                endpoint.host.clone(),
            );
            if !seen.insert(key) {
                return Err(AppError::Config(format!(
                    "Duplicate endpoint found: [{}] {} {}",
                    endpoint.protocol.as_str(),
                    endpoint.method,
                    endpoint.path
                )));
            }
        }

        Ok(())
    }
}

// 验证单个端点
pub fn validate_endpoint(endpoint: &EndpointConfig) -> Result<(), AppError> {
    // 路径必须以斜杠开头
    if !endpoint.path.starts_with('/') {
        return Err(AppError::Config(format!(
            "Endpoint path must start with '/': {:?}",
            endpoint.path
        )));
    }

    // 方法必须合法
    Method::from_bytes(endpoint.method.to_uppercase().as_bytes()).map_err(|_| {
        AppError::Config(format!(
            "Invalid HTTP method {:?} for endpoint {:?}",
            endpoint.method, endpoint.path
        ))
    })?;

    // 后端节点权重范围
    for backend in &endpoint.backends {
        if backend.weight < weight_limits::MIN_WEIGHT || backend.weight > weight_limits::MAX_WEIGHT
        {
            return Err(AppError::Config(format!(
                "Backend weight must be between {} and {} for {:?}",
                weight_limits::MIN_WEIGHT,
                weight_limits::MAX_WEIGHT,
                backend.url
            )));
        }
    }

    if let Some(retry) = &endpoint.retry {
        // 尝试次数范围
        if retry.attempts < retry_limits::MIN_ATTEMPTS || retry.attempts > retry_limits::MAX_ATTEMPTS
        {
            return Err(AppError::Config(format!(
                "Retry attempts must be between {} and {} for endpoint {:?}",
                retry_limits::MIN_ATTEMPTS,
                retry_limits::MAX_ATTEMPTS,
                endpoint.path
            )));
        }

        // 流式端点按构造只有单次尝试，重试策略在此直接拒绝
        if endpoint.stream && retry.attempts > 1 {
            return Err(AppError::Config(format!(
                "Stream endpoint {:?} cannot carry a retry policy",
                endpoint.path
            )));
        }
    }

    // 重试条件必须能编译
    RetryStrategy::prepare(endpoint)?;

    Ok(())
}
