use super::endpoint::EndpointHandler;
use crate::error::AppError;
use http::Method;
use radixmap::RadixMap;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

// 单条路由条目
struct RouteEntry {
    method: Method,
    host: Option<String>,
    handler: Arc<EndpointHandler>,
}

// 路由匹配结果
pub(crate) enum RouteMatch {
    // 命中端点
    Found(Arc<EndpointHandler>),
    // 路径命中但方法不匹配
    MethodNotAllowed,
    // 没有匹配的端点
    NotFound,
}

/// 路由表
///
/// 构建完成后只读；在途请求持有处理器引用直到响应送出，
/// 旧表在替换后的宽限期结束时统一关闭
pub struct RouteTable {
    // 每个路径的条目组
    groups: Vec<Vec<RouteEntry>>,
    // 精确路径索引
    path_map: RadixMap<usize>,
    // 构建期的辅助索引，兼做重复检测
    index: HashMap<String, usize>,
    // 前缀规则（配置路径以 '*' 结尾），按前缀长度降序扫描
    prefixes: Vec<(String, usize)>,
}

impl RouteTable {
    pub(crate) fn new() -> Self {
        Self {
            groups: Vec::new(),
            path_map: RadixMap::new(),
            index: HashMap::new(),
            prefixes: Vec::new(),
        }
    }

    /// 注册一个端点处理器
    pub(crate) fn handle(
        &mut self,
        path: &str,
        method: &str,
        host: Option<&str>,
        handler: Arc<EndpointHandler>,
    ) -> Result<(), AppError> {
        let method = Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| AppError::Routing(format!("Invalid method {:?} for {:?}", method, path)))?;

        let (pattern, is_prefix) = match path.strip_suffix('*') {
            Some(prefix) => (prefix.to_string(), true),
            None => (path.to_string(), false),
        };

        // 查找或建立该路径的条目组
        let key = if is_prefix {
            format!("{}*", pattern)
        } else {
            pattern.clone()
        };
        let existing = self.index.get(&key).copied();
        let group_index = match existing {
            Some(index) => index,
            None => {
                let index = self.groups.len();
                self.groups.push(Vec::new());
                self.index.insert(key, index);

                if is_prefix {
                    self.prefixes.push((pattern.clone(), index));
                    // 长前缀优先
                    self.prefixes
                        .sort_by(|a, b| b.0.len().cmp(&a.0.len()));
                } else if let Err(e) = self.path_map.insert(pattern.clone(), index) {
                    return Err(AppError::Routing(format!(
                        "Error adding route: {:?}, error: {}",
                        pattern, e
                    )));
                }
                index
            }
        };

        // 匹配键必须唯一
        let group = &mut self.groups[group_index];
        if group
            .iter()
            .any(|entry| entry.method == method && entry.host.as_deref() == host)
        {
            return Err(AppError::Routing(format!(
                "Duplicate endpoint found: {} {}",
                method, path
            )));
        }

        debug!("Added route: {} {} host: {:?}", method, path, host);
        group.push(RouteEntry {
            method,
            host: host.map(str::to_string),
            handler,
        });
        Ok(())
    }

    /// 按（方法、路径、Host）匹配处理器
    pub(crate) fn match_route(
        &self,
        method: &Method,
        path: &str,
        host: Option<&str>,
    ) -> RouteMatch {
        // 精确匹配优先，其次按最长前缀
        let group_index = self
            .path_map
            .get(path.as_bytes())
            .copied()
            .or_else(|| {
                self.prefixes
                    .iter()
                    .find(|(prefix, _)| path.starts_with(prefix.as_str()))
                    .map(|(_, index)| *index)
            });

        let Some(group_index) = group_index else {
            return RouteMatch::NotFound;
        };

        let candidates: Vec<&RouteEntry> = self.groups[group_index]
            .iter()
            .filter(|entry| match (&entry.host, host) {
                (None, _) => true,
                (Some(expected), Some(actual)) => expected.eq_ignore_ascii_case(actual),
                (Some(_), None) => false,
            })
            .collect();

        if candidates.is_empty() {
            return RouteMatch::NotFound;
        }

        match candidates.iter().find(|entry| entry.method == *method) {
            Some(entry) => RouteMatch::Found(entry.handler.clone()),
            None => RouteMatch::MethodNotAllowed,
        }
    }

    /// 关闭路由表持有的所有端点处理器
    pub(crate) fn close(&self) {
        for group in &self.groups {
            for entry in group {
                entry.handler.close();
            }
        }
    }

    /// 路由表的诊断视图
    pub(crate) fn inspect(&self) -> serde_json::Value {
        let endpoints: Vec<serde_json::Value> = self
            .groups
            .iter()
            .flatten()
            .map(|entry| {
                let endpoint = entry.handler.endpoint();
                json!({
                    "protocol": endpoint.protocol.as_str(),
                    "method": entry.method.as_str(),
                    "path": endpoint.path,
                    "host": entry.host,
                    "stream": endpoint.stream,
                })
            })
            .collect();

        json!({ "endpoints": endpoints })
    }
}
