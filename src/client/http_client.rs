use super::{Client, ClientFactory, Transport};
use crate::config::{EndpointConfig, HttpClientConfig, Protocol};
use crate::error::AppError;
use crate::middleware::RequestOptions;
use crate::selector::{create_selector, Selector};
use async_trait::async_trait;
use axum::body::Body;
use http::{header, Request, Response};
use http_body::Body as _;
use reqwest::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 创建上游 HTTP 客户端
///
/// 流式端点不设置请求超时，否则长连接会被整体超时切断
pub(super) fn create_http_client(
    config: &HttpClientConfig,
    endpoint: &EndpointConfig,
) -> Result<ClientWithMiddleware, AppError> {
    debug!("Creating HTTP client, config: {:?}", config);

    let mut client_builder = reqwest::Client::builder()
        .tcp_keepalive(Some(Duration::from_secs(config.keepalive.into())))
        .connect_timeout(Duration::from_secs(config.timeout.connect));

    if !endpoint.stream {
        client_builder = client_builder.timeout(Duration::from_secs(config.timeout.request));
    }

    if config.timeout.idle > 0 {
        client_builder =
            client_builder.pool_idle_timeout(Some(Duration::from_secs(config.timeout.idle)));
    }

    // gRPC 上游要求 HTTP/2 明文直连
    if endpoint.protocol == Protocol::Grpc {
        client_builder = client_builder.http2_prior_knowledge();
    }

    // 配置出站代理（如果启用）
    if let Some(proxy_url) = &config.proxy {
        if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
            client_builder = client_builder.proxy(proxy);
        }
    }

    let client = client_builder.build()?;

    Ok(ClientBuilder::new(client).build())
}

/// 默认客户端工厂
///
/// 为每个端点构建一个 reqwest 客户端与节点选择器
#[derive(Default)]
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn build(&self, endpoint: &Arc<EndpointConfig>) -> Result<Arc<dyn Client>, AppError> {
        if endpoint.backends.is_empty() {
            return Err(AppError::Config(format!(
                "Endpoint {:?} has no backends configured",
                endpoint.path
            )));
        }

        let selector = create_selector(endpoint.balance, &endpoint.backends);
        let client = create_http_client(&endpoint.http_client, endpoint)?;

        Ok(Arc::new(HttpClient {
            endpoint: endpoint.clone(),
            selector,
            client,
        }))
    }
}

/// reqwest 支撑的上游客户端
pub struct HttpClient {
    endpoint: Arc<EndpointConfig>,
    selector: Arc<dyn Selector>,
    client: ClientWithMiddleware,
}

#[async_trait]
impl Transport for HttpClient {
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Body>, AppError> {
        // 选择一个节点，并把终态回调安装到请求上下文
        let selection = self.selector.select().await?;
        if let Some(opts) = RequestOptions::from_request(&req) {
            opts.set_done_func(selection.done);
        }

        // 重写请求 URL 到选中节点
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = Url::parse(&format!("{}{}", selection.node.url, path_and_query))
            .map_err(|e| AppError::Upstream(format!("Invalid upstream URL: {}", e)))?;

        let (parts, body) = req.into_parts();

        // Host 由客户端按节点重写
        let mut headers = parts.headers;
        headers.remove(header::HOST);

        let mut request_builder = self.client.request(parts.method, url.clone()).headers(headers);
        if !body.is_end_stream() {
            request_builder =
                request_builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream_response = match request_builder.send().await {
            Ok(response) => response,
            Err(err) => {
                if let reqwest_middleware::Error::Reqwest(inner) = &err {
                    if inner.is_timeout() {
                        return Err(AppError::Timeout);
                    }
                }
                return Err(AppError::Upstream(format!(
                    "Request to {} failed: {}",
                    url, err
                )));
            }
        };

        // 转换回网关内部的响应类型，响应体保持流式
        let status = upstream_response.status();
        let version = upstream_response.version();
        let headers = upstream_response.headers().clone();

        let mut response = Response::new(Body::from_stream(upstream_response.bytes_stream()));
        *response.status_mut() = status;
        *response.version_mut() = version;
        *response.headers_mut() = headers;

        Ok(response)
    }
}

impl Client for HttpClient {
    fn close(&self) {
        // 连接池随客户端释放
        debug!(
            "Closing upstream client for endpoint: {:?}",
            self.endpoint.path
        );
    }
}
