use super::observer::Observer;
use crate::config::{EndpointConfig, Protocol};
use crate::error::AppError;
use crate::metrics::METRICS;
use crate::r#const::{http_headers, protocol_labels, synthetic_paths};
use axum::body::Body;
use http::{HeaderValue, Method, Request, Response, StatusCode, Uri};
use std::sync::Arc;
use tracing::error;

// 客户端提前关闭连接的非标准状态码
const STATUS_CLIENT_CLOSED: u16 = 499;

/// 将终态错误写成客户端可见的响应
///
/// gRPC 端点使用 HTTP 200 搭配 Grpc-Status / Grpc-Message 头
pub(crate) fn write_error(
    method: &Method,
    uri: &Uri,
    endpoint: &EndpointConfig,
    err: &AppError,
    observer: &Arc<dyn Observer>,
) -> Response<Body> {
    let status_code = match err {
        AppError::Canceled | AppError::ClientDisconnected => STATUS_CLIENT_CLOSED,
        AppError::Timeout => StatusCode::GATEWAY_TIMEOUT.as_u16(),
        _ => {
            error!("Failed to handle request: {}: {}", uri, err);
            StatusCode::BAD_GATEWAY.as_u16()
        }
    };

    observer.handle_request(method, status_code, Some(err));

    let mut response = Response::new(Body::empty());

    if endpoint.protocol == Protocol::Grpc {
        // gRPC 的状态经由头部携带，外层 HTTP 状态固定为 200
        let headers = response.headers_mut();
        headers.insert(
            http_headers::CONTENT_TYPE,
            HeaderValue::from_static(http_headers::grpc::CONTENT_TYPE),
        );
        headers.insert(
            http_headers::grpc::STATUS,
            HeaderValue::from(to_grpc_code(status_code)),
        );
        if let Ok(message) = HeaderValue::from_str(&err.to_string()) {
            headers.insert(http_headers::grpc::MESSAGE, message);
        }
        *response.status_mut() = StatusCode::OK;
        return response;
    }

    *response.status_mut() =
        StatusCode::from_u16(status_code).unwrap_or(StatusCode::BAD_GATEWAY);
    response
        .headers_mut()
        .insert(
            http_headers::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
    response
}

// HTTP 状态码到 gRPC 状态码的转换
//
// 参见 google.golang.org/genproto rpc code 定义
fn to_grpc_code(status_code: u16) -> u16 {
    match status_code {
        200 => 0,
        400 => 3,
        401 => 16,
        403 => 7,
        404 => 5,
        409 => 10,
        429 => 8,
        499 => 1,
        500 => 13,
        501 => 12,
        503 => 14,
        504 => 4,
        _ => 2,
    }
}

// 按 http.Error 惯例构造纯文本响应
fn plain_text_response(status: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(format!("{}\n", message)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http_headers::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
        .headers_mut()
        .insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    response
}

// 记录一次未匹配请求的访问日志
fn log_unmatched(req: &Request<Body>, code: u16, message: &str) {
    error!(
        source = "accesslog",
        host = %req
            .headers()
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(""),
        method = %req.method(),
        path = %req.uri().path(),
        query = %req.uri().query().unwrap_or(""),
        user_agent = %req
            .headers()
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(""),
        code = code,
        error = message,
    );
}

/// 默认 404 处理器
pub(crate) fn not_found_handler(req: Request<Body>) -> Response<Body> {
    let code = StatusCode::NOT_FOUND;
    let message = "404 page not found";
    log_unmatched(&req, code.as_u16(), message);

    METRICS
        .requests_code_total()
        .with_label_values(&[
            protocol_labels::HTTP,
            req.method().as_str(),
            synthetic_paths::NOT_FOUND,
            &code.as_u16().to_string(),
            "",
            "",
        ])
        .inc();

    plain_text_response(code, message)
}

/// 默认 405 处理器
pub(crate) fn method_not_allowed_handler(req: Request<Body>) -> Response<Body> {
    let code = StatusCode::METHOD_NOT_ALLOWED;
    let message = "Method Not Allowed";
    log_unmatched(&req, code.as_u16(), message);

    METRICS
        .requests_code_total()
        .with_label_values(&[
            protocol_labels::HTTP,
            req.method().as_str(),
            synthetic_paths::METHOD_NOT_ALLOWED,
            &code.as_u16().to_string(),
            "",
            "",
        ])
        .inc();

    plain_text_response(code, message)
}
