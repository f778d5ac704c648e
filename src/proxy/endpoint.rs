use super::error_handler::write_error;
use super::observer::{Observable, Observer};
use crate::breaker::{BreakerError, RETRY_BREAKER};
use crate::client::{Client, ClientFactory, ClientTransport, Transport};
use crate::config::{EndpointConfig, MiddlewareConfig, Protocol};
use crate::error::AppError;
use crate::middleware::stream::{
    wrap_stream_request_body, ChunkTag, MetaStreamContext, RequestHead, ResponseHead, TrackedBody,
};
use crate::middleware::{build_middleware, RequestOptions};
use crate::r#const::{http_headers, retry_state_labels};
use crate::retry::{judge_retry_required, retry_feature_enabled, RetryStrategy};
use crate::selector::DoneInfo;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, HeaderValue, Method, Request, Response, Version};
use http_body_util::BodyExt;
use pin_project::{pin_project, pinned_drop};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{ready, Context, Poll};
use std::time::Instant;
use tracing::error;

/// 端点处理器
///
/// 端点构建时组装一次：客户端、流式包装、端点与全局中间件、
/// 重试策略、观察者；处理器归路由表所有，随路由表退役关闭
pub struct EndpointHandler {
    endpoint: Arc<EndpointConfig>,
    transport: Arc<dyn Transport>,
    client: Arc<dyn Client>,
    strategy: RetryStrategy,
    observer: Arc<dyn Observer>,
}

impl EndpointHandler {
    /// 构建端点处理器
    pub(crate) fn build(
        endpoint: &Arc<EndpointConfig>,
        global_middlewares: &[MiddlewareConfig],
        client_factory: &dyn ClientFactory,
        observable: &dyn Observable,
    ) -> Result<Arc<Self>, AppError> {
        let client = client_factory.build(endpoint)?;

        let assembled = (|| {
            let mut transport: Arc<dyn Transport> = Arc::new(ClientTransport(client.clone()));
            if endpoint.stream {
                transport = Arc::new(StreamTransport { next: transport });
            }
            // 端点自身的中间件在内层，全局中间件在最外层
            transport = build_middleware(&endpoint.middlewares, transport)?;
            transport = build_middleware(global_middlewares, transport)?;
            let strategy = RetryStrategy::prepare(endpoint)?;
            Ok::<_, AppError>((transport, strategy))
        })();

        // 构建失败时释放已创建的客户端，避免泄漏
        let (transport, strategy) = match assembled {
            Ok(parts) => parts,
            Err(err) => {
                client.close();
                return Err(err);
            }
        };

        let observer = observable.observe(endpoint);

        Ok(Arc::new(Self {
            endpoint: endpoint.clone(),
            transport,
            client,
            strategy,
            observer,
        }))
    }

    // 所属端点
    #[inline(always)]
    pub(crate) fn endpoint(&self) -> &Arc<EndpointConfig> {
        &self.endpoint
    }

    // 关闭底层客户端
    pub(crate) fn close(&self) {
        self.client.close();
    }

    /// 处理一个入站请求
    pub(crate) async fn handle(self: Arc<Self>, req: Request<Body>) -> Response<Body> {
        let start_time = Instant::now();
        let (mut parts, body) = req.into_parts();
        set_xff_header(&mut parts);

        let opts = RequestOptions::new(self.endpoint.clone());
        parts.extensions.insert(opts.clone());

        // 耗时守卫随响应体走完或本函数退出触发，恐慌时也保证恰好一次
        let latency_guard = LatencyGuard {
            observer: self.observer.clone(),
            method: parts.method.clone(),
            start_time,
        };

        if self.endpoint.stream {
            return self.proxy_stream(parts, body, opts, latency_guard).await;
        }

        // 缓冲模式：整体读入请求体，之后每次尝试从同一缓冲重放
        let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(err) => {
                let err = classify_body_read_error(err);
                return write_error(&parts.method, &parts.uri, &self.endpoint, &err, &self.observer);
            }
        };
        self.observer
            .handle_received_bytes(&parts.method, body_bytes.len() as u64);

        let deadline = start_time + self.strategy.timeout;
        let (response, last_err) = self.attempt_loop(&parts, &body_bytes, &opts, deadline).await;

        if last_err.is_some() || response.is_none() {
            let err = last_err
                .unwrap_or_else(|| AppError::Internal("no attempt produced a response".to_string()));
            return write_error(&parts.method, &parts.uri, &self.endpoint, &err, &self.observer);
        }

        self.relay_response(&parts, opts, response.unwrap(), latency_guard)
            .await
    }

    /// 重试循环，返回最后的响应或错误
    async fn attempt_loop(
        &self,
        parts: &Parts,
        body_bytes: &Bytes,
        opts: &Arc<RequestOptions>,
        deadline: Instant,
    ) -> (Option<Response<Body>>, Option<AppError>) {
        let marks = RetryMarks {
            observer: self.observer.clone(),
        };
        let attempts = self.strategy.attempts;
        let mut response: Option<Response<Body>> = None;
        let mut last_err: Option<AppError> = None;

        for i in 0..attempts {
            if i > 0 {
                // 重试特性被控制面关闭时不再发起
                if !retry_feature_enabled() {
                    break;
                }
                // 第二次及之后的尝试受进程级熔断器约束
                if let Err(BreakerError::NotAllowed) = RETRY_BREAKER.allow() {
                    marks.breaker(&parts.method, i);
                    break;
                }
            }

            if i + 1 >= attempts {
                opts.set_last_attempt(true);
            }

            // 整体期限已过时不再发起尝试
            let now = Instant::now();
            if now >= deadline {
                let err = AppError::Timeout;
                marks.failed(&parts.method, i, &err);
                last_err = Some(err);
                response = None;
                break;
            }

            // 单次尝试同时受单次超时与整体期限约束
            let try_timeout = self.strategy.per_try_timeout.min(deadline - now);
            let attempt_req =
                Request::from_parts(parts.clone(), Body::from(body_bytes.clone()));

            let result =
                match tokio::time::timeout(try_timeout, self.transport.round_trip(attempt_req))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AppError::Timeout),
                };

            match result {
                Err(err) => {
                    marks.failed(&parts.method, i, &err);
                    error!(
                        "Attempt at [{}/{}], failed to handle request: {}: {}",
                        i + 1,
                        attempts,
                        parts.uri,
                        err
                    );
                    last_err = Some(err);
                    response = None;
                    continue;
                }
                Ok(resp) => {
                    opts.push_upstream_status(resp.status().as_u16());
                    last_err = None;

                    if !judge_retry_required(&self.strategy.conditions, &resp) {
                        opts.set_last_attempt(true);
                        marks.success(&parts.method, i);
                        response = Some(resp);
                        break;
                    }

                    marks.failed(&parts.method, i, &AppError::AssertionFailed);
                    if i + 1 < attempts {
                        // 后续还会尝试：丢弃响应体（后台读尽避免连接泄漏），
                        // 保留状态与头部，供熔断器中止时回放给客户端
                        let (resp_parts, resp_body) = resp.into_parts();
                        tokio::spawn(async move {
                            let _ = resp_body.collect().await;
                        });
                        response = Some(Response::from_parts(resp_parts, Body::empty()));
                    } else {
                        // 没有下一次尝试了，响应原样透出
                        response = Some(resp);
                    }
                    // continue the retry loop
                }
            }
        }

        (response, last_err)
    }

    /// 把上游响应转发给客户端
    async fn relay_response(
        &self,
        parts: &Parts,
        opts: Arc<RequestOptions>,
        resp: Response<Body>,
        latency_guard: LatencyGuard,
    ) -> Response<Body> {
        let (resp_parts, resp_body) = resp.into_parts();
        let status = resp_parts.status.as_u16();

        // HTTP/2 上的 gRPC 响应若尚无 grpc-status，头部必须立刻送出，
        // 不能让 HTTP/2 栈补上 content-length: 0，下游代理会因此进入异常状态
        let suppress_length = self.endpoint.protocol == Protocol::Grpc
            && parts.version == Version::HTTP_2
            && !resp_parts.headers.contains_key(http_headers::grpc::STATUS);

        if is_no_buffering_response(&resp_parts.headers) {
            // SSE 或无长度分块响应：逐帧直通，流结束时统一结算
            let monitor = RelayMonitor {
                observer: self.observer.clone(),
                opts,
                method: parts.method.clone(),
                endpoint: self.endpoint.clone(),
                status,
                reply_md: resp_parts.headers.clone(),
                latency_guard: Some(latency_guard),
                finished: false,
                sent: 0,
            };
            let body = Body::new(MonitoredBody {
                inner: resp_body,
                monitor,
            });
            return Response::from_parts(resp_parts, body);
        }

        // 整体读入响应体后一次送出
        match resp_body.collect().await {
            Ok(collected) => {
                let trailers = collected.trailers().cloned();
                let bytes = collected.to_bytes();
                self.observer
                    .handle_sent_bytes(&parts.method, bytes.len() as u64);

                // gRPC 的回执元数据在 trailer 中，HTTP 在响应头中
                let reply_md = if self.endpoint.protocol == Protocol::Grpc {
                    trailers.clone().unwrap_or_default()
                } else {
                    resp_parts.headers.clone()
                };
                opts.done(DoneInfo {
                    err: None,
                    reply_md: Some(reply_md),
                });
                self.observer.handle_request(&parts.method, status, None);

                let body = RelayBody {
                    len: bytes.len() as u64,
                    data: Some(bytes).filter(|b| !b.is_empty()),
                    trailers,
                    declare_length: !suppress_length,
                };
                Response::from_parts(resp_parts, Body::new(body))
            }
            Err(err) => {
                // 响应头已定，读失败只能记录并通知选择器，不再改写状态
                self.observer.handle_sent_bytes(&parts.method, 0);
                opts.done(DoneInfo {
                    err: Some(err.to_string()),
                    reply_md: None,
                });
                error!(
                    "Failed to copy backend response body to client: [{}] {} {} {}",
                    self.endpoint.protocol.as_str(),
                    parts.method,
                    self.endpoint.path,
                    err
                );
                self.observer.handle_request(
                    &parts.method,
                    status,
                    Some(&AppError::Upstream(err.to_string())),
                );
                Response::from_parts(resp_parts, Body::empty())
            }
        }
        // 耗时守卫在此落下，晚于终态请求事件
    }

    /// 流式转发子流程
    ///
    /// 单次尝试，强制逐帧刷出；请求与响应流体都被跟踪，
    /// 双方关闭后流上下文触发 on_finish
    async fn proxy_stream(
        &self,
        parts: Parts,
        body: Body,
        opts: Arc<RequestOptions>,
        latency_guard: LatencyGuard,
    ) -> Response<Body> {
        opts.set_last_attempt(true);

        let stream_ctx = Arc::new(MetaStreamContext::default());
        opts.values().set(stream_ctx.clone());

        // 耗时观察延迟到流结束；流未建立时随上下文一同落下
        let guard_slot = Arc::new(Mutex::new(Some(latency_guard)));
        {
            let slot = guard_slot.clone();
            stream_ctx.on_finish(move |_| {
                slot.lock().unwrap().take();
            });
        }

        let method = parts.method.clone();
        let uri = parts.uri.clone();
        let mut req = Request::from_parts(parts, body);
        wrap_stream_request_body(&mut req, &stream_ctx);

        let result = match tokio::time::timeout(
            self.strategy.timeout,
            self.transport.round_trip(req),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout),
        };

        match result {
            Ok(resp) => {
                opts.done(DoneInfo {
                    err: None,
                    reply_md: Some(resp.headers().clone()),
                });
                self.observer
                    .handle_request(&method, resp.status().as_u16(), None);
                stream_ctx.do_on_response();
                resp
            }
            Err(err) => {
                opts.done(DoneInfo {
                    err: Some(err.to_string()),
                    reply_md: None,
                });
                write_error(&method, &uri, &self.endpoint, &err, &self.observer)
            }
        }
    }
}

// 流式端点的内层传输包装
//
// 记录请求与响应快照，并把响应流体接入跟踪；位于中间件之内，
// 中间件观察到的响应体即被跟踪的流体
struct StreamTransport {
    next: Arc<dyn Transport>,
}

#[async_trait]
impl Transport for StreamTransport {
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Body>, AppError> {
        let Some(opts) = RequestOptions::from_request(&req) else {
            return self.next.round_trip(req).await;
        };
        let Some(stream_ctx) = opts.values().get::<MetaStreamContext>() else {
            return self.next.round_trip(req).await;
        };

        stream_ctx.set_request_head(RequestHead {
            method: req.method().clone(),
            uri: req.uri().clone(),
        });

        let resp = self.next.round_trip(req).await?;
        stream_ctx.set_response_head(ResponseHead {
            status: resp.status(),
        });

        let (parts, body) = resp.into_parts();
        let body = TrackedBody::wrap(body, ChunkTag::Response, stream_ctx);
        Ok(Response::from_parts(parts, body))
    }
}

// 重试指标三分法
//
// 首次尝试不是重试，三类事件都不发；取消类失败不计入指标但仍反馈熔断器
struct RetryMarks {
    observer: Arc<dyn Observer>,
}

impl RetryMarks {
    fn success(&self, method: &Method, i: u32) {
        if i > 0 {
            self.observer
                .handle_retry(method, retry_state_labels::SUCCESS);
            RETRY_BREAKER.mark_success();
        }
    }

    fn failed(&self, method: &Method, i: u32, err: &AppError) {
        if i > 0 {
            if !err.is_cancellation() {
                self.observer
                    .handle_retry(method, retry_state_labels::FAILED);
            }
            RETRY_BREAKER.mark_failed();
        }
    }

    fn breaker(&self, method: &Method, i: u32) {
        if i > 0 {
            self.observer
                .handle_retry(method, retry_state_labels::BREAKER);
        }
    }
}

// 耗时观察守卫，落下时恰好观察一次
struct LatencyGuard {
    observer: Arc<dyn Observer>,
    method: Method,
    start_time: Instant,
}

impl Drop for LatencyGuard {
    fn drop(&mut self) {
        self.observer
            .handle_latency(&self.method, self.start_time.elapsed());
    }
}

// 追加客户端地址到 X-Forwarded-For
//
// 头部存在空值时视为上游要求不填充的哨兵
fn set_xff_header(parts: &mut Parts) {
    let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() else {
        return;
    };
    let client_ip = addr.ip().to_string();

    let mut prior = Vec::new();
    for value in parts.headers.get_all(http_headers::X_FORWARDED_FOR) {
        if value.is_empty() {
            return;
        }
        if let Ok(value) = value.to_str() {
            prior.push(value.to_string());
        }
    }

    let forwarded = if prior.is_empty() {
        client_ip
    } else {
        format!("{}, {}", prior.join(", "), client_ip)
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded) {
        parts.headers.insert(http_headers::X_FORWARDED_FOR, value);
    }
}

// 归类入站请求体的读取错误
//
// 错误链中出现断连类 IO 错误说明客户端已经离开，
// 按客户端取消处理（499），其余仍视为不透明的上游侧失败
fn classify_body_read_error(err: axum::Error) -> AppError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<std::io::Error>() {
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ) {
                return AppError::ClientDisconnected;
            }
            break;
        }
        source = current.source();
    }
    AppError::Upstream(format!("Failed to read request body: {}", err))
}

// 判断响应是否要求不缓冲
//
// SSE 内容类型，或声明分块且没有内容长度
fn is_no_buffering_response(headers: &HeaderMap) -> bool {
    let is_event_stream = headers
        .get(http_headers::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|s| s.contains(http_headers::content_types::EVENT_STREAM));

    let is_chunked = headers
        .get(http_headers::TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|s| s.contains(http_headers::transfer_encodings::CHUNKED));
    let has_length = headers.contains_key(http_headers::CONTENT_LENGTH);

    is_event_stream || (is_chunked && !has_length)
}

// 缓冲模式的出站响应体：数据一帧，trailer 一帧
//
// declare_length 为 false 时不暴露确切长度（gRPC 头部立即刷出的场景）
struct RelayBody {
    data: Option<Bytes>,
    trailers: Option<HeaderMap>,
    declare_length: bool,
    len: u64,
}

impl http_body::Body for RelayBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        if let Some(data) = self.data.take() {
            return Poll::Ready(Some(Ok(http_body::Frame::data(data))));
        }
        if let Some(trailers) = self.trailers.take() {
            return Poll::Ready(Some(Ok(http_body::Frame::trailers(trailers))));
        }
        Poll::Ready(None)
    }

    fn is_end_stream(&self) -> bool {
        self.data.is_none() && self.trailers.is_none()
    }

    fn size_hint(&self) -> http_body::SizeHint {
        if self.declare_length && self.trailers.is_none() {
            http_body::SizeHint::with_exact(self.len)
        } else {
            http_body::SizeHint::default()
        }
    }
}

// 直通响应的结算器
//
// 流结束、出错或被客户端丢弃时恰好结算一次：
// 记录发送字节数，回报选择器，发出终态请求事件，最后落下耗时守卫
struct RelayMonitor {
    observer: Arc<dyn Observer>,
    opts: Arc<RequestOptions>,
    method: Method,
    endpoint: Arc<EndpointConfig>,
    status: u16,
    reply_md: HeaderMap,
    latency_guard: Option<LatencyGuard>,
    finished: bool,
    sent: u64,
}

impl RelayMonitor {
    fn finish(&mut self, err: Option<String>) {
        if self.finished {
            return;
        }
        self.finished = true;

        self.observer.handle_sent_bytes(&self.method, self.sent);
        match err {
            None => {
                self.opts.done(DoneInfo {
                    err: None,
                    reply_md: Some(self.reply_md.clone()),
                });
                self.observer.handle_request(&self.method, self.status, None);
            }
            Some(message) => {
                self.opts.done(DoneInfo {
                    err: Some(message.clone()),
                    reply_md: None,
                });
                error!(
                    "Failed to copy backend response body to client: [{}] {} {} {} {}",
                    self.endpoint.protocol.as_str(),
                    self.method,
                    self.endpoint.path,
                    self.sent,
                    message
                );
                self.observer.handle_request(
                    &self.method,
                    self.status,
                    Some(&AppError::Upstream(message)),
                );
            }
        }
        self.latency_guard.take();
    }
}

// 逐帧直通的响应体，随帧累计字节并在终态触发结算
#[pin_project(PinnedDrop)]
struct MonitoredBody {
    #[pin]
    inner: Body,
    monitor: RelayMonitor,
}

impl http_body::Body for MonitoredBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        match ready!(this.inner.poll_frame(cx)) {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    this.monitor.sent += data.len() as u64;
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(err)) => {
                this.monitor.finish(Some(err.to_string()));
                Poll::Ready(Some(Err(err)))
            }
            None => {
                this.monitor.finish(None);
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.monitor.finished
    }

    fn size_hint(&self) -> http_body::SizeHint {
        self.inner.size_hint()
    }
}

#[pinned_drop]
impl PinnedDrop for MonitoredBody {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        this.monitor.finish(Some("client disconnected".to_string()));
    }
}
