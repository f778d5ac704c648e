use apigate::client::{Client, ClientFactory, Transport};
use apigate::config::{
    EndpointConfig, GatewayConfig, MiddlewareConfig, Protocol, RetryConditionConfig, RetryConfig,
};
use apigate::error::AppError;
use apigate::proxy::{AbortHandler, Proxy};
use apigate::METRICS;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::panic::panic_any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type Handler =
    Box<dyn Fn(Request<Body>) -> BoxFuture<'static, Result<Response<Body>, AppError>> + Send + Sync>;

// 以闭包充当上游传输的测试客户端
struct FnClient {
    handler: Arc<Handler>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for FnClient {
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Body>, AppError> {
        (self.handler)(req).await
    }
}

impl Client for FnClient {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct FnFactory {
    handler: Arc<Handler>,
    closed: Arc<AtomicBool>,
}

impl ClientFactory for FnFactory {
    fn build(&self, _endpoint: &Arc<EndpointConfig>) -> Result<Arc<dyn Client>, AppError> {
        Ok(Arc::new(FnClient {
            handler: self.handler.clone(),
            closed: self.closed.clone(),
        }))
    }
}

fn mock_factory(
    handler: impl Fn(Request<Body>) -> BoxFuture<'static, Result<Response<Body>, AppError>>
        + Send
        + Sync
        + 'static,
) -> (Arc<FnFactory>, Arc<AtomicBool>) {
    let closed = Arc::new(AtomicBool::new(false));
    (
        Arc::new(FnFactory {
            handler: Arc::new(Box::new(handler)),
            closed: closed.clone(),
        }),
        closed,
    )
}

fn endpoint(path: &str, method: &str) -> EndpointConfig {
    EndpointConfig {
        path: path.to_string(),
        method: method.to_string(),
        host: None,
        protocol: Protocol::Http,
        stream: false,
        middlewares: Vec::new(),
        retry: None,
        backends: Vec::new(),
        balance: Default::default(),
        service: String::new(),
        base_path: String::new(),
        http_client: Default::default(),
    }
}

fn gateway_config(endpoints: Vec<EndpointConfig>) -> GatewayConfig {
    GatewayConfig {
        name: "Test".to_string(),
        middlewares: vec![MiddlewareConfig::named("logging")],
        endpoints,
    }
}

async fn read_body(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

fn retry_state_count(method: &str, path: &str, state: &str) -> f64 {
    METRICS
        .requests_retry_state()
        .with_label_values(&["HTTP", method, path, "", "", state])
        .get()
}

/// 命中端点时响应原样转发：状态、头部与回显的请求体
#[tokio::test]
async fn test_proxy_happy_path() {
    let (factory, _) = mock_factory(|req| {
        Box::pin(async move {
            let mut response = Response::new(req.into_body());
            response
                .headers_mut()
                .insert("testKey", HeaderValue::from_static("testValue"));
            Ok(response)
        })
    });

    let proxy = Proxy::new(factory);
    proxy
        .update(&gateway_config(vec![endpoint("/foo/bar", "GET")]))
        .unwrap();

    let req = Request::builder()
        .method(Method::GET)
        .uri("/foo/bar")
        .body(Body::from("ok"))
        .unwrap();
    let response = proxy.serve(req).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("testKey").unwrap(),
        &HeaderValue::from_static("testValue")
    );
    assert_eq!(read_body(response).await, Bytes::from("ok"));
}

/// 未匹配的请求返回 404，计入 /404 合成路径标签
#[tokio::test]
async fn test_proxy_not_found() {
    let (factory, _) = mock_factory(|_req| {
        Box::pin(async move { Ok(Response::new(Body::empty())) })
    });

    let proxy = Proxy::new(factory);
    proxy
        .update(&gateway_config(vec![endpoint("/foo/bar", "GET")]))
        .unwrap();

    let before = METRICS
        .requests_code_total()
        .with_label_values(&["HTTP", "GET", "/404", "404", "", ""])
        .get();

    let req = Request::builder()
        .method(Method::GET)
        .uri("/notfound")
        .body(Body::from("notfound"))
        .unwrap();
    let response = proxy.serve(req).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(read_body(response).await, Bytes::from("404 page not found\n"));

    let after = METRICS
        .requests_code_total()
        .with_label_values(&["HTTP", "GET", "/404", "404", "", ""])
        .get();
    assert_eq!(after - before, 1.0);
}

/// 首次 500 触发重试，客户端只看到后续的成功响应
#[tokio::test]
async fn test_proxy_retry_to_success() {
    let retryable = Arc::new(AtomicBool::new(true));

    let flag = retryable.clone();
    let (factory, _) = mock_factory(move |req| {
        let flag = flag.clone();
        Box::pin(async move {
            if flag.swap(false, Ordering::SeqCst) {
                let mut response = Response::new(Body::empty());
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                return Ok(response);
            }
            let mut response = Response::new(req.into_body());
            response
                .headers_mut()
                .insert("testKey", HeaderValue::from_static("testValue"));
            Ok(response)
        })
    });

    let mut retry_endpoint = endpoint("/retryable", "POST");
    retry_endpoint.retry = Some(RetryConfig {
        attempts: 3,
        per_try_timeout: None,
        timeout: None,
        conditions: vec![RetryConditionConfig::ByStatusCode("500-504".to_string())],
    });

    let proxy = Proxy::new(factory);
    proxy
        .update(&gateway_config(vec![retry_endpoint]))
        .unwrap();

    let before = retry_state_count("POST", "/retryable", "true");

    let req = Request::builder()
        .method(Method::POST)
        .uri("/retryable")
        .body(Body::from("retryable"))
        .unwrap();
    let response = proxy.serve(req).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("testKey").unwrap(),
        &HeaderValue::from_static("testValue")
    );
    assert_eq!(read_body(response).await, Bytes::from("retryable"));

    let after = retry_state_count("POST", "/retryable", "true");
    assert_eq!(after - before, 1.0);
}

/// attempts=1 时命中重试条件的响应原样透出，不发起重试
#[tokio::test]
async fn test_single_attempt_surfaces_retriable_response() {
    let (factory, _) = mock_factory(|_req| {
        Box::pin(async move {
            let mut response = Response::new(Body::from("upstream failed"));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            Ok(response)
        })
    });

    let mut single = endpoint("/single", "GET");
    single.retry = Some(RetryConfig {
        attempts: 1,
        per_try_timeout: None,
        timeout: None,
        conditions: vec![RetryConditionConfig::ByStatusCode("500-504".to_string())],
    });

    let proxy = Proxy::new(factory);
    proxy.update(&gateway_config(vec![single])).unwrap();

    let before_true = retry_state_count("GET", "/single", "true");
    let before_false = retry_state_count("GET", "/single", "false");

    let req = Request::builder()
        .method(Method::GET)
        .uri("/single")
        .body(Body::empty())
        .unwrap();
    let response = proxy.serve(req).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(read_body(response).await, Bytes::from("upstream failed"));

    // 首次尝试不是重试，不产生任何重试事件
    assert_eq!(retry_state_count("GET", "/single", "true"), before_true);
    assert_eq!(retry_state_count("GET", "/single", "false"), before_false);
}

/// gRPC 端点的超时错误映射为 HTTP 200 + Grpc-Status 头
#[tokio::test]
async fn test_grpc_error_mapping() {
    let (factory, _) = mock_factory(|_req| Box::pin(async move { Err(AppError::Timeout) }));

    let mut grpc = endpoint("/pkg.Service/Call", "POST");
    grpc.protocol = Protocol::Grpc;

    let proxy = Proxy::new(factory);
    proxy.update(&gateway_config(vec![grpc])).unwrap();

    let req = Request::builder()
        .method(Method::POST)
        .uri("/pkg.Service/Call")
        .body(Body::empty())
        .unwrap();
    let response = proxy.serve(req).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        &HeaderValue::from_static("application/grpc")
    );
    assert_eq!(
        response.headers().get("grpc-status").unwrap(),
        &HeaderValue::from(4u16)
    );
    assert_eq!(
        response.headers().get("grpc-message").unwrap().to_str().unwrap(),
        AppError::Timeout.to_string()
    );
}

/// 上游 trailer 随响应体一同转发
#[tokio::test]
async fn test_trailers_relayed() {
    let (factory, _) = mock_factory(|_req| {
        Box::pin(async move {
            let mut trailers = HeaderMap::new();
            trailers.insert("grpc-status", HeaderValue::from_static("0"));

            let frames = futures::stream::iter(vec![
                Ok::<_, std::io::Error>(http_body::Frame::data(Bytes::from("grpc-payload"))),
                Ok(http_body::Frame::trailers(trailers)),
            ]);
            let body = Body::new(http_body_util::StreamBody::new(frames));
            Ok(Response::new(body))
        })
    });

    let proxy = Proxy::new(factory);
    proxy
        .update(&gateway_config(vec![endpoint("/trailered", "GET")]))
        .unwrap();

    let req = Request::builder()
        .method(Method::GET)
        .uri("/trailered")
        .body(Body::empty())
        .unwrap();
    let response = proxy.serve(req).await;
    assert_eq!(response.status(), StatusCode::OK);

    use http_body_util::BodyExt;
    let collected = response.into_body().collect().await.unwrap();
    let trailers = collected.trailers().cloned().expect("trailers missing");
    assert_eq!(
        trailers.get("grpc-status").unwrap(),
        &HeaderValue::from_static("0")
    );
    assert_eq!(collected.to_bytes(), Bytes::from("grpc-payload"));
}

/// 中止信号静默丢弃，其余恐慌转 502，两者都恰好观察一次耗时
#[tokio::test]
async fn test_panic_isolation() {
    let (factory, _) = mock_factory(|req| {
        Box::pin(async move {
            if req.uri().path() == "/panic/abort" {
                panic_any(AbortHandler);
            }
            panic!("boom");
        })
    });

    let proxy = Proxy::new(factory);
    proxy
        .update(&gateway_config(vec![
            endpoint("/panic/abort", "GET"),
            endpoint("/panic/other", "GET"),
        ]))
        .unwrap();

    let latency_count = |path: &str| {
        METRICS
            .requests_duration_seconds()
            .with_label_values(&["HTTP", "GET", path, "", ""])
            .get_sample_count()
    };

    // 中止信号：没有 502
    let before = latency_count("/panic/abort");
    let req = Request::builder()
        .method(Method::GET)
        .uri("/panic/abort")
        .body(Body::empty())
        .unwrap();
    let response = proxy.serve(req).await;
    assert_ne!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(latency_count("/panic/abort") - before, 1);

    // 其他恐慌：502
    let before = latency_count("/panic/other");
    let req = Request::builder()
        .method(Method::GET)
        .uri("/panic/other")
        .body(Body::empty())
        .unwrap();
    let response = proxy.serve(req).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(latency_count("/panic/other") - before, 1);
}

/// X-Forwarded-For 追加客户端地址，空值哨兵抑制填充
#[tokio::test]
async fn test_xff_header() {
    let seen = Arc::new(Mutex::new(Vec::<Option<String>>::new()));

    let sink = seen.clone();
    let (factory, _) = mock_factory(move |req| {
        let sink = sink.clone();
        Box::pin(async move {
            let value = req
                .headers()
                .get("x-forwarded-for")
                .map(|v| v.to_str().unwrap().to_string());
            sink.lock().unwrap().push(value);
            Ok(Response::new(Body::empty()))
        })
    });

    let proxy = Proxy::new(factory);
    proxy
        .update(&gateway_config(vec![endpoint("/xff", "GET")]))
        .unwrap();

    let client_addr: SocketAddr = "10.0.0.9:51234".parse().unwrap();

    // 没有历史记录：写入客户端地址
    let mut req = Request::builder()
        .method(Method::GET)
        .uri("/xff")
        .body(Body::empty())
        .unwrap();
    req.extensions_mut().insert(ConnectInfo(client_addr));
    proxy.serve(req).await;

    // 已有历史记录：折叠追加
    let mut req = Request::builder()
        .method(Method::GET)
        .uri("/xff")
        .header("x-forwarded-for", "1.2.3.4")
        .body(Body::empty())
        .unwrap();
    req.extensions_mut().insert(ConnectInfo(client_addr));
    proxy.serve(req).await;

    // 空值哨兵：不填充
    let mut req = Request::builder()
        .method(Method::GET)
        .uri("/xff")
        .header("x-forwarded-for", "")
        .body(Body::empty())
        .unwrap();
    req.extensions_mut().insert(ConnectInfo(client_addr));
    proxy.serve(req).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].as_deref(), Some("10.0.0.9"));
    assert_eq!(seen[1].as_deref(), Some("1.2.3.4, 10.0.0.9"));
    assert_eq!(seen[2].as_deref(), Some(""));
}

/// SSE 响应逐帧直通，发送字节在流走完后结算
#[tokio::test]
async fn test_sse_passthrough() {
    let (factory, _) = mock_factory(|_req| {
        Box::pin(async move {
            let frames = futures::stream::iter(vec![
                Ok::<_, std::io::Error>(http_body::Frame::data(Bytes::from("data: one\n\n"))),
                Ok(http_body::Frame::data(Bytes::from("data: two\n\n"))),
            ]);
            let mut response =
                Response::new(Body::new(http_body_util::StreamBody::new(frames)));
            response.headers_mut().insert(
                "content-type",
                HeaderValue::from_static("text/event-stream"),
            );
            Ok(response)
        })
    });

    let proxy = Proxy::new(factory);
    proxy
        .update(&gateway_config(vec![endpoint("/events", "GET")]))
        .unwrap();

    let tx_bytes = || {
        METRICS
            .requests_tx_bytes()
            .with_label_values(&["HTTP", "GET", "/events", "", ""])
            .get()
    };
    let before = tx_bytes();

    let req = Request::builder()
        .method(Method::GET)
        .uri("/events")
        .body(Body::empty())
        .unwrap();
    let response = proxy.serve(req).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_body(response).await;
    assert_eq!(body, Bytes::from("data: one\n\ndata: two\n\n"));
    assert_eq!(tx_bytes() - before, body.len() as f64);
}

/// 读入站请求体时客户端断开，按客户端取消映射 499
#[tokio::test]
async fn test_client_disconnect_maps_to_499() {
    let (factory, _) = mock_factory(|_req| {
        Box::pin(async move { Ok(Response::new(Body::empty())) })
    });

    let proxy = Proxy::new(factory);
    proxy
        .update(&gateway_config(vec![endpoint("/interrupted", "POST")]))
        .unwrap();

    let code_count = || {
        METRICS
            .requests_code_total()
            .with_label_values(&["HTTP", "POST", "/interrupted", "499", "", ""])
            .get()
    };
    let before = code_count();

    // 请求体以连接复位告终，模拟客户端中途离开
    let broken_body = Body::from_stream(futures::stream::once(async {
        Err::<Bytes, std::io::Error>(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ))
    }));
    let req = Request::builder()
        .method(Method::POST)
        .uri("/interrupted")
        .body(broken_body)
        .unwrap();
    let response = proxy.serve(req).await;

    assert_eq!(response.status().as_u16(), 499);
    assert_eq!(code_count() - before, 1.0);
}

/// 每次尝试上游都读到一份完整且逐字节一致的请求体
#[tokio::test]
async fn test_request_body_replayed_across_attempts() {
    let bodies = Arc::new(Mutex::new(Vec::<Bytes>::new()));

    let sink = bodies.clone();
    let (factory, _) = mock_factory(move |req| {
        let sink = sink.clone();
        Box::pin(async move {
            let body = axum::body::to_bytes(req.into_body(), usize::MAX)
                .await
                .unwrap();
            sink.lock().unwrap().push(body);

            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            Ok(response)
        })
    });

    let mut replayed = endpoint("/replayed", "POST");
    replayed.retry = Some(RetryConfig {
        attempts: 3,
        per_try_timeout: None,
        timeout: None,
        conditions: vec![RetryConditionConfig::ByStatusCode("500-504".to_string())],
    });

    let proxy = Proxy::new(factory);
    proxy.update(&gateway_config(vec![replayed])).unwrap();

    let req = Request::builder()
        .method(Method::POST)
        .uri("/replayed")
        .body(Body::from("replay-me"))
        .unwrap();
    let response = proxy.serve(req).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let seen = bodies.lock().unwrap();
    assert_eq!(seen.len(), 3);
    for body in seen.iter() {
        assert_eq!(body, &Bytes::from("replay-me"));
    }
}

/// 接收与发送字节计数跟随请求与响应体
#[tokio::test]
async fn test_byte_accounting() {
    let (factory, _) = mock_factory(|req| {
        Box::pin(async move { Ok(Response::new(req.into_body())) })
    });

    let proxy = Proxy::new(factory);
    proxy
        .update(&gateway_config(vec![endpoint("/accounted", "POST")]))
        .unwrap();

    let counter = |vec: &prometheus::CounterVec| {
        vec.with_label_values(&["HTTP", "POST", "/accounted", "", ""]).get()
    };
    let rx_before = counter(METRICS.requests_rx_bytes());
    let tx_before = counter(METRICS.requests_tx_bytes());

    let req = Request::builder()
        .method(Method::POST)
        .uri("/accounted")
        .body(Body::from("0123456789"))
        .unwrap();
    let response = proxy.serve(req).await;
    assert_eq!(read_body(response).await.len(), 10);

    assert_eq!(counter(METRICS.requests_rx_bytes()) - rx_before, 10.0);
    assert_eq!(counter(METRICS.requests_tx_bytes()) - tx_before, 10.0);
}
